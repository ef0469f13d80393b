//! TrackingPipeline for combining feature extraction, scoring and tracking.

use crate::tracker::{
    AffinityOracle, CellTracker, FeatureBundle, FrameReport, TrackerConfig, TrackingError,
};
use ndarray::{Array3, Axis};
use rayon::prelude::*;

use super::FeatureExtractor;

/// A combined tracker that bundles feature extraction and an affinity oracle
/// with the `CellTracker`.
///
/// Labels are expected to be renumbered `1..=N` in every frame; the cell count
/// of a frame is its largest label.
pub struct TrackingPipeline<E: FeatureExtractor, O: AffinityOracle> {
    extractor: E,
    oracle: O,
    tracker: CellTracker,
    labels: Array3<u32>,
}

impl<E: FeatureExtractor, O: AffinityOracle> TrackingPipeline<E, O> {
    /// Create a new pipeline over a `[frames, H, W]` label volume.
    pub fn new(
        labels: Array3<u32>,
        extractor: E,
        oracle: O,
        config: TrackerConfig,
    ) -> Result<Self, TrackingError> {
        Ok(Self {
            extractor,
            oracle,
            tracker: CellTracker::new(config)?,
            labels,
        })
    }

    /// Number of frames in the label volume.
    pub fn frame_count(&self) -> usize {
        self.labels.len_of(Axis(0))
    }

    /// Extract every cell of `frame` in parallel.
    pub fn extract_frame(&self, frame: usize) -> Result<Vec<FeatureBundle>, TrackingError> {
        let frames = self.frame_count();
        if frame >= frames {
            return Err(TrackingError::FrameOutOfRange { frame, frames });
        }
        let num_cells = self
            .labels
            .index_axis(Axis(0), frame)
            .iter()
            .copied()
            .max()
            .unwrap_or(0);

        let extractor = &self.extractor;
        (1..=num_cells)
            .into_par_iter()
            .map(|cell_id| {
                extractor
                    .extract(frame, cell_id)
                    .map_err(|e| TrackingError::Extractor {
                        frame,
                        cell_id,
                        source: e.into(),
                    })
            })
            .collect()
    }

    /// Process the next unprocessed frame.
    ///
    /// # Returns
    /// The frame's report, or `None` once every frame has been tracked.
    pub fn process_frame(&mut self) -> Result<Option<FrameReport>, TrackingError> {
        let frame = self.tracker.frame_count();
        if frame >= self.frame_count() {
            return Ok(None);
        }

        let cells = self.extract_frame(frame)?;
        let labels = self.labels.index_axis(Axis(0), frame);
        let report = if frame == 0 {
            self.tracker.initialize(labels, cells)?
        } else {
            self.tracker.update(&mut self.oracle, labels, cells)?
        };
        Ok(Some(report))
    }

    /// Track every remaining frame in order.
    pub fn track_cells(&mut self) -> Result<Vec<FrameReport>, TrackingError> {
        let mut reports = Vec::new();
        while let Some(report) = self.process_frame()? {
            reports.push(report);
        }
        Ok(reports)
    }

    /// The tracked volume so far, one plane per processed frame.
    pub fn tracked_volume(&self) -> Array3<u32> {
        self.tracker.volume().to_array3()
    }

    /// Get a reference to the label volume.
    pub fn labels(&self) -> &Array3<u32> {
        &self.labels
    }

    /// Get a reference to the underlying extractor.
    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Get a reference to the underlying oracle.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Get a mutable reference to the underlying oracle.
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Get a reference to the underlying tracker.
    pub fn tracker(&self) -> &CellTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::FeatureBundleBuilder;
    use crate::tracker::{AffinityBatch, FeatureKind};
    use ndarray::{Array2, arr3};

    struct MockOracle {
        calls: usize,
    }

    impl AffinityOracle for MockOracle {
        type Error = std::convert::Infallible;

        fn predict(&mut self, batch: &AffinityBatch) -> Result<Array2<f32>, Self::Error> {
            self.calls += 1;
            let mut out = Array2::zeros((batch.len(), 3));
            out.column_mut(0).fill(1.0);
            Ok(out)
        }
    }

    #[derive(Debug)]
    struct Unmeasurable;

    impl std::fmt::Display for Unmeasurable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("unmeasurable cell")
        }
    }

    impl std::error::Error for Unmeasurable {}

    fn centroid_config() -> TrackerConfig {
        TrackerConfig::with_features([FeatureKind::Distance])
    }

    #[test]
    fn test_tracking_pipeline() {
        let labels = arr3(&[[[1, 0]], [[0, 1]], [[1, 0]]]);
        let extractor = |frame: usize, _cell: u32| -> Result<FeatureBundle, Unmeasurable> {
            Ok(FeatureBundleBuilder::new()
                .centroid(0.0, frame as f32)
                .build())
        };
        let mut pipeline =
            TrackingPipeline::new(labels, extractor, MockOracle { calls: 0 }, centroid_config())
                .unwrap();

        let reports = pipeline.track_cells().unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(pipeline.oracle().calls, 2);
        assert_eq!(pipeline.tracker().tracks().len(), 1);
        assert_eq!(pipeline.tracked_volume(), arr3(&[[[1, 0]], [[0, 1]], [[1, 0]]]));
        assert!(pipeline.process_frame().unwrap().is_none());
    }

    #[test]
    fn test_extract_frame_out_of_range() {
        let labels = arr3(&[[[1, 0]]]);
        let extractor = |_frame: usize, _cell: u32| -> Result<FeatureBundle, Unmeasurable> {
            Ok(FeatureBundleBuilder::new().centroid(0.0, 0.0).build())
        };
        let pipeline =
            TrackingPipeline::new(labels, extractor, MockOracle { calls: 0 }, centroid_config())
                .unwrap();

        assert_eq!(pipeline.extract_frame(0).unwrap().len(), 1);
        assert!(matches!(
            pipeline.extract_frame(1),
            Err(TrackingError::FrameOutOfRange {
                frame: 1,
                frames: 1
            })
        ));
    }

    #[test]
    fn test_extractor_errors_propagate() {
        let labels = arr3(&[[[1, 2]]]);
        let extractor = |_frame: usize, cell: u32| -> Result<FeatureBundle, Unmeasurable> {
            if cell == 2 {
                Err(Unmeasurable)
            } else {
                Ok(FeatureBundleBuilder::new().centroid(0.0, 0.0).build())
            }
        };
        let mut pipeline =
            TrackingPipeline::new(labels, extractor, MockOracle { calls: 0 }, centroid_config())
                .unwrap();

        assert!(matches!(
            pipeline.process_frame(),
            Err(TrackingError::Extractor { cell_id: 2, .. })
        ));
    }
}
