//! Batched affinity scoring between track histories and candidate cells.

use crate::tracker::cell_tracker::TrackerConfig;
use crate::tracker::error::{BoxedError, TrackingError};
use crate::tracker::feature::{FeatureBundle, FeatureKind};
use crate::tracker::track::TrackWindow;
use ndarray::{Array2, ArrayD, IxDyn};
use std::collections::BTreeMap;

/// Probabilities the oracle assigns to one (track, candidate) pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Affinity {
    /// Candidate is the same cell as the track.
    pub continuation: f32,
    /// Candidate is unrelated to the track.
    pub unrelated: f32,
    /// Candidate is a daughter of the track.
    pub division: f32,
}

impl Affinity {
    pub const CONTINUATION: usize = 0;
    pub const UNRELATED: usize = 1;
    pub const DIVISION: usize = 2;

    pub fn new(continuation: f32, unrelated: f32, division: f32) -> Self {
        Self {
            continuation,
            unrelated,
            division,
        }
    }
}

/// Stacked inputs of one feature for every pair in a batch.
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    /// Track side, shape `[K, W, ..feature shape]`.
    pub track: ArrayD<f32>,
    /// Candidate side, shape `[K, 1, ..feature shape]`.
    pub candidate: ArrayD<f32>,
}

/// All oracle inputs for one scoring call.
#[derive(Debug, Clone)]
pub struct AffinityBatch {
    /// `(track id, cell index)` of every row, in output order.
    pub pairs: Vec<(usize, usize)>,
    pub window: usize,
    /// One entry per enabled feature, in canonical feature order.
    pub features: BTreeMap<FeatureKind, FeatureBatch>,
}

impl AffinityBatch {
    /// Stack the windows of `tracks` against `cells` for every pair.
    ///
    /// `pairs` index `tracks` by position and `cells` by cell index.
    pub fn build(
        pairs: Vec<(usize, usize)>,
        tracks: &[TrackWindow],
        cells: &[FeatureBundle],
        config: &TrackerConfig,
    ) -> Result<Self, TrackingError> {
        let window = config.track_length;
        let mut features = BTreeMap::new();

        for &kind in &config.features {
            let shape = kind.shape(config);
            let mut track_data = Vec::new();
            let mut candidate_data = Vec::new();

            for &(track, cell) in &pairs {
                let history = tracks
                    .get(track)
                    .and_then(|t| t.features.get(&kind))
                    .ok_or(TrackingError::UnknownTrack(track))?;
                let value = cells
                    .get(cell)
                    .and_then(|b| b.get(kind))
                    .ok_or(TrackingError::MissingFeature {
                        kind,
                        cell_id: cell as u32 + 1,
                    })?;
                if history.len() != window {
                    return Err(TrackingError::shape("track window", &[window], &[history.len()]));
                }

                let (history, value) = kind.pair_inputs(history, value, config.max_distance);
                for v in &history {
                    track_data.extend(v.iter().copied());
                }
                candidate_data.extend(value.iter().copied());
            }

            let k = pairs.len();
            let track_dims: Vec<usize> = [k, window].iter().chain(&shape).copied().collect();
            let candidate_dims: Vec<usize> = [k, 1].iter().chain(&shape).copied().collect();
            let got = track_data.len();
            let track = ArrayD::from_shape_vec(IxDyn(&track_dims), track_data)
                .map_err(|_| TrackingError::shape("track batch", &track_dims, &[got]))?;
            let got = candidate_data.len();
            let candidate = ArrayD::from_shape_vec(IxDyn(&candidate_dims), candidate_data)
                .map_err(|_| TrackingError::shape("candidate batch", &candidate_dims, &[got]))?;

            features.insert(kind, FeatureBatch { track, candidate });
        }

        Ok(Self {
            pairs,
            window,
            features,
        })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Classifier scoring track/candidate pairs.
///
/// Implement this trait to plug any siamese model into the tracker.
///
/// # Example
///
/// ```ignore
/// use celltrack_rs::{AffinityBatch, AffinityOracle};
/// use ndarray::Array2;
///
/// struct AlwaysSame;
///
/// impl AffinityOracle for AlwaysSame {
///     type Error = std::convert::Infallible;
///
///     fn predict(&mut self, batch: &AffinityBatch) -> Result<Array2<f32>, Self::Error> {
///         let mut out = Array2::zeros((batch.len(), 3));
///         out.column_mut(0).fill(1.0);
///         Ok(out)
///     }
/// }
/// ```
pub trait AffinityOracle {
    /// Error type for inference failures.
    type Error: Into<BoxedError>;

    /// Score every pair of the batch.
    ///
    /// # Returns
    /// A `[K, 3]` array whose rows are (continuation, unrelated, division)
    /// probabilities, one row per entry of `batch.pairs`.
    fn predict(&mut self, batch: &AffinityBatch) -> Result<Array2<f32>, Self::Error>;
}

/// Run one batched oracle call and check its output shape.
///
/// An empty batch is answered without calling the oracle.
pub(crate) fn score<O: AffinityOracle>(
    oracle: &mut O,
    batch: &AffinityBatch,
) -> Result<Vec<Affinity>, TrackingError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let scores = oracle
        .predict(batch)
        .map_err(|e| TrackingError::Oracle(e.into()))?;
    if scores.dim() != (batch.len(), 3) {
        return Err(TrackingError::shape("oracle output", &[batch.len(), 3], scores.shape()));
    }
    Ok(scores
        .rows()
        .into_iter()
        .map(|row| {
            Affinity::new(
                row[Affinity::CONTINUATION],
                row[Affinity::UNRELATED],
                row[Affinity::DIVISION],
            )
        })
        .collect())
}
