//! Frame-by-frame cell tracker with division detection.

use crate::tracker::affinity::{self, AffinityBatch, AffinityOracle};
use crate::tracker::cost::CostMatrix;
use crate::tracker::error::{ConfigError, TrackingError};
use crate::tracker::feature::{FeatureBundle, FeatureKind};
use crate::tracker::matching::{self, AssignmentResult};
use crate::tracker::track::{FrameEntry, Track, TrackArena, TrackWindow};
use crate::tracker::volume::TrackedVolume;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Configuration for the CellTracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub features: BTreeSet<FeatureKind>,
    pub crop_size: usize,
    pub channels: usize,
    pub death_cost: f32,
    pub birth_cost: f32,
    pub division_threshold: f32,
    pub max_distance: f32,
    pub track_length: usize,
    pub occupancy_grid_radius: usize,
    pub occupancy_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            features: BTreeSet::new(),
            crop_size: 32,
            channels: 1,
            death_cost: 0.9,
            birth_cost: 0.9,
            division_threshold: 0.2,
            max_distance: 200.0,
            track_length: 1,
            occupancy_grid_radius: 10,
            occupancy_window: 100,
        }
    }
}

impl TrackerConfig {
    pub fn with_features(features: impl IntoIterator<Item = FeatureKind>) -> Self {
        Self {
            features: features.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Default configuration enabling features by name.
    pub fn with_feature_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let features = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            features,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.features.is_empty() {
            return Err(ConfigError::NoFeatures);
        }

        let invalid = |name: &'static str, value: &dyn std::fmt::Display| -> Result<(), ConfigError> {
            Err(ConfigError::InvalidParameter {
                name,
                value: value.to_string(),
            })
        };
        for (name, value) in [
            ("track_length", self.track_length),
            ("crop_size", self.crop_size),
            ("channels", self.channels),
        ] {
            if value == 0 {
                return invalid(name, &value);
            }
        }
        for (name, value) in [("death_cost", self.death_cost), ("birth_cost", self.birth_cost)] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(name, &value);
            }
        }
        for (name, value) in [
            ("division_threshold", self.division_threshold),
            ("max_distance", self.max_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(name, &value);
            }
        }
        Ok(())
    }
}

/// Summary of one processed frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: usize,
    /// Tracks that existed when the frame started.
    pub num_tracks: usize,
    pub num_cells: usize,
    /// `(track id, cell id)` pairs chosen by the matching.
    pub continuations: Vec<(usize, u32)>,
    /// Ids of tracks born this frame.
    pub births: Vec<usize>,
    pub deaths: Vec<usize>,
    /// `(parent, daughter)` links found by the parent search.
    pub divisions: Vec<(usize, usize)>,
    /// `(parent, daughter)` links created by splitting a track that both
    /// divided and continued.
    pub repairs: Vec<(usize, usize)>,
}

/// Lineage of one track, as reported after (or during) a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageRecord {
    pub id: usize,
    pub label: u32,
    pub frames: Vec<usize>,
    pub parent: Option<usize>,
    pub daughters: Vec<usize>,
    pub capped: bool,
    pub capped_at: Option<usize>,
}

impl From<&Track> for LineageRecord {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id(),
            label: track.label(),
            frames: track.frames().to_vec(),
            parent: track.parent(),
            daughters: track.daughters().to_vec(),
            capped: track.is_capped(),
            capped_at: track.state().capped_at(),
        }
    }
}

pub struct CellTracker {
    config: TrackerConfig,
    tracks: TrackArena,
    volume: TrackedVolume,
    frame_id: Option<usize>,
}

impl CellTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            tracks: TrackArena::new(),
            volume: TrackedVolume::new(),
            frame_id: None,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> &TrackArena {
        &self.tracks
    }

    pub fn volume(&self) -> &TrackedVolume {
        &self.volume
    }

    /// Number of frames processed so far.
    pub fn frame_count(&self) -> usize {
        self.frame_id.map_or(0, |f| f + 1)
    }

    pub fn lineage(&self) -> Vec<LineageRecord> {
        self.tracks.iter().map(LineageRecord::from).collect()
    }

    /// Seed one track per cell of the first frame.
    ///
    /// `cells[i]` describes cell id `i + 1` of `labels`.
    pub fn initialize(
        &mut self,
        labels: ArrayView2<u32>,
        cells: Vec<FeatureBundle>,
    ) -> Result<FrameReport, TrackingError> {
        if self.frame_id.is_some() {
            return Err(TrackingError::AlreadyInitialized);
        }
        let cells = self.conform_cells(labels, cells)?;
        let frame = 0;

        let mut mapping = HashMap::new();
        let mut births = Vec::with_capacity(cells.len());
        for (index, bundle) in cells.into_iter().enumerate() {
            let cell_id = index as u32 + 1;
            let id = self.tracks.create(
                cell_id,
                FrameEntry {
                    frame,
                    cell_id,
                    bundle,
                },
            );
            mapping.insert(cell_id, id);
            births.push(id);
        }

        self.finish_frame(labels, &mapping)?;
        self.frame_id = Some(frame);
        log::debug!("frame {}: initialized {} tracks", frame, births.len());

        Ok(FrameReport {
            frame,
            num_cells: births.len(),
            births,
            ..FrameReport::default()
        })
    }

    /// Track the next frame.
    ///
    /// The oracle is called once to score every open track against every cell
    /// and, only when the matching produces births, once more to search for
    /// parents.
    pub fn update<O: AffinityOracle>(
        &mut self,
        oracle: &mut O,
        labels: ArrayView2<u32>,
        cells: Vec<FeatureBundle>,
    ) -> Result<FrameReport, TrackingError> {
        let frame = self.frame_id.ok_or(TrackingError::NotInitialized)? + 1;
        let cells = self.conform_cells(labels, cells)?;
        let num_tracks = self.tracks.len();
        let num_cells = cells.len();
        log::debug!("frame {}: {} tracks, {} cells", frame, num_tracks, num_cells);

        // Step 1: Score against a frozen copy of the histories
        let snapshot = self
            .tracks
            .snapshot(&self.config.features, self.config.track_length);
        let pairs = (0..num_tracks)
            .flat_map(|t| (0..num_cells).map(move |c| (t, c)))
            .collect();
        let batch = AffinityBatch::build(pairs, &snapshot, &cells, &self.config)?;
        let scores = affinity::score(oracle, &batch)?;

        // Step 2: Global matching
        let capped: Vec<bool> = snapshot.iter().map(|t| t.capped).collect();
        let cost = CostMatrix::build(
            &scores,
            &capped,
            num_cells,
            self.config.death_cost,
            self.config.birth_cost,
        )?;
        let AssignmentResult {
            continuations: kept,
            births,
            deaths,
        } = reroute_capped(frame, matching::linear_assignment(&cost)?, &capped);

        // Step 3: Parent search for births
        let parents = self.find_parents(oracle, &snapshot, &births, &cells)?;

        // Step 4: Apply continuations and births
        let mut cells: Vec<Option<FeatureBundle>> = cells.into_iter().map(Some).collect();
        let mut mapping = HashMap::new();
        let mut report = FrameReport {
            frame,
            num_tracks,
            num_cells,
            deaths,
            ..FrameReport::default()
        };

        for &(track, cell) in &kept {
            let cell_id = cell as u32 + 1;
            let bundle = cells[cell].take().unwrap_or_default();
            self.tracks.append(
                track,
                FrameEntry {
                    frame,
                    cell_id,
                    bundle,
                },
            )?;
            mapping.insert(cell_id, track);
            report.continuations.push((track, cell_id));
        }

        for (&cell, parent) in births.iter().zip(parents) {
            let cell_id = cell as u32 + 1;
            let bundle = cells[cell].take().unwrap_or_default();
            let id = self.tracks.create(
                cell_id,
                FrameEntry {
                    frame,
                    cell_id,
                    bundle,
                },
            );
            if let Some((parent, probability)) = parent {
                log::info!(
                    "frame {}: division detected, track {} -> track {} (p = {:.2})",
                    frame,
                    parent,
                    id,
                    probability
                );
                self.tracks.link(parent, id)?;
                report.divisions.push((parent, id));
            }
            mapping.insert(cell_id, id);
            report.births.push(id);
        }

        // Step 5: Cap divided tracks and split any that also continued
        report.repairs = self.repair(frame, &report.divisions, &mut mapping)?;

        self.finish_frame(labels, &mapping)?;
        self.frame_id = Some(frame);
        log::debug!(
            "frame {}: {} continued, {} born, {} died, {} divided",
            frame,
            report.continuations.len(),
            report.births.len(),
            report.deaths.len(),
            report.divisions.len()
        );
        Ok(report)
    }

    /// Best parent for each born cell, with its division probability.
    ///
    /// Candidates are the tracks open and uncapped when the frame started.
    /// The highest division score wins, ties going to the lowest track id,
    /// and only scores above the division threshold count.
    fn find_parents<O: AffinityOracle>(
        &self,
        oracle: &mut O,
        snapshot: &[TrackWindow],
        births: &[usize],
        cells: &[FeatureBundle],
    ) -> Result<Vec<Option<(usize, f32)>>, TrackingError> {
        let candidates: Vec<usize> = snapshot
            .iter()
            .filter(|t| !t.capped)
            .map(|t| t.track)
            .collect();
        if births.is_empty() || candidates.is_empty() {
            return Ok(vec![None; births.len()]);
        }

        let pairs = births
            .iter()
            .flat_map(|&cell| candidates.iter().map(move |&track| (track, cell)))
            .collect();
        let batch = AffinityBatch::build(pairs, snapshot, cells, &self.config)?;
        let scores = affinity::score(oracle, &batch)?;

        Ok(scores
            .chunks(candidates.len())
            .map(|row| {
                let mut best: Option<(usize, f32)> = None;
                for (&track, score) in candidates.iter().zip(row) {
                    if best.is_none_or(|(_, p)| score.division > p) {
                        best = Some((track, score.division));
                    }
                }
                best.filter(|&(_, p)| p > self.config.division_threshold)
            })
            .collect())
    }

    /// Cap every track that gained a daughter in `frame`. A capped track that
    /// also took a cell this frame hands that frame to a fresh daughter.
    fn repair(
        &mut self,
        frame: usize,
        divisions: &[(usize, usize)],
        mapping: &mut HashMap<u32, usize>,
    ) -> Result<Vec<(usize, usize)>, TrackingError> {
        let parents: BTreeSet<usize> = divisions.iter().map(|&(parent, _)| parent).collect();
        let mut repairs = Vec::new();

        for parent in parents {
            self.tracks.cap(parent, frame)?;
            let track = self.tracks.get(parent).ok_or(TrackingError::UnknownTrack(parent))?;
            if track.last_frame() != Some(frame) {
                continue;
            }

            let label = track.label();
            let entry = self
                .tracks
                .truncate_last(parent)
                .ok_or(TrackingError::UnknownTrack(parent))?;
            let cell_id = entry.cell_id;
            let daughter = self.tracks.create(label, entry);
            self.tracks.link(parent, daughter)?;
            mapping.insert(cell_id, daughter);

            log::warn!(
                "frame {}: track {} divided and continued, moved cell {} to new daughter {}",
                frame,
                parent,
                cell_id,
                daughter
            );
            repairs.push((parent, daughter));
        }

        Ok(repairs)
    }

    fn conform_cells(
        &self,
        labels: ArrayView2<u32>,
        cells: Vec<FeatureBundle>,
    ) -> Result<Vec<FeatureBundle>, TrackingError> {
        self.volume.check_plane(labels)?;
        let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
        if max_label != cells.len() {
            return Err(TrackingError::shape("cell bundles", &[max_label], &[cells.len()]));
        }
        cells
            .into_iter()
            .enumerate()
            .map(|(i, bundle)| bundle.conform(&self.config, i as u32 + 1))
            .collect()
    }

    fn finish_frame(
        &mut self,
        labels: ArrayView2<u32>,
        mapping: &HashMap<u32, usize>,
    ) -> Result<(), TrackingError> {
        let output: HashMap<u32, u32> = mapping
            .iter()
            .map(|(&cell, &track)| (cell, track as u32 + 1))
            .collect();
        self.volume.push_frame(labels, &output)?;
        debug_assert!(self.tracks.capping_violations().is_empty());
        Ok(())
    }
}

/// Turn any continuation onto a capped track into a death plus a birth.
///
/// The cost matrix only lets this happen on a tie, when death and birth both
/// cost 1.
fn reroute_capped(frame: usize, assignment: AssignmentResult, capped: &[bool]) -> AssignmentResult {
    let AssignmentResult {
        continuations,
        mut births,
        mut deaths,
    } = assignment;

    let mut kept = Vec::with_capacity(continuations.len());
    for (track, cell) in continuations {
        if capped.get(track).copied().unwrap_or(false) {
            log::warn!(
                "frame {}: capped track {} matched cell {}, treating as death and birth",
                frame,
                track,
                cell + 1
            );
            deaths.push(track);
            births.push(cell);
        } else {
            kept.push((track, cell));
        }
    }
    births.sort_unstable();
    deaths.sort_unstable();

    AssignmentResult {
        continuations: kept,
        births,
        deaths,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, arr1, arr2};

    /// Scores every pair from a lookup on (track id, cell index).
    struct Table<F: FnMut(usize, usize) -> [f32; 3]>(F);

    impl<F: FnMut(usize, usize) -> [f32; 3]> AffinityOracle for Table<F> {
        type Error = std::convert::Infallible;

        fn predict(&mut self, batch: &AffinityBatch) -> Result<Array2<f32>, Self::Error> {
            let mut out = Array2::zeros((batch.len(), 3));
            for (row, &(track, cell)) in batch.pairs.iter().enumerate() {
                let p = (self.0)(track, cell);
                out.row_mut(row).assign(&arr1(&p));
            }
            Ok(out)
        }
    }

    fn perimeter(v: f32) -> FeatureBundle {
        FeatureBundle::new().with(FeatureKind::Perimeter, arr1(&[v]).into_dyn())
    }

    fn tracker() -> CellTracker {
        CellTracker::new(TrackerConfig::with_features([FeatureKind::Perimeter])).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            CellTracker::new(TrackerConfig::default()).err(),
            Some(ConfigError::NoFeatures)
        );
        assert_eq!(
            TrackerConfig::with_feature_names(&["distance", "shape"]).err(),
            Some(ConfigError::UnknownFeature("shape".into()))
        );

        let config = TrackerConfig {
            death_cost: 1.5,
            ..TrackerConfig::with_features([FeatureKind::Distance])
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter {
                name: "death_cost",
                ..
            })
        ));
    }

    #[test]
    fn test_update_before_initialize() {
        let mut tracker = tracker();
        let mut oracle = Table(|_, _| [1.0, 0.0, 0.0]);
        let labels = arr2(&[[1]]);
        assert!(matches!(
            tracker.update(&mut oracle, labels.view(), vec![perimeter(1.0)]),
            Err(TrackingError::NotInitialized)
        ));
    }

    #[test]
    fn test_missing_bundles_rejected() {
        let mut tracker = tracker();
        let labels = arr2(&[[1, 2]]);
        assert!(matches!(
            tracker.initialize(labels.view(), vec![perimeter(1.0)]),
            Err(TrackingError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_frame_kills_every_track() {
        let mut tracker = tracker();
        let mut oracle = Table(|_, _| [1.0, 0.0, 0.0]);
        tracker
            .initialize(arr2(&[[1, 2]]).view(), vec![perimeter(1.0), perimeter(2.0)])
            .unwrap();

        let report = tracker
            .update(&mut oracle, arr2(&[[0, 0]]).view(), vec![])
            .unwrap();
        assert_eq!(report.deaths, vec![0, 1]);
        assert!(report.continuations.is_empty());
        assert_eq!(tracker.volume().plane(1), Some(&arr2(&[[0, 0]])));
    }

    #[test]
    fn test_parent_ties_go_to_lowest_id() {
        let mut tracker = tracker();
        tracker
            .initialize(arr2(&[[1, 2, 0]]).view(), vec![perimeter(1.0), perimeter(2.0)])
            .unwrap();

        // Both tracks continue to cells 1 and 2; cell 3 is new and equally
        // likely to be a daughter of either.
        let mut oracle = Table(|track, cell| match (track, cell) {
            (t, c) if t == c => [1.0, 0.0, 0.0],
            (_, 2) => [0.0, 0.4, 0.6],
            _ => [0.0, 1.0, 0.0],
        });
        let report = tracker
            .update(
                &mut oracle,
                arr2(&[[1, 2, 3]]).view(),
                vec![perimeter(1.0), perimeter(2.0), perimeter(3.0)],
            )
            .unwrap();

        assert_eq!(report.divisions, vec![(0, 2)]);
        assert_eq!(report.repairs, vec![(0, 3)]);
        assert_eq!(tracker.tracks().get(1).unwrap().daughters(), &[] as &[usize]);
    }

    #[test]
    fn test_rejected_plane_leaves_tracks_unchanged() {
        let mut tracker = tracker();
        let mut oracle = Table(|_, _| [1.0, 0.0, 0.0]);
        tracker
            .initialize(arr2(&[[1]]).view(), vec![perimeter(1.0)])
            .unwrap();
        let before = tracker.lineage();

        assert!(matches!(
            tracker.update(&mut oracle, arr2(&[[1, 0]]).view(), vec![perimeter(1.0)]),
            Err(TrackingError::ShapeMismatch {
                context: "label plane",
                ..
            })
        ));
        assert_eq!(tracker.lineage(), before);
        assert_eq!(tracker.volume().len(), 1);
        assert_eq!(tracker.frame_count(), 1);

        // the next well-formed frame still tracks normally
        let report = tracker
            .update(&mut oracle, arr2(&[[1]]).view(), vec![perimeter(1.0)])
            .unwrap();
        assert_eq!(report.frame, 1);
        assert_eq!(report.continuations, vec![(0, 1)]);
        assert_eq!(tracker.tracks().get(0).unwrap().frames(), &[0, 1]);
    }

    #[test]
    fn test_bundles_without_pixels_rejected() {
        let mut tracker = tracker();
        assert!(matches!(
            tracker.initialize(arr2(&[[1, 0]]).view(), vec![perimeter(1.0), perimeter(2.0)]),
            Err(TrackingError::ShapeMismatch {
                context: "cell bundles",
                ..
            })
        ));
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_reroute_capped_continuation() {
        let assignment = AssignmentResult {
            continuations: vec![(0, 2), (1, 0)],
            births: vec![1],
            deaths: vec![2],
        };
        let rerouted = reroute_capped(3, assignment, &[true, false, false]);
        assert_eq!(rerouted.continuations, vec![(1, 0)]);
        assert_eq!(rerouted.births, vec![1, 2]);
        assert_eq!(rerouted.deaths, vec![0, 2]);
    }

    #[test]
    fn test_capped_track_tie_never_continues() {
        let config = TrackerConfig {
            death_cost: 1.0,
            birth_cost: 1.0,
            ..TrackerConfig::with_features([FeatureKind::Perimeter])
        };
        let mut tracker = CellTracker::new(config).unwrap();
        // Frame 1: track 0 continues to cell 0 and divides into cell 1, so it
        // is capped and split into daughters 1 (cell 2) and 2 (cell 1).
        // Frame 2: the daughters continue and cell 3 is unrelated to anyone,
        // so pairing it with the capped track ties with death plus birth.
        let mut oracle = Table(|track, cell| match (track, cell) {
            (0, 0) | (2, 0) | (1, 1) => [1.0, 0.0, 0.0],
            (0, 1) => [0.0, 0.1, 0.9],
            _ => [0.0, 1.0, 0.0],
        });

        tracker
            .initialize(arr2(&[[1, 0, 0]]).view(), vec![perimeter(1.0)])
            .unwrap();
        let report = tracker
            .update(
                &mut oracle,
                arr2(&[[1, 2, 0]]).view(),
                vec![perimeter(1.0), perimeter(2.0)],
            )
            .unwrap();
        assert_eq!(report.repairs, vec![(0, 2)]);
        assert!(tracker.tracks().get(0).unwrap().is_capped());

        let report = tracker
            .update(
                &mut oracle,
                arr2(&[[1, 2, 3]]).view(),
                vec![perimeter(1.0), perimeter(2.0), perimeter(3.0)],
            )
            .unwrap();

        assert_eq!(report.continuations, vec![(1, 2), (2, 1)]);
        assert_eq!(report.births, vec![3]);
        assert_eq!(report.deaths, vec![0]);
        assert!(report.divisions.is_empty());

        let capped = tracker.tracks().get(0).unwrap();
        assert_eq!(capped.frames(), &[0]);
        assert_eq!(capped.state().capped_at(), Some(1));
        let newborn = tracker.tracks().get(3).unwrap();
        assert_eq!(newborn.cell_ids(), &[3]);
        assert_eq!(newborn.parent(), None);
        assert!(tracker.tracks().capping_violations().is_empty());
        assert_eq!(tracker.volume().plane(2), Some(&arr2(&[[3, 2, 4]])));
    }

    #[test]
    fn test_lineage_serializes() {
        let mut tracker = tracker();
        tracker
            .initialize(arr2(&[[1]]).view(), vec![perimeter(1.0)])
            .unwrap();
        let json = serde_json::to_value(tracker.lineage()).unwrap();
        assert_eq!(json[0]["id"], 0);
        assert_eq!(json[0]["frames"], serde_json::json!([0]));
        assert_eq!(json[0]["parent"], serde_json::Value::Null);
    }
}
