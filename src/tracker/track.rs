//! Track records and the arena that owns them.
//!
//! Tracks are never removed. Ids are arena indices handed out by a
//! monotonically increasing counter, and lineage links are stored as ids, so
//! parent/daughter relations stay queryable after the run without reference
//! cycles.

use crate::tracker::error::TrackingError;
use crate::tracker::feature::{FeatureBundle, FeatureKind};
use crate::tracker::track_state::TrackState;
use ndarray::ArrayD;
use std::collections::{BTreeMap, BTreeSet};

/// One frame removed from the end of a track by [`TrackArena::truncate_last`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub frame: usize,
    pub cell_id: u32,
    pub bundle: FeatureBundle,
}

/// A cell followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    id: usize,
    label: u32,
    frames: Vec<usize>,
    cell_ids: Vec<u32>,
    history: BTreeMap<FeatureKind, Vec<ArrayD<f32>>>,
    parent: Option<usize>,
    daughters: Vec<usize>,
    state: TrackState,
}

impl Track {
    fn new(id: usize, label: u32, entry: FrameEntry) -> Self {
        let mut track = Self {
            id,
            label,
            frames: Vec::new(),
            cell_ids: Vec::new(),
            history: BTreeMap::new(),
            parent: None,
            daughters: Vec::new(),
            state: TrackState::Open,
        };
        track.push(entry);
        track
    }

    fn push(&mut self, entry: FrameEntry) {
        self.frames.push(entry.frame);
        self.cell_ids.push(entry.cell_id);
        for (kind, value) in entry.bundle {
            self.history.entry(kind).or_default().push(value);
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Value written into the tracked volume for this track.
    pub fn output_label(&self) -> u32 {
        self.id as u32 + 1
    }

    /// Display label: the cell id the track (or its split source) started from.
    pub fn label(&self) -> u32 {
        self.label
    }

    /// Strictly increasing frame indices the track appears in.
    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    /// Cell id the track occupied in each of [`Track::frames`].
    pub fn cell_ids(&self) -> &[u32] {
        &self.cell_ids
    }

    pub fn last_frame(&self) -> Option<usize> {
        self.frames.last().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn daughters(&self) -> &[usize] {
        &self.daughters
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_capped(&self) -> bool {
        self.state.is_capped()
    }

    /// Full recorded history of one feature, oldest first.
    pub fn values(&self, kind: FeatureKind) -> &[ArrayD<f32>] {
        self.history.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The newest `window` values of a feature, oldest first.
    ///
    /// Tracks shorter than the window are padded at the front by repeating
    /// their oldest value, never with zeros.
    pub fn window(&self, kind: FeatureKind, window: usize) -> Vec<ArrayD<f32>> {
        let values = self.values(kind);
        let Some(oldest) = values.first() else {
            return Vec::new();
        };
        let missing = window.saturating_sub(values.len());
        let start = values.len().saturating_sub(window);
        std::iter::repeat_n(oldest, missing)
            .chain(values[start..].iter())
            .cloned()
            .collect()
    }

    fn holds_frame_at_or_after(&self, frame: usize) -> bool {
        self.frames.iter().any(|&f| f >= frame)
    }
}

/// A frozen copy of one track's padded feature windows.
#[derive(Debug, Clone)]
pub struct TrackWindow {
    pub track: usize,
    pub capped: bool,
    pub features: BTreeMap<FeatureKind, Vec<ArrayD<f32>>>,
}

/// Owner of every track record.
#[derive(Debug, Clone, Default)]
pub struct TrackArena {
    tracks: Vec<Track>,
}

impl TrackArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Start a new track from a single frame and return its id.
    pub fn create(&mut self, label: u32, entry: FrameEntry) -> usize {
        let id = self.tracks.len();
        self.tracks.push(Track::new(id, label, entry));
        id
    }

    /// See [`Track::window`].
    pub fn history(&self, id: usize, kind: FeatureKind, window: usize) -> Vec<ArrayD<f32>> {
        self.tracks
            .get(id)
            .map(|t| t.window(kind, window))
            .unwrap_or_default()
    }

    /// Padded windows of every track, taken before a frame is scored so the
    /// frame's mutations never leak into its own scoring.
    pub fn snapshot(&self, features: &BTreeSet<FeatureKind>, window: usize) -> Vec<TrackWindow> {
        self.tracks
            .iter()
            .map(|t| TrackWindow {
                track: t.id,
                capped: t.is_capped(),
                features: features
                    .iter()
                    .map(|&kind| (kind, t.window(kind, window)))
                    .collect(),
            })
            .collect()
    }

    /// Extend a track with a new frame.
    ///
    /// Frames must be strictly increasing, and a capped track accepts nothing
    /// at or after its capping frame.
    pub fn append(&mut self, id: usize, entry: FrameEntry) -> Result<(), TrackingError> {
        let track = self.track_mut(id)?;
        if let Some(last) = track.last_frame() {
            if entry.frame <= last {
                return Err(TrackingError::TrackUpdate {
                    track: id,
                    reason: format!("frame {} does not follow frame {}", entry.frame, last),
                });
            }
        }
        if let Some(capped) = track.state.capped_at() {
            if entry.frame >= capped {
                return Err(TrackingError::TrackUpdate {
                    track: id,
                    reason: format!("capped at frame {}, cannot take frame {}", capped, entry.frame),
                });
            }
        }
        track.push(entry);
        Ok(())
    }

    /// Remove and return the most recent frame of a track.
    pub fn truncate_last(&mut self, id: usize) -> Option<FrameEntry> {
        let track = self.tracks.get_mut(id)?;
        let frame = track.frames.pop()?;
        let cell_id = track.cell_ids.pop()?;
        let mut bundle = FeatureBundle::new();
        for (&kind, values) in track.history.iter_mut() {
            if let Some(value) = values.pop() {
                bundle.insert(kind, value);
            }
        }
        Some(FrameEntry {
            frame,
            cell_id,
            bundle,
        })
    }

    /// Record `daughter` as a child of `parent`. A daughter's parent is set once.
    pub fn link(&mut self, parent: usize, daughter: usize) -> Result<(), TrackingError> {
        self.track_mut(parent)?;
        let child = self.track_mut(daughter)?;
        if let Some(existing) = child.parent.filter(|&p| p != parent) {
            return Err(TrackingError::TrackUpdate {
                track: daughter,
                reason: format!("already a daughter of track {}", existing),
            });
        }
        child.parent = Some(parent);
        let parent = self.track_mut(parent)?;
        if !parent.daughters.contains(&daughter) {
            parent.daughters.push(daughter);
        }
        Ok(())
    }

    /// Mark a track as divided at `frame`. Capping an already capped track is
    /// a no-op; the first capping frame is kept.
    pub fn cap(&mut self, id: usize, frame: usize) -> Result<(), TrackingError> {
        let track = self.track_mut(id)?;
        if !track.is_capped() {
            track.state = TrackState::Capped { frame };
        }
        Ok(())
    }

    /// Ids of capped tracks still holding a frame at or after their capping
    /// frame. Empty whenever the arena is consistent.
    pub fn capping_violations(&self) -> Vec<usize> {
        self.tracks
            .iter()
            .filter(|t| {
                t.state
                    .capped_at()
                    .is_some_and(|frame| t.holds_frame_at_or_after(frame))
            })
            .map(|t| t.id)
            .collect()
    }

    fn track_mut(&mut self, id: usize) -> Result<&mut Track, TrackingError> {
        self.tracks
            .get_mut(id)
            .ok_or(TrackingError::UnknownTrack(id))
    }
}
