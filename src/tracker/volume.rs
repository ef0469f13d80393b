//! Tracked label volume: every frame's cells relabeled to their track.

use crate::tracker::error::TrackingError;
use crate::tracker::track::TrackArena;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, stack};
use std::collections::HashMap;

/// Relabel one frame. Pixels of cell `c` take `mapping[&c]`; background and
/// cells without a mapping stay 0.
pub fn relabel(labels: ArrayView2<u32>, mapping: &HashMap<u32, u32>) -> Array2<u32> {
    labels.mapv(|cell| {
        if cell == 0 {
            0
        } else {
            mapping.get(&cell).copied().unwrap_or(0)
        }
    })
}

/// Growing `[frames, H, W]` volume of track labels (track id + 1).
///
/// Derived output only: it can always be rebuilt from the track arena with
/// [`TrackedVolume::reconstruct`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedVolume {
    planes: Vec<Array2<u32>>,
}

impl TrackedVolume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `labels` has the shape of the frames pushed so far.
    pub fn check_plane(&self, labels: ArrayView2<u32>) -> Result<(), TrackingError> {
        match self.planes.first() {
            Some(first) if first.dim() != labels.dim() => Err(TrackingError::shape(
                "label plane",
                first.shape(),
                labels.shape(),
            )),
            _ => Ok(()),
        }
    }

    /// Relabel `labels` and append it as the next frame.
    pub fn push_frame(
        &mut self,
        labels: ArrayView2<u32>,
        mapping: &HashMap<u32, u32>,
    ) -> Result<(), TrackingError> {
        self.check_plane(labels)?;
        self.planes.push(relabel(labels, mapping));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn plane(&self, frame: usize) -> Option<&Array2<u32>> {
        self.planes.get(frame)
    }

    pub fn planes(&self) -> &[Array2<u32>] {
        &self.planes
    }

    /// Stack all frames into one array.
    pub fn to_array3(&self) -> Array3<u32> {
        let views: Vec<ArrayView2<u32>> = self.planes.iter().map(|p| p.view()).collect();
        stack(Axis(0), &views).unwrap_or_else(|_| Array3::zeros((0, 0, 0)))
    }

    /// Rebuild the volume for the first `labels.len_of(Axis(0))` frames from
    /// the cell ids recorded on each track.
    pub fn reconstruct(labels: ArrayView3<u32>, tracks: &TrackArena) -> Result<Self, TrackingError> {
        let mut mappings: Vec<HashMap<u32, u32>> = vec![HashMap::new(); labels.len_of(Axis(0))];
        for track in tracks.iter() {
            for (&frame, &cell) in track.frames().iter().zip(track.cell_ids()) {
                if let Some(mapping) = mappings.get_mut(frame) {
                    mapping.insert(cell, track.output_label());
                }
            }
        }

        let mut volume = Self::new();
        for (plane, mapping) in labels.outer_iter().zip(&mappings) {
            volume.push_frame(plane, mapping)?;
        }
        Ok(volume)
    }
}
