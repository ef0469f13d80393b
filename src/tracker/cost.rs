//! Padded cost matrix deciding continuations, births and deaths at once.
//!
//! For `N` tracks and `M` cells the matrix is `(N + M) x (N + M)`:
//!
//! ```text
//!              cells (M)          death sinks (N)
//! tracks (N)   continuation       death
//! birth (M)    birth              continuation^T
//! ```
//!
//! Each block is built on its own and the four are concatenated.

use crate::tracker::affinity::Affinity;
use crate::tracker::error::TrackingError;
use ndarray::{Array2, Axis, concatenate};

/// `1 - P(continue)` for every track/cell pair. Rows of capped tracks cost 1
/// everywhere.
pub fn continuation_block(
    scores: &[Affinity],
    capped: &[bool],
    num_cells: usize,
) -> Result<Array2<f32>, TrackingError> {
    let num_tracks = capped.len();
    if scores.len() != num_tracks * num_cells {
        return Err(TrackingError::shape(
            "continuation scores",
            &[num_tracks, num_cells],
            &[scores.len()],
        ));
    }
    Ok(Array2::from_shape_fn((num_tracks, num_cells), |(i, j)| {
        if capped[i] {
            1.0
        } else {
            1.0 - scores[i * num_cells + j].continuation
        }
    }))
}

/// Square block with `diagonal` on the diagonal and 1 elsewhere.
fn sink_block(size: usize, diagonal: f32) -> Array2<f32> {
    Array2::from_shape_fn((size, size), |(i, j)| if i == j { diagonal } else { 1.0 })
}

/// `N x N` block letting each track die at cost `death`.
pub fn death_block(num_tracks: usize, death: f32) -> Array2<f32> {
    sink_block(num_tracks, death)
}

/// `M x M` block letting each cell start a new track at cost `birth`.
pub fn birth_block(num_cells: usize, birth: f32) -> Array2<f32> {
    sink_block(num_cells, birth)
}

/// The assembled matrix plus the real track and cell counts.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    pub matrix: Array2<f32>,
    pub num_tracks: usize,
    pub num_cells: usize,
}

impl CostMatrix {
    /// Assemble the four blocks. The bottom-right block mirrors the
    /// continuation block so every sink row and column stays matchable.
    pub fn assemble(
        continuation: Array2<f32>,
        death: Array2<f32>,
        birth: Array2<f32>,
    ) -> Result<Self, TrackingError> {
        let (num_tracks, num_cells) = continuation.dim();
        if death.dim() != (num_tracks, num_tracks) {
            return Err(TrackingError::shape("death block", &[num_tracks, num_tracks], death.shape()));
        }
        if birth.dim() != (num_cells, num_cells) {
            return Err(TrackingError::shape("birth block", &[num_cells, num_cells], birth.shape()));
        }

        let size = num_tracks + num_cells;
        let malformed = |_| TrackingError::shape("cost matrix", &[size, size], &[]);
        let top = concatenate(Axis(1), &[continuation.view(), death.view()]).map_err(malformed)?;
        let bottom = concatenate(Axis(1), &[birth.view(), continuation.t()]).map_err(malformed)?;
        let matrix = concatenate(Axis(0), &[top.view(), bottom.view()]).map_err(malformed)?;

        Ok(Self {
            matrix,
            num_tracks,
            num_cells,
        })
    }

    /// Build the full matrix from row-major oracle scores.
    pub fn build(
        scores: &[Affinity],
        capped: &[bool],
        num_cells: usize,
        death: f32,
        birth: f32,
    ) -> Result<Self, TrackingError> {
        let continuation = continuation_block(scores, capped, num_cells)?;
        Self::assemble(
            continuation,
            death_block(capped.len(), death),
            birth_block(num_cells, birth),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn test_sink_blocks() {
        assert_eq!(death_block(2, 0.9), arr2(&[[0.9, 1.0], [1.0, 0.9]]));
        assert_eq!(birth_block(1, 0.5), arr2(&[[0.5]]));
    }

    #[test]
    fn test_capped_rows_cost_one() {
        let scores = vec![Affinity::new(0.8, 0.1, 0.1); 4];
        let block = continuation_block(&scores, &[false, true], 2).unwrap();
        assert_relative_eq!(block[[0, 0]], 0.2, epsilon = 1e-6);
        assert_eq!(block.row(1).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_assembled_layout() {
        let scores = vec![
            Affinity::new(0.9, 0.1, 0.0),
            Affinity::new(0.2, 0.8, 0.0),
            Affinity::new(0.0, 1.0, 0.0),
            Affinity::new(0.6, 0.4, 0.0),
        ];
        let cost = CostMatrix::build(&scores, &[false, false], 2, 0.9, 0.8).unwrap();
        assert_eq!(cost.matrix.dim(), (4, 4));

        let expected = arr2(&[
            [0.1, 0.8, 0.9, 1.0],
            [1.0, 0.4, 1.0, 0.9],
            [0.8, 1.0, 0.1, 1.0],
            [1.0, 0.8, 0.8, 0.4],
        ]);
        for (a, b) in cost.matrix.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_empty_frame_is_death_block() {
        let cost = CostMatrix::build(&[], &[false, false, true], 0, 0.9, 0.9).unwrap();
        assert_eq!(cost.matrix, death_block(3, 0.9));
    }

    #[test]
    fn test_score_count_mismatch() {
        let scores = vec![Affinity::default(); 3];
        assert!(matches!(
            CostMatrix::build(&scores, &[false, false], 2, 0.9, 0.9),
            Err(TrackingError::ShapeMismatch { .. })
        ));
    }
}
