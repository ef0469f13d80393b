//! Minimum-cost matching over the padded cost matrix.

use crate::tracker::cost::CostMatrix;
use crate::tracker::error::TrackingError;
use ndarray::Array2;

/// Solve the square assignment problem, returning `(row, col)` for every row.
///
/// The matrix must be square with finite, non-negative entries; anything else
/// is rejected before the solver runs.
pub fn solve(cost_matrix: &Array2<f32>) -> Result<Vec<(usize, usize)>, TrackingError> {
    let (rows, cols) = cost_matrix.dim();
    if rows != cols {
        return Err(TrackingError::MalformedCostMatrix(format!(
            "{}x{} is not square",
            rows, cols
        )));
    }
    if let Some(bad) = cost_matrix.iter().find(|c| !c.is_finite() || **c < 0.0) {
        return Err(TrackingError::MalformedCostMatrix(format!(
            "entry {} is not a finite non-negative cost",
            bad
        )));
    }

    match rows {
        0 => Ok(vec![]),
        1 => Ok(vec![(0, 0)]),
        _ => {
            let costs = cost_matrix.mapv(|c| c as f64);
            let (row_to_col, _) = lapjv::lapjv(&costs)
                .map_err(|e| TrackingError::AssignmentFailed(format!("{:?}", e)))?;
            if row_to_col.len() != rows || row_to_col.iter().any(|&c| c >= cols) {
                return Err(TrackingError::shape("solver output", &[rows], &[row_to_col.len()]));
            }
            Ok(row_to_col.into_iter().enumerate().collect())
        }
    }
}

/// What the matching decided for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// `(track, cell)` pairs that continue an existing track.
    pub continuations: Vec<(usize, usize)>,
    /// Cells matched to a birth sink.
    pub births: Vec<usize>,
    /// Tracks matched to a death sink.
    pub deaths: Vec<usize>,
}

/// Interpret solver pairs against `num_tracks` real rows and `num_cells` real
/// columns. Sink-to-sink pairs carry no meaning and are dropped.
pub fn classify(
    pairs: &[(usize, usize)],
    num_tracks: usize,
    num_cells: usize,
) -> Result<AssignmentResult, TrackingError> {
    let mut result = AssignmentResult::default();
    for &(row, col) in pairs {
        match (row < num_tracks, col < num_cells) {
            (true, true) => result.continuations.push((row, col)),
            (false, true) => result.births.push(col),
            (true, false) => result.deaths.push(row),
            (false, false) => {}
        }
    }

    let tracks_resolved = result.continuations.len() + result.deaths.len();
    let cells_resolved = result.continuations.len() + result.births.len();
    if tracks_resolved != num_tracks || cells_resolved != num_cells {
        return Err(TrackingError::shape(
            "assignment",
            &[num_tracks, num_cells],
            &[tracks_resolved, cells_resolved],
        ));
    }

    result.births.sort_unstable();
    Ok(result)
}

/// Solve and classify a cost matrix in one step.
pub fn linear_assignment(cost: &CostMatrix) -> Result<AssignmentResult, TrackingError> {
    let pairs = solve(&cost.matrix)?;
    classify(&pairs, cost.num_tracks, cost.num_cells)
}
