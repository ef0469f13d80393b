//! Centroid displacement features.
//!
//! The oracle never sees absolute centroids. A track window of centroids plus
//! the candidate centroid is turned into frame-to-frame displacements, each
//! clamped to a maximum magnitude.

use nalgebra::Vector2;
use ndarray::{ArrayD, arr1};

/// Rescale `v` onto the circle of radius `max_distance` if it lies outside it.
///
/// Direction is preserved. A zero vector is always compliant and is returned
/// untouched.
#[inline]
pub fn clamp_magnitude(v: Vector2<f32>, max_distance: f32) -> Vector2<f32> {
    let norm = v.norm();
    if norm > max_distance && norm > 0.0 {
        v / norm * max_distance
    } else {
        v
    }
}

fn to_vector(value: &ArrayD<f32>) -> Vector2<f32> {
    let mut iter = value.iter().copied();
    let row = iter.next().unwrap_or(0.0);
    let col = iter.next().unwrap_or(0.0);
    Vector2::new(row, col)
}

fn to_array(v: Vector2<f32>) -> ArrayD<f32> {
    arr1(&[v.x, v.y]).into_dyn()
}

/// Convert a centroid window and a candidate centroid into displacements.
///
/// The window and candidate are concatenated, consecutive differences are
/// taken and a zero displacement is prepended, so the output keeps the input
/// lengths: the window maps to `window.len()` displacements (the first one
/// always zero) and the candidate to its displacement from the newest window
/// entry.
pub fn relative_displacements(
    window: &[ArrayD<f32>],
    candidate: &ArrayD<f32>,
    max_distance: f32,
) -> (Vec<ArrayD<f32>>, ArrayD<f32>) {
    let centroids: Vec<Vector2<f32>> = window
        .iter()
        .chain(std::iter::once(candidate))
        .map(to_vector)
        .collect();

    let mut displacements: Vec<ArrayD<f32>> = std::iter::once(Vector2::zeros())
        .chain(centroids.windows(2).map(|pair| pair[1] - pair[0]))
        .map(|d| to_array(clamp_magnitude(d, max_distance)))
        .collect();

    let candidate = displacements.pop().unwrap_or_else(|| to_array(Vector2::zeros()));
    (displacements, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn centroid(r: f32, c: f32) -> ArrayD<f32> {
        arr1(&[r, c]).into_dyn()
    }

    #[test]
    fn test_clamp_preserves_direction() {
        let v = clamp_magnitude(Vector2::new(30.0, 40.0), 10.0);
        assert_relative_eq!(v.norm(), 10.0, epsilon = 1e-5);
        assert_relative_eq!(v.x, 6.0, epsilon = 1e-5);
        assert_relative_eq!(v.y, 8.0, epsilon = 1e-5);
    }

    #[test]
    fn test_clamp_leaves_short_and_zero_vectors() {
        assert_eq!(clamp_magnitude(Vector2::new(3.0, 4.0), 10.0), Vector2::new(3.0, 4.0));
        assert_eq!(clamp_magnitude(Vector2::zeros(), 0.0), Vector2::zeros());
        assert_eq!(clamp_magnitude(Vector2::zeros(), 10.0), Vector2::zeros());
    }

    #[test]
    fn test_relative_displacements() {
        let window = vec![centroid(0.0, 0.0), centroid(1.0, 2.0)];
        let (track, cand) = relative_displacements(&window, &centroid(4.0, 6.0), 200.0);

        assert_eq!(track.len(), 2);
        assert_eq!(track[0], centroid(0.0, 0.0));
        assert_eq!(track[1], centroid(1.0, 2.0));
        assert_eq!(cand, centroid(3.0, 4.0));
    }

    #[test]
    fn test_relative_displacements_are_clamped() {
        let window = vec![centroid(0.0, 0.0)];
        let (track, cand) = relative_displacements(&window, &centroid(300.0, 400.0), 50.0);

        assert_eq!(track, vec![centroid(0.0, 0.0)]);
        assert_relative_eq!(cand[0], 30.0, epsilon = 1e-4);
        assert_relative_eq!(cand[1], 40.0, epsilon = 1e-4);
    }

    #[test]
    fn test_padded_window_has_zero_displacements() {
        let window = vec![centroid(5.0, 5.0); 3];
        let (track, cand) = relative_displacements(&window, &centroid(5.0, 6.0), 200.0);
        assert!(track.iter().all(|d| d.iter().all(|&x| x == 0.0)));
        assert_eq!(cand, centroid(0.0, 1.0));
    }
}
