//! Trait for per-cell feature extraction backends.

use crate::tracker::{BoxedError, FeatureBundle};

/// Trait for per-cell feature extraction.
///
/// Implement this trait to measure cells from your image and label data.
/// Extraction of different cells in one frame runs in parallel, so
/// implementations must be `Sync`.
///
/// # Example
///
/// ```ignore
/// use celltrack_rs::{FeatureBundle, FeatureBundleBuilder, FeatureExtractor};
///
/// struct Centroids {
///     // Precomputed (row, col) per frame and cell
///     table: Vec<Vec<(f32, f32)>>,
/// }
///
/// impl FeatureExtractor for Centroids {
///     type Error = std::convert::Infallible;
///
///     fn extract(&self, frame: usize, cell_id: u32) -> Result<FeatureBundle, Self::Error> {
///         let (r, c) = self.table[frame][cell_id as usize - 1];
///         Ok(FeatureBundleBuilder::new().centroid(r, c).build())
///     }
/// }
/// ```
pub trait FeatureExtractor: Sync {
    /// Error type for extraction failures.
    type Error: Into<BoxedError>;

    /// Measure cell `cell_id` (1-based) of `frame`.
    fn extract(&self, frame: usize, cell_id: u32) -> Result<FeatureBundle, Self::Error>;
}

impl<F, E> FeatureExtractor for F
where
    F: Fn(usize, u32) -> Result<FeatureBundle, E> + Sync,
    E: Into<BoxedError>,
{
    type Error = E;

    fn extract(&self, frame: usize, cell_id: u32) -> Result<FeatureBundle, Self::Error> {
        self(frame, cell_id)
    }
}
