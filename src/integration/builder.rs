//! Builder for creating FeatureBundle objects from raw measurements.

use crate::tracker::{FeatureBundle, FeatureKind};
use ndarray::{Array2, Array3, Axis, arr1};

/// Builder for creating `FeatureBundle` objects from raw measurements.
#[derive(Debug, Clone, Default)]
pub struct FeatureBundleBuilder {
    bundle: FeatureBundle,
}

impl FeatureBundleBuilder {
    /// Create a new bundle builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resized intensity crop, shape `[crop, crop, channels]`.
    pub fn appearance(mut self, crop: Array3<f32>) -> Self {
        self.bundle.insert(FeatureKind::Appearance, crop.into_dyn());
        self
    }

    /// Set the centroid as (row, col).
    pub fn centroid(mut self, row: f32, col: f32) -> Self {
        self.bundle
            .insert(FeatureKind::Distance, arr1(&[row, col]).into_dyn());
        self
    }

    /// Set the perimeter length.
    pub fn perimeter(mut self, perimeter: f32) -> Self {
        self.bundle
            .insert(FeatureKind::Perimeter, arr1(&[perimeter]).into_dyn());
        self
    }

    /// Set the occupancy grid, shape `[2r + 1, 2r + 1]`.
    pub fn neighborhood(mut self, grid: Array2<f32>) -> Self {
        self.bundle.insert(
            FeatureKind::Neighborhood,
            grid.insert_axis(Axis(2)).into_dyn(),
        );
        self
    }

    /// Build the final `FeatureBundle`.
    pub fn build(self) -> FeatureBundle {
        self.bundle
    }
}
