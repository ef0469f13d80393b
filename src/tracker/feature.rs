//! Per-cell feature kinds and bundles.

use crate::tracker::cell_tracker::TrackerConfig;
use crate::tracker::displacement;
use crate::tracker::error::{ConfigError, TrackingError};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The closed set of features a cell can be described by.
///
/// Variants are declared in canonical (alphabetical) order, which is the
/// order features are laid out in an oracle batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    /// Intensity crop around the cell, resized to `crop_size x crop_size x channels`.
    Appearance,
    /// Cell centroid `(row, col)`. Converted to displacements before scoring.
    Distance,
    /// Occupancy grid of neighbouring cells, `(2r + 1) x (2r + 1) x 1`.
    Neighborhood,
    /// Cell perimeter, a single scalar.
    Perimeter,
}

impl FeatureKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Appearance => "appearance",
            Self::Distance => "distance",
            Self::Neighborhood => "neighborhood",
            Self::Perimeter => "perimeter",
        }
    }

    /// Expected shape of one frame's value for this feature.
    pub fn shape(&self, config: &TrackerConfig) -> Vec<usize> {
        match self {
            Self::Appearance => vec![config.crop_size, config.crop_size, config.channels],
            Self::Distance => vec![2],
            Self::Neighborhood => {
                let side = 2 * config.occupancy_grid_radius + 1;
                vec![side, side, 1]
            }
            Self::Perimeter => vec![1],
        }
    }

    /// Turn a padded track window and a candidate value into oracle inputs.
    ///
    /// Only `Distance` is transformed (into clamped relative displacements);
    /// every other feature passes through unchanged.
    pub fn pair_inputs(
        &self,
        window: &[ArrayD<f32>],
        candidate: &ArrayD<f32>,
        max_distance: f32,
    ) -> (Vec<ArrayD<f32>>, ArrayD<f32>) {
        match self {
            Self::Distance => displacement::relative_displacements(window, candidate, max_distance),
            Self::Appearance | Self::Neighborhood | Self::Perimeter => {
                (window.to_vec(), candidate.clone())
            }
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appearance" => Ok(Self::Appearance),
            "distance" => Ok(Self::Distance),
            "neighborhood" => Ok(Self::Neighborhood),
            "perimeter" => Ok(Self::Perimeter),
            other => Err(ConfigError::UnknownFeature(other.to_string())),
        }
    }
}

/// Features of one cell in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureBundle {
    values: BTreeMap<FeatureKind, ArrayD<f32>>,
}

impl FeatureBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: FeatureKind, value: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.values.insert(kind, value)
    }

    pub fn with(mut self, kind: FeatureKind, value: ArrayD<f32>) -> Self {
        self.values.insert(kind, value);
        self
    }

    pub fn get(&self, kind: FeatureKind) -> Option<&ArrayD<f32>> {
        self.values.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = FeatureKind> + '_ {
        self.values.keys().copied()
    }

    /// Check that every enabled feature is present with its expected shape,
    /// dropping any feature that is not enabled.
    pub(crate) fn conform(
        mut self,
        config: &TrackerConfig,
        cell_id: u32,
    ) -> Result<Self, TrackingError> {
        self.values.retain(|kind, _| config.features.contains(kind));
        for &kind in &config.features {
            let value = self
                .values
                .get(&kind)
                .ok_or(TrackingError::MissingFeature { kind, cell_id })?;
            let expected = kind.shape(config);
            if value.shape() != expected.as_slice() {
                return Err(TrackingError::shape("feature bundle", &expected, value.shape()));
            }
        }
        Ok(self)
    }
}

impl IntoIterator for FeatureBundle {
    type Item = (FeatureKind, ArrayD<f32>);
    type IntoIter = std::collections::btree_map::IntoIter<FeatureKind, ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_parse_feature_names() {
        assert_eq!("distance".parse::<FeatureKind>(), Ok(FeatureKind::Distance));
        assert_eq!(
            "velocity".parse::<FeatureKind>(),
            Err(ConfigError::UnknownFeature("velocity".into()))
        );
    }

    #[test]
    fn test_feature_shapes() {
        let config = TrackerConfig {
            crop_size: 8,
            channels: 2,
            occupancy_grid_radius: 3,
            ..TrackerConfig::default()
        };
        assert_eq!(FeatureKind::Appearance.shape(&config), vec![8, 8, 2]);
        assert_eq!(FeatureKind::Neighborhood.shape(&config), vec![7, 7, 1]);
        assert_eq!(FeatureKind::Distance.shape(&config), vec![2]);
        assert_eq!(FeatureKind::Perimeter.shape(&config), vec![1]);
    }

    #[test]
    fn test_conform_rejects_missing_and_misshapen() {
        let config = TrackerConfig::with_features([FeatureKind::Distance, FeatureKind::Perimeter]);

        let missing = FeatureBundle::new().with(FeatureKind::Distance, arr1(&[1.0, 2.0]).into_dyn());
        assert!(matches!(
            missing.conform(&config, 3),
            Err(TrackingError::MissingFeature {
                kind: FeatureKind::Perimeter,
                cell_id: 3
            })
        ));

        let misshapen = FeatureBundle::new()
            .with(FeatureKind::Distance, arr1(&[1.0, 2.0, 3.0]).into_dyn())
            .with(FeatureKind::Perimeter, arr1(&[4.0]).into_dyn());
        assert!(matches!(
            misshapen.conform(&config, 1),
            Err(TrackingError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_conform_drops_disabled_features() {
        let config = TrackerConfig::with_features([FeatureKind::Perimeter]);
        let bundle = FeatureBundle::new()
            .with(FeatureKind::Distance, arr1(&[1.0, 2.0]).into_dyn())
            .with(FeatureKind::Perimeter, arr1(&[4.0]).into_dyn())
            .conform(&config, 1)
            .unwrap();
        assert_eq!(bundle.kinds().collect::<Vec<_>>(), vec![FeatureKind::Perimeter]);
    }
}
