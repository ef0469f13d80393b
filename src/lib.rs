//! Lineage-aware tracking of segmented cells across time-lapse frames.
//!
//! Every frame, open tracks are scored against the new frame's cells by an
//! external affinity oracle, and a single minimum-cost matching over a padded
//! cost matrix decides continuations, births and deaths together. Births are
//! checked for a parent to detect divisions, and the resulting lineage stays
//! queryable after the run.

pub mod integration;
pub mod tracker;

pub use integration::{FeatureBundleBuilder, FeatureExtractor, TrackingPipeline};
pub use tracker::{
    Affinity, AffinityBatch, AffinityOracle, CellTracker, ConfigError, FeatureBundle, FeatureKind,
    FrameReport, LineageRecord, Track, TrackState, TrackedVolume, TrackerConfig, TrackingError,
};
