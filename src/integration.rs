//! Integration module for connecting feature extraction and affinity models
//! with the cell tracker.
//!
//! This module provides the extractor trait, a bundle builder and a pipeline
//! that drives a whole label volume through the tracker.

mod builder;
mod extractor;
mod pipeline;

pub use builder::FeatureBundleBuilder;
pub use extractor::FeatureExtractor;
pub use pipeline::TrackingPipeline;

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnAffinityModel, BurnOracle, BurnOracleError};
