//! Error types for tracker construction and per-frame updates.

use crate::tracker::feature::FeatureKind;
use thiserror::Error;

/// Boxed error produced by an external collaborator (oracle or extractor).
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid tracker configuration, reported at construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no features specified")]
    NoFeatures,
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error("invalid value for `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: String },
}

/// Fatal failure while tracking a sequence.
///
/// None of these are retried: frame `F + 1` depends on the repaired state
/// after frame `F`, so the run stops at the first error.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("feature bundle for cell {cell_id} is missing `{kind}`")]
    MissingFeature { kind: FeatureKind, cell_id: u32 },

    #[error("malformed cost matrix: {0}")]
    MalformedCostMatrix(String),

    #[error("assignment solver failed: {0}")]
    AssignmentFailed(String),

    #[error("no track with id {0}")]
    UnknownTrack(usize),

    #[error("invalid update of track {track}: {reason}")]
    TrackUpdate { track: usize, reason: String },

    #[error("frame {frame} is outside a sequence of {frames} frames")]
    FrameOutOfRange { frame: usize, frames: usize },

    #[error("tracker has not been initialized with a first frame")]
    NotInitialized,

    #[error("tracker was already initialized")]
    AlreadyInitialized,

    #[error("affinity oracle failed")]
    Oracle(#[source] BoxedError),

    #[error("feature extraction failed for frame {frame}, cell {cell_id}")]
    Extractor {
        frame: usize,
        cell_id: u32,
        #[source]
        source: BoxedError,
    },
}

impl TrackingError {
    pub(crate) fn shape(context: &'static str, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
