mod affinity;
mod cell_tracker;
mod cost;
mod displacement;
mod error;
mod feature;
mod matching;
mod track;
mod track_state;
mod volume;

pub use affinity::{Affinity, AffinityBatch, AffinityOracle, FeatureBatch};
pub use cell_tracker::{CellTracker, FrameReport, LineageRecord, TrackerConfig};
pub use cost::{CostMatrix, birth_block, continuation_block, death_block};
pub use displacement::{clamp_magnitude, relative_displacements};
pub use error::{BoxedError, ConfigError, TrackingError};
pub use feature::{FeatureBundle, FeatureKind};
pub use matching::{AssignmentResult, classify, linear_assignment, solve};
pub use track::{FrameEntry, Track, TrackArena, TrackWindow};
pub use track_state::TrackState;
pub use volume::{TrackedVolume, relabel};
