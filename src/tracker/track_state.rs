/// Lifecycle state of a cell track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Accepting new frames
    #[default]
    Open,
    /// Divided at `frame`; holds no frames at or after it
    Capped { frame: usize },
}

impl TrackState {
    pub fn is_capped(&self) -> bool {
        matches!(self, Self::Capped { .. })
    }

    /// Frame the track divided at, if it has.
    pub fn capped_at(&self) -> Option<usize> {
        match self {
            Self::Open => None,
            Self::Capped { frame } => Some(*frame),
        }
    }
}
