//! Session lifecycle states and the legal transitions between them

use camlink_core::Diagnostic;
use std::fmt;

/// Lifecycle state of the single camera session.
///
/// ```text
/// Idle -> Opening -> Open -> StartingPreview -> Previewing <-> Recording
///                     ^                              |            |
///                     +------- StoppingPreview <-----+------------+
/// ```
///
/// Every state may fall into `Error`; `Error` is left only through a reset,
/// which returns to `Idle` from anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No device opened
    #[default]
    Idle,
    /// Open request in flight
    Opening,
    /// Device opened with parameters, not streaming
    Open,
    /// Preview handshake and transport connect in flight
    StartingPreview,
    /// Frames are flowing
    Previewing,
    /// Frames are flowing and the service is recording
    Recording,
    /// Teardown in flight
    StoppingPreview,
    /// Unrecoverable failure; needs a reset
    Error(Diagnostic),
}

impl SessionState {
    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Opening => "Opening",
            SessionState::Open => "Open",
            SessionState::StartingPreview => "StartingPreview",
            SessionState::Previewing => "Previewing",
            SessionState::Recording => "Recording",
            SessionState::StoppingPreview => "StoppingPreview",
            SessionState::Error(_) => "Error",
        }
    }

    /// Whether `next` follows from `self` along the lifecycle graph.
    ///
    /// Rollbacks (`Opening -> Idle`, `StartingPreview -> Open`) are part of
    /// the graph. Resets are not; they bypass it.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Error(_), _) => false,
            (_, Error(_)) => true,
            (Idle, Opening) => true,
            (Opening, Open) | (Opening, Idle) => true,
            (Open, Opening) | (Open, StartingPreview) => true,
            (StartingPreview, Previewing)
            | (StartingPreview, Open)
            | (StartingPreview, StoppingPreview) => true,
            (Previewing, Recording) | (Previewing, StoppingPreview) => true,
            (Recording, Previewing) | (Recording, StoppingPreview) => true,
            (StoppingPreview, Open) => true,
            _ => false,
        }
    }

    /// Frames are expected in this state
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Previewing | SessionState::Recording)
    }

    /// Check if this is the error state
    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error(_))
    }

    /// Stored diagnostic of the error state
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            SessionState::Error(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(diagnostic) => write!(f, "Error({})", diagnostic),
            other => f.write_str(other.name()),
        }
    }
}
