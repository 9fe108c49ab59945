//! Relay loop state.

use serde::Serialize;

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Shutdown requested programmatically.
    Requested,

    /// Interrupt or termination signal.
    Signal,

    /// The configured unit limit was reached.
    UnitLimit,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Requested => "Shutdown requested",
            Self::Signal => "Interrupted by signal",
            Self::UnitLimit => "Unit limit reached",
        }
    }
}

/// Two-state lifecycle of the relay loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Running,

    /// Terminal.
    Terminated { reason: Option<StopReason> },
}

impl RelayState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Terminated { .. } => "Terminated",
        }
    }
}
