//! Session state and limits.

use serde::{Deserialize, Serialize};

/// Lifecycle of one automation session.
///
/// `Init → Running → (Completed | StoppedByLimit | StoppedBySignal | Failed)`.
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Init,
    Running,
    /// The decider reported that the game is over
    Completed,
    /// Step budget exhausted
    StoppedByLimit,
    /// `end_session` invoked or operator cancelled
    StoppedBySignal,
    /// Consecutive-error budget exhausted or startup failed
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Init | Self::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::StoppedByLimit => "stopped_by_limit",
            Self::StoppedBySignal => "stopped_by_signal",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Budgets that bound a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Maximum completed steps
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Consecutive failed steps before the session fails
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Observations that keep their image in the history
    #[serde(default = "default_max_images")]
    pub max_retained_observations: usize,
}

fn default_max_steps() -> u64 {
    100
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_max_images() -> usize {
    8
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_retained_observations: default_max_images(),
        }
    }
}
