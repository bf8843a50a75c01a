//! Per-run session bookkeeping.
//!
//! A [`Session`] is owned by the loop that drives it; there is no global
//! state. It only moves forward: once a terminal state is reached every
//! further transition is ignored.

use serde::Serialize;
use tracing::{debug, info};

use droidloop_core::provider::Usage;
use droidloop_core::session::{SessionLimits, SessionState};

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    limits: SessionLimits,
    extra_context: Option<String>,

    /// Completed steps
    steps: u64,

    consecutive_errors: u32,
    reason: Option<String>,

    input_tokens: u64,
    output_tokens: u64,

    /// Decisions received (conversation turns)
    decisions: u64,
}

impl Session {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Init,
            limits,
            extra_context: None,
            steps: 0,
            consecutive_errors: 0,
            reason: None,
            input_tokens: 0,
            output_tokens: 0,
            decisions: 0,
        }
    }

    /// Free-text context appended to the system prompt.
    pub fn with_extra_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.extra_context = (!context.trim().is_empty()).then_some(context);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn extra_context(&self) -> Option<&str> {
        self.extra_context.as_deref()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// 1-based index of the step in progress.
    pub fn current_step(&self) -> u64 {
        self.steps + 1
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// `Init → Running`.
    pub fn start(&mut self) {
        if self.state == SessionState::Init {
            self.state = SessionState::Running;
        }
    }

    /// Move to `state`. Ignored once the session is terminal.
    ///
    /// Returns whether the transition was applied.
    pub fn transition(&mut self, state: SessionState, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            debug!(current = %self.state, requested = %state, "Ignoring transition out of terminal state");
            return false;
        }
        let reason = reason.into();
        info!(session_id = %self.id, from = %self.state, to = %state, reason = %reason, "Session state changed");
        self.state = state;
        self.reason = Some(reason);
        true
    }

    pub fn complete_step(&mut self) {
        self.steps += 1;
    }

    /// Count one failed step. Returns the new counter value.
    pub fn record_error(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    pub fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn error_budget_exhausted(&self) -> bool {
        self.consecutive_errors >= self.limits.max_consecutive_errors
    }

    pub fn step_budget_exhausted(&self) -> bool {
        self.steps >= self.limits.max_steps
    }

    pub fn record_decision(&mut self, usage: Option<&Usage>) {
        self.decisions += 1;
        if let Some(usage) = usage {
            self.input_tokens += u64::from(usage.input_tokens);
            self.output_tokens += u64::from(usage.output_tokens);
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            state: self.state,
            reason: self.reason.clone().unwrap_or_default(),
            steps: self.steps,
            consecutive_errors: self.consecutive_errors,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            decisions: self.decisions,
        }
    }
}

/// What a finished session reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub reason: String,
    pub steps: u64,
    pub consecutive_errors: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub decisions: u64,
}
