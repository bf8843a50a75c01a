//! Session events: decoupled reporting out of the control loop.
//!
//! The loop publishes an event at session start, after every step (completed
//! or failed) and at session end. Sinks (logging, screenshot persistence, a
//! future UI) subscribe without the loop knowing about them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::observation::Observation;
use crate::provider::Decision;
use crate::session::SessionState;
use crate::tool::ToolResult;

/// Everything that happened in one completed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: u64,
    pub observation: Arc<Observation>,
    pub decision: Decision,
    /// In invocation order
    pub results: Vec<ToolResult>,
    pub consecutive_errors: u32,
    pub timestamp: DateTime<Utc>,
}

/// All events a session publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: String,
        device: String,
        max_steps: u64,
        timestamp: DateTime<Utc>,
    },

    StepCompleted(StepReport),

    /// A step aborted before its actions ran (observation or decision failure)
    StepFailed {
        step: u64,
        error: String,
        consecutive_errors: u32,
        timestamp: DateTime<Utc>,
    },

    SessionEnded {
        session_id: String,
        state: SessionState,
        reason: String,
        steps: u64,
        input_tokens: u64,
        output_tokens: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for session events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// A slow subscriber lags and loses events; the loop never blocks on it.
pub struct EventBus {
    sender: broadcast::Sender<Arc<SessionEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SessionEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
