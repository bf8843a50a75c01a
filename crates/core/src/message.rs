//! Conversation domain types.
//!
//! The history sent to the decider is an ordered list of [`ConversationEntry`]
//! values. Observer turns carry screenshots; decider turns carry the decision
//! text and tool invocations; tool exchanges carry the results of a batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::observation::Observation;
use crate::tool::{ToolInvocation, ToolResult};

/// Who authored an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The loop, reporting what it sees and what happened
    Observer,
    /// The reasoning service
    Decider,
}

/// What is kept of an observation once its image has been evicted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationSummary {
    pub step: u64,
    pub captured_at: DateTime<Utc>,
    pub labels: Vec<String>,
}

impl ObservationSummary {
    pub fn of(observation: &Observation) -> Self {
        Self {
            step: observation.step,
            captured_at: observation.captured_at,
            labels: observation.element_labels(),
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEntry {
    /// Plain text. Also what an image-bearing entry becomes after eviction.
    TextOnly {
        role: Role,
        step: u64,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        evicted: Option<ObservationSummary>,
    },

    /// An observation presented to the decider.
    WithImage {
        step: u64,
        text: String,
        observation: Arc<Observation>,
    },

    /// The decider's reply.
    Decision {
        step: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        invocations: Vec<ToolInvocation>,
    },

    /// Results of one batch, in invocation order.
    ToolExchange { step: u64, results: Vec<ToolResult> },
}

impl ConversationEntry {
    pub fn observer_text(step: u64, text: impl Into<String>) -> Self {
        Self::TextOnly {
            role: Role::Observer,
            step,
            text: text.into(),
            evicted: None,
        }
    }

    pub fn observation(step: u64, text: impl Into<String>, observation: Arc<Observation>) -> Self {
        Self::WithImage {
            step,
            text: text.into(),
            observation,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::TextOnly { role, .. } => *role,
            Self::WithImage { .. } | Self::ToolExchange { .. } => Role::Observer,
            Self::Decision { .. } => Role::Decider,
        }
    }

    pub fn step(&self) -> u64 {
        match self {
            Self::TextOnly { step, .. }
            | Self::WithImage { step, .. }
            | Self::Decision { step, .. }
            | Self::ToolExchange { step, .. } => *step,
        }
    }

    pub fn has_image(&self) -> bool {
        matches!(self, Self::WithImage { .. })
    }

    pub fn observation_ref(&self) -> Option<&Arc<Observation>> {
        match self {
            Self::WithImage { observation, .. } => Some(observation),
            _ => None,
        }
    }

    /// The text-only form of an image-bearing entry. `None` for any other
    /// variant.
    pub fn to_evicted(&self) -> Option<Self> {
        match self {
            Self::WithImage {
                step,
                text,
                observation,
            } => Some(Self::TextOnly {
                role: Role::Observer,
                step: *step,
                text: format!("{text}\n[screenshot from step {step} removed]"),
                evicted: Some(ObservationSummary::of(observation)),
            }),
            _ => None,
        }
    }
}
