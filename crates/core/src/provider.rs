//! Provider trait: the abstraction over the reasoning service.
//!
//! A Provider receives the bounded conversation history plus the tool schema
//! and returns one [`Decision`]: optional text and zero or more tool
//! invocations. It never sees the device.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DecisionError;
use crate::message::ConversationEntry;
use crate::tool::ToolInvocation;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Everything needed for one decision request.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub model: String,

    pub system_prompt: String,

    /// Free-text context supplied by the operator for this session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_context: Option<String>,

    /// Ordered history snapshot, oldest first
    pub history: Vec<ConversationEntry>,

    pub tools: Vec<ToolDefinition>,

    pub max_tokens: u32,

    pub temperature: f32,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// The decider's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Response id assigned by the service
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Invocations in the order the service returned them
    #[serde(default)]
    pub invocations: Vec<ToolInvocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl Decision {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: Some(text.into()),
            invocations: Vec::new(),
            usage: None,
            model: String::new(),
            stop_reason: None,
        }
    }

    pub fn with_invocations(invocations: Vec<ToolInvocation>) -> Self {
        Self {
            id: String::new(),
            text: None,
            invocations,
            usage: None,
            model: String::new(),
            stop_reason: Some("tool_use".into()),
        }
    }

    /// Neither text nor invocations.
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
            && self.text.as_deref().is_none_or(|t| t.trim().is_empty())
    }

    pub fn is_text_only(&self) -> bool {
        self.invocations.is_empty() && !self.is_empty()
    }
}

/// The core Provider trait.
///
/// The control loop calls `decide()` without knowing which service backs it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send the history and get one decision back.
    async fn decide(&self, request: DecisionRequest) -> std::result::Result<Decision, DecisionError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, DecisionError> {
        Ok(true)
    }
}
