//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Screenshots as base64 `image` content blocks
//! - Native tool use with `tool_use` / `tool_result` content blocks

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use droidloop_core::error::DecisionError;
use droidloop_core::message::{ConversationEntry, Role};
use droidloop_core::provider::*;
use droidloop_core::tool::{ToolInvocation, ToolResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: build_client(Duration::from_secs(120)),
            timeout: Duration::from_secs(120),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_client(timeout);
        self
    }

    /// Combine the system prompt with operator-supplied context.
    fn system_text(request: &DecisionRequest) -> String {
        match request.extra_context.as_deref().map(str::trim) {
            Some(ctx) if !ctx.is_empty() => {
                format!("{}\n\n## Additional Context\n{ctx}", request.system_prompt)
            }
            _ => request.system_prompt.clone(),
        }
    }

    /// Convert history entries to Anthropic turns.
    ///
    /// Observer entries become `user` turns and decider entries `assistant`
    /// turns. Consecutive turns of the same role are merged, which also puts
    /// a batch's `tool_result` blocks in front of the next screenshot.
    fn to_api_messages(history: &[ConversationEntry]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for entry in history {
            let blocks = match entry {
                ConversationEntry::TextOnly { text, .. } => vec![ContentBlock::Text {
                    text: text.clone(),
                }],
                ConversationEntry::WithImage {
                    text, observation, ..
                } => {
                    let image = observation.display_image();
                    vec![
                        ContentBlock::Image {
                            source: ImageSource {
                                kind: "base64".into(),
                                media_type: image.media_type.clone(),
                                data: BASE64.encode(&image.data),
                            },
                        },
                        ContentBlock::Text { text: text.clone() },
                    ]
                }
                ConversationEntry::Decision {
                    text, invocations, ..
                } => Self::decision_blocks(text.as_deref(), invocations),
                ConversationEntry::ToolExchange { results, .. } => {
                    results.iter().map(Self::result_block).collect()
                }
            };

            if blocks.is_empty() {
                continue;
            }

            let role = match entry.role() {
                Role::Observer => "user",
                Role::Decider => "assistant",
            };

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content: blocks,
                }),
            }
        }

        result
    }

    fn decision_blocks(text: Option<&str>, invocations: &[ToolInvocation]) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        for inv in invocations {
            let input = if inv.arguments.is_object() {
                inv.arguments.clone()
            } else {
                serde_json::json!({})
            };
            blocks.push(ContentBlock::ToolUse {
                id: inv.id.clone(),
                name: inv.name.clone(),
                input,
            });
        }
        blocks
    }

    fn result_block(result: &ToolResult) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: result.invocation_id.clone(),
            content: result.detail.clone(),
            is_error: !result.success,
        }
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &DecisionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "system": Self::system_text(request),
            "messages": Self::to_api_messages(&request.history),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    fn map_send_error(&self, e: reqwest::Error) -> DecisionError {
        if e.is_timeout() {
            DecisionError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            DecisionError::Network(e.to_string())
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl droidloop_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(
        &self,
        request: DecisionRequest,
    ) -> std::result::Result<Decision, DecisionError> {
        if self.api_key.trim().is_empty() {
            return Err(DecisionError::NotConfigured(
                "Anthropic API key is empty. Set ANTHROPIC_API_KEY or provider.api_key".into(),
            ));
        }

        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            entries = request.history.len(),
            "Sending decision request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(DecisionError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(DecisionError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(DecisionError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| DecisionError::Malformed(format!("Failed to parse Anthropic response: {e}")))?;

        Ok(Self::response_to_decision(api_resp))
    }

    async fn health_check(&self) -> std::result::Result<bool, DecisionError> {
        // Try a minimal request to verify API key
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

impl AnthropicProvider {
    /// Convert Anthropic API response to a Decision.
    fn response_to_decision(resp: AnthropicResponse) -> Decision {
        let mut text_content = String::new();
        let mut invocations = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    invocations.push(ToolInvocation::new(id, name, input));
                }
                ResponseContentBlock::Other => {}
            }
        }

        Decision {
            id: resp.id,
            text: (!text_content.is_empty()).then_some(text_content),
            invocations,
            usage: Some(Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            }),
            model: resp.model,
            stop_reason: resp.stop_reason,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any future block types are ignored.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
