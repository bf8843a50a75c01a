//! Tool schema and the action model.
//!
//! The decider acts on the device only through a closed set of tools. Raw
//! [`ToolInvocation`]s arrive as JSON; [`ToolSchema::validate`] turns them into
//! a typed [`Action`] or a [`ValidationError`] before anything touches the
//! device.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::error::{ExecutionError, ValidationError};
use crate::observation::Point;
use crate::provider::ToolDefinition;

/// Upper bound for the `wait` tool.
pub const MAX_WAIT_SECS: f64 = 60.0;

/// Upper bound for swipe and long-press gestures.
pub const MAX_GESTURE_SECS: f64 = 10.0;

/// A tool call as supplied by the decision client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Call id assigned by the reasoning service (echoed back in the result)
    pub id: String,

    pub name: String,

    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The closed set of tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    TapElement,
    Tap,
    Swipe,
    LongPress,
    PressKey,
    TypeText,
    Wait,
    EndSession,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        Self::TapElement,
        Self::Tap,
        Self::Swipe,
        Self::LongPress,
        Self::PressKey,
        Self::TypeText,
        Self::Wait,
        Self::EndSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TapElement => "tap_element",
            Self::Tap => "tap",
            Self::Swipe => "swipe",
            Self::LongPress => "long_press",
            Self::PressKey => "press_key",
            Self::TypeText => "type_text",
            Self::Wait => "wait",
            Self::EndSession => "end_session",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Android system keys the decider may press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemKey {
    Back,
    Home,
    Enter,
}

impl SystemKey {
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim().to_ascii_uppercase().as_str() {
            "BACK" => Some(Self::Back),
            "HOME" => Some(Self::Home),
            "ENTER" => Some(Self::Enter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Back => "BACK",
            Self::Home => "HOME",
            Self::Enter => "ENTER",
        }
    }

    /// Android key event name for `input keyevent`.
    pub fn keycode(&self) -> &'static str {
        match self {
            Self::Back => "KEYCODE_BACK",
            Self::Home => "KEYCODE_HOME",
            Self::Enter => "KEYCODE_ENTER",
        }
    }
}

impl std::fmt::Display for SystemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Per-tool argument structs ---

#[derive(Debug, Deserialize)]
struct TapElementArgs {
    element_id: u32,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TapArgs {
    x: u32,
    y: u32,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SwipeArgs {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
    #[serde(default = "default_swipe_secs")]
    duration: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LongPressArgs {
    x: u32,
    y: u32,
    #[serde(default = "default_long_press_secs")]
    duration: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PressKeyArgs {
    key: String,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypeTextArgs {
    text: String,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaitArgs {
    #[serde(default = "default_wait_secs")]
    seconds: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndSessionArgs {
    reason: String,
}

fn default_swipe_secs() -> f64 {
    0.5
}

fn default_long_press_secs() -> f64 {
    1.0
}

fn default_wait_secs() -> f64 {
    2.0
}

/// A typed, range-checked action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    TapElement { element_id: u32 },
    Tap { at: Point },
    Swipe { from: Point, to: Point, duration: Duration },
    LongPress { at: Point, duration: Duration },
    PressKey { key: SystemKey },
    TypeText { text: String },
    Wait { duration: Duration },
    EndSession { reason: String },
}

impl Action {
    pub fn tool(&self) -> ToolName {
        match self {
            Self::TapElement { .. } => ToolName::TapElement,
            Self::Tap { .. } => ToolName::Tap,
            Self::Swipe { .. } => ToolName::Swipe,
            Self::LongPress { .. } => ToolName::LongPress,
            Self::PressKey { .. } => ToolName::PressKey,
            Self::TypeText { .. } => ToolName::TypeText,
            Self::Wait { .. } => ToolName::Wait,
            Self::EndSession { .. } => ToolName::EndSession,
        }
    }

    /// Whether executing this action sends input to the device.
    pub fn touches_device(&self) -> bool {
        !matches!(self, Self::Wait { .. } | Self::EndSession { .. })
    }
}

/// An invocation that passed schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInvocation {
    pub id: String,
    pub action: Action,
    pub reasoning: Option<String>,
}

impl ValidatedInvocation {
    pub fn tool(&self) -> ToolName {
        self.action.tool()
    }
}

/// The tool set advertised for a session.
#[derive(Debug, Clone, Copy)]
pub struct ToolSchema {
    detection_enabled: bool,
}

impl ToolSchema {
    pub fn new(detection_enabled: bool) -> Self {
        Self { detection_enabled }
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    /// Whether the tool is advertised in this session.
    pub fn is_available(&self, tool: ToolName) -> bool {
        tool != ToolName::TapElement || self.detection_enabled
    }

    pub fn available(&self) -> Vec<ToolName> {
        ToolName::ALL
            .into_iter()
            .filter(|t| self.is_available(*t))
            .collect()
    }

    /// JSON-schema definitions sent to the decision client.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.available().into_iter().map(definition).collect()
    }

    /// Check an invocation against the schema.
    pub fn validate(&self, invocation: &ToolInvocation) -> Result<ValidatedInvocation, ValidationError> {
        let tool = ToolName::parse(&invocation.name)
            .ok_or_else(|| ValidationError::UnknownTool(invocation.name.clone()))?;
        if !self.is_available(tool) {
            return Err(ValidationError::ToolUnavailable {
                tool: tool.to_string(),
            });
        }

        let args = &invocation.arguments;
        let (action, reasoning) = match tool {
            ToolName::TapElement => {
                let a: TapElementArgs = parse_args(tool, args)?;
                (Action::TapElement { element_id: a.element_id }, a.reasoning)
            }
            ToolName::Tap => {
                let a: TapArgs = parse_args(tool, args)?;
                (Action::Tap { at: Point::new(a.x, a.y) }, a.reasoning)
            }
            ToolName::Swipe => {
                let a: SwipeArgs = parse_args(tool, args)?;
                let duration = gesture_duration(tool, a.duration)?;
                (
                    Action::Swipe {
                        from: Point::new(a.x1, a.y1),
                        to: Point::new(a.x2, a.y2),
                        duration,
                    },
                    a.reasoning,
                )
            }
            ToolName::LongPress => {
                let a: LongPressArgs = parse_args(tool, args)?;
                let duration = gesture_duration(tool, a.duration)?;
                (
                    Action::LongPress {
                        at: Point::new(a.x, a.y),
                        duration,
                    },
                    a.reasoning,
                )
            }
            ToolName::PressKey => {
                let a: PressKeyArgs = parse_args(tool, args)?;
                let key = SystemKey::parse(&a.key)
                    .ok_or_else(|| ValidationError::UnsupportedKey(a.key.clone()))?;
                (Action::PressKey { key }, a.reasoning)
            }
            ToolName::TypeText => {
                let a: TypeTextArgs = parse_args(tool, args)?;
                if a.text.is_empty() {
                    return Err(invalid(tool, "text must not be empty"));
                }
                (Action::TypeText { text: a.text }, a.reasoning)
            }
            ToolName::Wait => {
                let a: WaitArgs = parse_args(tool, args)?;
                if !(0.0..=MAX_WAIT_SECS).contains(&a.seconds) {
                    return Err(invalid(
                        tool,
                        &format!("seconds must be between 0 and {MAX_WAIT_SECS}, got {}", a.seconds),
                    ));
                }
                (
                    Action::Wait {
                        duration: Duration::from_secs_f64(a.seconds),
                    },
                    a.reasoning,
                )
            }
            ToolName::EndSession => {
                let a: EndSessionArgs = parse_args(tool, args)?;
                if a.reason.trim().is_empty() {
                    return Err(invalid(tool, "reason must not be empty"));
                }
                (Action::EndSession { reason: a.reason }, None)
            }
        };

        Ok(ValidatedInvocation {
            id: invocation.id.clone(),
            action,
            reasoning,
        })
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    tool: ToolName,
    args: &serde_json::Value,
) -> Result<T, ValidationError> {
    // A missing input object is treated as an empty one so defaults apply.
    let value = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(value).map_err(|e| invalid(tool, &e.to_string()))
}

fn gesture_duration(tool: ToolName, secs: f64) -> Result<Duration, ValidationError> {
    if !(secs > 0.0 && secs <= MAX_GESTURE_SECS) {
        return Err(invalid(
            tool,
            &format!("duration must be in (0, {MAX_GESTURE_SECS}] seconds, got {secs}"),
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn invalid(tool: ToolName, reason: &str) -> ValidationError {
    ValidationError::InvalidArguments {
        tool: tool.to_string(),
        reason: reason.to_string(),
    }
}

fn definition(tool: ToolName) -> ToolDefinition {
    let (description, parameters) = match tool {
        ToolName::TapElement => (
            "Tap on a detected UI element by its ID number. This is the preferred way to \
             interact with elements shown in the screenshot with numbered bounding boxes. \
             The centre of the element's bounding box is tapped.",
            json!({
                "type": "object",
                "properties": {
                    "element_id": { "type": "integer", "minimum": 0, "description": "The ID number of the detected element to tap" },
                    "reasoning": { "type": "string", "description": "Brief explanation of why you are tapping this element" }
                },
                "required": ["element_id"]
            }),
        ),
        ToolName::Tap => (
            "Tap at specific pixel coordinates on the screen. Use this only when the element \
             you need is not in the detected elements list. Coordinates are in pixels with \
             (0,0) at top-left.",
            json!({
                "type": "object",
                "properties": {
                    "x": { "type": "integer", "minimum": 0, "description": "X coordinate in pixels (0 = left edge)" },
                    "y": { "type": "integer", "minimum": 0, "description": "Y coordinate in pixels (0 = top edge)" },
                    "reasoning": { "type": "string", "description": "Brief explanation of why you are tapping here" }
                },
                "required": ["x", "y"]
            }),
        ),
        ToolName::Swipe => (
            "Swipe from one point to another on the screen. Use for scrolling, dragging, or \
             gesture-based interactions.",
            json!({
                "type": "object",
                "properties": {
                    "x1": { "type": "integer", "minimum": 0, "description": "Start X coordinate" },
                    "y1": { "type": "integer", "minimum": 0, "description": "Start Y coordinate" },
                    "x2": { "type": "integer", "minimum": 0, "description": "End X coordinate" },
                    "y2": { "type": "integer", "minimum": 0, "description": "End Y coordinate" },
                    "duration": { "type": "number", "description": "Duration of swipe in seconds (default 0.5)" },
                    "reasoning": { "type": "string", "description": "Why you are swiping" }
                },
                "required": ["x1", "y1", "x2", "y2"]
            }),
        ),
        ToolName::LongPress => (
            "Long press on a specific point on the screen.",
            json!({
                "type": "object",
                "properties": {
                    "x": { "type": "integer", "minimum": 0, "description": "X coordinate" },
                    "y": { "type": "integer", "minimum": 0, "description": "Y coordinate" },
                    "duration": { "type": "number", "description": "Duration in seconds (default 1.0)" },
                    "reasoning": { "type": "string", "description": "Why you are long pressing" }
                },
                "required": ["x", "y"]
            }),
        ),
        ToolName::PressKey => (
            "Press an Android system key. Use for BACK (dismiss dialogs), HOME, or ENTER.",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string", "enum": ["BACK", "HOME", "ENTER"], "description": "The key to press" },
                    "reasoning": { "type": "string", "description": "Why you are pressing this key" }
                },
                "required": ["key"]
            }),
        ),
        ToolName::TypeText => (
            "Type text into the focused input field. Tap the field first.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "The text to type" },
                    "reasoning": { "type": "string", "description": "Why you are typing this" }
                },
                "required": ["text"]
            }),
        ),
        ToolName::Wait => (
            "Wait without taking any action. Use when an animation is playing, a loading \
             screen is shown, or it is not your turn. Do not use this when the game is \
             waiting for your action.",
            json!({
                "type": "object",
                "properties": {
                    "seconds": { "type": "number", "minimum": 0, "maximum": MAX_WAIT_SECS, "description": "Seconds to wait (default 2.0)" },
                    "reasoning": { "type": "string", "description": "What you are waiting for" }
                }
            }),
        ),
        ToolName::EndSession => (
            "Signal that the game has ended. Use when you see a final score screen, a game \
             over message, or the game has clearly concluded.",
            json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "Description of the final game state" }
                },
                "required": ["reason"]
            }),
        ),
    };

    ToolDefinition {
        name: tool.to_string(),
        description: description.to_string(),
        parameters,
    }
}

// --- Results ---

/// Classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    UnknownElement,
    OutOfBounds,
    UnsupportedKey,
    DeviceTimeout,
    Device,
}

impl From<&ValidationError> for ToolErrorKind {
    fn from(err: &ValidationError) -> Self {
        match err {
            ValidationError::UnsupportedKey(_) => Self::UnsupportedKey,
            _ => Self::Validation,
        }
    }
}

impl From<&ExecutionError> for ToolErrorKind {
    fn from(err: &ExecutionError) -> Self {
        match err {
            ExecutionError::UnknownElement { .. } => Self::UnknownElement,
            ExecutionError::OutOfBounds { .. } => Self::OutOfBounds,
            ExecutionError::UnsupportedKey(_) => Self::UnsupportedKey,
            ExecutionError::DeviceTimeout { .. } => Self::DeviceTimeout,
            ExecutionError::Device(_) => Self::Device,
        }
    }
}

/// Non-fatal notes attached to a successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCaveat {
    /// The screen did not stabilize before the settle timeout
    PossiblyAnimating,
    /// The settled frame matches the frame before the action
    ScreenUnchanged,
}

/// The outcome of one invocation, fed back to the decider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Matches `ToolInvocation::id`
    pub invocation_id: String,

    pub tool: String,

    pub success: bool,

    /// Human-readable outcome or error message
    pub detail: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caveats: Vec<ActionCaveat>,
}

impl ToolResult {
    pub fn success(invocation_id: impl Into<String>, tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool: tool.into(),
            success: true,
            detail: detail.into(),
            error_kind: None,
            caveats: Vec::new(),
        }
    }

    pub fn failure(
        invocation_id: impl Into<String>,
        tool: impl Into<String>,
        kind: ToolErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool: tool.into(),
            success: false,
            detail: detail.into(),
            error_kind: Some(kind),
            caveats: Vec::new(),
        }
    }

    pub fn with_caveats(mut self, caveats: Vec<ActionCaveat>) -> Self {
        self.caveats = caveats;
        self
    }
}
