//! Error types for the droidloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator of the control loop has its own error enum; the loop
//! decides which of them are recovered locally and which abort a step.

use thiserror::Error;

/// The top-level error type for all droidloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Observation errors ---
    #[error("Observation error: {0}")]
    Observation(#[from] ObservationError),

    // --- Decision errors ---
    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    // --- Validation errors ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Execution errors ---
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    // --- Device errors ---
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

/// Failures talking to the physical (or emulated) device.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("No devices attached. Is the device connected with USB debugging enabled?")]
    NoDevices,

    #[error("Multiple devices attached: {0:?}. Pick one with --device or `device.serial`")]
    MultipleDevices(Vec<String>),

    #[error("Device command failed: {command}: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Device command timed out: {command} after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Unexpected device output: {0}")]
    InvalidOutput(String),

    #[error("Key not supported by this device: {0}")]
    UnsupportedKey(String),

    #[error("App not installed: {0}")]
    AppNotFound(String),
}

/// Failures of the element-detection collaborator.
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    #[error("Detection request failed: {0}")]
    Request(String),

    #[error("Detection service returned status {status_code}: {message}")]
    Service { status_code: u16, message: String },

    #[error("Detection response could not be parsed: {0}")]
    Malformed(String),
}

/// Acquiring an observation failed (capture or detection).
#[derive(Debug, Clone, Error)]
pub enum ObservationError {
    #[error("Screen capture failed: {0}")]
    Capture(#[from] DeviceError),

    #[error("Element detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("Observation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// The reasoning service call failed or returned an unusable structure.
#[derive(Debug, Clone, Error)]
pub enum DecisionError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Unparsable response: {0}")]
    Malformed(String),

    #[error("Decision contained neither text nor tool invocations")]
    EmptyDecision,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// A well-formed invocation that violates the tool schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} is not available in this session")]
    ToolUnavailable { tool: String },

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Unsupported key: {0} (expected BACK, HOME or ENTER)")]
    UnsupportedKey(String),
}

/// A validated action that could not be carried out.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("Element ID {id} not found. Available IDs: {available:?}. Use tap(x, y) with coordinates instead")]
    UnknownElement { id: u32, available: Vec<u32> },

    #[error("Coordinate ({x}, {y}) is outside the {width}x{height} screen")]
    OutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("Device did not respond to {action} within {timeout_secs}s")]
    DeviceTimeout { action: String, timeout_secs: u64 },

    #[error("Device error: {0}")]
    Device(DeviceError),
}

impl From<DeviceError> for ExecutionError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::UnsupportedKey(key) => Self::UnsupportedKey(key),
            DeviceError::Timeout {
                command,
                timeout_secs,
            } => Self::DeviceTimeout {
                action: command,
                timeout_secs,
            },
            other => Self::Device(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_error_displays_correctly() {
        let err = Error::Decision(DecisionError::ApiError {
            status_code: 529,
            message: "Overloaded".into(),
        });
        assert!(err.to_string().contains("529"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn unknown_element_lists_available_ids() {
        let err = ExecutionError::UnknownElement {
            id: 9,
            available: vec![1, 2, 3],
        };
        let text = err.to_string();
        assert!(text.contains("Element ID 9"));
        assert!(text.contains("[1, 2, 3]"));
    }

    #[test]
    fn device_timeout_maps_to_execution_timeout() {
        let err: ExecutionError = DeviceError::Timeout {
            command: "input tap".into(),
            timeout_secs: 30,
        }
        .into();
        assert!(matches!(err, ExecutionError::DeviceTimeout { timeout_secs: 30, .. }));
    }

    #[test]
    fn device_unsupported_key_maps_to_execution_unsupported_key() {
        let err: ExecutionError = DeviceError::UnsupportedKey("MENU".into()).into();
        assert!(matches!(err, ExecutionError::UnsupportedKey(ref k) if k == "MENU"));
    }

    #[test]
    fn observation_error_wraps_device_error() {
        let err: ObservationError = DeviceError::NoDevices.into();
        assert!(err.to_string().contains("Screen capture failed"));
    }
}
