//! # droidloop Core
//!
//! Domain types, traits, and error definitions for the droidloop device agent.
//! This crate has **no I/O of its own**: it defines the domain model that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the control loop is a trait here. Implementations
//! live in their respective crates. This enables:
//! - Running the loop against a real phone or a scripted mock
//! - Swapping the reasoning service or the element detector via configuration
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod observation;
pub mod message;
pub mod provider;
pub mod tool;
pub mod device;
pub mod session;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{
    DecisionError, DetectionError, DeviceError, Error, ExecutionError, ObservationError, Result,
    ValidationError,
};
pub use observation::{
    BoundingBox, DetectedElement, ElementKind, Observation, Point, ScreenFingerprint, ScreenInfo,
    Screenshot,
};
pub use message::{ConversationEntry, ObservationSummary, Role};
pub use provider::{Decision, DecisionRequest, Provider, ToolDefinition, Usage};
pub use tool::{
    Action, ActionCaveat, SystemKey, ToolErrorKind, ToolInvocation, ToolName, ToolResult,
    ToolSchema, ValidatedInvocation,
};
pub use device::{Detection, Device, ElementDetector};
pub use session::{SessionLimits, SessionState};
pub use event::{EventBus, SessionEvent, StepReport};
