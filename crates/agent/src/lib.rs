//! The observation-action control loop.
//!
//! Each step follows an **Observe → Decide → Act** cycle:
//!
//! 1. **Observe**: capture the device screen once it has settled and run
//!    element detection on it
//! 2. **Decide**: send the bounded conversation history to the provider
//! 3. **Act**: validate every tool invocation and execute it on the device,
//!    in order, and feed the results back into the history
//!
//! The loop ends when the decider calls `end_session`, announces the game is
//! over, a step or error budget runs out, or the operator stops it.

pub mod cancel;
pub mod conversation;
pub mod executor;
pub mod loop_runner;
pub mod observer;
pub mod prompt;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use cancel::{StopHandle, StopSignal, stop_channel};
pub use conversation::ConversationState;
pub use executor::{ActionExecutor, ActionOutcome};
pub use loop_runner::AgentLoop;
pub use observer::{ScreenObserver, SettledFrame};
pub use prompt::{build_system_prompt, format_elements};
pub use session::{Session, SessionSummary};
