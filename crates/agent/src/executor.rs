//! Carrying out validated actions on the device.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use droidloop_core::device::Device;
use droidloop_core::error::{DeviceError, ExecutionError};
use droidloop_core::observation::{Observation, Point, ScreenFingerprint, ScreenInfo};
use droidloop_core::tool::{Action, ActionCaveat, ValidatedInvocation};

use crate::cancel::StopSignal;
use crate::observer::ScreenObserver;

/// Longest text sent in one `type_text`.
pub const MAX_TYPE_CHARS: usize = 500;

/// Unchanged-screen streak after which the decider is told to change tack.
const UNCHANGED_STREAK_HINT: u32 = 3;

/// What a successful action produced.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub detail: String,
    pub caveats: Vec<ActionCaveat>,

    /// The settled screen after the action, when capture-after-action is on
    pub observation: Option<Observation>,

    /// Set by `end_session`
    pub end_session: Option<String>,
}

impl ActionOutcome {
    fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            ..Default::default()
        }
    }

    pub fn settled(&self) -> bool {
        !self.caveats.contains(&ActionCaveat::PossiblyAnimating)
    }
}

pub struct ActionExecutor {
    observer: Arc<ScreenObserver>,
    screen: ScreenInfo,
    action_timeout: Duration,

    /// Fingerprint of the most recent frame seen
    last_fingerprint: Option<ScreenFingerprint>,

    /// Consecutive device actions that left the screen unchanged
    unchanged_streak: u32,
}

impl ActionExecutor {
    pub fn new(observer: Arc<ScreenObserver>, screen: ScreenInfo, action_timeout: Duration) -> Self {
        Self {
            observer,
            screen,
            action_timeout,
            last_fingerprint: None,
            unchanged_streak: 0,
        }
    }

    /// Record the frame the next action will be compared against.
    pub fn observed(&mut self, observation: &Observation) {
        self.last_fingerprint = Some(observation.fingerprint);
    }

    pub fn unchanged_streak(&self) -> u32 {
        self.unchanged_streak
    }

    /// Execute one action.
    ///
    /// `presented` is the observation the decider chose from; `tap_element`
    /// resolves ids against it. A fresh observation is tagged `next_step`.
    pub async fn execute(
        &mut self,
        device: &dyn Device,
        invocation: &ValidatedInvocation,
        presented: &Observation,
        next_step: u64,
        stop: &StopSignal,
    ) -> Result<ActionOutcome, ExecutionError> {
        let detail = match &invocation.action {
            Action::TapElement { element_id } => {
                let element = presented.element(*element_id).ok_or_else(|| ExecutionError::UnknownElement {
                    id: *element_id,
                    available: presented.element_ids(),
                })?;
                let at = element.center();
                self.check_bounds(at)?;
                info!(element_id, %at, label = %element.label, "tap_element");
                self.timed("tap", device.tap(at)).await?;
                format!("Tapped element [{element_id}] '{}' at {at}.", element.label)
            }
            Action::Tap { at } => {
                self.check_bounds(*at)?;
                info!(%at, "tap");
                self.timed("tap", device.tap(*at)).await?;
                format!("Tapped at {at}.")
            }
            Action::Swipe { from, to, duration } => {
                self.check_bounds(*from)?;
                self.check_bounds(*to)?;
                info!(%from, %to, duration_ms = duration.as_millis() as u64, "swipe");
                self.timed("swipe", device.swipe(*from, *to, *duration)).await?;
                format!("Swiped from {from} to {to} over {:.1}s.", duration.as_secs_f64())
            }
            Action::LongPress { at, duration } => {
                self.check_bounds(*at)?;
                info!(%at, duration_ms = duration.as_millis() as u64, "long_press");
                self.timed("long_press", device.long_press(*at, *duration)).await?;
                format!("Long pressed at {at} for {:.1}s.", duration.as_secs_f64())
            }
            Action::PressKey { key } => {
                info!(%key, "press_key");
                self.timed("press_key", device.press_key(*key)).await?;
                format!("Pressed {key}.")
            }
            Action::TypeText { text } => {
                let total = text.chars().count();
                let typed: String = text.chars().take(MAX_TYPE_CHARS).collect();
                if total > MAX_TYPE_CHARS {
                    warn!(total, kept = MAX_TYPE_CHARS, "Truncating type_text input");
                }
                info!(chars = typed.chars().count(), "type_text");
                self.timed("type_text", device.type_text(&typed)).await?;
                if total > MAX_TYPE_CHARS {
                    format!("Typed the first {MAX_TYPE_CHARS} of {total} characters.")
                } else {
                    format!("Typed \"{typed}\".")
                }
            }
            Action::Wait { duration } => {
                info!(secs = duration.as_secs_f64(), reasoning = invocation.reasoning.as_deref().unwrap_or(""), "wait");
                let detail = if stop.sleep(*duration).await {
                    format!("Waited {:.1}s.", duration.as_secs_f64())
                } else {
                    "Wait interrupted by stop request.".to_string()
                };
                return Ok(ActionOutcome::detail(detail));
            }
            Action::EndSession { reason } => {
                info!(%reason, "end_session");
                return Ok(ActionOutcome {
                    end_session: Some(reason.clone()),
                    ..ActionOutcome::detail(format!("Session end acknowledged: {reason}"))
                });
            }
        };

        Ok(self.after_input(device, detail, next_step, stop).await)
    }

    fn check_bounds(&self, at: Point) -> Result<(), ExecutionError> {
        if self.screen.contains(at) {
            Ok(())
        } else {
            Err(ExecutionError::OutOfBounds {
                x: at.x,
                y: at.y,
                width: self.screen.width,
                height: self.screen.height,
            })
        }
    }

    async fn timed(
        &self,
        action: &str,
        call: impl Future<Output = Result<(), DeviceError>>,
    ) -> Result<(), ExecutionError> {
        match tokio::time::timeout(self.action_timeout, call).await {
            Ok(result) => result.map_err(ExecutionError::from),
            Err(_) => Err(ExecutionError::DeviceTimeout {
                action: action.to_string(),
                timeout_secs: self.action_timeout.as_secs(),
            }),
        }
    }

    /// Settle after input, compare with the previous frame and optionally
    /// observe the new screen. The action itself already succeeded, so
    /// failures here only downgrade the outcome.
    async fn after_input(&mut self, device: &dyn Device, mut detail: String, next_step: u64, stop: &StopSignal) -> ActionOutcome {
        let frame = match self.observer.settle(device, stop).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Could not capture the screen after the action");
                detail.push_str(&format!(" The resulting screen could not be captured: {e}"));
                return ActionOutcome::detail(detail);
            }
        };

        let mut caveats = Vec::new();
        if !frame.stable {
            caveats.push(ActionCaveat::PossiblyAnimating);
        }

        if self.last_fingerprint == Some(frame.fingerprint) {
            self.unchanged_streak += 1;
            caveats.push(ActionCaveat::ScreenUnchanged);
            warn!(streak = self.unchanged_streak, "Screen unchanged after action");
            detail.push_str(" WARNING: The screen did NOT change after this action. Your target was probably wrong.");
            if self.unchanged_streak >= UNCHANGED_STREAK_HINT {
                detail.push_str(&format!(
                    " You have made {} actions with no screen change. Try a completely different approach.",
                    self.unchanged_streak
                ));
            }
        } else {
            self.unchanged_streak = 0;
        }
        self.last_fingerprint = Some(frame.fingerprint);

        let observation = if self.observer.capture_after_action() {
            match self.observer.observe(frame, next_step).await {
                Ok(obs) => Some(obs),
                Err(e) => {
                    warn!(error = %e, "Post-action observation failed");
                    None
                }
            }
        } else {
            None
        };
        debug!(has_observation = observation.is_some(), ?caveats, "Action settled");

        ActionOutcome {
            detail,
            caveats,
            observation,
            end_session: None,
        }
    }
}
