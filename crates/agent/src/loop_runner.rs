//! The agent loop implementation.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use droidloop_config::{AppConfig, GameProfile};
use droidloop_core::device::{Device, ElementDetector};
use droidloop_core::error::{DecisionError, ExecutionError, ObservationError};
use droidloop_core::event::{EventBus, SessionEvent, StepReport};
use droidloop_core::message::ConversationEntry;
use droidloop_core::observation::{Observation, ScreenInfo};
use droidloop_core::provider::{Decision, DecisionRequest, Provider};
use droidloop_core::session::SessionState;
use droidloop_core::tool::{ToolName, ToolResult, ToolSchema};
use droidloop_device::ImageEncoder;

use crate::cancel::StopSignal;
use crate::conversation::ConversationState;
use crate::executor::ActionExecutor;
use crate::observer::ScreenObserver;
use crate::prompt::{build_system_prompt, observation_text, resized_image_note};
use crate::session::{Session, SessionSummary};

/// Reason recorded when the operator stops the session.
pub const CANCELLED_REASON: &str = "cancelled by operator";

/// Time given to an app to come to the foreground after launch.
const APP_LAUNCH_GRACE: Duration = Duration::from_secs(2);

/// Longest decision text logged at `info`.
const LOG_PREVIEW_CHARS: usize = 200;

/// Why a step was aborted before its actions ran.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Observation(#[from] ObservationError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("stop requested")]
    Cancelled,
}

/// Drives one session: observe, decide, act, until a terminal state.
pub struct AgentLoop {
    /// The device under automation
    device: Arc<dyn Device>,

    /// The reasoning service
    provider: Arc<dyn Provider>,

    /// Optional element detector; without one the decider works from
    /// coordinates only
    detector: Option<Arc<dyn ElementDetector>>,

    config: AppConfig,
    profile: GameProfile,

    session: Session,
    conversation: ConversationState,

    /// Event bus for session events
    event_bus: Arc<EventBus>,

    stop: StopSignal,

    /// Most recent failure, quoted when the error budget runs out
    last_error: Option<String>,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        device: Arc<dyn Device>,
        provider: Arc<dyn Provider>,
        config: AppConfig,
        profile: GameProfile,
    ) -> Self {
        let limits = config.session_limits();
        Self {
            device,
            provider,
            detector: None,
            config,
            profile,
            session: Session::new(limits),
            conversation: ConversationState::new(limits.max_retained_observations),
            event_bus: Arc::new(EventBus::default()),
            stop: StopSignal::never(),
            last_error: None,
        }
    }

    /// Attach an element detector.
    pub fn with_detector(mut self, detector: Arc<dyn ElementDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Publish session events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    /// Stop when `stop` fires.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Free-text context appended to the system prompt.
    pub fn with_extra_context(mut self, context: impl Into<String>) -> Self {
        self.session = self.session.with_extra_context(context);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run the session to a terminal state.
    ///
    /// Never fails: every outcome, including a failed startup, ends in a
    /// terminal [`SessionState`] with a reason.
    pub async fn run(&mut self) -> SessionSummary {
        if self.session.state() != SessionState::Init {
            warn!(state = %self.session.state(), "Session already ran");
            return self.session.summary();
        }
        self.session.start();

        let screen = match self.startup().await {
            Ok(screen) => screen,
            Err(reason) => {
                error!(%reason, "Session startup failed");
                self.session.transition(SessionState::Failed, reason);
                return self.finish();
            }
        };

        let observer = Arc::new(self.build_observer());
        let schema = ToolSchema::new(observer.detection_enabled());
        let mut executor = ActionExecutor::new(observer.clone(), screen, self.config.session.action_timeout());
        let mut system_prompt = build_system_prompt(screen, &self.profile, schema.detection_enabled());
        if self.config.conversation.screenshot_resize_width > 0 {
            system_prompt.push_str(&resized_image_note(screen));
        }
        let ignore_bottom = self.config.detection.ignore_bottom_fraction;

        info!(
            session_id = %self.session.id(),
            device = %self.device.id(),
            profile = %self.profile.name,
            detection = schema.detection_enabled(),
            width = screen.width,
            height = screen.height,
            max_steps = self.session.limits().max_steps,
            "Starting session"
        );
        self.event_bus.publish(SessionEvent::SessionStarted {
            session_id: self.session.id().to_string(),
            device: self.device.id().to_string(),
            max_steps: self.session.limits().max_steps,
            timestamp: chrono::Utc::now(),
        });

        // Post-action observation carried into the next step
        let mut pending: Option<Arc<Observation>> = None;
        // Observation already in the history, awaiting a decision
        let mut presented: Option<Arc<Observation>> = None;

        while !self.session.state().is_terminal() {
            if self.stop.is_stopped() {
                self.session.transition(SessionState::StoppedBySignal, CANCELLED_REASON);
                break;
            }
            let step = self.session.current_step();

            // ── Observe ──
            let observation = match presented.take() {
                Some(observation) => observation,
                None => {
                    let acquired = match pending.take() {
                        Some(observation) => Ok(observation),
                        None => self.acquire(&observer, step).await,
                    };
                    match acquired {
                        Ok(observation) => {
                            let text = observation_text(&observation, screen.height, ignore_bottom);
                            self.conversation
                                .append(ConversationEntry::observation(step, text, observation.clone()));
                            executor.observed(&observation);
                            observation
                        }
                        Err(StepError::Cancelled) => continue,
                        Err(e) => {
                            self.step_failed(step, e.to_string()).await;
                            continue;
                        }
                    }
                }
            };

            // ── Decide ──
            let decision = match self.request_decision(&system_prompt, &schema).await {
                Ok(decision) => decision,
                Err(StepError::Cancelled) => continue,
                Err(e) => {
                    presented = Some(observation);
                    self.step_failed(step, e.to_string()).await;
                    continue;
                }
            };

            self.conversation.append(ConversationEntry::Decision {
                step,
                text: decision.text.clone(),
                invocations: decision.invocations.clone(),
            });
            if let Some(text) = decision.text.as_deref().filter(|t| !t.trim().is_empty()) {
                info!(step, "Decider: {}", preview(text));
                debug!(step, text, "Decider (full)");
            }

            // ── Act ──
            let mut end_reason = None;
            let mut results = Vec::with_capacity(decision.invocations.len());
            for invocation in &decision.invocations {
                let result = match schema.validate(invocation) {
                    Err(e) => {
                        warn!(step, tool = %invocation.name, error = %e, "Rejected tool invocation");
                        ToolResult::failure(&invocation.id, &invocation.name, (&e).into(), e.to_string())
                    }
                    Ok(valid) => {
                        let tool = valid.tool();
                        match executor
                            .execute(self.device.as_ref(), &valid, &observation, step + 1, &self.stop)
                            .await
                        {
                            Ok(outcome) => {
                                if outcome.end_session.is_some() {
                                    end_reason = outcome.end_session;
                                }
                                if tool != ToolName::EndSession {
                                    // The screen moved on; only the latest frame is still current.
                                    pending = outcome.observation.map(Arc::new);
                                }
                                ToolResult::success(&invocation.id, tool.as_str(), outcome.detail)
                                    .with_caveats(outcome.caveats)
                            }
                            Err(e) => {
                                warn!(step, %tool, error = %e, "Action failed");
                                if valid.action.touches_device()
                                    && matches!(e, ExecutionError::DeviceTimeout { .. } | ExecutionError::Device(_))
                                {
                                    // Input may have landed; an earlier post-action frame is stale.
                                    pending = None;
                                }
                                ToolResult::failure(&invocation.id, tool.as_str(), (&e).into(), e.to_string())
                            }
                        }
                    }
                };
                debug!(step, tool = %result.tool, success = result.success, detail = %result.detail, "Tool result");
                results.push(result);
            }

            if !results.is_empty() {
                self.conversation.append(ConversationEntry::ToolExchange {
                    step,
                    results: results.clone(),
                });
                if results.iter().any(|r| r.success) {
                    self.session.reset_errors();
                } else {
                    let errors = self.session.record_error();
                    self.last_error = results.last().map(|r| r.detail.clone());
                    warn!(
                        step,
                        consecutive_errors = errors,
                        max = self.session.limits().max_consecutive_errors,
                        "Every action in the batch failed"
                    );
                }
            }

            self.session.complete_step();
            self.event_bus.publish(SessionEvent::StepCompleted(StepReport {
                step,
                observation: observation.clone(),
                decision: decision.clone(),
                results,
                consecutive_errors: self.session.consecutive_errors(),
                timestamp: chrono::Utc::now(),
            }));

            self.after_step(&decision, end_reason);

            if !self.session.state().is_terminal() {
                self.stop.sleep(self.config.session.step_delay()).await;
            }
        }

        self.finish()
    }

    /// Apply the end-of-step transition, highest priority first.
    fn after_step(&mut self, decision: &Decision, end_reason: Option<String>) {
        if let Some(reason) = end_reason {
            self.session.transition(SessionState::StoppedBySignal, reason);
        } else if self.stop.is_stopped() {
            self.session.transition(SessionState::StoppedBySignal, CANCELLED_REASON);
        } else if self.session.error_budget_exhausted() {
            let reason = format!(
                "{} consecutive errors, last: {}",
                self.session.consecutive_errors(),
                self.last_error.as_deref().unwrap_or("unknown")
            );
            self.session.transition(SessionState::Failed, reason);
        } else if let Some(text) = decision.text.as_deref().filter(|t| decision.is_text_only() && announces_game_over(t)) {
            self.session.transition(SessionState::Completed, preview(text));
        } else if self.session.step_budget_exhausted() {
            let reason = format!("step limit of {} reached", self.session.limits().max_steps);
            self.session.transition(SessionState::StoppedByLimit, reason);
        }
    }

    /// Read the screen size and bring the profile's app up.
    async fn startup(&self) -> Result<ScreenInfo, String> {
        let screen = self
            .device
            .screen_info()
            .await
            .map_err(|e| format!("could not read screen size: {e}"))?;

        if let Some(package) = self.profile.app_package.as_deref() {
            info!(package, "Launching app");
            self.device
                .launch_app(package)
                .await
                .map_err(|e| format!("could not launch {package}: {e}"))?;
            self.stop.sleep(APP_LAUNCH_GRACE).await;
        }
        Ok(screen)
    }

    fn build_observer(&self) -> ScreenObserver {
        let observer = ScreenObserver::new(self.config.settle.clone())
            .with_ignore_bottom_fraction(self.config.detection.ignore_bottom_fraction)
            .with_encoder(ImageEncoder::from_config(&self.config.conversation));
        match &self.detector {
            Some(detector) => observer.with_detector(detector.clone(), self.config.detection.required),
            None => observer,
        }
    }

    /// Capture a fresh observation under the capture timeout.
    async fn acquire(&self, observer: &ScreenObserver, step: u64) -> Result<Arc<Observation>, StepError> {
        self.ensure_foreground().await;

        let timeout = self.config.session.capture_timeout();
        let capture = tokio::time::timeout(timeout, observer.capture(self.device.as_ref(), step, &self.stop));
        tokio::select! {
            biased;
            _ = self.stop.stopped() => Err(StepError::Cancelled),
            captured = capture => match captured {
                Ok(Ok(observation)) => {
                    debug!(
                        step,
                        fingerprint = %observation.fingerprint,
                        elements = observation.elements.as_ref().map(Vec::len),
                        "Observation captured"
                    );
                    Ok(Arc::new(observation))
                }
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(ObservationError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }
                .into()),
            },
        }
    }

    /// Relaunch the profile's app if something else is in front.
    async fn ensure_foreground(&self) {
        let Some(package) = self.profile.app_package.as_deref() else {
            return;
        };
        match self.device.foreground_package().await {
            Ok(Some(current)) if current != package => {
                warn!(expected = package, %current, "Wrong app in foreground, relaunching");
                match self.device.launch_app(package).await {
                    Ok(()) => {
                        self.stop.sleep(APP_LAUNCH_GRACE).await;
                    }
                    Err(e) => warn!(error = %e, "Relaunch failed"),
                }
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not query foreground app"),
        }
    }

    /// Ask the provider for the next decision under the decision timeout.
    async fn request_decision(&mut self, system_prompt: &str, schema: &ToolSchema) -> Result<Decision, StepError> {
        let request = DecisionRequest {
            model: self.config.provider.model.clone(),
            system_prompt: system_prompt.to_string(),
            extra_context: self.session.extra_context().map(str::to_string),
            history: self.conversation.snapshot(),
            tools: schema.definitions(),
            max_tokens: self.config.provider.max_tokens,
            temperature: self.config.provider.temperature,
        };

        let timeout = self.config.session.decision_timeout();
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.stop.stopped() => return Err(StepError::Cancelled),
            result = tokio::time::timeout(timeout, self.provider.decide(request)) => result,
        };

        let decision = match result {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(DecisionError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }
                .into());
            }
        };

        self.session.record_decision(decision.usage.as_ref());
        debug!(
            provider = self.provider.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            invocations = decision.invocations.len(),
            stop_reason = decision.stop_reason.as_deref().unwrap_or(""),
            "Decision received"
        );

        if decision.is_empty() {
            return Err(DecisionError::EmptyDecision.into());
        }
        Ok(decision)
    }

    /// Count an aborted step and back off before retrying it.
    async fn step_failed(&mut self, step: u64, error: String) {
        let errors = self.session.record_error();
        let max = self.session.limits().max_consecutive_errors;
        error!(step, consecutive_errors = errors, max, error = %error, "Step failed");

        self.event_bus.publish(SessionEvent::StepFailed {
            step,
            error: error.clone(),
            consecutive_errors: errors,
            timestamp: chrono::Utc::now(),
        });

        if self.session.error_budget_exhausted() {
            self.session
                .transition(SessionState::Failed, format!("{errors} consecutive errors, last: {error}"));
        } else {
            self.stop.sleep(self.config.session.retry_delay()).await;
        }
        self.last_error = Some(error);
    }

    fn finish(&mut self) -> SessionSummary {
        let summary = self.session.summary();
        info!(
            session_id = %summary.session_id,
            state = %summary.state,
            reason = %summary.reason,
            steps = summary.steps,
            input_tokens = summary.input_tokens,
            output_tokens = summary.output_tokens,
            turns = summary.decisions,
            "Session summary"
        );
        self.event_bus.publish(SessionEvent::SessionEnded {
            session_id: summary.session_id.clone(),
            state: summary.state,
            reason: summary.reason.clone(),
            steps: summary.steps,
            input_tokens: summary.input_tokens,
            output_tokens: summary.output_tokens,
            timestamp: chrono::Utc::now(),
        });
        summary
    }
}

fn announces_game_over(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("game over") || text.contains("game ended")
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::stop_channel;
    use crate::test_helpers::*;
    use droidloop_config::SettleConfig;
    use droidloop_core::error::DeviceError;
    use droidloop_core::tool::{ActionCaveat, ToolErrorKind};
    use serde_json::json;

    fn config(max_steps: u64, max_errors: u32, max_images: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.session.max_steps = max_steps;
        config.session.max_consecutive_errors = max_errors;
        config.session.step_delay_ms = 10;
        config.session.retry_delay_ms = 10;
        config.conversation.max_images = max_images;
        config.settle = SettleConfig {
            timeout_ms: 500,
            interval_ms: 50,
            stable_frames: 2,
            capture_after_action: true,
        };
        config
    }

    fn agent(device: &Arc<MockDevice>, provider: &Arc<ScriptedProvider>, config: AppConfig) -> AgentLoop {
        AgentLoop::new(device.clone(), provider.clone(), config, GameProfile::generic())
    }

    fn image_steps(conversation: &ConversationState) -> Vec<u64> {
        conversation
            .entries()
            .iter()
            .filter(|e| e.has_image())
            .map(|e| e.step())
            .collect()
    }

    fn last_results(conversation: &ConversationState) -> Vec<ToolResult> {
        last_results_in(conversation.entries())
    }

    fn last_results_in(entries: &[ConversationEntry]) -> Vec<ToolResult> {
        entries
            .iter()
            .rev()
            .find_map(|e| match e {
                ConversationEntry::ToolExchange { results, .. } => Some(results.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_keeps_latest_images() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(
            (1..=3)
                .map(|i| tool_decision(vec![call(&format!("t{i}"), "tap", json!({"x": 100 * i, "y": 200}))]))
                .collect(),
        ));

        let mut agent = agent(&device, &provider, config(3, 5, 2));
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedByLimit);
        assert_eq!(summary.steps, 3);
        assert_eq!(image_steps(agent.conversation()), vec![2, 3]);

        let first = &agent.conversation().entries()[0];
        assert!(matches!(first, ConversationEntry::TextOnly { step: 1, evicted: Some(_), .. }));

        // Step 1 captured fresh; steps 2 and 3 reused the post-action frames.
        assert_eq!(device.screenshot_count(), 8);
        assert_eq!(device.actions(), vec!["tap 100 200", "tap 200 200", "tap 300 200"]);

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].history.iter().filter(|e| e.has_image()).count() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn error_budget_ends_session_without_extra_decision() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(
            (1..=5)
                .map(|i| tool_decision(vec![call(&format!("t{i}"), "tap", json!({"x": 5000, "y": 10}))]))
                .collect(),
        ));

        let mut agent = agent(&device, &provider, config(100, 5, 8));
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::Failed);
        assert_eq!(summary.steps, 5);
        assert_eq!(summary.consecutive_errors, 5);
        assert!(summary.reason.contains("5 consecutive errors"));
        assert!(summary.reason.contains("outside"));
        assert_eq!(provider.call_count(), 5);
        assert!(device.actions().is_empty());

        let results = last_results(agent.conversation());
        assert_eq!(results[0].error_kind, Some(ToolErrorKind::OutOfBounds));
    }

    #[tokio::test(start_paused = true)]
    async fn end_session_finishes_batch_then_stops() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let detector = Arc::new(MockDetector::new(vec![element(7, "Claim", (400.0, 1000.0, 600.0, 1200.0))]));
        let provider = Arc::new(ScriptedProvider::decisions(vec![tool_decision(vec![
            call("t1", "tap_element", json!({"element_id": 7})),
            call("t2", "end_session", json!({"reason": "won"})),
        ])]));

        let mut agent = agent(&device, &provider, config(100, 5, 8)).with_detector(detector);
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedBySignal);
        assert_eq!(summary.reason, "won");
        assert_eq!(summary.steps, 1);
        assert_eq!(device.actions(), vec!["tap 500 1100"]);

        let results = last_results(agent.conversation());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].invocation_id, "t1");
        assert!(results[0].success);
        assert_eq!(results[1].invocation_id, "t2");
        assert!(results[1].success);

        let tools: Vec<String> = provider.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
        assert!(tools.contains(&"tap_element".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn text_only_turns_leave_counter_unchanged() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![
            text_decision("The board is loading."),
            text_decision("Still thinking about the best move."),
            text_decision("Waiting for the opponent."),
        ]));

        let mut agent = agent(&device, &provider, config(3, 5, 8));
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedByLimit);
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.consecutive_errors, 0);
        assert_eq!(provider.call_count(), 3);
        assert!(device.actions().is_empty());
        assert!(
            !agent
                .conversation()
                .entries()
                .iter()
                .any(|e| matches!(e, ConversationEntry::ToolExchange { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn text_only_turn_keeps_error_count() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![
            tool_decision(vec![call("t1", "tap", json!({"x": 9999, "y": 0}))]),
            text_decision("Hmm, that was off screen."),
            tool_decision(vec![call("t2", "end_session", json!({"reason": "done"}))]),
        ]));

        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let mut agent = agent(&device, &provider, config(10, 5, 8)).with_event_bus(bus);
        agent.run().await;

        let mut counters = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StepCompleted(report) = event.as_ref() {
                counters.push(report.consecutive_errors);
            }
        }
        assert_eq!(counters, vec![1, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn game_over_text_completes_session() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![text_decision(
            "GAME OVER. Final score: 120 to 95.",
        )]));

        let mut agent = agent(&device, &provider, config(10, 5, 8));
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::Completed);
        assert!(summary.reason.contains("Final score"));
    }

    #[tokio::test(start_paused = true)]
    async fn decision_retry_reuses_observation() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(DecisionError::Network("connection reset".into())),
            Ok(text_decision("   ")),
            Ok(tool_decision(vec![call("t1", "end_session", json!({"reason": "done"}))])),
        ]));

        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let mut agent = agent(&device, &provider, config(10, 5, 8)).with_event_bus(bus);
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedBySignal);
        assert_eq!(summary.steps, 1);
        // The failed request never produced a decision.
        assert_eq!(summary.decisions, 2);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(image_steps(agent.conversation()), vec![1]);
        assert_eq!(device.screenshot_count(), 2);

        let mut failed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StepFailed {
                step,
                error,
                consecutive_errors,
                ..
            } = event.as_ref()
            {
                failed.push((*step, error.clone(), *consecutive_errors));
            }
        }
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].0, 1);
        assert!(failed[0].1.contains("connection reset"));
        assert_eq!(failed[1].2, 2);
        assert!(failed[1].1.contains("neither text nor tool invocations"));
    }

    #[tokio::test(start_paused = true)]
    async fn observation_failures_retry_then_recover() {
        let device = Arc::new(MockDevice::new(1080, 2400).failing_screenshots(2));
        let provider = Arc::new(ScriptedProvider::decisions(vec![tool_decision(vec![call(
            "t1",
            "end_session",
            json!({"reason": "done"}),
        )])]));

        let mut agent = agent(&device, &provider, config(10, 5, 8));
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedBySignal);
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.consecutive_errors, 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_capture_failure_fails_session() {
        let device = Arc::new(MockDevice::new(1080, 2400).failing_screenshots(100));
        let provider = Arc::new(ScriptedProvider::decisions(vec![]));

        let mut agent = agent(&device, &provider, config(10, 3, 8));
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::Failed);
        assert_eq!(summary.steps, 0);
        assert!(summary.reason.contains("Screen capture failed"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_invocations_never_reach_device() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![tool_decision(vec![
            call("t1", "fly", json!({})),
            call("t2", "press_key", json!({"key": "MENU"})),
            call("t3", "tap_element", json!({"element_id": 1})),
            call("t4", "tap", json!({"x": 10, "y": 20})),
            call("t5", "end_session", json!({"reason": "done"})),
        ])]));

        let mut agent = agent(&device, &provider, config(10, 5, 8));
        agent.run().await;

        let results = last_results(agent.conversation());
        let ids: Vec<&str> = results.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4", "t5"]);
        assert_eq!(results[0].error_kind, Some(ToolErrorKind::Validation));
        assert_eq!(results[1].error_kind, Some(ToolErrorKind::UnsupportedKey));
        // No detector, so tap_element was never advertised.
        assert_eq!(results[2].error_kind, Some(ToolErrorKind::Validation));
        assert!(results[3].success);
        assert_eq!(device.actions(), vec!["tap 10 20"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_discards_stale_post_action_frame() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![
            tool_decision(vec![
                call("t1", "tap", json!({"x": 10, "y": 20})),
                call("t2", "wait", json!({"seconds": 1.0})),
            ]),
            tool_decision(vec![call("t3", "end_session", json!({"reason": "done"}))]),
        ]));

        let mut agent = agent(&device, &provider, config(10, 5, 8));
        agent.run().await;

        // Initial capture (2) + settle after tap (2) + fresh capture after wait (2)
        assert_eq!(device.screenshot_count(), 6);
        assert_eq!(image_steps(agent.conversation()), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_device_action_discards_earlier_post_action_frame() {
        let device = Arc::new(MockDevice::new(1080, 2400).failing_action(
            "swipe",
            DeviceError::Timeout {
                command: "input swipe".into(),
                timeout_secs: 10,
            },
        ));
        let provider = Arc::new(ScriptedProvider::decisions(vec![
            tool_decision(vec![
                call("t1", "tap", json!({"x": 10, "y": 20})),
                call("t2", "swipe", json!({"x1": 100, "y1": 1500, "x2": 100, "y2": 500})),
            ]),
            tool_decision(vec![call("t3", "end_session", json!({"reason": "done"}))]),
        ]));

        let mut agent = agent(&device, &provider, config(10, 5, 8));
        agent.run().await;

        let requests = provider.requests();
        let step_one = last_results_in(&requests[1].history);
        assert!(step_one[0].success);
        assert_eq!(step_one[1].error_kind, Some(ToolErrorKind::DeviceTimeout));

        // Initial capture (2) + settle after tap (2) + fresh capture after the failed swipe (2)
        assert_eq!(device.screenshot_count(), 6);
        assert_eq!(device.actions(), vec!["tap 10 20"]);
        assert_eq!(image_steps(agent.conversation()), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn bottom_band_elements_hidden_from_decider() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let detector = Arc::new(MockDetector::new(vec![
            element(1, "Deal", (400.0, 1000.0, 600.0, 1100.0)),
            element(2, "Install now", (0.0, 2300.0, 1080.0, 2400.0)),
        ]));
        let provider = Arc::new(ScriptedProvider::decisions(vec![tool_decision(vec![call(
            "t1",
            "end_session",
            json!({"reason": "looked"}),
        )])]));

        let mut config = config(10, 5, 8);
        config.detection.ignore_bottom_fraction = 0.1;
        let mut agent = agent(&device, &provider, config).with_detector(detector);
        agent.run().await;

        let requests = provider.requests();
        let text = requests[0]
            .history
            .iter()
            .find_map(|e| match e {
                ConversationEntry::WithImage { text, .. } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(text.contains("[1] icon: \"Deal\""));
        assert!(!text.contains("Install now"));
        assert!(!text.contains("[2]"));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_screen_reported_to_decider() {
        let device = Arc::new(MockDevice::new(1080, 2400).frozen());
        let provider = Arc::new(ScriptedProvider::decisions(vec![tool_decision(vec![
            call("t1", "tap", json!({"x": 10, "y": 20})),
            call("t2", "end_session", json!({"reason": "stuck"})),
        ])]));

        let mut agent = agent(&device, &provider, config(10, 5, 8));
        agent.run().await;

        let results = last_results(agent.conversation());
        assert!(results[0].success);
        assert_eq!(results[0].caveats, vec![ActionCaveat::ScreenUnchanged]);
        assert!(results[0].detail.contains("did NOT change"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_cancels() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![]));
        let (handle, signal) = stop_channel();
        handle.stop();

        let mut agent = agent(&device, &provider, config(10, 5, 8)).with_stop_signal(signal);
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedBySignal);
        assert_eq!(summary.reason, CANCELLED_REASON);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_batch_completes_batch() {
        let device = Arc::new(MockDevice::new(1080, 2400).slow_input(Duration::from_secs(1)));
        let provider = Arc::new(ScriptedProvider::decisions(vec![tool_decision(vec![
            call("t1", "tap", json!({"x": 10, "y": 20})),
            call("t2", "tap", json!({"x": 30, "y": 40})),
        ])]));
        let (handle, signal) = stop_channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.stop();
        });

        let mut agent = agent(&device, &provider, config(10, 5, 8)).with_stop_signal(signal);
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::StoppedBySignal);
        assert_eq!(summary.reason, CANCELLED_REASON);
        assert_eq!(summary.steps, 1);
        assert_eq!(device.actions().len(), 2);

        let entries = agent.conversation().entries();
        assert!(matches!(entries.last(), Some(ConversationEntry::ToolExchange { results, .. }) if results.len() == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_app_fails_startup() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![]));
        let profile = GameProfile {
            app_package: Some("com.example.missing".into()),
            ..GameProfile::generic()
        };

        let mut agent = AgentLoop::new(device.clone(), provider.clone(), config(10, 5, 8), profile);
        let summary = agent.run().await;

        assert_eq!(summary.state, SessionState::Failed);
        assert!(summary.reason.contains("could not launch com.example.missing"));
        assert_eq!(device.screenshot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn events_bracket_the_session() {
        let device = Arc::new(MockDevice::new(1080, 2400));
        let provider = Arc::new(ScriptedProvider::decisions(vec![
            text_decision("Looking around."),
            tool_decision(vec![call("t1", "end_session", json!({"reason": "done"}))]),
        ]));

        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let mut agent = agent(&device, &provider, config(10, 5, 8))
            .with_event_bus(bus)
            .with_extra_context("Prefer the left lane.");
        let summary = agent.run().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first().map(|e| e.as_ref()), Some(SessionEvent::SessionStarted { .. })));
        let steps: Vec<u64> = events
            .iter()
            .filter_map(|e| match e.as_ref() {
                SessionEvent::StepCompleted(report) => Some(report.step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2]);
        match events.last().map(|e| e.as_ref()) {
            Some(SessionEvent::SessionEnded {
                state,
                reason,
                input_tokens,
                ..
            }) => {
                assert_eq!(*state, SessionState::StoppedBySignal);
                assert_eq!(reason, "done");
                assert_eq!(*input_tokens, 200);
            }
            other => panic!("expected SessionEnded, got {other:?}"),
        }
        assert_eq!(summary.output_tokens, 20);

        let request = &provider.requests()[0];
        assert_eq!(request.extra_context.as_deref(), Some("Prefer the left lane."));
        assert!(request.system_prompt.contains("1080x2400"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let short = preview(&long);
        assert_eq!(short.chars().count(), LOG_PREVIEW_CHARS + 3);
        assert_eq!(preview("  hi  "), "hi");
    }
}
