//! Shared test doubles: a scripted device, provider and detector.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidloop_core::device::{Detection, Device, ElementDetector};
use droidloop_core::error::{DecisionError, DetectionError, DeviceError};
use droidloop_core::observation::{
    BoundingBox, DetectedElement, ElementKind, Observation, Point, ScreenFingerprint, ScreenInfo,
    Screenshot,
};
use droidloop_core::provider::{Decision, DecisionRequest, Provider, Usage};
use droidloop_core::tool::{SystemKey, ToolInvocation};

/// A phone that records every input and shows a frame that changes on input
/// (unless frozen).
pub struct MockDevice {
    screen: ScreenInfo,
    frame: Mutex<Vec<u8>>,
    frozen: bool,
    actions: Mutex<Vec<String>>,
    screenshots: AtomicUsize,
    failing_screenshots: Mutex<u32>,
    input_error: Option<DeviceError>,
    /// Inputs whose description starts with the prefix fail
    failing_action: Option<(String, DeviceError)>,
    input_delay: Option<Duration>,
}

impl MockDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: ScreenInfo::new(width, height),
            frame: Mutex::new(b"frame-0".to_vec()),
            frozen: false,
            actions: Mutex::new(Vec::new()),
            screenshots: AtomicUsize::new(0),
            failing_screenshots: Mutex::new(0),
            input_error: None,
            failing_action: None,
            input_delay: None,
        }
    }

    /// Input never changes the screen.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// The next `n` screenshots fail.
    pub fn failing_screenshots(self, n: u32) -> Self {
        *self.failing_screenshots.lock().unwrap() = n;
        self
    }

    /// Every input command fails with `err`.
    pub fn failing_input(mut self, err: DeviceError) -> Self {
        self.input_error = Some(err);
        self
    }

    /// Inputs of one kind (`"swipe"`, `"tap"`, ...) fail with `err`.
    pub fn failing_action(mut self, kind: &str, err: DeviceError) -> Self {
        self.failing_action = Some((kind.to_string(), err));
        self
    }

    /// Every input command takes `delay` to complete.
    pub fn slow_input(mut self, delay: Duration) -> Self {
        self.input_delay = Some(delay);
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    pub fn screenshot_count(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    async fn input(&self, action: String) -> Result<(), DeviceError> {
        if let Some(delay) = self.input_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.input_error {
            return Err(err.clone());
        }
        if let Some((kind, err)) = &self.failing_action
            && action.starts_with(kind.as_str())
        {
            return Err(err.clone());
        }
        let mut actions = self.actions.lock().unwrap();
        actions.push(action);
        if !self.frozen {
            *self.frame.lock().unwrap() = format!("frame-{}", actions.len()).into_bytes();
        }
        Ok(())
    }
}

#[async_trait]
impl Device for MockDevice {
    fn id(&self) -> &str {
        "mock-device"
    }

    async fn screen_info(&self) -> Result<ScreenInfo, DeviceError> {
        Ok(self.screen)
    }

    async fn screenshot(&self) -> Result<Screenshot, DeviceError> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        {
            let mut failing = self.failing_screenshots.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(DeviceError::CommandFailed {
                    command: "exec-out screencap -p".into(),
                    reason: "device offline".into(),
                });
            }
        }
        let data = self.frame.lock().unwrap().clone();
        Ok(Screenshot::png(data, self.screen.width, self.screen.height))
    }

    async fn tap(&self, at: Point) -> Result<(), DeviceError> {
        self.input(format!("tap {} {}", at.x, at.y)).await
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError> {
        self.input(format!(
            "swipe {} {} {} {} {}",
            from.x,
            from.y,
            to.x,
            to.y,
            duration.as_millis()
        ))
        .await
    }

    async fn long_press(&self, at: Point, duration: Duration) -> Result<(), DeviceError> {
        self.input(format!("long_press {} {} {}", at.x, at.y, duration.as_millis()))
            .await
    }

    async fn press_key(&self, key: SystemKey) -> Result<(), DeviceError> {
        self.input(format!("key {}", key.keycode())).await
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        self.input(format!("text {text}")).await
    }
}

/// A provider that replays a fixed script of decisions.
///
/// Panics if called more often than scripted.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<Decision, DecisionError>>>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<Decision, DecisionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn decisions(decisions: Vec<Decision>) -> Self {
        Self::new(decisions.into_iter().map(Ok).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no response scripted for call #{call}"))
    }
}

/// A detector that reports the same elements for every frame.
pub struct MockDetector {
    elements: Vec<DetectedElement>,
    fail: bool,
    seen: Mutex<Vec<(u32, u32)>>,
}

impl MockDetector {
    pub fn new(elements: Vec<DetectedElement>) -> Self {
        Self {
            elements,
            fail: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            elements: Vec::new(),
            fail: true,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Dimensions of every frame passed to `detect`.
    pub fn seen_sizes(&self) -> Vec<(u32, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ElementDetector for MockDetector {
    fn name(&self) -> &str {
        "mock-detector"
    }

    async fn detect(&self, screenshot: &Screenshot) -> Result<Detection, DetectionError> {
        self.seen.lock().unwrap().push((screenshot.width, screenshot.height));
        if self.fail {
            return Err(DetectionError::Request("connection refused".into()));
        }
        Ok(Detection {
            elements: self.elements.clone(),
            annotated: Some(Screenshot::png(
                [b"annotated-".as_slice(), &screenshot.data].concat(),
                screenshot.width,
                screenshot.height,
            )),
        })
    }
}

/// An interactive icon with a pixel bbox.
pub fn element(id: u32, label: &str, (x1, y1, x2, y2): (f32, f32, f32, f32)) -> DetectedElement {
    DetectedElement {
        id,
        kind: ElementKind::Icon,
        label: label.into(),
        bbox: BoundingBox::new(x1, y1, x2, y2),
        interactive: true,
        confidence: None,
    }
}

pub fn observation(step: u64, elements: Vec<DetectedElement>) -> Arc<Observation> {
    Arc::new(Observation {
        step,
        captured_at: Utc::now(),
        image: Screenshot::png(format!("frame-{step}").into_bytes(), 1080, 2400),
        annotated: None,
        elements: Some(elements),
        fingerprint: ScreenFingerprint([step as u8; 32]),
    })
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolInvocation {
    ToolInvocation::new(id, name, args)
}

pub fn tool_decision(calls: Vec<ToolInvocation>) -> Decision {
    let mut decision = Decision::with_invocations(calls);
    decision.usage = Some(usage());
    decision.model = "mock-model".into();
    decision
}

pub fn text_decision(text: &str) -> Decision {
    let mut decision = Decision::text(text);
    decision.usage = Some(usage());
    decision.model = "mock-model".into();
    decision
}

fn usage() -> Usage {
    Usage {
        input_tokens: 100,
        output_tokens: 10,
    }
}
