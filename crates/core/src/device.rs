//! Device and element-detector traits.
//!
//! A [`Device`] is anything that can show a screen and accept input: a phone
//! over adb, an emulator, or a scripted mock in tests. An [`ElementDetector`]
//! turns a screenshot into labeled regions. Both are consumed as trait objects
//! by the control loop.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{DetectionError, DeviceError};
use crate::observation::{DetectedElement, Point, ScreenInfo, Screenshot};
use crate::tool::SystemKey;

/// Control surface of the device under automation.
#[async_trait]
pub trait Device: Send + Sync {
    /// Identifier of the device (adb serial or similar).
    fn id(&self) -> &str;

    /// Screen geometry in pixels.
    async fn screen_info(&self) -> Result<ScreenInfo, DeviceError>;

    /// Capture the current screen.
    async fn screenshot(&self) -> Result<Screenshot, DeviceError>;

    async fn tap(&self, at: Point) -> Result<(), DeviceError>;

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError>;

    async fn long_press(&self, at: Point, duration: Duration) -> Result<(), DeviceError>;

    async fn press_key(&self, key: SystemKey) -> Result<(), DeviceError>;

    /// Type into the focused field.
    async fn type_text(&self, text: &str) -> Result<(), DeviceError>;

    /// Package name of the foreground app, if the device can tell.
    async fn foreground_package(&self) -> Result<Option<String>, DeviceError> {
        Ok(None)
    }

    /// Start (or bring forward) an app by package name.
    async fn launch_app(&self, package: &str) -> Result<(), DeviceError> {
        Err(DeviceError::AppNotFound(package.to_string()))
    }
}

/// What a detector found on one screenshot.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Ordered element list; ids are unique
    pub elements: Vec<DetectedElement>,

    /// The screenshot with numbered boxes drawn on it, if the detector
    /// produces one
    pub annotated: Option<Screenshot>,
}

/// Turns screenshots into candidate targets.
#[async_trait]
pub trait ElementDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, screenshot: &Screenshot) -> Result<Detection, DetectionError>;

    /// Health check: is the detection service reachable?
    async fn health_check(&self) -> Result<bool, DetectionError> {
        Ok(true)
    }
}
