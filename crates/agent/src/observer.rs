//! Turning the device screen into [`Observation`]s.
//!
//! Capturing waits for the screen to settle (consecutive identical
//! fingerprints) and then runs element detection. Settling is best-effort:
//! on timeout the latest frame is used and the caller is told. Frames are
//! re-encoded for upload only after detection and fingerprinting.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use droidloop_config::SettleConfig;
use droidloop_core::device::{Device, ElementDetector};
use droidloop_core::error::{DeviceError, ObservationError};
use droidloop_core::observation::{Observation, ScreenFingerprint, Screenshot};

use droidloop_device::ImageEncoder;

use crate::cancel::StopSignal;

/// A frame taken after waiting for the screen to stop moving.
#[derive(Debug, Clone)]
pub struct SettledFrame {
    pub screenshot: Screenshot,
    pub fingerprint: ScreenFingerprint,
    /// `false` if the settle timeout (or a stop) cut polling short
    pub stable: bool,
}

pub struct ScreenObserver {
    detector: Option<Arc<dyn ElementDetector>>,
    detection_required: bool,
    settle: SettleConfig,
    ignore_bottom_fraction: f32,
    encoder: ImageEncoder,
}

impl ScreenObserver {
    pub fn new(settle: SettleConfig) -> Self {
        Self {
            detector: None,
            detection_required: false,
            settle,
            ignore_bottom_fraction: 0.0,
            encoder: ImageEncoder::default(),
        }
    }

    /// Run `detector` on every captured frame. With `required`, a detection
    /// failure fails the observation instead of degrading it.
    pub fn with_detector(mut self, detector: Arc<dyn ElementDetector>, required: bool) -> Self {
        self.detector = Some(detector);
        self.detection_required = required;
        self
    }

    /// Bottom band of the screen excluded from fingerprints.
    pub fn with_ignore_bottom_fraction(mut self, fraction: f32) -> Self {
        self.ignore_bottom_fraction = fraction;
        self
    }

    /// Downscale and re-encode observation images before they are stored.
    pub fn with_encoder(mut self, encoder: ImageEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn detection_enabled(&self) -> bool {
        self.detector.is_some()
    }

    pub fn capture_after_action(&self) -> bool {
        self.settle.capture_after_action
    }

    pub fn fingerprint(&self, screenshot: &Screenshot) -> ScreenFingerprint {
        droidloop_device::fingerprint(&screenshot.data, self.ignore_bottom_fraction)
    }

    /// Poll screenshots until `stable_frames` consecutive frames match or the
    /// settle timeout expires.
    pub async fn settle(&self, device: &dyn Device, stop: &StopSignal) -> Result<SettledFrame, DeviceError> {
        let started = Instant::now();
        let timeout = self.settle.timeout();
        let interval = self.settle.interval();

        let mut screenshot = device.screenshot().await?;
        let mut fingerprint = self.fingerprint(&screenshot);
        let mut run = 1u32;
        let mut polls = 1u32;

        loop {
            if run >= self.settle.stable_frames {
                debug!(polls, %fingerprint, "Screen settled");
                return Ok(SettledFrame {
                    screenshot,
                    fingerprint,
                    stable: true,
                });
            }
            if started.elapsed() >= timeout || !stop.sleep(interval).await {
                debug!(polls, %fingerprint, "Screen did not settle, using latest frame");
                return Ok(SettledFrame {
                    screenshot,
                    fingerprint,
                    stable: false,
                });
            }

            let next = device.screenshot().await?;
            let next_fingerprint = self.fingerprint(&next);
            polls += 1;
            run = if next_fingerprint == fingerprint { run + 1 } else { 1 };
            screenshot = next;
            fingerprint = next_fingerprint;
        }
    }

    /// Run detection on a settled frame and assemble the observation.
    pub async fn observe(&self, frame: SettledFrame, step: u64) -> Result<Observation, ObservationError> {
        let (elements, annotated) = match &self.detector {
            None => (None, None),
            Some(detector) => match detector.detect(&frame.screenshot).await {
                Ok(detection) => (Some(detection.elements), detection.annotated),
                Err(e) if self.detection_required => return Err(e.into()),
                Err(e) => {
                    warn!(step, error = %e, "Element detection failed, continuing without elements");
                    (None, None)
                }
            },
        };

        Ok(Observation {
            step,
            captured_at: chrono::Utc::now(),
            image: self.encoder.encode(frame.screenshot),
            annotated: annotated.map(|shot| self.encoder.encode(shot)),
            elements,
            fingerprint: frame.fingerprint,
        })
    }

    /// Settle, then observe.
    pub async fn capture(&self, device: &dyn Device, step: u64, stop: &StopSignal) -> Result<Observation, ObservationError> {
        let frame = self.settle(device, stop).await?;
        self.observe(frame, step).await
    }
}
