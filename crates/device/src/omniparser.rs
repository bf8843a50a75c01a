//! HTTP client for an OmniParser-style element-detection server.
//!
//! The server takes a base64 screenshot and returns an annotated copy with
//! numbered boxes plus a list of parsed regions whose bounding boxes are
//! ratios of the image size.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use droidloop_config::DetectionConfig;
use droidloop_core::device::{Detection, ElementDetector};
use droidloop_core::error::DetectionError;
use droidloop_core::observation::{BoundingBox, DetectedElement, ElementKind, Screenshot};

/// Client for `POST {endpoint}` with `{"base64_image": ...}`.
pub struct OmniParserClient {
    endpoint: String,
    client: reqwest::Client,
}

impl OmniParserClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(&config.endpoint, Duration::from_secs(config.timeout_secs))
    }

    /// Health endpoint next to the parse endpoint.
    fn health_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        match base.rsplit_once('/') {
            Some((root, _)) => format!("{root}/probe/"),
            None => format!("{base}/probe/"),
        }
    }

    fn to_detection(resp: ParseResponse, screenshot: &Screenshot) -> Result<Detection, DetectionError> {
        let w = screenshot.width as f32;
        let h = screenshot.height as f32;

        let mut elements = Vec::with_capacity(resp.parsed_content_list.len());
        for (idx, item) in resp.parsed_content_list.into_iter().enumerate() {
            let [x1, y1, x2, y2] = match item.bbox.as_slice() {
                [a, b, c, d] => [*a, *b, *c, *d],
                other => {
                    debug!(index = idx, len = other.len(), "Skipping element with malformed bbox");
                    continue;
                }
            };
            elements.push(DetectedElement {
                id: idx as u32,
                kind: match item.kind.as_deref() {
                    Some("text") => ElementKind::Text,
                    Some("icon") => ElementKind::Icon,
                    _ => ElementKind::Unknown,
                },
                label: item.content.unwrap_or_default().trim().to_string(),
                bbox: BoundingBox::new(x1 * w, y1 * h, x2 * w, y2 * h),
                interactive: item.interactivity.unwrap_or(false),
                confidence: None,
            });
        }

        let annotated = match resp.som_image_base64.filter(|s| !s.is_empty()) {
            Some(b64) => {
                let data = BASE64
                    .decode(b64.trim())
                    .map_err(|e| DetectionError::Malformed(format!("annotated image: {e}")))?;
                Some(Screenshot::png(data, screenshot.width, screenshot.height))
            }
            None => None,
        };

        Ok(Detection { elements, annotated })
    }
}

#[async_trait]
impl ElementDetector for OmniParserClient {
    fn name(&self) -> &str {
        "omniparser"
    }

    async fn detect(&self, screenshot: &Screenshot) -> Result<Detection, DetectionError> {
        let started = Instant::now();
        let body = serde_json::json!({ "base64_image": BASE64.encode(&screenshot.data) });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectionError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Detection service error");
            return Err(DetectionError::Service {
                status_code: status.as_u16(),
                message,
            });
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::Malformed(e.to_string()))?;

        let detection = Self::to_detection(parsed, screenshot)?;
        debug!(
            elements = detection.elements.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Elements detected"
        );
        Ok(detection)
    }

    async fn health_check(&self) -> Result<bool, DetectionError> {
        let response = self
            .client
            .get(self.health_url())
            .send()
            .await
            .map_err(|e| DetectionError::Request(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    som_image_base64: Option<String>,
    #[serde(default)]
    parsed_content_list: Vec<ParsedItem>,
}

#[derive(Debug, Deserialize)]
struct ParsedItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    bbox: Vec<f32>,
    #[serde(default)]
    interactivity: Option<bool>,
    #[serde(default)]
    content: Option<String>,
}
