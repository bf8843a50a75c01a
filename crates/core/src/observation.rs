//! Observation domain types.
//!
//! An [`Observation`] is one captured frame of the device screen plus the
//! elements the detector found on it. Observations are immutable once built
//! and are shared as `Arc<Observation>` between the conversation history and
//! the control loop, never copied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pixel position on the device screen, (0,0) is top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned bounding box in pixels: `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Centre of the box, truncated to whole pixels and clamped at zero.
    pub fn center(&self) -> Point {
        let cx = ((self.x1 + self.x2) / 2.0).max(0.0);
        let cy = ((self.y1 + self.y2) / 2.0).max(0.0);
        Point::new(cx as u32, cy as u32)
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0.0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0.0) as u32
    }
}

/// What kind of region the detector reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Icon,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Icon => write!(f, "icon"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A labeled region found on a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedElement {
    /// Unique within its observation; the decider refers to elements by it.
    pub id: u32,

    pub kind: ElementKind,

    /// OCR text or generated caption
    pub label: String,

    pub bbox: BoundingBox,

    /// Whether the detector considers the region tappable
    #[serde(default)]
    pub interactive: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl DetectedElement {
    pub fn center(&self) -> Point {
        self.bbox.center()
    }
}

/// Encoded image bytes plus their geometry.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Screenshot {
    /// Raw encoded bytes (PNG from `screencap -p`). Never serialized.
    #[serde(skip)]
    pub data: Vec<u8>,

    /// e.g. `image/png`
    pub media_type: String,

    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    pub fn png(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            media_type: "image/png".into(),
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screenshot")
            .field("media_type", &self.media_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Device screen geometry as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
}

impl ScreenInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Valid coordinates are `0..width` and `0..height`.
    pub fn contains(&self, point: Point) -> bool {
        point.x < self.width && point.y < self.height
    }
}

/// Perceptual digest of a frame, used for settle detection and
/// screen-change warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenFingerprint(pub [u8; 32]);

impl std::fmt::Display for ScreenFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// One captured device screen state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Step index this observation was presented at
    pub step: u64,

    pub captured_at: DateTime<Utc>,

    /// The raw frame
    pub image: Screenshot,

    /// Frame with numbered boxes drawn by the detector, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated: Option<Screenshot>,

    /// `None` when detection is disabled or unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<DetectedElement>>,

    pub fingerprint: ScreenFingerprint,
}

impl Observation {
    /// The frame shown to the decider: annotated when available.
    pub fn display_image(&self) -> &Screenshot {
        self.annotated.as_ref().unwrap_or(&self.image)
    }

    pub fn element(&self, id: u32) -> Option<&DetectedElement> {
        self.elements.as_deref()?.iter().find(|e| e.id == id)
    }

    pub fn element_ids(&self) -> Vec<u32> {
        self.elements
            .as_deref()
            .map(|els| els.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    pub fn element_labels(&self) -> Vec<String> {
        self.elements
            .as_deref()
            .map(|els| {
                els.iter()
                    .map(|e| format!("[{}] {}", e.id, e.label))
                    .collect()
            })
            .unwrap_or_default()
    }
}
