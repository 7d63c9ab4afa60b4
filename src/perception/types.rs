use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in detector pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left, top, right, bottom }
    }

    /// Smallest box enclosing every vertex of a polygon. `None` for an empty polygon.
    pub fn enclosing(vertices: &[(i32, i32)]) -> Option<Self> {
        let (first, rest) = vertices.split_first()?;
        let mut b = Self::new(first.0 as f64, first.1 as f64, first.0 as f64, first.1 as f64);
        for &(x, y) in rest {
            b.left = b.left.min(x as f64);
            b.top = b.top.min(y as f64);
            b.right = b.right.max(x as f64);
            b.bottom = b.bottom.max(y as f64);
        }
        Some(b)
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    /// Per-axis multiply, used to move a box between detector resolutions.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self::new(self.left * sx, self.top * sy, self.right * sx, self.bottom * sy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSource {
    Text,
    Component,
}

/// A detected screen region, immutable for the capture it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub bbox: BoundingBox,
    pub content: Option<String>,
    pub source: ElementSource,
}

impl Element {
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Screen-space rectangle in whole input pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenRect {
    pub fn center(&self) -> ScreenPoint {
        ScreenPoint {
            x: (self.x as f64 + self.width as f64 / 2.0).round() as i32,
            y: (self.y as f64 + self.height as f64 / 2.0).round() as i32,
        }
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// Ratio between the resolution detection ran at and the resolution input is
/// simulated at: `screen = detector / scale` on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionScale {
    pub width: f64,
    pub height: f64,
}

impl ResolutionScale {
    pub const IDENTITY: ResolutionScale = ResolutionScale { width: 1.0, height: 1.0 };

    /// Scale between a detector resolution and a screen resolution, both `(w, h)`.
    /// `None` when either side has a zero dimension.
    pub fn between(detector: (u32, u32), screen: (u32, u32)) -> Option<Self> {
        if detector.0 == 0 || detector.1 == 0 || screen.0 == 0 || screen.1 == 0 {
            return None;
        }
        Some(Self {
            width: detector.0 as f64 / screen.0 as f64,
            height: detector.1 as f64 / screen.1 as f64,
        })
    }

    pub fn to_screen(&self, b: &BoundingBox) -> ScreenRect {
        let x = (b.left / self.width).round() as i32;
        let y = (b.top / self.height).round() as i32;
        let x2 = (b.right / self.width).round() as i32;
        let y2 = (b.bottom / self.height).round() as i32;
        ScreenRect { x, y, width: x2 - x, height: y2 - y }
    }

    pub fn to_detector(&self, r: &ScreenRect) -> BoundingBox {
        BoundingBox::new(
            r.x as f64 * self.width,
            r.y as f64 * self.height,
            (r.x + r.width) as f64 * self.width,
            (r.y + r.height) as f64 * self.height,
        )
    }
}

/// Detector output: elements plus the `(w, h)` resolution the detector saw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    pub resolution: (u32, u32),
    pub elements: Vec<Element>,
}

/// One OCR hit with its bounding polygon in OCR-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub polygon: Vec<(i32, i32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextDetections {
    pub resolution: (u32, u32),
    pub regions: Vec<TextRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMapEntry {
    pub text: String,
    /// Top-left corner and size of the element, in screen pixels.
    pub rect: ScreenRect,
}

/// Where a label box is drawn for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    /// Top-left corner of the label box, in screen pixels.
    pub anchor: ScreenPoint,
    pub rect: ScreenRect,
}

/// Per-capture lookup from label code to element geometry.
/// Never carried across captures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    entries: HashMap<String, LabelMapEntry>,
    markers: Vec<Marker>,
}

impl LabelMap {
    pub fn insert(&mut self, label: String, anchor: ScreenPoint, entry: LabelMapEntry) {
        self.markers.push(Marker {
            label: label.clone(),
            anchor,
            rect: entry.rect,
        });
        self.entries.insert(label, entry);
    }

    pub fn get(&self, label: &str) -> Option<&LabelMapEntry> {
        self.entries.get(label.trim())
    }

    /// Markers in the order labels were assigned.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub scale_factor: f64,
    pub physical_width: u32,
    pub physical_height: u32,
    /// Size of the screen in input coordinates.
    pub logical_width: u32,
    pub logical_height: u32,
}

impl ScreenshotMeta {
    /// Physical pixels per input pixel, used when drawing on the capture.
    pub fn pixel_ratio(&self) -> (f64, f64) {
        (
            self.physical_width as f64 / self.logical_width.max(1) as f64,
            self.physical_height as f64 / self.logical_height.max(1) as f64,
        )
    }
}

/// Annotated screenshot handed to the planner.
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    pub png: Vec<u8>,
    /// `data:image/png;base64,...`
    pub data_uri: String,
    pub path: Option<std::path::PathBuf>,
}

/// Everything one capture produces for the rest of the loop.
#[derive(Debug, Clone)]
pub struct Perception {
    pub label_map: LabelMap,
    pub scale: ResolutionScale,
    pub image: AnnotatedImage,
}
