use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::screenshot::ScreenshotResult;
use crate::perception::types::{Detections, Perception, TextDetections};

/// OCR provider: text regions with bounding polygons.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, shot: &ScreenshotResult) -> PilotResult<TextDetections>;
}

/// Pixel-level UI component detector.
#[async_trait]
pub trait ComponentDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, shot: &ScreenshotResult) -> PilotResult<Detections>;
}

/// One full perception pass: capture, detect, fuse, label, annotate.
#[async_trait]
pub trait Perceiver: Send + Sync {
    async fn perceive(&self) -> PilotResult<Perception>;
}
