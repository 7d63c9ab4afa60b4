/// Perception pipeline: capture, detect, fuse, label, annotate.
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;

use crate::config::{LabelingConfig, PerceptionConfig};
use crate::errors::{PilotError, PilotResult};
use crate::perception::annotator::{annotate_labels, MarkerStyle};
use crate::perception::fusion::fuse;
use crate::perception::labeling::assign_labels;
use crate::perception::ocr::{AZURE_KEY_ENV, GOOGLE_KEY_ENV};
use crate::perception::screenshot::{capture_primary, ScreenshotResult};
use crate::perception::traits::{ComponentDetector, Perceiver, TextRecognizer};
use crate::perception::types::{AnnotatedImage, Perception, ResolutionScale};

pub struct ScreenPerceiver {
    ocr: Option<Arc<dyn TextRecognizer>>,
    components: Option<Arc<dyn ComponentDetector>>,
    labeling: LabelingConfig,
    output_dir: PathBuf,
    save_captures: bool,
}

impl ScreenPerceiver {
    pub fn new(
        ocr: Option<Arc<dyn TextRecognizer>>,
        components: Option<Arc<dyn ComponentDetector>>,
        labeling: LabelingConfig,
        perception: &PerceptionConfig,
    ) -> Self {
        Self {
            ocr,
            components,
            labeling,
            output_dir: perception.output_dir.clone(),
            save_captures: perception.save_captures,
        }
    }

    /// Everything after the capture itself.
    pub async fn process(&self, shot: ScreenshotResult) -> PilotResult<Perception> {
        if self.ocr.is_none() && self.components.is_none() {
            return Err(PilotError::Perception(format!(
                "no detector configured: set {GOOGLE_KEY_ENV} or {AZURE_KEY_ENV} for OCR, \
                 or perception.yolo_model for component detection"
            )));
        }

        // OCR first, then components; never overlapping.
        let text = match &self.ocr {
            Some(ocr) => Some(
                ocr.recognize(&shot)
                    .await
                    .map_err(|e| PilotError::Perception(format!("{}: {e}", ocr.name())))?,
            ),
            None => None,
        };
        let components = match &self.components {
            Some(det) => Some(
                det.detect(&shot)
                    .await
                    .map_err(|e| PilotError::Perception(format!("{}: {e}", det.name())))?,
            ),
            None => None,
        };

        let mut fused = fuse(text.as_ref(), components.as_ref(), self.labeling.min_text_len);
        if fused.resolution == (0, 0) {
            fused.resolution = shot.physical_size();
        }

        let logical = shot.logical_size();
        let scale = ResolutionScale::between(fused.resolution, logical).ok_or_else(|| {
            PilotError::Perception(format!(
                "degenerate resolution: detector {:?}, screen {:?}",
                fused.resolution, logical
            ))
        })?;

        let label_map = assign_labels(&fused.elements, &scale, &self.labeling);

        let annotated = annotate_labels(
            &shot.image_bytes,
            &label_map,
            shot.meta.pixel_ratio(),
            MarkerStyle {
                width: self.labeling.label_width,
                height: self.labeling.label_height,
            },
        )?;

        let path = if self.save_captures {
            Some(self.save(&shot.image_bytes, &annotated).await?)
        } else {
            None
        };

        let data_uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&annotated)
        );

        tracing::info!(
            elements = fused.elements.len(),
            labels = label_map.len(),
            scale_w = scale.width,
            scale_h = scale.height,
            "perception complete"
        );

        Ok(Perception {
            label_map,
            scale,
            image: AnnotatedImage {
                png: annotated,
                data_uri,
                path,
            },
        })
    }

    /// Writes the raw and annotated captures; returns the annotated path.
    async fn save(&self, raw: &[u8], annotated: &[u8]) -> PilotResult<PathBuf> {
        let annotated_dir = self.output_dir.join("annotated");
        tokio::fs::create_dir_all(&annotated_dir).await?;
        tokio::fs::write(self.output_dir.join("screenshot.png"), raw).await?;
        let path = annotated_dir.join("screenshot.png");
        tokio::fs::write(&path, annotated).await?;
        tracing::debug!(path = %path.display(), "annotated capture saved");
        Ok(path)
    }
}

#[async_trait]
impl Perceiver for ScreenPerceiver {
    async fn perceive(&self) -> PilotResult<Perception> {
        let shot = capture_primary().await?;
        self.process(shot).await
    }
}
