use crate::errors::{PilotError, PilotResult};
use crate::perception::types::ScreenshotMeta;

pub struct ScreenshotResult {
    /// PNG-encoded capture at physical resolution.
    pub image_bytes: Vec<u8>,
    pub meta: ScreenshotMeta,
}

impl ScreenshotResult {
    pub fn physical_size(&self) -> (u32, u32) {
        (self.meta.physical_width, self.meta.physical_height)
    }

    pub fn logical_size(&self) -> (u32, u32) {
        (self.meta.logical_width, self.meta.logical_height)
    }
}

/// Captures the primary monitor on a blocking thread.
pub async fn capture_primary() -> PilotResult<ScreenshotResult> {
    tokio::task::spawn_blocking(capture_primary_blocking)
        .await
        .map_err(|e| PilotError::Perception(format!("capture join: {e}")))?
}

fn capture_primary_blocking() -> PilotResult<ScreenshotResult> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| PilotError::Perception(format!("list monitors: {e}")))?;
    let primary_idx = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
    let monitor = monitors
        .into_iter()
        .nth(primary_idx)
        .ok_or_else(|| PilotError::Perception("no monitor available for capture".into()))?;

    let image = monitor
        .capture_image()
        .map_err(|e| PilotError::Perception(format!("capture monitor: {e}")))?;
    let (physical_width, physical_height) = image.dimensions();
    let scale_factor = (monitor.scale_factor() as f64).max(1.0);

    let meta = ScreenshotMeta {
        scale_factor,
        physical_width,
        physical_height,
        logical_width: (physical_width as f64 / scale_factor).round() as u32,
        logical_height: (physical_height as f64 / scale_factor).round() as u32,
    };

    let mut png = Vec::new();
    xcap::image::DynamicImage::ImageRgba8(image)
        .write_to(&mut std::io::Cursor::new(&mut png), xcap::image::ImageFormat::Png)
        .map_err(|e| PilotError::Perception(format!("PNG encode: {e}")))?;

    tracing::debug!(
        phys = %format!("{}×{}", meta.physical_width, meta.physical_height),
        logical = %format!("{}×{}", meta.logical_width, meta.logical_height),
        scale = meta.scale_factor,
        "primary monitor captured"
    );

    Ok(ScreenshotResult {
        image_bytes: png,
        meta,
    })
}
