/// ONNX YOLOv8 inference for on-screen UI component detection.
///
/// The model is optional: with no model path configured, perception runs on
/// OCR alone. A configured model that cannot be loaded is an error.
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::errors::{PilotError, PilotResult};
use crate::perception::screenshot::ScreenshotResult;
use crate::perception::traits::ComponentDetector;
use crate::perception::types::{BoundingBox, Detections, Element, ElementSource};

const INPUT_SIZE: u32 = 640;

/// Candidate box in capture pixels, before NMS.
#[derive(Debug, Clone, PartialEq)]
struct RawDetection {
    bbox: [f32; 4], // [x1, y1, x2, y2]
    confidence: f32,
    class_id: usize,
}

#[derive(Debug, Clone, Copy)]
struct Letterbox {
    pad_x: f32,
    pad_y: f32,
    scale: f32,
}

pub struct YoloDetector {
    session: Arc<Mutex<Session>>,
    conf_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    /// Load the model at `model_path`. A missing or unloadable file is a
    /// `Perception` error naming the path.
    pub fn load(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> PilotResult<Self> {
        if !Path::new(model_path).exists() {
            return Err(PilotError::Perception(format!(
                "yolo: model file '{model_path}' (perception.yolo_model) not found"
            )));
        }
        let det = Self::build(model_path, conf_threshold, iou_threshold)
            .map_err(|e| PilotError::Perception(format!("yolo: model '{model_path}': {e}")))?;
        tracing::info!(path = %model_path, "YOLO detector loaded");
        Ok(det)
    }

    fn build(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> PilotResult<Self> {
        let session = Session::builder()
            .map_err(|e| PilotError::Perception(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PilotError::Perception(format!("ort opt-level: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| PilotError::Perception(format!("ort load model: {e}")))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            conf_threshold,
            iou_threshold,
        })
    }
}

#[async_trait]
impl ComponentDetector for YoloDetector {
    fn name(&self) -> &str {
        "yolo"
    }

    async fn detect(&self, shot: &ScreenshotResult) -> PilotResult<Detections> {
        let session = Arc::clone(&self.session);
        let bytes = shot.image_bytes.clone();
        let (conf, iou_t) = (self.conf_threshold, self.iou_threshold);

        tokio::task::spawn_blocking(move || run_inference(&session, &bytes, conf, iou_t))
            .await
            .map_err(|e| PilotError::Perception(format!("yolo join: {e}")))?
    }
}

fn run_inference(
    session: &Mutex<Session>,
    image_bytes: &[u8],
    conf_threshold: f32,
    iou_threshold: f32,
) -> PilotResult<Detections> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| PilotError::Perception(format!("image load: {e}")))?;
    let (orig_w, orig_h) = (img.width(), img.height());

    let (input_tensor, letterbox) = preprocess(&img);
    let input_value = Tensor::from_array(input_tensor)
        .map_err(|e| PilotError::Perception(format!("ort tensor: {e}")))?;

    let output_owned = {
        let mut session = session
            .lock()
            .map_err(|_| PilotError::Perception("yolo session poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| PilotError::Perception(format!("ort run: {e}")))?;
        outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| PilotError::Perception(format!("extract tensor: {e}")))?
            .to_owned()
    };

    let raw = postprocess(&output_owned.view(), (orig_w, orig_h), letterbox, conf_threshold)?;
    let kept = nms(&raw, iou_threshold);

    let elements: Vec<Element> = kept
        .into_iter()
        .map(|i| {
            let [x1, y1, x2, y2] = raw[i].bbox;
            Element {
                bbox: BoundingBox::new(x1 as f64, y1 as f64, x2 as f64, y2 as f64),
                content: None,
                source: ElementSource::Component,
            }
        })
        .collect();

    tracing::info!(candidates = raw.len(), kept = elements.len(), "YOLO detection complete");
    Ok(Detections {
        resolution: (orig_w, orig_h),
        elements,
    })
}

/// Resize + letterbox + normalise → NCHW f32 tensor.
fn preprocess(img: &image::DynamicImage) -> (Array4<f32>, Letterbox) {
    let sz = INPUT_SIZE;
    let (ow, oh) = (img.width() as f32, img.height() as f32);
    let scale = (sz as f32 / ow).min(sz as f32 / oh);
    let nw = ((ow * scale).round() as u32).clamp(1, sz);
    let nh = ((oh * scale).round() as u32).clamp(1, sz);
    let pad_x = (sz - nw) as f32 / 2.0;
    let pad_y = (sz - nh) as f32 / 2.0;

    let rgb = img
        .resize_exact(nw, nh, image::imageops::FilterType::CatmullRom)
        .to_rgb8();

    let mut canvas = image::RgbImage::from_pixel(sz, sz, image::Rgb([114, 114, 114]));
    image::imageops::overlay(&mut canvas, &rgb, pad_x.round() as i64, pad_y.round() as i64);

    let mut tensor = Array4::<f32>::zeros((1, 3, sz as usize, sz as usize));
    for (x, y, p) in canvas.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = p[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = p[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = p[2] as f32 / 255.0;
    }

    (tensor, Letterbox { pad_x, pad_y, scale })
}

/// YOLOv8 output is `[1, 4 + num_classes, num_proposals]` with centre-size boxes.
fn postprocess(
    output: &ndarray::ArrayViewD<f32>,
    (orig_w, orig_h): (u32, u32),
    lb: Letterbox,
    conf_threshold: f32,
) -> PilotResult<Vec<RawDetection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] < 1 || shape[1] < 5 {
        return Err(PilotError::Perception(format!(
            "unexpected output shape: {shape:?}"
        )));
    }
    let num_classes = shape[1] - 4;
    let num_preds = shape[2];

    let mut detections = Vec::new();
    for i in 0..num_preds {
        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        let (class_id, score) = (0..num_classes)
            .map(|c| (c, output[[0, 4 + c, i]]))
            .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < conf_threshold {
            continue;
        }

        // Undo letterbox, clamp to the capture.
        let x1 = (((cx - w / 2.0) - lb.pad_x) / lb.scale).clamp(0.0, orig_w as f32);
        let y1 = (((cy - h / 2.0) - lb.pad_y) / lb.scale).clamp(0.0, orig_h as f32);
        let x2 = (((cx + w / 2.0) - lb.pad_x) / lb.scale).clamp(0.0, orig_w as f32);
        let y2 = (((cy + h / 2.0) - lb.pad_y) / lb.scale).clamp(0.0, orig_h as f32);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(RawDetection {
            bbox: [x1, y1, x2, y2],
            confidence: score,
            class_id,
        });
    }
    Ok(detections)
}

/// Greedy per-class NMS; returns kept indices, most confident first.
fn nms(dets: &[RawDetection], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..dets.len()).collect();
    indices.sort_by(|&a, &b| {
        dets[b]
            .confidence
            .partial_cmp(&dets[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];
    for &i in &indices {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &indices {
            if suppressed[j] || i == j {
                continue;
            }
            if dets[i].class_id == dets[j].class_id && iou(&dets[i].bbox, &dets[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
