pub mod annotator;
pub mod fusion;
pub mod labeling;
pub mod ocr;
pub mod pipeline;
pub mod screenshot;
pub mod traits;
pub mod types;
pub mod yolo_detector;
