use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var SCREENPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps loop roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Vision model that looks at the annotated screenshot and writes the plan.
    pub planner: Option<RoleEntry>,
    /// Tool-calling model used when the heuristic action parser gives up.
    pub extractor: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Where raw and annotated captures (and transcripts) are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub save_captures: bool,
    /// Write a JSONL transcript of every session under `<output_dir>/sessions`.
    #[serde(default)]
    pub transcript: bool,
    #[serde(default = "default_google_endpoint")]
    pub google_vision_endpoint: String,
    /// Path to a YOLOv8 ONNX model. Component detection is disabled when unset.
    #[serde(default)]
    pub yolo_model: Option<String>,
    #[serde(default = "default_yolo_confidence")]
    pub yolo_confidence: f32,
    #[serde(default = "default_yolo_iou")]
    pub yolo_iou: f32,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            save_captures: true,
            transcript: false,
            google_vision_endpoint: default_google_endpoint(),
            yolo_model: None,
            yolo_confidence: default_yolo_confidence(),
            yolo_iou: default_yolo_iou(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_google_endpoint() -> String {
    "eu-vision.googleapis.com".into()
}

fn default_yolo_confidence() -> f32 {
    0.25
}

fn default_yolo_iou() -> f32 {
    0.45
}

/// Order in which fused elements compete for labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOrder {
    /// Row buckets top to bottom, then left to right.
    #[default]
    ReadingOrder,
    /// Biggest elements first, so the lowest codes land on large targets.
    LargestFirst,
}

/// Label geometry is expressed in screen (input) pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingConfig {
    #[serde(default)]
    pub order: LabelOrder,
    #[serde(default = "default_label_width")]
    pub label_width: u32,
    #[serde(default = "default_label_height")]
    pub label_height: u32,
    /// Elements wider and taller than this get their marker near the centre.
    #[serde(default = "default_big_component")]
    pub big_component: u32,
    /// Horizontal suppression radius, in label widths.
    #[serde(default = "default_overlap_x")]
    pub overlap_x: f64,
    /// Vertical suppression radius, in label heights.
    #[serde(default = "default_overlap_y")]
    pub overlap_y: f64,
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            order: LabelOrder::default(),
            label_width: default_label_width(),
            label_height: default_label_height(),
            big_component: default_big_component(),
            overlap_x: default_overlap_x(),
            overlap_y: default_overlap_y(),
            min_text_len: default_min_text_len(),
        }
    }
}

fn default_label_width() -> u32 {
    24
}

fn default_label_height() -> u32 {
    12
}

fn default_big_component() -> u32 {
    100
}

fn default_overlap_x() -> f64 {
    1.0
}

fn default_overlap_y() -> f64 {
    2.0
}

fn default_min_text_len() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Pause after every dispatched action.
    #[serde(default = "default_action_delay")]
    pub action_delay_ms: u64,
    /// Pause before re-capturing after an explicit REFRESH.
    #[serde(default = "default_refresh_delay")]
    pub refresh_delay_ms: u64,
    /// Pause before re-capturing at the end of a batch.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_duration_minutes: Option<u32>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            action_delay_ms: default_action_delay(),
            refresh_delay_ms: default_refresh_delay(),
            settle_delay_ms: default_settle_delay(),
            max_iterations: None,
            max_duration_minutes: None,
        }
    }
}

fn default_action_delay() -> u64 {
    200
}

fn default_refresh_delay() -> u64 {
    1000
}

fn default_settle_delay() -> u64 {
    2000
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn parse_config(content: &str) -> PilotResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.labeling.label_width == 0 || config.labeling.label_height == 0 {
        return Err(PilotError::Config("labeling.label_width/label_height must be positive".into()));
    }
    Ok(config)
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}
