/// OCR providers over HTTP: Google Cloud Vision and Azure Computer Vision.
///
/// The provider is picked from the environment, Google first.
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

use crate::config::PerceptionConfig;
use crate::errors::{PilotError, PilotResult};
use crate::perception::screenshot::ScreenshotResult;
use crate::perception::traits::TextRecognizer;
use crate::perception::types::{TextDetections, TextRegion};

pub const GOOGLE_KEY_ENV: &str = "GCLOUD_VISION_API_KEY";
pub const AZURE_KEY_ENV: &str = "AZURE_VISION_API_KEY";
pub const AZURE_ENDPOINT_ENV: &str = "AZURE_VISION_ENDPOINT";

/// Build the OCR provider selected by environment variables, if any.
pub fn recognizer_from_env(cfg: &PerceptionConfig) -> PilotResult<Option<Box<dyn TextRecognizer>>> {
    if let Ok(key) = std::env::var(GOOGLE_KEY_ENV) {
        if !key.is_empty() {
            tracing::info!(endpoint = %cfg.google_vision_endpoint, "OCR provider: Google Cloud Vision");
            return Ok(Some(Box::new(GoogleVisionOcr::new(
                cfg.google_vision_endpoint.clone(),
                key,
            ))));
        }
    }
    if let Ok(key) = std::env::var(AZURE_KEY_ENV) {
        if !key.is_empty() {
            let endpoint = std::env::var(AZURE_ENDPOINT_ENV).map_err(|_| {
                PilotError::Config(format!("{AZURE_KEY_ENV} is set but {AZURE_ENDPOINT_ENV} is missing"))
            })?;
            tracing::info!(endpoint = %endpoint, "OCR provider: Azure Computer Vision");
            return Ok(Some(Box::new(AzureOcr::new(endpoint, key))));
        }
    }
    Ok(None)
}

// ── Google Cloud Vision ──────────────────────────────────────────────────────

pub struct GoogleVisionOcr {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl GoogleVisionOcr {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GoogleAnnotateResponse {
    #[serde(default)]
    pub responses: Vec<GoogleImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleImageResponse {
    #[serde(default)]
    pub text_annotations: Vec<GoogleTextAnnotation>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleTextAnnotation {
    #[serde(default)]
    pub description: String,
    pub bounding_poly: Option<GooglePoly>,
}

#[derive(Debug, Deserialize)]
pub struct GooglePoly {
    #[serde(default)]
    pub vertices: Vec<GoogleVertex>,
}

/// Vision omits zero coordinates.
#[derive(Debug, Deserialize)]
pub struct GoogleVertex {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

/// The first annotation is the whole-page aggregate and is skipped.
pub fn google_regions(resp: GoogleAnnotateResponse) -> PilotResult<Vec<TextRegion>> {
    let Some(first) = resp.responses.into_iter().next() else {
        return Ok(Vec::new());
    };
    if let Some(err) = first.error {
        return Err(PilotError::Perception(format!("Google Cloud Vision: {err}")));
    }
    Ok(first
        .text_annotations
        .into_iter()
        .skip(1)
        .map(|a| TextRegion {
            text: a.description,
            polygon: a
                .bounding_poly
                .map(|p| p.vertices.into_iter().map(|v| (v.x, v.y)).collect())
                .unwrap_or_default(),
        })
        .collect())
}

#[async_trait]
impl TextRecognizer for GoogleVisionOcr {
    fn name(&self) -> &str {
        "google-cloud-vision"
    }

    async fn recognize(&self, shot: &ScreenshotResult) -> PilotResult<TextDetections> {
        let body = serde_json::json!({
            "requests": [{
                "image": { "content": base64::engine::general_purpose::STANDARD.encode(&shot.image_bytes) },
                "features": [{ "type": "TEXT_DETECTION" }],
            }]
        });
        let url = format!("https://{}/v1/images:annotate", self.endpoint);
        tracing::debug!(url = %url, "Google Cloud Vision request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Perception(format!(
                "Google Cloud Vision {status}: {err_body}"
            )));
        }
        let parsed: GoogleAnnotateResponse = response.json().await?;
        let regions = google_regions(parsed)?;
        tracing::info!(regions = regions.len(), "Google Cloud Vision OCR complete");
        Ok(TextDetections {
            resolution: shot.physical_size(),
            regions,
        })
    }
}

// ── Azure Computer Vision ────────────────────────────────────────────────────

pub struct AzureOcr {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl AzureOcr {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AzureOcrResult {
    #[serde(default)]
    pub regions: Vec<AzureRegion>,
}

#[derive(Debug, Deserialize)]
pub struct AzureRegion {
    #[serde(default)]
    pub lines: Vec<AzureLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureLine {
    /// `"left,top,width,height"`
    pub bounding_box: String,
    #[serde(default)]
    pub words: Vec<AzureWord>,
}

#[derive(Debug, Deserialize)]
pub struct AzureWord {
    pub text: String,
}

/// One region per OCR line; words are joined with spaces.
pub fn azure_regions(result: AzureOcrResult) -> Vec<TextRegion> {
    let mut out = Vec::new();
    for line in result.regions.into_iter().flat_map(|r| r.lines) {
        let nums: Vec<i32> = line
            .bounding_box
            .split(',')
            .filter_map(|n| n.trim().parse().ok())
            .collect();
        let [left, top, width, height] = nums[..] else {
            tracing::debug!(bbox = %line.bounding_box, "skipping Azure line with malformed box");
            continue;
        };
        let text = line
            .words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        out.push(TextRegion {
            text,
            polygon: vec![(left, top), (left + width, top + height)],
        });
    }
    out
}

#[async_trait]
impl TextRecognizer for AzureOcr {
    fn name(&self) -> &str {
        "azure-computer-vision"
    }

    async fn recognize(&self, shot: &ScreenshotResult) -> PilotResult<TextDetections> {
        let url = format!("{}/vision/v3.2/ocr", self.endpoint.trim_end_matches('/'));
        tracing::debug!(url = %url, "Azure OCR request");

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(shot.image_bytes.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Perception(format!("Azure OCR {status}: {err_body}")));
        }
        let parsed: AzureOcrResult = response.json().await?;
        let regions = azure_regions(parsed);
        tracing::info!(regions = regions.len(), "Azure OCR complete");
        Ok(TextDetections {
            resolution: shot.physical_size(),
            regions,
        })
    }
}
