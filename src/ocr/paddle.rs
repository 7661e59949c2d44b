//! PaddleOCR sidecar engine.
//!
//! Talks to a PaddleHub `ocr_system` serving endpoint: images go up base64
//! encoded, recognized lines come back with per-line confidence.

use super::{
    probe_image, round2, EngineError, ExtractionMetadata, ExtractionRequest, ExtractionResult,
    OcrEngine,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const ENGINE_NAME: &str = "paddleocr";
const PREDICT_PATH: &str = "/predict/ocr_system";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_OK: &str = "000";

const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "ch", "japan", "korean", "fr", "german", "spanish", "arabic", "tamil", "hindi",
];

#[derive(Serialize)]
struct PredictRequest {
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    results: Vec<Vec<RecognizedLine>>,
}

#[derive(Debug, Deserialize)]
struct RecognizedLine {
    text: String,
    confidence: f64,
}

pub struct PaddleOcrEngine {
    /// Base URL of the sidecar; `None` when unconfigured.
    url: Option<String>,
    client: reqwest::Client,
}

impl PaddleOcrEngine {
    /// An unset URL disables the engine for good. A configured but unreachable
    /// sidecar is only logged: it may come up later, and each request surfaces
    /// connection errors as a failure.
    pub async fn connect(url: Option<String>, client: reqwest::Client) -> Self {
        let url = url.map(|u| u.trim_end_matches('/').to_string());
        match &url {
            None => info!("PADDLEOCR_URL not set, PaddleOCR engine disabled"),
            Some(base) => match client.get(base).timeout(PROBE_TIMEOUT).send().await {
                Ok(resp) => debug!("PaddleOCR sidecar at {} answered {}", base, resp.status()),
                Err(e) => warn!("PaddleOCR sidecar at {} not reachable yet: {}", base, e),
            },
        }
        Self { url, client }
    }

    async fn recognize(&self, request: &ExtractionRequest) -> Result<ExtractionResult, EngineError> {
        let Some(base) = &self.url else {
            return Err(EngineError::Unavailable(
                "PaddleOCR is not available".to_string(),
            ));
        };

        let image_size = probe_image(request.shared_data()).await?;

        let body = PredictRequest {
            images: vec![BASE64.encode(request.data())],
        };

        let response = self
            .client
            .post(format!("{}{}", base, PREDICT_PATH))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Backend(format!(
                "PaddleOCR sidecar error ({}): {}",
                status, text
            )));
        }

        let predicted: PredictResponse = response.json().await?;
        let (text, lines, confidence) = collect_lines(predicted)?;

        let mut metadata =
            ExtractionMetadata::describe(ENGINE_NAME, request, image_size, &text, confidence);
        metadata.detected_lines = Some(lines);

        Ok(ExtractionResult::Success { text, metadata })
    }
}

#[async_trait::async_trait]
impl OcrEngine for PaddleOcrEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn is_available(&self) -> bool {
        self.url.is_some()
    }

    fn supported_languages(&self) -> Vec<String> {
        SUPPORTED_LANGUAGES.iter().map(|s| s.to_string()).collect()
    }

    async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
        match self.recognize(request).await {
            Ok(result) => result,
            Err(e) => ExtractionResult::failure(ENGINE_NAME, e),
        }
    }
}

/// Join recognized lines (first image only) and average their confidence,
/// scaled from 0–1 to a percentage.
fn collect_lines(response: PredictResponse) -> Result<(String, usize, f64), EngineError> {
    if !response.status.is_empty() && response.status != STATUS_OK {
        return Err(EngineError::Backend(format!(
            "PaddleOCR returned status {}: {}",
            response.status, response.msg
        )));
    }

    let lines = response.results.into_iter().next().unwrap_or_default();
    if lines.is_empty() {
        return Ok((String::new(), 0, 0.0));
    }

    let confidence = lines.iter().map(|l| l.confidence).sum::<f64>() / lines.len() as f64;
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Ok((text.trim().to_string(), lines.len(), round2(confidence * 100.0)))
}
