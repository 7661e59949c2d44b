//! OCR engine abstraction.
//!
//! Defines the [`OcrEngine`] trait and the request/result types shared by every
//! backend, so the orchestrator can drive PaddleOCR, Tesseract, or any future
//! engine through the same contract.

pub mod paddle;
pub mod tesseract;

use crate::config::ServiceConfig;
use image::{ColorType, GenericImageView};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use paddle::PaddleOcrEngine;
pub use tesseract::TesseractEngine;

/// A single OCR job: raw image bytes plus the hints supplied with the upload.
///
/// The filename only ever ends up in metadata; engines never touch the filesystem with it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    data: Arc<[u8]>,
    filename: Option<String>,
    language: String,
}

impl ExtractionRequest {
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        filename: Option<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            filename,
            language: language.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap handle to the buffer for work moved onto the blocking pool.
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    pub mode: String,
}

/// Metadata attached to a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionMetadata {
    pub filename: Option<String>,
    pub engine: String,
    pub image_size: ImageSize,
    pub char_count: usize,
    pub word_count: usize,
    /// Backend certainty, 0–100.
    pub confidence: f64,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_engine: Option<String>,
}

impl ExtractionMetadata {
    /// Build metadata for `text`, deriving the character and word counts.
    pub fn describe(
        engine: &str,
        request: &ExtractionRequest,
        image_size: ImageSize,
        text: &str,
        confidence: f64,
    ) -> Self {
        Self {
            filename: request.filename().map(str::to_string),
            engine: engine.to_string(),
            image_size,
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            confidence,
            language: request.language().to_string(),
            detected_lines: None,
            fallback_used: None,
            primary_engine: None,
        }
    }
}

/// Outcome of one extraction attempt. Engines return this instead of erroring.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Success {
        text: String,
        metadata: ExtractionMetadata,
    },
    Failure {
        error: String,
        /// Identifiers of the engine(s) that were attempted.
        engines: Vec<String>,
    },
}

impl ExtractionResult {
    pub fn failure(engine: &str, error: impl std::fmt::Display) -> Self {
        Self::Failure {
            error: error.to_string(),
            engines: vec![engine.to_string()],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// True for a success whose text contains something other than whitespace.
    pub fn has_text(&self) -> bool {
        match self {
            Self::Success { text, .. } => !text.trim().is_empty(),
            Self::Failure { .. } => false,
        }
    }
}

/// Availability snapshot for one engine, recomputed on every status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub available: bool,
    pub supported_languages: Vec<String>,
}

/// Errors raised inside an engine adapter. Never crosses the [`OcrEngine`] boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Unavailable(String),

    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("{0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),
}

/// Capability contract implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    /// Stable identifier reported in metadata and status (e.g. `"tesseract"`).
    fn name(&self) -> &str;

    /// Cheap, infallible liveness check, re-evaluated on every call.
    fn is_available(&self) -> bool;

    fn supported_languages(&self) -> Vec<String>;

    async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult;

    fn status(&self) -> EngineStatus {
        EngineStatus {
            name: self.name().to_string(),
            available: self.is_available(),
            supported_languages: self.supported_languages(),
        }
    }
}

/// Known engine identifiers accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    PaddleOcr,
    Tesseract,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaddleOcr => "paddleocr",
            Self::Tesseract => "tesseract",
        }
    }
}

impl FromStr for EngineKind {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paddleocr" | "paddle" => Ok(Self::PaddleOcr),
            "tesseract" => Ok(Self::Tesseract),
            other => Err(UnknownEngine(other.to_string())),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported OCR engine type: {0} (expected paddleocr or tesseract)")]
pub struct UnknownEngine(pub String);

/// Construct the engine for `kind`. Initialization problems are recorded as
/// unavailability rather than returned, so startup never fails on a missing backend.
pub async fn build_engine(
    kind: EngineKind,
    config: &ServiceConfig,
    client: &reqwest::Client,
) -> Arc<dyn OcrEngine> {
    let engine: Arc<dyn OcrEngine> = match kind {
        EngineKind::PaddleOcr => {
            Arc::new(PaddleOcrEngine::connect(config.paddleocr_url.clone(), client.clone()).await)
        }
        EngineKind::Tesseract => Arc::new(TesseractEngine::new(&config.tesseract_cmd).await),
    };
    info!(
        "OCR engine {} initialized (available={})",
        engine.name(),
        engine.is_available()
    );
    engine
}

/// Decode the image on the blocking pool and report its dimensions.
pub(crate) async fn probe_image(data: Arc<[u8]>) -> Result<ImageSize, EngineError> {
    tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&data)?;
        let (width, height) = image.dimensions();
        Ok(ImageSize {
            width,
            height,
            mode: pil_mode(image.color()).to_string(),
        })
    })
    .await
    .map_err(|e| EngineError::Backend(format!("image decode task failed: {}", e)))?
}

/// Map a decoded color type onto the conventional PIL mode names.
fn pil_mode(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "L",
        ColorType::L16 => "I;16",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB",
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA",
        _ => "unknown",
    }
}

/// Round to two decimal places, the precision confidence is reported with.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine used by orchestrator, service and router tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    pub enum Script {
        Text { text: String, confidence: f64 },
        Fail(String),
        Hang,
    }

    pub struct ScriptedEngine {
        name: String,
        available: bool,
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        pub fn new(name: &str, available: bool, script: Script) -> Self {
            Self {
                name: name.to_string(),
                available,
                script,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn text(name: &str, text: &str, confidence: f64) -> Self {
            Self::new(
                name,
                true,
                Script::Text {
                    text: text.to_string(),
                    confidence,
                },
            )
        }

        pub fn failing(name: &str, error: &str) -> Self {
            Self::new(name, true, Script::Fail(error.to_string()))
        }

        pub fn unavailable(name: &str) -> Self {
            Self::new(name, false, Script::Fail(format!("{} is not available", name)))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn supported_languages(&self) -> Vec<String> {
            vec!["en".to_string()]
        }

        async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Text { text, confidence } => {
                    let size = ImageSize {
                        width: 10,
                        height: 10,
                        mode: "RGB".to_string(),
                    };
                    ExtractionResult::Success {
                        text: text.clone(),
                        metadata: ExtractionMetadata::describe(
                            &self.name,
                            request,
                            size,
                            text,
                            *confidence,
                        ),
                    }
                }
                Script::Fail(error) => ExtractionResult::failure(&self.name, error),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    ExtractionResult::failure(&self.name, "unreachable")
                }
            }
        }
    }

    /// Encode a small solid PNG in memory.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buffer = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(buffer)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        bytes
    }
}
