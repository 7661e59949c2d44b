//! Tesseract OCR engine.
//!
//! Drives the `tesseract` CLI, piping the image through stdin so no temp files
//! are written. Confidence comes from a second pass in TSV mode.

use super::{
    probe_image, round2, EngineError, ExtractionMetadata, ExtractionRequest, ExtractionResult,
    OcrEngine,
};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const ENGINE_NAME: &str = "tesseract";

const SUPPORTED_LANGUAGES: &[&str] = &[
    "eng", "tam", "hin", "fra", "deu", "spa", "ara", "jpn", "kor", "chi_sim", "chi_tra",
];

pub struct TesseractEngine {
    command: String,
    /// Whether `tesseract --version` succeeded at construction.
    initialized: bool,
}

impl TesseractEngine {
    /// Probe the binary once; a failed probe leaves the engine permanently unavailable.
    pub async fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let initialized = match Command::new(&command).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                debug!(
                    "Tesseract probe ok: {}",
                    String::from_utf8_lossy(&output.stdout).lines().next().unwrap_or("")
                );
                true
            }
            Ok(output) => {
                warn!(
                    "Tesseract initialization failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("Tesseract initialization failed: {}", e);
                false
            }
        };
        Self {
            command,
            initialized,
        }
    }

    /// Run tesseract on `data` (via stdin) with extra trailing args, returning stdout.
    async fn run(&self, data: &[u8], language: &str, extra: &[&str]) -> Result<String, EngineError> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", language])
            .args(extra)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::Unavailable(
                    "Tesseract is not installed or not in PATH".to_string(),
                ),
                _ => EngineError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Backend(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn recognize(&self, request: &ExtractionRequest) -> Result<ExtractionResult, EngineError> {
        if !self.is_available() {
            return Err(EngineError::Unavailable(
                "Tesseract is not installed or not in PATH".to_string(),
            ));
        }

        let image_size = probe_image(request.shared_data()).await?;
        let language = tesseract_language(request.language());

        let raw = self.run(request.data(), &language, &[]).await?;

        let confidence = match self.run(request.data(), &language, &["tsv"]).await {
            Ok(tsv) => mean_word_confidence(&tsv),
            Err(e) => {
                debug!("Tesseract TSV pass failed, reporting zero confidence: {}", e);
                0.0
            }
        };

        let text = raw.trim().to_string();
        let metadata =
            ExtractionMetadata::describe(ENGINE_NAME, request, image_size, &text, confidence);

        Ok(ExtractionResult::Success { text, metadata })
    }
}

#[async_trait::async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn is_available(&self) -> bool {
        self.initialized && binary_on_path(&self.command)
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

/// Tesseract uses ISO 639-2 codes; only the default hint needs translating.
fn tesseract_language(hint: &str) -> String {
    match hint {
        "" | "en" => "eng".to_string(),
        other => other.to_string(),
    }
}

/// Average the per-word confidences (column 11) of a TSV report, skipping
/// non-word rows which tesseract marks with -1.
fn mean_word_confidence(tsv: &str) -> f64 {
    let confidences: Vec<f64> = tsv
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').nth(10))
        .filter_map(|conf| conf.trim().parse::<f64>().ok())
        .filter(|conf| *conf > 0.0)
        .collect();

    if confidences.is_empty() {
        return 0.0;
    }
    round2(confidences.iter().sum::<f64>() / confidences.len() as f64)
}

/// Resolve `command` the way a shell would: explicit paths are checked
/// directly, bare names are searched for in PATH.
fn binary_on_path(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}
