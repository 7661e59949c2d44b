//! Service configuration.
//!
//! Built once at startup from the environment (after `.env` is loaded) and
//! passed down explicitly.

use crate::ocr::EngineKind;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &[".jpg", ".jpeg", ".png", ".bmp", ".tiff", ".tif", ".pdf"];

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub primary_engine: EngineKind,
    pub fallback_engine: EngineKind,
    pub max_upload_bytes: usize,
    /// Lowercase, dot-prefixed extensions (e.g. `.png`).
    pub allowed_extensions: BTreeSet<String>,
    /// Upper bound on a single engine attempt.
    pub engine_timeout: Duration,
    pub paddleocr_url: Option<String>,
    pub tesseract_cmd: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".to_string(),
            primary_engine: EngineKind::PaddleOcr,
            fallback_engine: EngineKind::Tesseract,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            engine_timeout: Duration::from_secs(120),
            paddleocr_url: None,
            tesseract_cmd: "tesseract".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get("OCR_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(kind) = get("OCR_PRIMARY_ENGINE") {
            config.primary_engine = kind.parse::<EngineKind>().context("Invalid OCR_PRIMARY_ENGINE")?;
        }
        if let Some(kind) = get("OCR_FALLBACK_ENGINE") {
            config.fallback_engine = kind.parse::<EngineKind>().context("Invalid OCR_FALLBACK_ENGINE")?;
        }
        if let Some(bytes) = get("OCR_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = bytes
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid OCR_MAX_UPLOAD_BYTES: {}", bytes))?;
        }
        if let Some(list) = get("OCR_ALLOWED_EXTENSIONS") {
            config.allowed_extensions = parse_extensions(&list);
            if config.allowed_extensions.is_empty() {
                anyhow::bail!("OCR_ALLOWED_EXTENSIONS contains no extensions");
            }
        }
        if let Some(secs) = get("OCR_ENGINE_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid OCR_ENGINE_TIMEOUT_SECS: {}", secs))?;
            if secs == 0 {
                anyhow::bail!("OCR_ENGINE_TIMEOUT_SECS must be at least 1");
            }
            config.engine_timeout = Duration::from_secs(secs);
        }
        config.paddleocr_url = get("PADDLEOCR_URL");
        if let Some(cmd) = get("TESSERACT_CMD") {
            config.tesseract_cmd = cmd;
        }

        Ok(config)
    }
}

/// Normalize a comma-separated extension list to lowercase, dot-prefixed entries.
fn parse_extensions(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty() && e != ".")
        .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
        .collect()
}
