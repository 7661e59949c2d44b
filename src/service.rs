//! Upload validation and dispatch.
//!
//! The only layer that turns OCR outcomes into transport-level errors.

use crate::config::ServiceConfig;
use crate::ocr::{ExtractionMetadata, ExtractionRequest, ExtractionResult};
use crate::orchestrator::{EnginesStatus, OcrOrchestrator};
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// A fully buffered upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Successful extraction as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractResponse {
    pub filename: String,
    pub file_size: usize,
    pub extracted_text: String,
    pub metadata: ExtractionMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("File too large. Maximum size is {}MB", .max_bytes / (1024 * 1024))]
    FileTooLarge { max_bytes: usize },

    #[error("Unsupported file type. Allowed types: {allowed}")]
    UnsupportedFileType { allowed: String },

    #[error("{0}")]
    InvalidUpload(String),

    #[error("OCR processing failed: {0}")]
    ExtractionFailed(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedFileType { .. } | Self::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            Self::ExtractionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub struct OcrService {
    orchestrator: OcrOrchestrator,
    max_upload_bytes: usize,
    allowed_extensions: BTreeSet<String>,
}

impl OcrService {
    pub fn new(orchestrator: OcrOrchestrator, config: &ServiceConfig) -> Self {
        Self {
            orchestrator,
            max_upload_bytes: config.max_upload_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Validate an upload, run OCR with failover and wrap the outcome.
    pub async fn extract_from_upload(
        &self,
        upload: UploadedFile,
        language: &str,
    ) -> Result<ExtractResponse, ServiceError> {
        self.validate(&upload)?;

        let UploadedFile { filename, data } = upload;
        let file_size = data.len();
        info!(
            "OCR request: {} ({} bytes, language={})",
            filename, file_size, language
        );

        let request = ExtractionRequest::new(data, Some(filename.clone()), language);
        match self.orchestrator.extract_with_failover(&request).await {
            ExtractionResult::Success { text, metadata } => {
                info!(
                    "OCR complete: {} via {} ({} chars, confidence {})",
                    filename, metadata.engine, metadata.char_count, metadata.confidence
                );
                Ok(ExtractResponse {
                    filename,
                    file_size,
                    extracted_text: text,
                    metadata,
                })
            }
            ExtractionResult::Failure { error, .. } => Err(ServiceError::ExtractionFailed(error)),
        }
    }

    /// Size first, then extension; neither check touches an engine.
    pub fn validate(&self, upload: &UploadedFile) -> Result<(), ServiceError> {
        if upload.data.len() > self.max_upload_bytes {
            return Err(ServiceError::FileTooLarge {
                max_bytes: self.max_upload_bytes,
            });
        }

        let extension = Path::new(&upload.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()));

        match extension {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(()),
            _ => Err(ServiceError::UnsupportedFileType {
                allowed: self
                    .allowed_extensions
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    pub fn engine_status(&self) -> EnginesStatus {
        self.orchestrator.engine_status()
    }
}
