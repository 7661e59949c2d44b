//! Primary/fallback OCR orchestration.
//!
//! The primary engine is tried first; the fallback only runs once the primary
//! path is exhausted. Attempts are strictly sequential.

use crate::ocr::{EngineError, EngineStatus, ExtractionRequest, ExtractionResult, OcrEngine};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const BOTH_FAILED_MESSAGE: &str = "Both OCR engines failed or are unavailable";

/// Failover progress. `Succeeded` and `BothFailed` are terminal.
enum FailoverState {
    NotStarted,
    TryingPrimary,
    TryingFallback,
    Succeeded(ExtractionResult),
    BothFailed,
}

impl FailoverState {
    fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::TryingPrimary => "trying_primary",
            Self::TryingFallback => "trying_fallback",
            Self::Succeeded(_) => "succeeded",
            Self::BothFailed => "both_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnginesStatus {
    pub primary_engine: EngineStatus,
    pub fallback_engine: EngineStatus,
}

/// Holds one primary and one fallback engine and decides between them per request.
pub struct OcrOrchestrator {
    primary: Arc<dyn OcrEngine>,
    fallback: Arc<dyn OcrEngine>,
    engine_timeout: Duration,
}

impl OcrOrchestrator {
    pub fn new(
        primary: Arc<dyn OcrEngine>,
        fallback: Arc<dyn OcrEngine>,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            engine_timeout,
        }
    }

    /// Run the request through the primary engine, falling back when the
    /// primary is unavailable, fails, or finds no text. Never errors: a
    /// `Failure` naming both engines is returned when neither produces a result.
    pub async fn extract_with_failover(&self, request: &ExtractionRequest) -> ExtractionResult {
        let mut state = FailoverState::NotStarted;
        loop {
            debug!("Failover state: {}", state.label());
            state = match state {
                FailoverState::NotStarted => FailoverState::TryingPrimary,
                FailoverState::TryingPrimary => match self.attempt(&self.primary, request).await {
                    Some(result) if result.has_text() => FailoverState::Succeeded(result),
                    Some(result) if result.is_success() => {
                        info!(
                            "Primary engine {} found no text, trying fallback {}",
                            self.primary.name(),
                            self.fallback.name()
                        );
                        FailoverState::TryingFallback
                    }
                    _ => FailoverState::TryingFallback,
                },
                FailoverState::TryingFallback => match self.attempt(&self.fallback, request).await {
                    // Any fallback success is terminal, empty text included.
                    Some(ExtractionResult::Success { text, mut metadata }) => {
                        metadata.fallback_used = Some(true);
                        metadata.primary_engine = Some(self.primary.name().to_string());
                        FailoverState::Succeeded(ExtractionResult::Success { text, metadata })
                    }
                    _ => FailoverState::BothFailed,
                },
                FailoverState::Succeeded(result) => return result,
                FailoverState::BothFailed => {
                    warn!(
                        "OCR failed on both engines ({}, {})",
                        self.primary.name(),
                        self.fallback.name()
                    );
                    return ExtractionResult::Failure {
                        error: format!(
                            "{} (primary: {}, fallback: {})",
                            BOTH_FAILED_MESSAGE,
                            self.primary.name(),
                            self.fallback.name()
                        ),
                        engines: vec![
                            self.primary.name().to_string(),
                            self.fallback.name().to_string(),
                        ],
                    };
                }
            };
        }
    }

    /// One bounded attempt on `engine`. Returns `None` without calling
    /// `extract` when the engine reports itself unavailable.
    async fn attempt(
        &self,
        engine: &Arc<dyn OcrEngine>,
        request: &ExtractionRequest,
    ) -> Option<ExtractionResult> {
        if !engine.is_available() {
            warn!("OCR engine {} is unavailable", engine.name());
            return None;
        }

        let result = match tokio::time::timeout(self.engine_timeout, engine.extract(request)).await
        {
            Ok(result) => result,
            Err(_) => {
                ExtractionResult::failure(engine.name(), EngineError::TimedOut(self.engine_timeout))
            }
        };

        if let ExtractionResult::Failure { error, .. } = &result {
            warn!("OCR engine {} failed: {}", engine.name(), error);
        }
        Some(result)
    }

    /// Availability and languages of both engines, each checked independently.
    pub fn engine_status(&self) -> EnginesStatus {
        EnginesStatus {
            primary_engine: self.primary.status(),
            fallback_engine: self.fallback.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::{Script, ScriptedEngine};

    fn request() -> ExtractionRequest {
        ExtractionRequest::new(vec![1u8, 2, 3], Some("scan.png".to_string()), "en")
    }

    fn orchestrator(
        primary: &Arc<ScriptedEngine>,
        fallback: &Arc<ScriptedEngine>,
    ) -> OcrOrchestrator {
        OcrOrchestrator::new(
            primary.clone(),
            fallback.clone(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_primary_text_wins() {
        let primary = Arc::new(ScriptedEngine::text("paddleocr", "Invoice 42", 91.0));
        let fallback = Arc::new(ScriptedEngine::text("tesseract", "other", 50.0));

        let result = orchestrator(&primary, &fallback)
            .extract_with_failover(&request())
            .await;

        match result {
            ExtractionResult::Success { text, metadata } => {
                assert_eq!(text, "Invoice 42");
                assert_eq!(metadata.engine, "paddleocr");
                assert_eq!(metadata.fallback_used, None);
                assert_eq!(metadata.primary_engine, None);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_primary_is_never_called() {
        let primary = Arc::new(ScriptedEngine::unavailable("paddleocr"));
        let fallback = Arc::new(ScriptedEngine::text("tesseract", "from fallback", 70.0));

        let result = orchestrator(&primary, &fallback)
            .extract_with_failover(&request())
            .await;

        assert_eq!(primary.calls(), 0);
        assert_eq!(fallback.calls(), 1);
        match result {
            ExtractionResult::Success { metadata, .. } => {
                assert_eq!(metadata.engine, "tesseract");
                assert_eq!(metadata.fallback_used, Some(true));
                assert_eq!(metadata.primary_engine.as_deref(), Some("paddleocr"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_primary_falls_back_and_accepts_empty_fallback() {
        let primary = Arc::new(ScriptedEngine::text("paddleocr", "  \n ", 10.0));
        let fallback = Arc::new(ScriptedEngine::text("tesseract", "", 0.0));

        let result = orchestrator(&primary, &fallback)
            .extract_with_failover(&request())
            .await;

        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        match result {
            ExtractionResult::Success { text, metadata } => {
                assert!(text.is_empty());
                assert_eq!(metadata.fallback_used, Some(true));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_then_fallback_hello() {
        let primary = Arc::new(ScriptedEngine::failing(
            "paddleocr",
            "invalid image: format could not be determined",
        ));
        let fallback = Arc::new(ScriptedEngine::text("tesseract", "Hello", 87.5));

        let result = orchestrator(&primary, &fallback)
            .extract_with_failover(&request())
            .await;

        match result {
            ExtractionResult::Success { text, metadata } => {
                assert_eq!(text, "Hello");
                assert_eq!(metadata.confidence, 87.5);
                assert_eq!(metadata.fallback_used, Some(true));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_both_failed_names_both_engines() {
        let primary = Arc::new(ScriptedEngine::failing("paddleocr", "boom"));
        let fallback = Arc::new(ScriptedEngine::unavailable("tesseract"));

        let result = orchestrator(&primary, &fallback)
            .extract_with_failover(&request())
            .await;

        assert_eq!(fallback.calls(), 0);
        match result {
            ExtractionResult::Failure { error, engines } => {
                assert!(error.starts_with(BOTH_FAILED_MESSAGE));
                assert!(error.contains("paddleocr") && error.contains("tesseract"));
                assert_eq!(engines, vec!["paddleocr".to_string(), "tesseract".to_string()]);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_both_unavailable() {
        let primary = Arc::new(ScriptedEngine::unavailable("paddleocr"));
        let fallback = Arc::new(ScriptedEngine::unavailable("tesseract"));

        let result = orchestrator(&primary, &fallback)
            .extract_with_failover(&request())
            .await;

        assert!(!result.is_success());
        assert_eq!(primary.calls() + fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_hung_primary_times_out_into_fallback() {
        let primary = Arc::new(ScriptedEngine::new("paddleocr", true, Script::Hang));
        let fallback = Arc::new(ScriptedEngine::text("tesseract", "rescued", 60.0));
        let orchestrator = OcrOrchestrator::new(
            primary.clone(),
            fallback.clone(),
            Duration::from_millis(50),
        );

        let result = orchestrator.extract_with_failover(&request()).await;

        assert_eq!(primary.calls(), 1);
        match result {
            ExtractionResult::Success { text, metadata } => {
                assert_eq!(text, "rescued");
                assert_eq!(metadata.fallback_used, Some(true));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engine_status_is_independent_and_idempotent() {
        let primary = Arc::new(ScriptedEngine::unavailable("paddleocr"));
        let fallback = Arc::new(ScriptedEngine::text("tesseract", "x", 1.0));
        let orchestrator = orchestrator(&primary, &fallback);

        let first = orchestrator.engine_status();
        let second = orchestrator.engine_status();

        assert_eq!(first, second);
        assert!(!first.primary_engine.available);
        assert!(first.fallback_engine.available);
        assert_eq!(first.primary_engine.name, "paddleocr");
        assert_eq!(first.fallback_engine.supported_languages, vec!["en".to_string()]);
    }
}
