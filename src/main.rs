//! OCR Failover - image text extraction service with primary/fallback OCR engines.

mod config;
mod ocr;
mod orchestrator;
mod schema;
mod service;

use axum::{
    extract::{rejection::QueryRejection, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::ServiceConfig;
use orchestrator::{EnginesStatus, OcrOrchestrator};
use schema::{ApiResponse, Endpoints, HealthReport, ServiceInfo};
use service::{ExtractResponse, OcrService, ServiceError, UploadedFile};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "ocr-service";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Headroom above the upload limit for multipart framing, so oversized files
/// still reach validation and get a descriptive 413.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<OcrService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_failover=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        "Engines: primary={}, fallback={}, max upload {} bytes, timeout {:?}",
        config.primary_engine, config.fallback_engine, config.max_upload_bytes, config.engine_timeout
    );
    if config.primary_engine == config.fallback_engine {
        warn!("Primary and fallback are both {}", config.primary_engine);
    }

    // Engines are built once and shared read-only across requests
    let client = reqwest::Client::new();
    let primary = ocr::build_engine(config.primary_engine, &config, &client).await;
    let fallback = ocr::build_engine(config.fallback_engine, &config, &client).await;
    let orchestrator = OcrOrchestrator::new(primary, fallback, config.engine_timeout);

    let state = AppState {
        service: Arc::new(OcrService::new(orchestrator, &config)),
    };
    let app = build_router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let body_limit = state.service.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ocr/extract", post(extract_text))
        .route("/ocr/status", get(engine_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "OCR Service",
        status: "running",
        version: VERSION,
        endpoints: Endpoints {
            health: "/health",
            ocr_extract: "/ocr/extract",
            ocr_status: "/ocr/status",
        },
    })
}

/// Health check endpoint.
async fn health() -> Json<HealthReport> {
    Json(HealthReport {
        status: "healthy",
        service: SERVICE_NAME,
        version: VERSION,
    })
}

#[derive(serde::Deserialize)]
struct ExtractQuery {
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// Upload an image and extract its text.
async fn extract_text(
    State(state): State<AppState>,
    query: Result<Query<ExtractQuery>, QueryRejection>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ExtractResponse>>, ServiceError> {
    let Query(query) =
        query.map_err(|e| ServiceError::InvalidUpload(format!("Invalid query: {}", e.body_text())))?;
    let upload = read_upload(&mut multipart, state.service.max_upload_bytes()).await?;
    let response = state
        .service
        .extract_from_upload(upload, &query.language)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Report availability of both engines.
async fn engine_status(State(state): State<AppState>) -> Json<ApiResponse<EnginesStatus>> {
    Json(ApiResponse::success(state.service.engine_status()))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Buffer the `file` field of a multipart upload.
async fn read_upload(
    multipart: &mut Multipart,
    max_upload_bytes: usize,
) -> Result<UploadedFile, ServiceError> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServiceError::FileTooLarge {
                max_bytes: max_upload_bytes,
            }
        } else {
            ServiceError::InvalidUpload(format!("Multipart error: {}", e))
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(multipart_error)?.to_vec();
            return Ok(UploadedFile { filename, data });
        }
    }

    Err(ServiceError::InvalidUpload("No file uploaded".to_string()))
}
