//! JSON envelopes returned by the HTTP API.

use serde::Serialize;

/// Successful response wrapper: `{"status": "success", "data": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub ocr_extract: &'static str,
    pub ocr_status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}
