//! Device information HTTP API.
//!
//! - GET /health
//! - GET /v1/devices/{index}
//! - GET /v1/devices/{index}/capability
//! - GET /metrics
//!
//! Device indices in paths are logical indices. Platform calls may block in
//! the management library, so each one runs on the blocking thread pool.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::task::JoinError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::gpu::device::{ComputeCapability, DeviceIdentifier};
use crate::platform::{Platform, PlatformError, PlatformKind};

/// Application state shared across handlers.
pub struct AppState {
    pub platform: Arc<dyn Platform>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/devices/{index}", get(device_info))
        .route("/v1/devices/{index}/capability", get(device_capability))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub platform: PlatformKind,
    pub uptime_secs: u64,
}

/// Compute capability response.
#[derive(Debug, Serialize)]
pub struct CapabilityResponse {
    pub major: u32,
    pub minor: u32,
    pub version: String,
}

impl From<ComputeCapability> for CapabilityResponse {
    fn from(cap: ComputeCapability) -> Self {
        Self {
            major: cap.major,
            minor: cap.minor,
            version: cap.to_string(),
        }
    }
}

/// Per-device information response.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub logical_index: u32,
    pub physical_id: DeviceIdentifier,
    /// Absent for devices NVML cannot open by handle (e.g. MIG slices).
    pub name: Option<String>,
    pub capability: CapabilityResponse,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        let status = match &err {
            PlatformError::IndexOutOfRange(_) | PlatformError::DeviceNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PlatformError::LibraryInit(_) => StatusCode::SERVICE_UNAVAILABLE,
            PlatformError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            PlatformError::Query { .. } | PlatformError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        error!(error = %err, "Blocking platform call failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        platform: state.platform.kind(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn device_capability(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> Result<Json<CapabilityResponse>, ApiError> {
    let platform = state.platform.clone();
    let cap = tokio::task::spawn_blocking(move || platform.get_device_capability(index)).await??;
    Ok(Json(cap.into()))
}

async fn device_info(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let platform = state.platform.clone();
    let response = tokio::task::spawn_blocking(move || -> Result<DeviceResponse, PlatformError> {
        // Translate once so every field describes the same physical device.
        let physical_id = platform.physical_device_id(index)?;
        let capability = platform.physical_device_capability(&physical_id)?;
        let name = match platform.physical_device_name(&physical_id) {
            Ok(name) => Some(name),
            Err(e) => {
                debug!(device = %physical_id, error = %e, "Device name unavailable");
                None
            }
        };
        Ok(DeviceResponse {
            logical_index: index,
            physical_id,
            name,
            capability: capability.into(),
        })
    })
    .await??;
    Ok(Json(response))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(metrics) = state.platform.metrics() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
