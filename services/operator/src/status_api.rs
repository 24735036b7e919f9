//! Status reporting service.
//!
//! Serves the live status of tracked environments to the CLI and other
//! watchers:
//!
//! - `GET /healthz`: liveness
//! - `GET /v1/environments/{namespace}/{name}/status`: tracked status

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use kiln_reconcile::{StatusTracker, TrackingInfo, TrackingKey};
use serde::Serialize;
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Tracked status of one environment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub namespace: String,
    pub name: String,

    #[serde(flatten)]
    pub info: TrackingInfo,

    /// The most recent pass moved to a new stage.
    pub changed: bool,

    pub deployed: bool,

    /// Still moving toward the requested revision.
    pub converging: bool,

    pub failed: bool,
}

impl StatusResponse {
    fn new(key: TrackingKey, info: TrackingInfo) -> Self {
        Self {
            namespace: key.namespace,
            name: key.name,
            changed: info.has_changed(),
            deployed: info.is_deployed(),
            converging: info.is_converging(),
            failed: info.is_failed(),
            info,
        }
    }
}

/// Problem details body for error responses.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
}

/// Error response of the status service.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    problem: ProblemDetails,
}

impl ApiError {
    pub fn not_found(code: impl Into<String>, detail: impl Into<String>) -> Self {
        let status = StatusCode::NOT_FOUND;
        let code = code.into();
        Self {
            status,
            problem: ProblemDetails {
                r#type: format!("https://kiln.dev/problems/{code}"),
                title: status.canonical_reason().unwrap_or("Unknown Error").to_string(),
                status: status.as_u16(),
                detail: detail.into(),
                code,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.problem)).into_response()
    }
}

/// Create the status router.
pub fn create_router(tracker: Arc<StatusTracker>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/v1/environments/{namespace}/{name}/status",
            get(environment_status),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(tracker)
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "kiln-operator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn environment_status(
    State(tracker): State<Arc<StatusTracker>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let key = TrackingKey::new(namespace, name);
    match tracker.get(&key) {
        Some(info) => Ok(Json(StatusResponse::new(key, info))),
        None => Err(ApiError::not_found(
            "environment_not_tracked",
            format!("environment {key} is not tracked"),
        )),
    }
}
