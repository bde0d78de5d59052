//! API handlers
//!
//! Every handler returns a [`Response`] built with [`ApiResponse::ok`] or
//! one of the [`ApiErrorResponse`] constructors. Operator commands go
//! through the engine so they take the same per-unit lock as the poll loop.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::activity::FeedQuery;
use crate::engine::{CommandError, Engine, TriggerMode};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub runtime_reachable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionRequest {
    pub mode: TriggerMode,
    #[serde(default)]
    pub escalate: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadRequest {
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub replicas: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAccepted {
    pub unit: String,
    pub value: f64,
}

fn command_error(err: CommandError) -> Response {
    match err {
        CommandError::UnitNotFound(_) => ApiErrorResponse::not_found(err.to_string()),
        CommandError::Busy(_) => ApiErrorResponse::conflict(err.to_string()),
        CommandError::InvalidArgument(_) => ApiErrorResponse::bad_request(err.to_string()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn liveness(State(state): State<ApiState>) -> Response {
    let status = state.engine.status();
    ApiResponse::ok(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        runtime_reachable: status.runtime_reachable,
    })
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.status().as_ref())
}

/// GET /api/v1/units/:name
pub async fn get_unit(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.engine.unit_status(&name) {
        Some(unit) => ApiResponse::ok(unit),
        None => ApiErrorResponse::not_found(format!("unit not found: {name}")),
    }
}

/// GET /api/v1/activity?limit=N&since=RFC3339
pub async fn get_activity(
    State(state): State<ApiState>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };
    ApiResponse::ok(state.engine.feed(&query))
}

/// POST /api/v1/units/:name/action
pub async fn post_unit_action(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };
    if request.escalate && request.mode != TriggerMode::Heal {
        return ApiErrorResponse::bad_request("escalate only applies to mode \"heal\"");
    }

    info!(unit = %name, mode = %request.mode, escalate = request.escalate, "Operator action requested");
    match state.engine.trigger_action(&name, request.mode, request.escalate).await {
        Ok(result) => ApiResponse::ok(result),
        Err(e) => command_error(e),
    }
}

/// POST /api/v1/units/:name/load
pub async fn post_unit_load(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<LoadRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };
    match state.engine.report_load(&name, request.value).await {
        Ok(unit) => ApiResponse::ok(LoadAccepted {
            unit: unit.name,
            value: request.value,
        }),
        Err(e) => command_error(e),
    }
}

/// POST /api/v1/services/:name/scale
pub async fn post_service_scale(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ScaleRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };

    info!(service = %name, replicas = request.replicas, "Operator scale requested");
    match state.engine.scale_service(&name, request.replicas).await {
        Ok(outcome) => ApiResponse::ok(outcome),
        Err(e) => command_error(e),
    }
}
