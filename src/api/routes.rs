//! API route table
//!
//! - /health - liveness
//! - /api/v1/status - engine status and every unit
//! - /api/v1/units/:name - one unit
//! - /api/v1/activity - activity feed
//! - /api/v1/units/:name/action - fault injection and heal
//! - /api/v1/units/:name/load - external load signal
//! - /api/v1/services/:name/scale - operator scale

use axum::{routing::{get, post}, Router};

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/activity", get(handlers::get_activity))
        .route("/units/:name", get(handlers::get_unit))
        .route("/units/:name/action", post(handlers::post_unit_action))
        .route("/units/:name/load", post(handlers::post_unit_load))
        .route("/services/:name/scale", post(handlers::post_service_scale))
        .with_state(state)
}

/// Liveness endpoint at root level
pub fn liveness_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .with_state(state)
}
