//! REST API module using Axum
//!
//! Read access to the engine's status board and activity feed, plus the
//! operator commands (fault injection, heal, load, scale).

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use std::sync::Arc;

/// Comma-separated list of allowed cross-origin callers.
pub const CORS_ORIGINS_ENV: &str = "SENTINEL_CORS_ORIGINS";

/// Same-origin only unless [`CORS_ORIGINS_ENV`] is set.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::liveness_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}

/// Router over a shared engine.
pub fn app_for(engine: Arc<Engine>) -> Router {
    create_app(ApiState::new(engine))
}
