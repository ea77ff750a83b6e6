//! HTTP router construction.
//!
//! Assembles the Axum routes, CORS, and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::state::AppState;
use crate::{api, live};

fn cors_layer(origin: &str) -> CorsLayer {
    if origin.trim() == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            tracing::warn!(
                origin,
                error = %e,
                "invalid CORS_ORIGIN; cross-origin requests disabled"
            );
            CorsLayer::new()
        }
    }
}

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .route("/ws", get(live::ws_upgrade))
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .route("/config", get(api::config_summary))
        .route("/sensors", get(api::sensors))
        .route("/twin", get(api::twin))
        .route("/anomalies", get(api::anomalies))
        .route("/context", get(api::context))
        .route("/chat", post(api::chat))
        .route("/readings", post(api::ingest_readings))
        .layer(cors)
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}
