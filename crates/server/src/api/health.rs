//! Health, runner metrics, and configuration endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use reactor_compute::{FeedState, ModelMode};
use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when running threshold rules only.
    pub status: &'static str,
    pub version: &'static str,
    #[schema(value_type = String)]
    pub feed: FeedState,
    #[schema(value_type = Object)]
    pub model: ModelMode,
    pub viewers: usize,
    pub tick: u64,
    pub uptime_secs: u64,
}

/// Server health
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Server health, feed state, and model mode", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.hub.snapshot().await;
    Json(HealthResponse {
        status: if snapshot.model_mode.is_active() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        feed: state.hub.feed_state(&snapshot),
        model: snapshot.model_mode,
        viewers: state.hub.viewer_count(),
        tick: snapshot.tick,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Tick runner counters
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Health",
    responses(
        (status = 200, description = "Runner counters since startup", body = MetricsSnapshot)
    )
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Active configuration
///
/// The webhook URL is never included.
#[utoipa::path(
    get,
    path = "/config",
    tag = "Health",
    responses(
        (status = 200, description = "Redacted configuration summary", body = Object)
    )
)]
pub async fn config_summary(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.config.redacted_summary())
}
