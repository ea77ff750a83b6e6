//! Read-only telemetry endpoints backed by the live snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use reactor_compute::{FeedState, ModelMode, SensorPhase};
use reactor_core::{AnomalyEvent, HealthStatus, SensorKind};
use serde::{Deserialize, Serialize};

use crate::live::{AnomalyPayload, LiveSnapshot, SensorPayload};
use crate::state::AppState;

const DEFAULT_ANOMALY_LIMIT: usize = 20;
const CONTEXT_ANOMALIES: usize = 10;

// ── Query params ────────────────────────────────────────────────

#[derive(Deserialize, utoipa::IntoParams)]
pub struct AnomalyQueryParams {
    /// Maximum number of events to return (default 20, capped by `HISTORY_CAP`).
    pub limit: Option<usize>,
}

// ── Response types ──────────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct SensorsResponse {
    pub tick: u64,
    #[schema(value_type = String)]
    pub feed: FeedState,
    pub sensors: Vec<SensorPayload>,
    #[schema(value_type = Object)]
    pub phases: BTreeMap<SensorKind, SensorPhase>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct TwinResponse {
    #[schema(value_type = String)]
    pub core: HealthStatus,
    #[schema(value_type = String)]
    pub feed: FeedState,
    pub tick: u64,
    /// Events currently contributing to the twin state.
    pub active: Vec<AnomalyPayload>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AnomaliesResponse {
    pub count: usize,
    #[schema(value_type = Vec<Object>)]
    pub anomalies: Vec<AnomalyEvent>,
}

/// Everything a question-answering front end needs, in one read.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ContextResponse {
    pub tick: u64,
    #[schema(value_type = String)]
    pub core: HealthStatus,
    #[schema(value_type = String)]
    pub feed: FeedState,
    #[schema(value_type = Object)]
    pub model: ModelMode,
    pub sensors: Vec<SensorPayload>,
    pub recent_anomalies: Vec<AnomalyPayload>,
}

impl ContextResponse {
    pub fn from_snapshot(snapshot: &LiveSnapshot, feed: FeedState) -> Self {
        Self {
            tick: snapshot.tick,
            core: snapshot.twin.core,
            feed,
            model: snapshot.model_mode.clone(),
            sensors: snapshot.readings.iter().map(SensorPayload::from).collect(),
            recent_anomalies: snapshot
                .recent
                .iter()
                .take(CONTEXT_ANOMALIES)
                .map(AnomalyPayload::from)
                .collect(),
        }
    }

    pub fn sensor(&self, kind: SensorKind) -> Option<&SensorPayload> {
        self.sensors.iter().find(|s| s.id == kind)
    }
}

// ── Handlers ────────────────────────────────────────────────────

/// Latest reading per sensor
#[utoipa::path(
    get,
    path = "/sensors",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Latest readings and detector phases", body = SensorsResponse)
    )
)]
pub async fn sensors(State(state): State<Arc<AppState>>) -> Json<SensorsResponse> {
    let snapshot = state.hub.snapshot().await;
    Json(SensorsResponse {
        tick: snapshot.tick,
        feed: state.hub.feed_state(&snapshot),
        sensors: snapshot.readings.iter().map(SensorPayload::from).collect(),
        phases: snapshot.phases,
    })
}

/// Current twin state
#[utoipa::path(
    get,
    path = "/twin",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Aggregated reactor health", body = TwinResponse)
    )
)]
pub async fn twin(State(state): State<Arc<AppState>>) -> Json<TwinResponse> {
    let snapshot = state.hub.snapshot().await;
    Json(TwinResponse {
        core: snapshot.twin.core,
        feed: state.hub.feed_state(&snapshot),
        tick: snapshot.tick,
        active: snapshot.active.iter().map(AnomalyPayload::from).collect(),
    })
}

/// Recent anomaly events, newest first
#[utoipa::path(
    get,
    path = "/anomalies",
    tag = "Telemetry",
    params(AnomalyQueryParams),
    responses(
        (status = 200, description = "Bounded anomaly history", body = AnomaliesResponse)
    )
)]
pub async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnomalyQueryParams>,
) -> Json<AnomaliesResponse> {
    let snapshot = state.hub.snapshot().await;
    let limit = params.limit.unwrap_or(DEFAULT_ANOMALY_LIMIT);
    let anomalies: Vec<AnomalyEvent> = snapshot.recent.into_iter().take(limit).collect();
    Json(AnomaliesResponse {
        count: anomalies.len(),
        anomalies,
    })
}

/// Read-only context for question answering
#[utoipa::path(
    get,
    path = "/context",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Twin, sensors, and recent anomalies", body = ContextResponse)
    )
)]
pub async fn context(State(state): State<Arc<AppState>>) -> Json<ContextResponse> {
    let snapshot = state.hub.snapshot().await;
    let feed = state.hub.feed_state(&snapshot);
    Json(ContextResponse::from_snapshot(&snapshot, feed))
}
