//! Keyword-matched answers about the current reactor state.
//!
//! No language model involved: the question is lowercased and matched
//! against a handful of keywords, and every match appends a sentence.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use reactor_core::{HealthStatus, SensorKind};
use serde::{Deserialize, Serialize};

use super::telemetry::ContextResponse;
use crate::state::AppState;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ChatResponse {
    pub answer: String,
}

/// Ask about the reactor
#[utoipa::path(
    post,
    path = "/chat",
    tag = "Chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Rule-based answer", body = ChatResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let snapshot = state.hub.snapshot().await;
    let ctx = ContextResponse::from_snapshot(&snapshot, state.hub.feed_state(&snapshot));
    Json(ChatResponse {
        answer: answer(&req.question, &ctx),
    })
}

fn value_of(ctx: &ContextResponse, kind: SensorKind) -> String {
    ctx.sensor(kind)
        .map(|s| s.value.to_string())
        .unwrap_or_else(|| "no data".to_string())
}

fn with_unit(ctx: &ContextResponse, kind: SensorKind) -> String {
    match ctx.sensor(kind) {
        Some(s) => format!("{}{}", s.value, s.unit),
        None => "not reported yet".to_string(),
    }
}

pub(crate) fn answer(question: &str, ctx: &ContextResponse) -> String {
    let q = question.to_lowercase();
    let status = ctx.core;
    let mut answer = String::new();

    if q.contains("status") || q.contains("how") {
        answer.push_str(&format!("The reactor core status is currently {status}. "));
    }
    if q.contains("temperature") {
        answer.push_str(&format!("Temperature is {}. ", with_unit(ctx, SensorKind::Temperature)));
    }
    if q.contains("pressure") {
        answer.push_str(&format!("Pressure is {}. ", with_unit(ctx, SensorKind::Pressure)));
    }
    if q.contains("anomaly") || q.contains("wrong") {
        if status == HealthStatus::Critical {
            answer.push_str("WARNING: Anomaly detected in the core zone! Check alerts.");
        } else {
            answer.push_str("No active anomalies detected.");
        }
    }

    if answer.is_empty() {
        answer = format!(
            "System is running. Core status: {status}. Temp: {}. Pressure: {}.",
            value_of(ctx, SensorKind::Temperature),
            value_of(ctx, SensorKind::Pressure)
        );
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::SensorPayload;
    use reactor_compute::{FeedState, ModelMode};

    fn ctx(core: HealthStatus) -> ContextResponse {
        ContextResponse {
            tick: 12,
            core,
            feed: FeedState::Live,
            model: ModelMode::Degraded { reason: "test".into() },
            sensors: vec![
                SensorPayload {
                    id: SensorKind::Temperature,
                    value: 25.3,
                    status: HealthStatus::Normal,
                    unit: "°C".into(),
                    tick: 12,
                },
                SensorPayload {
                    id: SensorKind::Pressure,
                    value: 9.1,
                    status: HealthStatus::Normal,
                    unit: "bar".into(),
                    tick: 12,
                },
            ],
            recent_anomalies: Vec::new(),
        }
    }

    #[test]
    fn status_question() {
        assert_eq!(
            answer("How is the reactor?", &ctx(HealthStatus::Normal)),
            "The reactor core status is currently normal. "
        );
    }

    #[test]
    fn matches_accumulate() {
        assert_eq!(
            answer("TEMPERATURE and pressure please", &ctx(HealthStatus::Normal)),
            "Temperature is 25.3°C. Pressure is 9.1bar. "
        );
    }

    #[test]
    fn anomaly_question_depends_on_twin() {
        assert_eq!(
            answer("anything wrong?", &ctx(HealthStatus::Critical)),
            "WARNING: Anomaly detected in the core zone! Check alerts."
        );
        assert_eq!(
            answer("any anomaly?", &ctx(HealthStatus::Warning)),
            "No active anomalies detected."
        );
    }

    #[test]
    fn fallback_summarises() {
        assert_eq!(
            answer("hello", &ctx(HealthStatus::Normal)),
            "System is running. Core status: normal. Temp: 25.3. Pressure: 9.1."
        );
    }

    #[test]
    fn missing_readings_are_reported() {
        let mut empty = ctx(HealthStatus::Normal);
        empty.sensors.clear();
        assert_eq!(answer("temperature", &empty), "Temperature is not reported yet. ");
        assert_eq!(
            answer("hi", &empty),
            "System is running. Core status: normal. Temp: no data. Pressure: no data."
        );
    }
}
