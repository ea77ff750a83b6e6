//! External reading ingestion.
//!
//! Each entry is validated on its own; bad entries are reported and
//! dropped without rejecting the rest of the request. Accepted values
//! replace the simulated ones on the next tick.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use reactor_core::SensorKind;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::ErrorResponse;
use crate::metrics::RunnerMetrics;
use crate::state::{AppState, ExternalBatch};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct IngestResponse {
    pub accepted: usize,
    pub dropped: usize,
    /// One message per dropped entry, prefixed with its index.
    pub errors: Vec<String>,
}

/// Validate a single `{id, value}` entry.
fn parse_entry(entry: &serde_json::Value) -> Result<(SensorKind, f64), String> {
    let obj = entry.as_object().ok_or("expected an object")?;
    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or("missing string field `id`")?;
    let sensor: SensorKind = id.parse().map_err(|e: reactor_core::ReactorError| e.to_string())?;
    let value = obj
        .get("value")
        .and_then(|v| v.as_f64())
        .ok_or("missing numeric field `value`")?;
    if !value.is_finite() {
        return Err("value is not finite".to_string());
    }
    Ok((sensor, value))
}

pub(crate) fn parse_batch(entries: &[serde_json::Value]) -> (ExternalBatch, Vec<String>) {
    let mut batch = ExternalBatch::new();
    let mut errors = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Ok((sensor, value)) => {
                batch.insert(sensor, value);
            }
            Err(e) => errors.push(format!("[{idx}] {e}")),
        }
    }
    (batch, errors)
}

/// Feed readings from outside
///
/// Body is a JSON array of `{ "id": "<sensor>", "value": <number> }`.
/// When the same sensor appears twice, the later entry wins.
#[utoipa::path(
    post,
    path = "/readings",
    tag = "Telemetry",
    request_body(content = Vec<Object>, description = "Readings as `[{id, value}]`"),
    responses(
        (status = 202, description = "Valid entries queued for the next tick", body = IngestResponse),
        (status = 503, description = "Ingest queue full", body = ErrorResponse)
    )
)]
pub async fn ingest_readings(
    State(state): State<Arc<AppState>>,
    Json(entries): Json<Vec<serde_json::Value>>,
) -> Result<(StatusCode, Json<IngestResponse>), (StatusCode, Json<ErrorResponse>)> {
    let (batch, errors) = parse_batch(&entries);
    let dropped = errors.len();
    let accepted = entries.len() - dropped;
    if !errors.is_empty() {
        debug!(dropped = errors.len(), "malformed readings dropped");
    }

    if !batch.is_empty() {
        match state.ingest_tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                RunnerMetrics::add(&state.metrics.external_dropped, entries.len() as u64);
                warn!(entries = entries.len(), "ingest queue unavailable; readings dropped");
                return Err((
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorResponse {
                        error: "ingest queue is full, retry on the next tick".to_string(),
                    }),
                ));
            }
        }
    }

    RunnerMetrics::add(&state.metrics.external_accepted, accepted as u64);
    RunnerMetrics::add(&state.metrics.external_dropped, dropped as u64);
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            accepted,
            dropped,
            errors,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn good_entries_survive_bad_neighbours() {
        let entries = vec![
            json!({"id": "ph", "value": 5.5}),
            json!({"id": "neutron_flux", "value": 1.0}),
            json!({"id": "flow"}),
            json!("pressure"),
            json!({"id": "Temperature", "value": 30}),
        ];
        let (batch, errors) = parse_batch(&entries);
        assert_eq!(batch.get(&SensorKind::Ph), Some(&5.5));
        assert_eq!(batch.get(&SensorKind::Temperature), Some(&30.0));
        assert_eq!(batch.len(), 2);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("[1]"));
    }

    #[test]
    fn duplicate_sensor_keeps_last() {
        let entries = vec![
            json!({"id": "flow", "value": 4.0}),
            json!({"id": "flow", "value": 6.0}),
        ];
        let (batch, errors) = parse_batch(&entries);
        assert!(errors.is_empty());
        assert_eq!(batch.get(&SensorKind::Flow), Some(&6.0));
    }
}
