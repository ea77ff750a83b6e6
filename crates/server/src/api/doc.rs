//! OpenAPI documentation aggregator.
//!
//! Collects every `#[utoipa::path]` handler and `ToSchema` type into one
//! OpenAPI document, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "reactor telemetry API",
        version = "0.1.0",
        description = "Simulated reactor telemetry with rule and isolation-forest anomaly detection.",
    ),
    tags(
        (name = "Health", description = "Server health, runner counters, and configuration"),
        (name = "Telemetry", description = "Latest readings, twin state, anomaly history, and external readings"),
        (name = "Chat", description = "Keyword-matched answers about the current state"),
    ),
    paths(
        crate::api::health::health,
        crate::api::health::metrics,
        crate::api::health::config_summary,
        crate::api::telemetry::sensors,
        crate::api::telemetry::twin,
        crate::api::telemetry::anomalies,
        crate::api::telemetry::context,
        crate::api::ingest::ingest_readings,
        crate::api::chat::chat,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::health::HealthResponse,
        crate::metrics::MetricsSnapshot,
        crate::api::telemetry::SensorsResponse,
        crate::api::telemetry::TwinResponse,
        crate::api::telemetry::AnomaliesResponse,
        crate::api::telemetry::ContextResponse,
        crate::api::ingest::IngestResponse,
        crate::api::chat::ChatRequest,
        crate::api::chat::ChatResponse,
        crate::live::LiveMessage,
        crate::live::MessageType,
        crate::live::SensorPayload,
        crate::live::AnomalyPayload,
    ))
)]
pub struct ApiDoc;
