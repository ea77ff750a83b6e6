//! HTTP API endpoint modules.
//!
//! Handlers read the hub snapshot; only `POST /readings` writes, and it
//! goes through the runner's ingest queue.

mod chat;
pub mod doc;
mod health;
mod ingest;
mod telemetry;

use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

// ── Re-exports ───────────────────────────────────────────────────

pub use chat::chat;
pub use health::{config_summary, health, metrics};
pub use ingest::ingest_readings;
pub use telemetry::{anomalies, context, sensors, twin};
