//! Notifier trait definition and shared error types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reactor_core::{HealthStatus, SensorKind};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint rejected notification: {0}")]
    Rejected(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A rendered status-transition notification ready for delivery.
///
/// Serialized as-is for webhook payloads.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub sensor: SensorKind,
    pub previous_status: HealthStatus,
    pub new_status: HealthStatus,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// The rendered subject/title.
    pub subject: String,
    /// The rendered body content.
    pub body: String,
    /// Additional metadata (e.g., tick, unit).
    pub metadata: HashMap<String, String>,
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of dispatching a notification to a single channel.
#[derive(Debug)]
pub struct DispatchResult {
    pub channel: String,
    pub sensor: SensorKind,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
