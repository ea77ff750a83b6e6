use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use reactor_core::{Config, SensorKind};
use tokio::sync::mpsc;

use crate::live::Hub;
use crate::metrics::RunnerMetrics;

/// Externally fed values for one tick, keyed by sensor.
pub type ExternalBatch = BTreeMap<SensorKind, f64>;

/// Shared by every HTTP handler. The pipeline itself is owned by the
/// tick runner; handlers only see the hub snapshot.
pub struct AppState {
    pub config: Config,
    pub hub: Arc<Hub>,
    pub metrics: Arc<RunnerMetrics>,
    pub ingest_tx: mpsc::Sender<ExternalBatch>,
    pub started_at: Instant,
}
