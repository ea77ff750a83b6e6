//! Tick runner counters.
//!
//! Written with relaxed atomics from the runner and its spawned alert
//! tasks; read as a point-in-time snapshot by `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct RunnerMetrics {
    pub ticks: AtomicU64,
    pub scoring_runs: AtomicU64,
    /// Cadences skipped because the previous batch was still in flight.
    pub scoring_skipped: AtomicU64,
    /// Batches whose results arrived too late and were discarded.
    pub scoring_overruns: AtomicU64,
    pub scoring_failures: AtomicU64,
    pub threshold_events: AtomicU64,
    pub model_events: AtomicU64,
    pub alerts_fired: AtomicU64,
    pub alert_failures: AtomicU64,
    pub external_accepted: AtomicU64,
    pub external_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub scoring_runs: u64,
    pub scoring_skipped: u64,
    pub scoring_overruns: u64,
    pub scoring_failures: u64,
    pub threshold_events: u64,
    pub model_events: u64,
    pub alerts_fired: u64,
    pub alert_failures: u64,
    pub external_accepted: u64,
    pub external_dropped: u64,
}

impl RunnerMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks: get(&self.ticks),
            scoring_runs: get(&self.scoring_runs),
            scoring_skipped: get(&self.scoring_skipped),
            scoring_overruns: get(&self.scoring_overruns),
            scoring_failures: get(&self.scoring_failures),
            threshold_events: get(&self.threshold_events),
            model_events: get(&self.model_events),
            alerts_fired: get(&self.alerts_fired),
            alert_failures: get(&self.alert_failures),
            external_accepted: get(&self.external_accepted),
            external_dropped: get(&self.external_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = RunnerMetrics::default();
        RunnerMetrics::incr(&metrics.ticks);
        RunnerMetrics::incr(&metrics.ticks);
        RunnerMetrics::add(&metrics.external_accepted, 3);
        RunnerMetrics::add(&metrics.external_dropped, 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.ticks, 2);
        assert_eq!(snap.external_accepted, 3);
        assert_eq!(snap.external_dropped, 0);
        assert_eq!(snap.alerts_fired, 0);
    }
}
