//! Pipeline context.
//!
//! One value owning every stage: the simulator owns the walk state, the
//! detector owns the windows and the model, the pipeline owns the
//! anomaly history and the derived twin. The tick runner drives it; no
//! stage reaches into shared globals.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reactor_core::{AnomalyEvent, Config, SensorKind, SensorReading, TwinState};
use serde::Serialize;
use tracing::debug;

use crate::detector::{Detector, ModelVerdict, ScoringBatch};
use crate::history::AnomalyHistory;
use crate::model::OutlierModel;
use crate::simulator::Simulator;
use crate::twin::derive_twin;

/// Liveness of the telemetry feed as seen by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    /// No tick has completed yet.
    AwaitingData,
    Live,
    /// Ticks stopped arriving.
    Stale,
}

impl FeedState {
    /// Stale once more than `stale_after` tick periods have passed
    /// since the last completed tick.
    pub fn from_last_tick(
        last_tick_at: Option<Instant>,
        now: Instant,
        period: Duration,
        stale_after: u32,
    ) -> Self {
        // An unrepresentable limit means the feed can never go stale.
        let limit = period.checked_mul(stale_after.max(1)).unwrap_or(Duration::MAX);
        match last_tick_at {
            None => FeedState::AwaitingData,
            Some(at) if now.saturating_duration_since(at) > limit => FeedState::Stale,
            Some(_) => FeedState::Live,
        }
    }
}

/// Everything one tick produced.
#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    pub readings: Vec<SensorReading>,
    /// Threshold events raised this tick.
    pub anomalies: Vec<AnomalyEvent>,
    pub twin: TwinState,
    /// Set on scoring cadence ticks when at least one window is warm.
    pub batch: Option<ScoringBatch>,
}

/// Outcome of folding one scoring cycle back in.
#[derive(Debug)]
pub struct ScoringReport {
    pub tick: u64,
    pub anomalies: Vec<AnomalyEvent>,
    pub twin: TwinState,
}

pub struct Pipeline {
    simulator: Simulator,
    detector: Detector,
    history: AnomalyHistory,
    twin: TwinState,
    latest: BTreeMap<SensorKind, SensorReading>,
    critical_cutoff: f64,
    scoring_every: u64,
    tick: u64,
    last_tick_at: Option<Instant>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        model: Option<Arc<dyn OutlierModel>>,
        degraded_reason: Option<String>,
    ) -> Self {
        let p = &config.pipeline;
        let specs = config.sensors.specs.clone();
        Self {
            detector: Detector::new(
                &specs,
                p.window_size,
                p.score_threshold,
                model,
                degraded_reason,
            ),
            simulator: Simulator::new(specs, p.spike_probability, p.seed),
            history: AnomalyHistory::new(p.history_cap),
            twin: TwinState::default(),
            latest: BTreeMap::new(),
            critical_cutoff: p.critical_severity,
            scoring_every: p.scoring_every.max(1),
            tick: 0,
            last_tick_at: None,
        }
    }

    /// Advance one tick. `external` values replace the simulated ones for
    /// their sensors.
    pub fn tick(&mut self, external: &BTreeMap<SensorKind, f64>) -> TickReport {
        self.tick += 1;
        let tick = self.tick;

        let readings = self.simulator.step(tick, external);
        let anomalies: Vec<AnomalyEvent> = readings
            .iter()
            .filter_map(|r| self.detector.observe(r))
            .collect();
        self.history.extend(anomalies.iter().cloned());
        self.twin = derive_twin(&self.detector.active_events(), self.critical_cutoff);

        for reading in &readings {
            self.latest.insert(reading.sensor, reading.clone());
        }
        self.last_tick_at = Some(Instant::now());

        let batch = if tick % self.scoring_every == 0 {
            self.detector.prepare_batch(tick)
        } else {
            None
        };
        if !anomalies.is_empty() {
            debug!(tick, count = anomalies.len(), twin = %self.twin.core, "threshold anomalies");
        }

        TickReport {
            tick,
            readings,
            anomalies,
            twin: self.twin,
            batch,
        }
    }

    /// Fold the verdicts of the batch prepared at `batch_tick` back in.
    pub fn apply_scoring(&mut self, batch_tick: u64, verdicts: Vec<ModelVerdict>) -> ScoringReport {
        let anomalies = self.detector.apply_verdicts(batch_tick, verdicts);
        self.history.extend(anomalies.iter().cloned());
        self.twin = derive_twin(&self.detector.active_events(), self.critical_cutoff);
        ScoringReport {
            tick: batch_tick,
            anomalies,
            twin: self.twin,
        }
    }

    pub fn feed_state(&self, now: Instant, period: Duration, stale_after: u32) -> FeedState {
        FeedState::from_last_tick(self.last_tick_at, now, period, stale_after)
    }

    pub fn last_tick_at(&self) -> Option<Instant> {
        self.last_tick_at
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn twin(&self) -> TwinState {
        self.twin
    }

    pub fn history(&self) -> &AnomalyHistory {
        &self.history
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Latest reading per sensor, in sensor order.
    pub fn latest_readings(&self) -> Vec<SensorReading> {
        self.latest.values().cloned().collect()
    }

    pub fn active_events(&self) -> Vec<AnomalyEvent> {
        self.detector.active_events()
    }
}
