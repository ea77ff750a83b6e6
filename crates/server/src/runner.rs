//! Tick runner.
//!
//! One task owns the [`Pipeline`] and drives it from a tokio interval.
//! Model scoring runs on the blocking pool and reports back over an mpsc
//! channel, so a slow scoring cycle never delays the next tick. Alert
//! delivery runs on spawned tasks for the same reason.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reactor_compute::{score_batch, FeedState, ModelVerdict, Pipeline, ScoringBatch};
use reactor_core::{AnomalyEvent, SensorReading, TwinState};
use reactor_notify::{Alerter, EdgeTrigger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::live::{Hub, LiveMessage, MessageType};
use crate::metrics::RunnerMetrics;
use crate::state::ExternalBatch;

/// Result of one off-thread scoring cycle.
#[derive(Debug)]
pub struct ScoringOutcome {
    pub batch_tick: u64,
    pub result: Result<Vec<ModelVerdict>, String>,
    pub elapsed: Duration,
}

pub struct Runner {
    pipeline: Pipeline,
    hub: Arc<Hub>,
    alerter: Arc<Alerter>,
    metrics: Arc<RunnerMetrics>,
    edges: EdgeTrigger,
    ingest_rx: mpsc::Receiver<ExternalBatch>,
    period: Duration,
    history_cap: usize,
    in_flight: bool,
}

impl Runner {
    pub fn new(
        pipeline: Pipeline,
        hub: Arc<Hub>,
        alerter: Arc<Alerter>,
        metrics: Arc<RunnerMetrics>,
        ingest_rx: mpsc::Receiver<ExternalBatch>,
        period: Duration,
        history_cap: usize,
    ) -> Self {
        Self {
            pipeline,
            hub,
            alerter,
            metrics,
            edges: EdgeTrigger::new(),
            ingest_rx,
            period,
            history_cap,
            in_flight: false,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (scored_tx, mut scored_rx) = mpsc::channel::<ScoringOutcome>(4);

        info!(
            period_ms = self.period.as_millis() as u64,
            model = self.pipeline.detector().model_mode().is_active(),
            alerts = self.alerter.is_enabled(),
            "tick runner started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(&scored_tx).await,
                Some(outcome) = scored_rx.recv() => self.finish_scoring(outcome).await,
            }
        }
    }

    /// Advance the pipeline one tick and publish the result.
    pub async fn tick(&mut self, scored_tx: &mpsc::Sender<ScoringOutcome>) {
        let external = self.drain_ingest();
        let report = self.pipeline.tick(&external);

        RunnerMetrics::incr(&self.metrics.ticks);
        RunnerMetrics::add(&self.metrics.threshold_events, report.anomalies.len() as u64);
        debug!(tick = report.tick, external = external.len(), twin = %report.twin.core, "tick");

        self.refresh_snapshot().await;
        self.broadcast(MessageType::SensorUpdate, &report.readings, report.twin, &report.anomalies);
        self.raise_alerts(&report.readings);

        if let Some(batch) = report.batch {
            self.start_scoring(batch, scored_tx);
        }
    }

    /// Latest external values win when several batches arrived since the
    /// last tick.
    fn drain_ingest(&mut self) -> ExternalBatch {
        let mut merged = ExternalBatch::new();
        while let Ok(batch) = self.ingest_rx.try_recv() {
            merged.extend(batch);
        }
        merged
    }

    fn start_scoring(&mut self, batch: ScoringBatch, scored_tx: &mpsc::Sender<ScoringOutcome>) {
        if self.in_flight {
            RunnerMetrics::incr(&self.metrics.scoring_skipped);
            warn!(tick = batch.tick, "previous scoring batch still running; cadence skipped");
            return;
        }
        let Some(model) = self.pipeline.detector().model() else {
            return;
        };

        self.in_flight = true;
        RunnerMetrics::incr(&self.metrics.scoring_runs);
        let tx = scored_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let batch_tick = batch.tick;
            let result = tokio::task::spawn_blocking(move || score_batch(model.as_ref(), &batch))
                .await
                .map_err(|e| e.to_string());
            let outcome = ScoringOutcome {
                batch_tick,
                result,
                elapsed: started.elapsed(),
            };
            if tx.send(outcome).await.is_err() {
                debug!(batch_tick, "runner gone; scoring result dropped");
            }
        });
    }

    /// Fold a finished scoring cycle back into the pipeline. Results that
    /// took longer than one tick period are discarded.
    pub async fn finish_scoring(&mut self, outcome: ScoringOutcome) {
        self.in_flight = false;

        let verdicts = match outcome.result {
            Ok(v) => v,
            Err(e) => {
                RunnerMetrics::incr(&self.metrics.scoring_failures);
                warn!(batch_tick = outcome.batch_tick, error = %e, "scoring task failed");
                return;
            }
        };
        if outcome.elapsed > self.period {
            RunnerMetrics::incr(&self.metrics.scoring_overruns);
            warn!(
                batch_tick = outcome.batch_tick,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "scoring overran the tick period; results discarded"
            );
            return;
        }

        let report = self.pipeline.apply_scoring(outcome.batch_tick, verdicts);
        RunnerMetrics::add(&self.metrics.model_events, report.anomalies.len() as u64);
        self.refresh_snapshot().await;

        if !report.anomalies.is_empty() {
            info!(
                batch_tick = report.tick,
                count = report.anomalies.len(),
                twin = %report.twin.core,
                "model anomalies"
            );
            self.broadcast(MessageType::Anomaly, &[], report.twin, &report.anomalies);
        }
    }

    async fn refresh_snapshot(&self) {
        let p = &self.pipeline;
        let readings = p.latest_readings();
        let active = p.active_events();
        let recent = p.history().recent(self.history_cap);
        let model_mode = p.detector().model_mode().clone();
        let phases = p.detector().phases().clone();
        let (tick, twin, last_tick_at) = (p.current_tick(), p.twin(), p.last_tick_at());

        self.hub
            .update(move |s| {
                s.tick = tick;
                s.readings = readings;
                s.twin = twin;
                s.active = active;
                s.recent = recent;
                s.model_mode = model_mode;
                s.phases = phases;
                s.last_tick_at = last_tick_at;
            })
            .await;
    }

    fn broadcast(
        &self,
        msg_type: MessageType,
        readings: &[SensorReading],
        twin: TwinState,
        anomalies: &[AnomalyEvent],
    ) {
        let message =
            LiveMessage::new(msg_type, readings, twin, anomalies).with_feed(FeedState::Live);
        self.hub.publish(&message);
    }

    fn raise_alerts(&mut self, readings: &[SensorReading]) {
        for reading in readings {
            let Some(transition) = self.edges.observe_reading(reading) else {
                continue;
            };
            RunnerMetrics::incr(&self.metrics.alerts_fired);
            info!(
                sensor = %transition.sensor,
                from = %transition.previous,
                to = %transition.current,
                value = transition.value,
                tick = transition.tick,
                "sensor status alert"
            );
            if !self.alerter.is_enabled() {
                continue;
            }

            let alerter = self.alerter.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let results = alerter.deliver(&transition).await;
                let failed = results.iter().filter(|r| !r.success).count();
                RunnerMetrics::add(&metrics.alert_failures, failed as u64);
            });
        }
    }
}

/// Run the HTTP server until it finishes, failing if the tick runner
/// exits first. A dead runner would otherwise leave the server handing
/// out a frozen snapshot.
pub async fn supervise<F>(server: F, mut runner: JoinHandle<()>) -> anyhow::Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        served = server => {
            runner.abort();
            served?;
            Ok(())
        }
        joined = &mut runner => {
            match joined {
                Ok(()) => tracing::error!("tick runner exited"),
                Err(e) => tracing::error!(error = %e, "tick runner failed"),
            }
            anyhow::bail!("tick runner stopped; shutting down")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reactor_compute::{ComputeError, FeatureVector, ModelMode, OutlierModel};
    use reactor_core::{Config, HealthStatus, SensorKind};
    use reactor_notify::{Dispatcher, Notification, Notifier, NotifyError};

    struct FixedModel(f64);

    impl OutlierModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(&self, _features: &FeatureVector) -> Result<f64, ComputeError> {
            Ok(self.0)
        }
    }

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "counting"
        }
    }

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.pipeline.spike_probability = 0.0;
        config.pipeline.seed = Some(5);
        config
    }

    struct Harness {
        runner: Runner,
        hub: Arc<Hub>,
        metrics: Arc<RunnerMetrics>,
        ingest_tx: mpsc::Sender<ExternalBatch>,
    }

    fn harness(config: &Config, model: Option<Arc<dyn OutlierModel>>, alerter: Alerter) -> Harness {
        let pipeline = Pipeline::new(config, model, None);
        let hub = Arc::new(Hub::new(
            16,
            pipeline.detector().model_mode().clone(),
            config.pipeline.tick_period(),
            3,
        ));
        let metrics = Arc::new(RunnerMetrics::default());
        let (ingest_tx, ingest_rx) = mpsc::channel(8);
        let runner = Runner::new(
            pipeline,
            hub.clone(),
            Arc::new(alerter),
            metrics.clone(),
            ingest_rx,
            config.pipeline.tick_period(),
            config.pipeline.history_cap,
        );
        Harness {
            runner,
            hub,
            metrics,
            ingest_tx,
        }
    }

    fn value_of(snapshot: &crate::live::LiveSnapshot, sensor: SensorKind) -> Option<f64> {
        snapshot.readings.iter().find(|r| r.sensor == sensor).map(|r| r.value)
    }

    fn silent_alerter(config: &Config) -> Alerter {
        Alerter::new(Dispatcher::empty(), None, None, &config.sensors.specs).unwrap()
    }

    #[tokio::test]
    async fn external_readings_drive_twin_and_alerts() {
        let config = quiet_config();
        let sent = Arc::new(AtomicUsize::new(0));
        let alerter = Alerter::new(
            Dispatcher::with_defaults(vec![Box::new(CountingNotifier(sent.clone()))]),
            None,
            None,
            &config.sensors.specs,
        )
        .unwrap();
        let mut h = harness(&config, None, alerter);
        let (scored_tx, _scored_rx) = mpsc::channel(4);

        let mut twins = Vec::new();
        for value in [7.0, 7.2, 5.5, 5.4, 7.1] {
            h.ingest_tx
                .send(BTreeMap::from([(SensorKind::Ph, value)]))
                .await
                .unwrap();
            h.runner.tick(&scored_tx).await;
            twins.push(h.hub.snapshot().await.twin.core);
        }

        assert_eq!(
            twins,
            vec![
                HealthStatus::Normal,
                HealthStatus::Normal,
                HealthStatus::Critical,
                HealthStatus::Critical,
                HealthStatus::Normal
            ]
        );
        let snap = h.metrics.snapshot();
        assert_eq!(snap.ticks, 5);
        assert_eq!(snap.threshold_events, 2);
        assert_eq!(snap.alerts_fired, 1);

        for _ in 0..50 {
            if sent.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        let snapshot = h.hub.snapshot().await;
        assert_eq!(snapshot.tick, 5);
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(value_of(&snapshot, SensorKind::Ph), Some(7.1));
    }

    #[tokio::test]
    async fn later_external_batch_wins() {
        let config = quiet_config();
        let mut h = harness(&config, None, silent_alerter(&config));
        let (scored_tx, _scored_rx) = mpsc::channel(4);

        h.ingest_tx.send(BTreeMap::from([(SensorKind::Flow, 4.0)])).await.unwrap();
        h.ingest_tx.send(BTreeMap::from([(SensorKind::Flow, 6.0)])).await.unwrap();
        h.runner.tick(&scored_tx).await;

        let snapshot = h.hub.snapshot().await;
        assert_eq!(value_of(&snapshot, SensorKind::Flow), Some(6.0));
    }

    #[tokio::test]
    async fn tick_broadcasts_sensor_update() {
        let config = quiet_config();
        let mut h = harness(&config, None, silent_alerter(&config));
        let (_, mut rx) = h.hub.join().await;
        let (scored_tx, _scored_rx) = mpsc::channel(4);

        h.runner.tick(&scored_tx).await;

        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "sensor_update");
        assert_eq!(msg["feed"], "live");
        assert_eq!(msg["payload"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn scoring_cycle_raises_model_events() {
        let mut config = quiet_config();
        config.pipeline.window_size = 3;
        config.pipeline.scoring_every = 3;
        config.pipeline.tick_ms = 60_000;
        let mut h = harness(&config, Some(Arc::new(FixedModel(-0.45))), silent_alerter(&config));
        let (scored_tx, mut scored_rx) = mpsc::channel(4);

        for _ in 0..3 {
            h.runner.tick(&scored_tx).await;
        }
        let outcome = scored_rx.recv().await.unwrap();
        assert_eq!(outcome.batch_tick, 3);

        let (_, mut rx) = h.hub.join().await;
        h.runner.finish_scoring(outcome).await;

        let snap = h.metrics.snapshot();
        assert_eq!(snap.scoring_runs, 1);
        assert_eq!(snap.model_events, 4);
        assert_eq!(h.hub.snapshot().await.twin.core, HealthStatus::Critical);

        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "anomaly");
        assert_eq!(msg["anomalies"].as_array().unwrap().len(), 4);
        assert_eq!(msg["anomalies"][0]["kind"], "model");
    }

    #[tokio::test]
    async fn busy_scorer_skips_cadence() {
        let mut config = quiet_config();
        config.pipeline.window_size = 2;
        config.pipeline.scoring_every = 1;
        config.pipeline.tick_ms = 60_000;
        let mut h = harness(&config, Some(Arc::new(FixedModel(0.2))), silent_alerter(&config));
        let (scored_tx, mut scored_rx) = mpsc::channel(4);

        // ticks 2 and 3 both hit the cadence; the second finds one in flight
        for _ in 0..3 {
            h.runner.tick(&scored_tx).await;
        }
        let snap = h.metrics.snapshot();
        assert_eq!(snap.scoring_runs, 1);
        assert_eq!(snap.scoring_skipped, 1);

        let outcome = scored_rx.recv().await.unwrap();
        h.runner.finish_scoring(outcome).await;
        h.runner.tick(&scored_tx).await;
        assert_eq!(h.metrics.snapshot().scoring_runs, 2);
    }

    #[tokio::test]
    async fn overrun_results_are_discarded() {
        let mut config = quiet_config();
        config.pipeline.tick_ms = 10;
        let mut h = harness(&config, Some(Arc::new(FixedModel(-0.45))), silent_alerter(&config));

        h.runner
            .finish_scoring(ScoringOutcome {
                batch_tick: 1,
                result: Ok(vec![ModelVerdict {
                    sensor: SensorKind::Ph,
                    result: Ok(-0.45),
                }]),
                elapsed: Duration::from_millis(50),
            })
            .await;

        let snap = h.metrics.snapshot();
        assert_eq!(snap.scoring_overruns, 1);
        assert_eq!(snap.model_events, 0);
        assert!(h.hub.snapshot().await.active.is_empty());
    }

    #[tokio::test]
    async fn degraded_model_never_scores() {
        let mut config = quiet_config();
        config.pipeline.window_size = 2;
        config.pipeline.scoring_every = 1;
        let mut h = harness(&config, None, silent_alerter(&config));
        let (scored_tx, _scored_rx) = mpsc::channel(4);

        for _ in 0..4 {
            h.runner.tick(&scored_tx).await;
        }
        assert_eq!(h.metrics.snapshot().scoring_runs, 0);
        assert!(matches!(
            h.hub.snapshot().await.model_mode,
            ModelMode::Degraded { .. }
        ));
    }

    #[tokio::test]
    async fn supervise_fails_when_runner_exits() {
        let runner = tokio::spawn(async {});
        let server = std::future::pending::<std::io::Result<()>>();
        let err = supervise(server, runner).await.unwrap_err();
        assert!(err.to_string().contains("tick runner stopped"));
    }

    #[tokio::test]
    async fn supervise_fails_when_runner_panics() {
        let runner = tokio::spawn(async { panic!("tick failed") });
        let server = std::future::pending::<std::io::Result<()>>();
        assert!(supervise(server, runner).await.is_err());
    }

    #[tokio::test]
    async fn supervise_stops_runner_after_server_shutdown() {
        struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let runner = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        supervise(async { Ok(()) }, runner).await.unwrap();
        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }
}
