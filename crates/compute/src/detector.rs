//! Dual-path anomaly detector.
//!
//! The threshold path runs on every reading and needs no history, so it
//! keeps working before warm-up and when the model is unavailable. The
//! model path scores warm windows every K ticks; scoring itself is split
//! out into [`score_batch`] so it can run off the tick task.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use reactor_core::{AnomalyEvent, BoundSide, SensorKind, SensorReading, SensorSpec};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ComputeError;
use crate::features::FeatureVector;
use crate::model::OutlierModel;
use crate::window::WindowBuffer;

/// Per-sensor detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorPhase {
    /// Fewer than W samples; the model path is gated off.
    Unwarmed,
    Normal,
    Anomalous,
}

/// Whether the model path is available.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModelMode {
    Active { model: String },
    /// Threshold rules only.
    Degraded { reason: String },
}

impl ModelMode {
    pub fn is_active(&self) -> bool {
        matches!(self, ModelMode::Active { .. })
    }
}

/// Feature snapshots of every warm window at one scoring cycle.
///
/// Owns its data, so scoring never aliases the live windows.
#[derive(Debug, Clone)]
pub struct ScoringBatch {
    pub tick: u64,
    pub features: Vec<FeatureVector>,
}

/// Outcome of scoring one sensor.
#[derive(Debug)]
pub struct ModelVerdict {
    pub sensor: SensorKind,
    pub result: Result<f64, ComputeError>,
}

/// Score a batch, one sensor per rayon task.
pub fn score_batch(model: &dyn OutlierModel, batch: &ScoringBatch) -> Vec<ModelVerdict> {
    batch
        .features
        .par_iter()
        .map(|fv| ModelVerdict {
            sensor: fv.sensor,
            result: model.score(fv),
        })
        .collect()
}

/// Map a decision score below `threshold` to a severity in `[0, 1]`.
///
/// Linear from 0 at the threshold to 1 at the most anomalous possible
/// score (-0.5).
pub fn model_severity(score: f64, threshold: f64) -> f64 {
    let span = threshold + 0.5;
    if span <= 0.0 {
        return 1.0;
    }
    ((threshold - score) / span).clamp(0.0, 1.0)
}

pub struct Detector {
    specs: BTreeMap<SensorKind, SensorSpec>,
    windows: WindowBuffer,
    model: Option<Arc<dyn OutlierModel>>,
    mode: ModelMode,
    score_threshold: f64,
    phases: BTreeMap<SensorKind, SensorPhase>,
    active_threshold: BTreeMap<SensorKind, AnomalyEvent>,
    active_model: BTreeMap<SensorKind, AnomalyEvent>,
}

impl Detector {
    /// `model == None` starts in threshold-only mode; `degraded_reason`
    /// explains why for health output.
    pub fn new(
        specs: &[SensorSpec],
        window_size: usize,
        score_threshold: f64,
        model: Option<Arc<dyn OutlierModel>>,
        degraded_reason: Option<String>,
    ) -> Self {
        let mode = match &model {
            Some(m) => ModelMode::Active {
                model: m.name().to_string(),
            },
            None => ModelMode::Degraded {
                reason: degraded_reason.unwrap_or_else(|| "no model loaded".to_string()),
            },
        };
        Self {
            specs: specs.iter().map(|s| (s.kind, s.clone())).collect(),
            windows: WindowBuffer::new(window_size),
            model,
            mode,
            score_threshold,
            phases: specs.iter().map(|s| (s.kind, SensorPhase::Unwarmed)).collect(),
            active_threshold: BTreeMap::new(),
            active_model: BTreeMap::new(),
        }
    }

    /// Append a reading to its window and run the threshold rules.
    ///
    /// Returns the threshold event if the reading is outside its rule
    /// bounds. An in-bounds reading clears the sensor's active threshold
    /// event.
    pub fn observe(&mut self, reading: &SensorReading) -> Option<AnomalyEvent> {
        let spec = self.specs.get(&reading.sensor)?;
        let value = reading.value;
        if !value.is_finite() {
            warn!(sensor = %reading.sensor, "dropping non-finite reading");
            return None;
        }

        let side = if value < spec.bounds.min {
            Some(BoundSide::Below)
        } else if value > spec.bounds.max {
            Some(BoundSide::Above)
        } else {
            None
        };
        let severity = spec.threshold_severity(value);

        self.windows.append(reading.sensor, value);
        if self.windows.is_warm(reading.sensor) {
            let phase = self.phases.entry(reading.sensor).or_insert(SensorPhase::Unwarmed);
            if *phase == SensorPhase::Unwarmed {
                debug!(sensor = %reading.sensor, "window warm");
                *phase = SensorPhase::Normal;
            }
        }

        match side {
            Some(side) => {
                let event =
                    AnomalyEvent::threshold(reading.sensor, value, side, severity, reading.tick);
                self.active_threshold.insert(reading.sensor, event.clone());
                Some(event)
            }
            None => {
                self.active_threshold.remove(&reading.sensor);
                None
            }
        }
    }

    /// Snapshot every warm window into a batch. `None` when the model is
    /// unavailable or no sensor is warm yet.
    pub fn prepare_batch(&self, tick: u64) -> Option<ScoringBatch> {
        self.model.as_ref()?;
        let features: Vec<FeatureVector> = self
            .specs
            .keys()
            .filter(|s| self.windows.is_warm(**s))
            .filter_map(|s| FeatureVector::from_window(*s, &self.windows.snapshot(*s)))
            .collect();
        if features.is_empty() {
            return None;
        }
        Some(ScoringBatch { tick, features })
    }

    /// Fold scoring results back into detector state and return the
    /// model events raised by this cycle.
    ///
    /// A failed verdict degrades only its own sensor for this cycle.
    pub fn apply_verdicts(&mut self, tick: u64, verdicts: Vec<ModelVerdict>) -> Vec<AnomalyEvent> {
        let mut raised = Vec::new();
        for verdict in verdicts {
            let sensor = verdict.sensor;
            match verdict.result {
                Ok(score) if score < self.score_threshold => {
                    let severity = model_severity(score, self.score_threshold);
                    let event = AnomalyEvent::model(sensor, score, severity, tick);
                    debug!(sensor = %sensor, score, severity, "model anomaly");
                    self.phases.insert(sensor, SensorPhase::Anomalous);
                    self.active_model.insert(sensor, event.clone());
                    raised.push(event);
                }
                Ok(_) => {
                    self.phases.insert(sensor, SensorPhase::Normal);
                    self.active_model.remove(&sensor);
                }
                Err(e) => {
                    warn!(
                        sensor = %sensor,
                        error = %e,
                        "model inference failed; threshold rules only this cycle"
                    );
                    self.active_model.remove(&sensor);
                }
            }
        }
        raised
    }

    /// Latest threshold event per sensor (this tick) plus latest model
    /// event per sensor (last scoring cycle).
    pub fn active_events(&self) -> Vec<AnomalyEvent> {
        self.active_threshold
            .values()
            .chain(self.active_model.values())
            .cloned()
            .collect()
    }

    pub fn phase(&self, sensor: SensorKind) -> Option<SensorPhase> {
        self.phases.get(&sensor).copied()
    }

    pub fn phases(&self) -> &BTreeMap<SensorKind, SensorPhase> {
        &self.phases
    }

    pub fn model(&self) -> Option<Arc<dyn OutlierModel>> {
        self.model.clone()
    }

    pub fn model_mode(&self) -> &ModelMode {
        &self.mode
    }

    pub fn window_len(&self, sensor: SensorKind) -> usize {
        self.windows.len(sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::{AnomalyKind, ReadingOrigin};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always scores as a strong outlier and counts calls.
    struct CountingModel {
        calls: AtomicUsize,
        score: f64,
    }

    impl OutlierModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn score(&self, _features: &FeatureVector) -> Result<f64, ComputeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.score)
        }
    }

    struct FailingModel;

    impl OutlierModel for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        fn score(&self, features: &FeatureVector) -> Result<f64, ComputeError> {
            Err(ComputeError::UnknownSensor(features.sensor))
        }
    }

    fn ph_spec() -> SensorSpec {
        SensorSpec::defaults_for(SensorKind::Ph)
    }

    fn reading(value: f64, tick: u64) -> SensorReading {
        SensorReading::new(&ph_spec(), value, tick, ReadingOrigin::External)
    }

    /// Run one scoring cycle synchronously, as the runner would.
    fn score_now(detector: &mut Detector, tick: u64) -> Vec<AnomalyEvent> {
        match (detector.prepare_batch(tick), detector.model()) {
            (Some(batch), Some(model)) => {
                let verdicts = score_batch(model.as_ref(), &batch);
                detector.apply_verdicts(tick, verdicts)
            }
            _ => Vec::new(),
        }
    }

    #[test]
    fn ph_threshold_events_fire_only_outside_bounds() {
        let mut detector = Detector::new(&[ph_spec()], 50, -0.2, None, None);
        let fired: Vec<usize> = [7.0, 7.2, 5.5, 5.4, 7.1]
            .iter()
            .enumerate()
            .filter_map(|(i, v)| detector.observe(&reading(*v, i as u64 + 1)).map(|_| i + 1))
            .collect();
        assert_eq!(fired, vec![3, 4]);
        // 7.1 cleared the active threshold event
        assert!(detector.active_events().is_empty());
    }

    #[test]
    fn threshold_event_carries_side_and_severity() {
        let mut detector = Detector::new(&[ph_spec()], 50, -0.2, None, None);
        let event = detector.observe(&reading(5.4, 1)).unwrap();
        match event {
            AnomalyEvent::Threshold(t) => {
                assert_eq!(t.side, BoundSide::Below);
                assert!(t.severity > 0.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn model_is_never_called_before_warm_up() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            score: -0.5,
        });
        let mut detector = Detector::new(&[ph_spec()], 5, -0.2, Some(model.clone()), None);

        for tick in 1..=4 {
            detector.observe(&reading(7.0, tick));
            assert!(score_now(&mut detector, tick).is_empty());
            assert_eq!(detector.phase(SensorKind::Ph), Some(SensorPhase::Unwarmed));
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);

        detector.observe(&reading(7.0, 5));
        let events = score_now(&mut detector, 5);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), AnomalyKind::Model);
        assert_eq!(events[0].severity(), 1.0);
        assert_eq!(detector.phase(SensorKind::Ph), Some(SensorPhase::Anomalous));
    }

    #[test]
    fn batch_snapshots_full_window() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            score: 0.1,
        });
        let mut detector = Detector::new(&[ph_spec()], 3, -0.2, Some(model), None);
        for (tick, v) in [7.0, 7.1, 7.2, 7.0].into_iter().enumerate() {
            detector.observe(&reading(v, tick as u64));
        }
        let batch = detector.prepare_batch(4).unwrap();
        assert_eq!(batch.features.len(), 1);
        assert_eq!(batch.features[0].values[0], 7.0);
        assert_eq!(detector.window_len(SensorKind::Ph), 3);
    }

    #[test]
    fn normal_score_clears_model_event() {
        let anomalous = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            score: -0.4,
        });
        let mut detector = Detector::new(&[ph_spec()], 2, -0.2, Some(anomalous), None);
        detector.observe(&reading(7.0, 1));
        detector.observe(&reading(7.0, 2));
        assert_eq!(score_now(&mut detector, 2).len(), 1);
        assert_eq!(detector.active_events().len(), 1);

        let verdicts = vec![ModelVerdict {
            sensor: SensorKind::Ph,
            result: Ok(0.1),
        }];
        assert!(detector.apply_verdicts(3, verdicts).is_empty());
        assert!(detector.active_events().is_empty());
        assert_eq!(detector.phase(SensorKind::Ph), Some(SensorPhase::Normal));
    }

    #[test]
    fn inference_error_degrades_only_that_cycle() {
        let mut detector = Detector::new(&[ph_spec()], 2, -0.2, Some(Arc::new(FailingModel)), None);
        detector.observe(&reading(7.0, 1));
        detector.observe(&reading(5.0, 2));
        assert!(score_now(&mut detector, 2).is_empty());
        // threshold path still reports the out-of-bounds reading
        let active = detector.active_events();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind(), AnomalyKind::Threshold);
        assert!(detector.model_mode().is_active());
    }

    #[test]
    fn without_model_detector_is_threshold_only() {
        let detector =
            Detector::new(&[ph_spec()], 2, -0.2, None, Some("artifact unreadable".into()));
        assert_eq!(
            detector.model_mode(),
            &ModelMode::Degraded {
                reason: "artifact unreadable".into()
            }
        );
        assert!(detector.prepare_batch(1).is_none());
    }

    #[test]
    fn severity_mapping_is_monotonic_and_clamped() {
        assert_eq!(model_severity(-0.2, -0.2), 0.0);
        assert!((model_severity(-0.35, -0.2) - 0.5).abs() < 1e-12);
        assert_eq!(model_severity(-0.5, -0.2), 1.0);
        assert_eq!(model_severity(-0.9, -0.2), 1.0);
        assert!(model_severity(-0.3, -0.2) < model_severity(-0.4, -0.2));
    }
}
