//! Offline model training.
//!
//! Runs the simulator with fault injection for a fixed number of ticks,
//! extracts the same windowed features the detector scores, fits one
//! isolation forest per sensor, then reports how the fitted model treats
//! injected spikes versus clean ticks.

use std::collections::BTreeMap;

use rayon::prelude::*;
use reactor_core::{Config, ReadingOrigin, SensorKind};
use serde::Serialize;
use tracing::info;

use crate::error::ComputeError;
use crate::features::FeatureVector;
use crate::model::{ForestParams, IsolationForest, ModelArtifact};
use crate::simulator::Simulator;
use crate::window::WindowBuffer;

#[derive(Debug, Clone)]
pub struct TrainingParams {
    /// Simulated ticks to generate.
    pub ticks: u64,
    /// Fault injection rate while generating; independent of the live rate.
    pub spike_probability: f64,
    pub seed: u64,
    pub forest: ForestParams,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            ticks: 5_000,
            spike_probability: 0.05,
            seed: 42,
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorEvaluation {
    pub sensor: SensorKind,
    pub samples: usize,
    pub spikes: usize,
    /// Fraction of spike samples scored below the threshold.
    pub spike_flag_rate: f64,
    /// Fraction of clean samples scored below the threshold.
    pub clean_flag_rate: f64,
    pub mean_spike_score: f64,
    pub mean_clean_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub ticks: u64,
    pub threshold: f64,
    pub sensors: Vec<SensorEvaluation>,
}

struct Sample {
    features: FeatureVector,
    spike: bool,
}

/// Generate data, fit, and evaluate.
pub fn train(
    config: &Config,
    params: &TrainingParams,
) -> Result<(ModelArtifact, TrainingReport), ComputeError> {
    let window_size = config.pipeline.window_size;
    if params.ticks <= window_size as u64 {
        return Err(ComputeError::Training(format!(
            "need more than {window_size} ticks to fill the window, got {}",
            params.ticks
        )));
    }

    let samples = generate(config, params);
    let threshold = config.pipeline.score_threshold;

    let fitted: Vec<(SensorKind, IsolationForest, SensorEvaluation)> = samples
        .into_par_iter()
        .enumerate()
        .map(|(idx, (sensor, rows))| {
            let forest_params = ForestParams {
                seed: params.forest.seed.wrapping_add(idx as u64),
                ..params.forest.clone()
            };
            let matrix: Vec<Vec<f64>> = rows.iter().map(|s| s.features.values.clone()).collect();
            let forest = IsolationForest::fit(&matrix, &forest_params)
                .map_err(|e| ComputeError::Training(format!("{sensor}: {e}")))?;
            let evaluation = evaluate(sensor, &forest, &rows, threshold)?;
            Ok((sensor, forest, evaluation))
        })
        .collect::<Result<_, ComputeError>>()?;

    let mut forests = BTreeMap::new();
    let mut sensors = Vec::with_capacity(fitted.len());
    for (sensor, forest, evaluation) in fitted {
        info!(
            sensor = %sensor,
            samples = evaluation.samples,
            spikes = evaluation.spikes,
            spike_flag_rate = evaluation.spike_flag_rate,
            clean_flag_rate = evaluation.clean_flag_rate,
            "forest fitted"
        );
        forests.insert(sensor, forest);
        sensors.push(evaluation);
    }

    let artifact = ModelArtifact::new(window_size, forests);
    artifact.validate()?;
    Ok((
        artifact,
        TrainingReport {
            ticks: params.ticks,
            threshold,
            sensors,
        },
    ))
}

/// Feature samples per sensor, one per tick once the window is warm.
fn generate(config: &Config, params: &TrainingParams) -> Vec<(SensorKind, Vec<Sample>)> {
    let mut simulator = Simulator::new(
        config.sensors.specs.clone(),
        params.spike_probability,
        Some(params.seed),
    );
    let mut windows = WindowBuffer::new(config.pipeline.window_size);
    let mut samples: BTreeMap<SensorKind, Vec<Sample>> = BTreeMap::new();
    let no_overrides = BTreeMap::new();

    for tick in 1..=params.ticks {
        for reading in simulator.step(tick, &no_overrides) {
            windows.append(reading.sensor, reading.value);
            if !windows.is_warm(reading.sensor) {
                continue;
            }
            let window = windows.snapshot(reading.sensor);
            if let Some(features) = FeatureVector::from_window(reading.sensor, &window) {
                samples.entry(reading.sensor).or_default().push(Sample {
                    features,
                    spike: reading.origin == ReadingOrigin::Spike,
                });
            }
        }
    }
    samples.into_iter().collect()
}

fn evaluate(
    sensor: SensorKind,
    forest: &IsolationForest,
    rows: &[Sample],
    threshold: f64,
) -> Result<SensorEvaluation, ComputeError> {
    let (mut spikes, mut spike_flags, mut spike_sum) = (0usize, 0usize, 0.0);
    let (mut clean, mut clean_flags, mut clean_sum) = (0usize, 0usize, 0.0);
    for sample in rows {
        let score = forest.decision(&sample.features.values)?;
        let flagged = score < threshold;
        if sample.spike {
            spikes += 1;
            spike_sum += score;
            spike_flags += flagged as usize;
        } else {
            clean += 1;
            clean_sum += score;
            clean_flags += flagged as usize;
        }
    }
    let ratio = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 };
    let mean = |s: f64, d: usize| if d == 0 { 0.0 } else { s / d as f64 };
    Ok(SensorEvaluation {
        sensor,
        samples: rows.len(),
        spikes,
        spike_flag_rate: ratio(spike_flags, spikes),
        clean_flag_rate: ratio(clean_flags, clean),
        mean_spike_score: mean(spike_sum, spikes),
        mean_clean_score: mean(clean_sum, clean),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutlierModel;

    fn quick_params() -> TrainingParams {
        TrainingParams {
            ticks: 800,
            spike_probability: 0.1,
            seed: 3,
            forest: ForestParams {
                n_trees: 30,
                sample_size: 128,
                seed: 9,
            },
        }
    }

    #[test]
    fn trains_one_forest_per_sensor() {
        let config = Config::default();
        let (artifact, report) = train(&config, &quick_params()).unwrap();
        assert_eq!(artifact.sensors().collect::<Vec<_>>(), SensorKind::ALL.to_vec());
        assert_eq!(artifact.window_size, 50);
        assert_eq!(report.sensors.len(), 4);
        for eval in &report.sensors {
            // one sample per tick after the window fills
            assert_eq!(eval.samples, 800 - 49);
        }
    }

    #[test]
    fn spikes_score_lower_than_clean_ticks() {
        let (_, report) = train(&Config::default(), &quick_params()).unwrap();
        let spiked: Vec<_> = report.sensors.iter().filter(|e| e.spikes > 0).collect();
        assert!(!spiked.is_empty());
        for eval in spiked {
            assert!(
                eval.mean_spike_score < eval.mean_clean_score,
                "{}: spike {} vs clean {}",
                eval.sensor,
                eval.mean_spike_score,
                eval.mean_clean_score
            );
        }
    }

    #[test]
    fn trained_artifact_scores_live_features() {
        let (artifact, _) = train(&Config::default(), &quick_params()).unwrap();
        let fv = FeatureVector::from_window(SensorKind::Temperature, &[25.0; 50]).unwrap();
        let score = artifact.score(&fv).unwrap();
        assert!((-0.5..=0.5).contains(&score));
    }

    #[test]
    fn too_few_ticks_is_an_error() {
        let params = TrainingParams {
            ticks: 10,
            ..quick_params()
        };
        assert!(matches!(train(&Config::default(), &params), Err(ComputeError::Training(_))));
    }
}
