//! Server startup: model loading, shared state, and the tick runner.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use reactor_compute::{train, ModelArtifact, OutlierModel, Pipeline, TrainingParams};
use reactor_core::Config;
use reactor_notify::Alerter;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::live::Hub;
use crate::metrics::RunnerMetrics;
use crate::runner::Runner;
use crate::state::AppState;

/// Pending external batches before `POST /readings` starts dropping.
const INGEST_QUEUE: usize = 64;

/// Outcome of resolving the detector model at startup.
pub struct LoadedModel {
    pub model: Option<Arc<dyn OutlierModel>>,
    /// Set when running threshold-only.
    pub degraded_reason: Option<String>,
}

/// Resolve the model artifact.
///
/// A missing file is fatal unless `bootstrap` is set, in which case a
/// model is trained in-process and written to the configured path. A file
/// that exists but cannot be used starts the detector in threshold-only
/// mode.
pub async fn load_model(config: &Config, bootstrap: bool) -> anyhow::Result<LoadedModel> {
    let path = config.model.path.clone();

    if !path.exists() {
        if !bootstrap {
            anyhow::bail!(
                "model artifact {} not found; run `reactor train` first or start with --bootstrap-model",
                path.display()
            );
        }
        warn!(path = %path.display(), "model artifact missing; training a bootstrap model");
        let params = TrainingParams {
            seed: config.pipeline.seed.unwrap_or(TrainingParams::default().seed),
            ..TrainingParams::default()
        };
        let train_config = config.clone();
        let (artifact, report) = tokio::task::spawn_blocking(move || train(&train_config, &params))
            .await
            .context("bootstrap training task panicked")??;
        for eval in &report.sensors {
            info!(
                sensor = %eval.sensor,
                spike_flag_rate = eval.spike_flag_rate,
                clean_flag_rate = eval.clean_flag_rate,
                "bootstrap model evaluation"
            );
        }
        if let Err(e) = artifact.save(&path) {
            warn!(path = %path.display(), error = %e, "could not persist bootstrap model");
        }
        return Ok(LoadedModel {
            model: Some(Arc::new(artifact)),
            degraded_reason: None,
        });
    }

    let artifact = match ModelArtifact::load(&path) {
        Ok(a) => a,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "model artifact unusable; running threshold rules only"
            );
            return Ok(LoadedModel {
                model: None,
                degraded_reason: Some(e.to_string()),
            });
        }
    };

    if artifact.window_size != config.pipeline.window_size {
        let reason = format!(
            "artifact trained with window {} but WINDOW_SIZE is {}",
            artifact.window_size, config.pipeline.window_size
        );
        warn!(
            path = %path.display(),
            %reason,
            "model artifact incompatible; running threshold rules only"
        );
        return Ok(LoadedModel {
            model: None,
            degraded_reason: Some(reason),
        });
    }

    info!(
        path = %path.display(),
        trained_at = %artifact.trained_at,
        sensors = artifact.forests.len(),
        "model artifact loaded"
    );
    Ok(LoadedModel {
        model: Some(Arc::new(artifact)),
        degraded_reason: None,
    })
}

/// Build `AppState` and the runner that feeds it. The caller spawns the
/// runner.
pub async fn build_app_state(
    config: Config,
    bootstrap: bool,
) -> anyhow::Result<(Arc<AppState>, Runner)> {
    config.validate().context("invalid configuration")?;

    let loaded = load_model(&config, bootstrap).await?;
    let pipeline = Pipeline::new(&config, loaded.model, loaded.degraded_reason);

    let alerter = Alerter::from_config(&config).context("alert configuration")?;
    if alerter.is_enabled() {
        info!(channels = ?alerter.channel_names(), "alert delivery enabled");
    } else {
        info!("no alert channel configured; transitions are logged only");
    }

    let p = &config.pipeline;
    let hub = Arc::new(Hub::new(
        p.viewer_queue,
        pipeline.detector().model_mode().clone(),
        p.tick_period(),
        p.stale_after_ticks,
    ));
    let metrics = Arc::new(RunnerMetrics::default());
    let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE);

    let runner = Runner::new(
        pipeline,
        hub.clone(),
        Arc::new(alerter),
        metrics.clone(),
        ingest_rx,
        p.tick_period(),
        p.history_cap,
    );

    let state = Arc::new(AppState {
        config,
        hub,
        metrics,
        ingest_tx,
        started_at: Instant::now(),
    });
    Ok((state, runner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_compute::ForestParams;

    fn config_with_model(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.model.path = dir.path().join("models").join("detector.json");
        config
    }

    #[tokio::test]
    async fn missing_artifact_is_fatal_without_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_model(&dir);
        let err = load_model(&config, false).await.err().unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn corrupt_artifact_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_model(&dir);
        std::fs::create_dir_all(config.model.path.parent().unwrap()).unwrap();
        std::fs::write(&config.model.path, "{ not json").unwrap();

        let loaded = load_model(&config, false).await.unwrap();
        assert!(loaded.model.is_none());
        assert!(loaded.degraded_reason.is_some());
    }

    #[tokio::test]
    async fn window_mismatch_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_model(&dir);
        config.pipeline.window_size = 10;
        let params = TrainingParams {
            ticks: 200,
            forest: ForestParams {
                n_trees: 10,
                sample_size: 64,
                seed: 1,
            },
            ..TrainingParams::default()
        };
        let (artifact, _) = train(&config, &params).unwrap();
        artifact.save(&config.model.path).unwrap();

        config.pipeline.window_size = 20;
        let loaded = load_model(&config, false).await.unwrap();
        assert!(loaded.model.is_none());
        assert!(loaded.degraded_reason.unwrap().contains("window"));
    }

    #[tokio::test]
    async fn build_starts_degraded_with_unusable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_model(&dir);
        std::fs::create_dir_all(config.model.path.parent().unwrap()).unwrap();
        std::fs::write(&config.model.path, "[]").unwrap();

        let (state, _runner) = build_app_state(config, false).await.unwrap();
        let snapshot = state.hub.snapshot().await;
        assert!(!snapshot.model_mode.is_active());
        assert_eq!(snapshot.tick, 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_model(&dir);
        config.pipeline.window_size = 0;
        assert!(build_app_state(config, true).await.is_err());
    }
}
