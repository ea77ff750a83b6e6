//! CLI argument parsing and the offline `train` subcommand.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use reactor_compute::{train, ForestParams, TrainingParams};
use reactor_core::Config;
use tracing::info;

/// Simulated reactor telemetry with live anomaly detection.
#[derive(Parser, Debug)]
#[command(name = "reactor", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tick loop and the HTTP/WebSocket server.
    Serve(ServeArgs),
    /// Fit the detector model offline and write the artifact.
    Train(TrainArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Train a model in-process when the artifact file is missing.
    #[arg(long)]
    pub bootstrap_model: bool,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Simulated ticks to generate.
    #[arg(long, default_value_t = 5_000)]
    pub ticks: u64,

    /// Artifact output path (defaults to MODEL_PATH).
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Seed for both the simulator and the forest.
    #[arg(long, env = "TRAIN_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Fault injection rate while generating training data.
    #[arg(long, default_value_t = 0.05)]
    pub spike_probability: f64,

    /// Trees per sensor forest.
    #[arg(long, default_value_t = 100)]
    pub trees: usize,

    /// Subsample size per tree.
    #[arg(long, default_value_t = 256)]
    pub sample_size: usize,
}

impl TrainArgs {
    fn params(&self) -> TrainingParams {
        TrainingParams {
            ticks: self.ticks,
            spike_probability: self.spike_probability,
            seed: self.seed,
            forest: ForestParams {
                n_trees: self.trees,
                sample_size: self.sample_size,
                seed: self.seed,
            },
        }
    }
}

/// Generate data, fit, save, and log the evaluation.
pub fn run_train(config: &Config, args: &TrainArgs) -> anyhow::Result<()> {
    config.validate()?;
    if !(0.0..=1.0).contains(&args.spike_probability) {
        anyhow::bail!("--spike-probability must be within [0, 1], got {}", args.spike_probability);
    }
    let out = args.out.clone().unwrap_or_else(|| config.model.path.clone());

    info!(
        ticks = args.ticks,
        seed = args.seed,
        trees = args.trees,
        window = config.pipeline.window_size,
        "training detector model"
    );
    let (artifact, report) = train(config, &args.params())?;
    artifact.save(&out)?;

    info!("Model written to {}", out.display());
    info!("Evaluation (threshold {}):", report.threshold);
    for eval in &report.sensors {
        info!(
            "  {:<12} samples={:<6} spikes={:<4} spike_flagged={:>5.1}% clean_flagged={:>5.1}% mean_score spike={:+.3} clean={:+.3}",
            eval.sensor.as_str(),
            eval.samples,
            eval.spikes,
            eval.spike_flag_rate * 100.0,
            eval.clean_flag_rate * 100.0,
            eval.mean_spike_score,
            eval.mean_clean_score
        );
    }
    Ok(())
}
