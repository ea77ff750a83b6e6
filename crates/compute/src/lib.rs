//! Telemetry pipeline: simulator, rolling windows, outlier model,
//! anomaly detection and twin aggregation.

pub mod detector;
pub mod error;
pub mod features;
pub mod history;
pub mod model;
pub mod pipeline;
pub mod simulator;
pub mod training;
pub mod twin;
pub mod window;

pub use detector::{
    model_severity, score_batch, Detector, ModelMode, ModelVerdict, ScoringBatch, SensorPhase,
};
pub use error::ComputeError;
pub use features::{FeatureVector, FEATURE_NAMES};
pub use history::AnomalyHistory;
pub use model::{ForestParams, IsolationForest, ModelArtifact, OutlierModel};
pub use pipeline::{FeedState, Pipeline, ScoringReport, TickReport};
pub use simulator::Simulator;
pub use training::{train, SensorEvaluation, TrainingParams, TrainingReport};
pub use twin::derive_twin;
pub use window::{RollingWindow, WindowBuffer};
