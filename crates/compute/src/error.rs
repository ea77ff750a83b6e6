use reactor_core::SensorKind;

/// Errors raised by the detector model and training.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("Model has no forest for sensor '{0}'")]
    UnknownSensor(SensorKind),
    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Non-finite feature value for sensor '{0}'")]
    NonFinite(SensorKind),
    #[error("Model artifact error: {0}")]
    Artifact(String),
    #[error("Training failed: {0}")]
    Training(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
