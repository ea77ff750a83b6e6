//! Outlier scoring models.
//!
//! The detector only depends on [`OutlierModel`]; the shipped
//! implementation is a per-sensor isolation forest loaded from a JSON
//! artifact.

pub mod artifact;
pub mod forest;

pub use artifact::ModelArtifact;
pub use forest::{ForestParams, IsolationForest};

use crate::error::ComputeError;
use crate::features::FeatureVector;

/// A pre-trained, immutable outlier scorer.
///
/// Scores follow the isolation-forest decision convention: lower is more
/// anomalous, negative values are outliers.
pub trait OutlierModel: Send + Sync {
    /// Human-readable name for logs and health output.
    fn name(&self) -> &str;

    /// Score one feature vector.
    fn score(&self, features: &FeatureVector) -> Result<f64, ComputeError>;
}
