use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use reactor_core::SensorKind;
use serde::{Deserialize, Serialize};

use super::forest::IsolationForest;
use super::OutlierModel;
use crate::error::ComputeError;
use crate::features::{FeatureVector, FEATURE_NAMES};

/// Bumped whenever the serialized layout or feature set changes.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized detector: one isolation forest per sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    /// Window size the features were extracted with.
    pub window_size: usize,
    pub trained_at: DateTime<Utc>,
    pub forests: BTreeMap<SensorKind, IsolationForest>,
}

impl ModelArtifact {
    pub fn new(window_size: usize, forests: BTreeMap<SensorKind, IsolationForest>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            window_size,
            trained_at: Utc::now(),
            forests,
        }
    }

    /// Read and validate an artifact from disk.
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        let raw = std::fs::read_to_string(path)?;
        let artifact: Self = serde_json::from_str(&raw)
            .map_err(|e| ComputeError::Artifact(format!("{}: {e}", path.display())))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Write the artifact as JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ComputeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self).map_err(|e| ComputeError::Artifact(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject artifacts this build cannot score with.
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.format_version != FORMAT_VERSION {
            return Err(ComputeError::Artifact(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.feature_names != FEATURE_NAMES {
            return Err(ComputeError::Artifact(format!(
                "feature set {:?} does not match {:?}",
                self.feature_names, FEATURE_NAMES
            )));
        }
        if self.forests.is_empty() {
            return Err(ComputeError::Artifact("artifact contains no forests".into()));
        }
        for (sensor, forest) in &self.forests {
            forest
                .validate()
                .map_err(|e| ComputeError::Artifact(format!("{sensor}: {e}")))?;
            if forest.n_features() != FEATURE_NAMES.len() {
                return Err(ComputeError::DimensionMismatch {
                    expected: FEATURE_NAMES.len(),
                    actual: forest.n_features(),
                });
            }
        }
        Ok(())
    }

    pub fn sensors(&self) -> impl Iterator<Item = SensorKind> + '_ {
        self.forests.keys().copied()
    }
}

impl OutlierModel for ModelArtifact {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn score(&self, features: &FeatureVector) -> Result<f64, ComputeError> {
        let forest = self
            .forests
            .get(&features.sensor)
            .ok_or(ComputeError::UnknownSensor(features.sensor))?;
        if !features.is_finite() {
            return Err(ComputeError::NonFinite(features.sensor));
        }
        forest.decision(&features.values)
    }
}
