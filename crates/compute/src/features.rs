//! Feature extraction from a rolling window.

use reactor_core::SensorKind;

/// Feature names in the order produced by [`FeatureVector::from_window`].
pub const FEATURE_NAMES: [&str; 3] = ["latest", "deviation", "zscore"];

/// Model input for one sensor at one scoring cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub sensor: SensorKind,
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// Latest value, its deviation from the window mean, and that
    /// deviation in window standard deviations. `None` for an empty window.
    pub fn from_window(sensor: SensorKind, window: &[f64]) -> Option<Self> {
        let latest = *window.last()?;
        let (mean, std) = mean_std(window);
        let deviation = latest - mean;
        let zscore = if std > f64::EPSILON { deviation / std } else { 0.0 };
        Some(Self {
            sensor,
            values: vec![latest, deviation, zscore],
        })
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
