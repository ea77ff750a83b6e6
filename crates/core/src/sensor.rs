use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReactorError;

/// The sensors mounted on the simulated reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Flow,
    Temperature,
    Pressure,
    Ph,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Flow,
        SensorKind::Temperature,
        SensorKind::Pressure,
        SensorKind::Ph,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Flow => "flow",
            SensorKind::Temperature => "temperature",
            SensorKind::Pressure => "pressure",
            SensorKind::Ph => "ph",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Flow => "L/min",
            SensorKind::Temperature => "°C",
            SensorKind::Pressure => "bar",
            SensorKind::Ph => "pH",
        }
    }

    /// Suffix used for per-sensor env keys (`RANGE_PH`, `BOUNDS_FLOW`, ...).
    pub fn env_suffix(&self) -> &'static str {
        match self {
            SensorKind::Flow => "FLOW",
            SensorKind::Temperature => "TEMPERATURE",
            SensorKind::Pressure => "PRESSURE",
            SensorKind::Ph => "PH",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = ReactorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flow" | "flowrate" | "flow_rate" => Ok(SensorKind::Flow),
            "temperature" | "temp" => Ok(SensorKind::Temperature),
            "pressure" => Ok(SensorKind::Pressure),
            "ph" => Ok(SensorKind::Ph),
            other => Err(ReactorError::UnknownSensor(other.to_string())),
        }
    }
}

/// Coarse health label shared by sensor readings and the twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Normal,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Anything other than `Normal` counts as bad for alerting.
    pub fn is_bad(&self) -> bool {
        !matches!(self, HealthStatus::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Normal => "normal",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        other.min >= self.min && other.max <= self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Distance by which `value` lies outside the interval (0.0 when inside).
    pub fn excess(&self, value: f64) -> f64 {
        if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            0.0
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl FromStr for Range {
    type Err = ReactorError;

    /// Parse `"min,max"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lo, hi) = s
            .split_once(',')
            .ok_or_else(|| ReactorError::Config(format!("range '{s}' must be 'min,max'")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| ReactorError::Config(format!("range '{s}': {e}")))
        };
        Ok(Range::new(parse(lo)?, parse(hi)?))
    }
}

/// Static description of one simulated sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub kind: SensorKind,
    /// Initial random-walk value.
    pub start: f64,
    /// Maximum random-walk perturbation per tick.
    pub step: f64,
    /// Physically plausible range; the random walk is clamped to it.
    pub plausible: Range,
    /// Hard rule bounds for the threshold path and status classification.
    pub bounds: Range,
    /// Fraction of the bounds span beyond which a reading is critical.
    pub critical_margin: f64,
}

impl SensorSpec {
    pub fn defaults_for(kind: SensorKind) -> Self {
        let (start, step, plausible, bounds) = match kind {
            SensorKind::Flow => (5.0, 0.2, Range::new(3.0, 7.0), Range::new(0.0, 10.0)),
            SensorKind::Temperature => (25.0, 0.3, Range::new(21.0, 29.0), Range::new(15.0, 35.0)),
            SensorKind::Pressure => (9.0, 0.1, Range::new(8.0, 9.8), Range::new(0.0, 10.0)),
            SensorKind::Ph => (7.0, 0.05, Range::new(6.8, 7.2), Range::new(6.0, 9.0)),
        };
        Self {
            kind,
            start,
            step,
            plausible,
            bounds,
            critical_margin: 0.1,
        }
    }

    pub fn classify(&self, value: f64) -> HealthStatus {
        if !value.is_finite() {
            return HealthStatus::Critical;
        }
        let excess = self.bounds.excess(value);
        if excess <= 0.0 {
            HealthStatus::Normal
        } else if excess > self.critical_margin * self.bounds.span() {
            HealthStatus::Critical
        } else {
            HealthStatus::Warning
        }
    }

    /// Linear severity for a rule-bound violation, saturating at twice the
    /// critical margin. Returns 0.0 for in-bounds values.
    pub fn threshold_severity(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 1.0;
        }
        let saturation = 2.0 * self.critical_margin * self.bounds.span();
        if saturation <= 0.0 {
            return 0.0;
        }
        (self.bounds.excess(value) / saturation).clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> Result<(), ReactorError> {
        let name = self.kind;
        if !self.plausible.is_valid() {
            return Err(ReactorError::Config(format!(
                "{name}: plausible range {} is empty or non-finite",
                self.plausible
            )));
        }
        if !self.bounds.is_valid() {
            return Err(ReactorError::Config(format!(
                "{name}: rule bounds {} are empty or non-finite",
                self.bounds
            )));
        }
        if !self.bounds.contains_range(&self.plausible) {
            return Err(ReactorError::Config(format!(
                "{name}: plausible range {} must lie inside rule bounds {}",
                self.plausible, self.bounds
            )));
        }
        if !self.plausible.contains(self.start) {
            return Err(ReactorError::Config(format!(
                "{name}: start value {} outside plausible range {}",
                self.start, self.plausible
            )));
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(ReactorError::Config(format!(
                "{name}: random-walk step must be positive, got {}",
                self.step
            )));
        }
        if !(self.critical_margin.is_finite() && self.critical_margin > 0.0) {
            return Err(ReactorError::Config(format!(
                "{name}: critical margin must be positive, got {}",
                self.critical_margin
            )));
        }
        Ok(())
    }
}

/// Where a reading's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingOrigin {
    /// Regular random-walk step.
    Simulated,
    /// Deliberately injected out-of-range fault.
    Spike,
    /// Fed in from outside through the ingest endpoint.
    External,
}

/// One sample from one sensor at one tick. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(rename = "id")]
    pub sensor: SensorKind,
    pub value: f64,
    pub status: HealthStatus,
    pub unit: &'static str,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub origin: ReadingOrigin,
    #[serde(skip)]
    pub observed_at: Instant,
}

impl SensorReading {
    pub fn new(spec: &SensorSpec, value: f64, tick: u64, origin: ReadingOrigin) -> Self {
        Self {
            sensor: spec.kind,
            value,
            status: spec.classify(value),
            unit: spec.kind.unit(),
            tick,
            timestamp: Utc::now(),
            origin,
            observed_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ph_classification_uses_rule_bounds() {
        let spec = SensorSpec::defaults_for(SensorKind::Ph);
        assert_eq!(spec.classify(7.0), HealthStatus::Normal);
        assert_eq!(spec.classify(6.0), HealthStatus::Normal);
        // 0.2 below a span of 3.0 is inside the 10% margin
        assert_eq!(spec.classify(5.8), HealthStatus::Warning);
        assert_eq!(spec.classify(5.5), HealthStatus::Critical);
        assert_eq!(spec.classify(9.5), HealthStatus::Critical);
        assert_eq!(spec.classify(f64::NAN), HealthStatus::Critical);
    }

    #[test]
    fn threshold_severity_crosses_half_at_critical_margin() {
        let spec = SensorSpec::defaults_for(SensorKind::Ph);
        assert_eq!(spec.threshold_severity(7.0), 0.0);
        let at_margin = spec.threshold_severity(6.0 - 0.3);
        assert!((at_margin - 0.5).abs() < 1e-9);
        assert!(spec.threshold_severity(5.5) > 0.5);
        assert!(spec.threshold_severity(5.8) < 0.5);
        assert_eq!(spec.threshold_severity(-100.0), 1.0);
    }

    #[test]
    fn range_parsing() {
        let r: Range = "6, 9".parse().unwrap();
        assert_eq!(r, Range::new(6.0, 9.0));
        assert!("6".parse::<Range>().is_err());
        assert!("a,b".parse::<Range>().is_err());
    }

    #[test]
    fn range_excess_and_clamp() {
        let r = Range::new(0.0, 10.0);
        assert_eq!(r.excess(-2.0), 2.0);
        assert_eq!(r.excess(12.5), 2.5);
        assert_eq!(r.excess(5.0), 0.0);
        assert_eq!(r.clamp(11.0), 10.0);
    }

    #[test]
    fn default_specs_are_valid() {
        for kind in SensorKind::ALL {
            SensorSpec::defaults_for(kind).validate().unwrap();
        }
    }

    #[test]
    fn spec_rejects_plausible_outside_bounds() {
        let mut spec = SensorSpec::defaults_for(SensorKind::Pressure);
        spec.plausible = Range::new(8.0, 12.0);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("inside rule bounds"));
    }

    #[test]
    fn sensor_kind_parses_aliases() {
        assert_eq!("flowRate".parse::<SensorKind>().unwrap(), SensorKind::Flow);
        assert_eq!("PH".parse::<SensorKind>().unwrap(), SensorKind::Ph);
        assert!("vibration".parse::<SensorKind>().is_err());
    }

    #[test]
    fn reading_serializes_with_wire_id() {
        let spec = SensorSpec::defaults_for(SensorKind::Temperature);
        let reading = SensorReading::new(&spec, 25.5, 3, ReadingOrigin::Simulated);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["id"], "temperature");
        assert_eq!(json["value"], 25.5);
        assert_eq!(json["status"], "normal");
        assert!(json.get("observed_at").is_none());
    }
}
