//! Anomaly events and the derived twin state.
//!
//! The two detection paths produce distinct variants so rule-based
//! (fail-safe) and model-based events can be told apart downstream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::sensor::{HealthStatus, SensorKind};

/// Which side of the rule bounds a reading fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundSide {
    Below,
    Above,
}

/// A reading outside its hard rule bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAnomaly {
    pub id: Uuid,
    pub sensor: SensorKind,
    pub value: f64,
    pub side: BoundSide,
    pub severity: f64,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
}

/// A window the outlier model scored below the decision threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAnomaly {
    pub id: Uuid,
    pub sensor: SensorKind,
    pub score: f64,
    pub severity: f64,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyEvent {
    Threshold(ThresholdAnomaly),
    Model(ModelAnomaly),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Threshold,
    Model,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Threshold => "threshold",
            AnomalyKind::Model => "model",
        }
    }
}

impl AnomalyEvent {
    pub fn threshold(
        sensor: SensorKind,
        value: f64,
        side: BoundSide,
        severity: f64,
        tick: u64,
    ) -> Self {
        AnomalyEvent::Threshold(ThresholdAnomaly {
            id: Uuid::new_v4(),
            sensor,
            value,
            side,
            severity: severity.clamp(0.0, 1.0),
            tick,
            timestamp: Utc::now(),
        })
    }

    pub fn model(sensor: SensorKind, score: f64, severity: f64, tick: u64) -> Self {
        AnomalyEvent::Model(ModelAnomaly {
            id: Uuid::new_v4(),
            sensor,
            score,
            severity: severity.clamp(0.0, 1.0),
            tick,
            timestamp: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        match self {
            AnomalyEvent::Threshold(a) => a.id,
            AnomalyEvent::Model(a) => a.id,
        }
    }

    pub fn sensor(&self) -> SensorKind {
        match self {
            AnomalyEvent::Threshold(a) => a.sensor,
            AnomalyEvent::Model(a) => a.sensor,
        }
    }

    pub fn severity(&self) -> f64 {
        match self {
            AnomalyEvent::Threshold(a) => a.severity,
            AnomalyEvent::Model(a) => a.severity,
        }
    }

    pub fn tick(&self) -> u64 {
        match self {
            AnomalyEvent::Threshold(a) => a.tick,
            AnomalyEvent::Model(a) => a.tick,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AnomalyEvent::Threshold(a) => a.timestamp,
            AnomalyEvent::Model(a) => a.timestamp,
        }
    }

    pub fn kind(&self) -> AnomalyKind {
        match self {
            AnomalyEvent::Threshold(_) => AnomalyKind::Threshold,
            AnomalyEvent::Model(_) => AnomalyKind::Model,
        }
    }
}

/// Aggregated reactor health. Always derived, never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TwinState {
    pub core: HealthStatus,
}

impl Default for TwinState {
    fn default() -> Self {
        Self {
            core: HealthStatus::Normal,
        }
    }
}
