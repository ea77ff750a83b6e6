use reactor_core::{AnomalyEvent, HealthStatus, TwinState};

/// Derive the twin state from the active anomaly set.
///
/// Critical when any active event is above `critical_cutoff`, warning
/// when the set is otherwise non-empty, normal when empty.
pub fn derive_twin(active: &[AnomalyEvent], critical_cutoff: f64) -> TwinState {
    let core = if active.iter().any(|e| e.severity() > critical_cutoff) {
        HealthStatus::Critical
    } else if !active.is_empty() {
        HealthStatus::Warning
    } else {
        HealthStatus::Normal
    };
    TwinState { core }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::{BoundSide, SensorKind};

    fn threshold(severity: f64) -> AnomalyEvent {
        AnomalyEvent::threshold(SensorKind::Pressure, 10.5, BoundSide::Above, severity, 1)
    }

    #[test]
    fn empty_set_is_normal() {
        assert_eq!(derive_twin(&[], 0.5).core, HealthStatus::Normal);
    }

    #[test]
    fn low_severity_is_warning() {
        assert_eq!(derive_twin(&[threshold(0.3)], 0.5).core, HealthStatus::Warning);
        // cutoff is strict
        assert_eq!(derive_twin(&[threshold(0.5)], 0.5).core, HealthStatus::Warning);
    }

    #[test]
    fn any_event_above_cutoff_is_critical() {
        let set = vec![
            threshold(0.1),
            AnomalyEvent::model(SensorKind::Flow, -0.45, 0.8, 10),
        ];
        assert_eq!(derive_twin(&set, 0.5).core, HealthStatus::Critical);
    }

    #[test]
    fn derivation_is_pure() {
        let set = vec![threshold(0.9), threshold(0.2)];
        let first = derive_twin(&set, 0.5);
        for _ in 0..10 {
            assert_eq!(derive_twin(&set, 0.5), first);
        }
    }
}
