//! Synthetic sensor feed.
//!
//! Each tick every sensor takes a bounded random-walk step that is clamped
//! to its plausible range. With a configurable probability one sensor per
//! tick emits a spike outside that range instead; spikes never feed back
//! into the walk state.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reactor_core::{ReadingOrigin, SensorKind, SensorReading, SensorSpec};

pub struct Simulator {
    specs: Vec<SensorSpec>,
    current: BTreeMap<SensorKind, f64>,
    spike_probability: f64,
    rng: StdRng,
}

impl Simulator {
    pub fn new(specs: Vec<SensorSpec>, spike_probability: f64, seed: Option<u64>) -> Self {
        let current = specs.iter().map(|s| (s.kind, s.start)).collect();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            specs,
            current,
            spike_probability: spike_probability.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn specs(&self) -> &[SensorSpec] {
        &self.specs
    }

    /// Current random-walk position of a sensor.
    pub fn current(&self, sensor: SensorKind) -> Option<f64> {
        self.current.get(&sensor).copied()
    }

    /// Advance one tick and emit one reading per sensor.
    ///
    /// `overrides` carries externally fed values; an overridden sensor emits
    /// that value as-is and continues its walk from it.
    pub fn step(&mut self, tick: u64, overrides: &BTreeMap<SensorKind, f64>) -> Vec<SensorReading> {
        let spike_target = if self.spike_probability > 0.0
            && !self.specs.is_empty()
            && self.rng.gen_bool(self.spike_probability)
        {
            Some(self.rng.gen_range(0..self.specs.len()))
        } else {
            None
        };

        let mut readings = Vec::with_capacity(self.specs.len());
        for idx in 0..self.specs.len() {
            let spec = self.specs[idx].clone();

            if let Some(&value) = overrides.get(&spec.kind) {
                self.current.insert(spec.kind, value);
                readings.push(SensorReading::new(&spec, value, tick, ReadingOrigin::External));
                continue;
            }

            let previous = self.current.get(&spec.kind).copied().unwrap_or(spec.start);
            let walked = previous + self.rng.gen_range(-spec.step..=spec.step);
            // Clamp after the walk step; spikes below bypass it.
            let value = spec.plausible.clamp(walked);
            self.current.insert(spec.kind, value);

            if spike_target == Some(idx) {
                let spiked = self.spike_value(&spec, value);
                tracing::debug!(sensor = %spec.kind, value = spiked, tick, "injected fault spike");
                readings.push(SensorReading::new(&spec, spiked, tick, ReadingOrigin::Spike));
            } else {
                readings.push(SensorReading::new(&spec, value, tick, ReadingOrigin::Simulated));
            }
        }
        readings
    }

    /// A value strictly outside the plausible range, on a random side.
    fn spike_value(&mut self, spec: &SensorSpec, value: f64) -> f64 {
        let overshoot = self.rng.gen_range(0.1..0.5) * spec.bounds.span();
        if self.rng.gen_bool(0.5) {
            spec.plausible.max + (spec.plausible.max - value) + overshoot
        } else {
            spec.plausible.min - (value - spec.plausible.min) - overshoot
        }
    }
}
