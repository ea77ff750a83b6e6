use std::collections::{BTreeMap, VecDeque};

use reactor_core::SensorKind;

/// Fixed-capacity FIFO of the most recent values of one sensor.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value, evicting the oldest once at capacity.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Owned copy in insertion order (oldest first).
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full windows are the only ones the model may score.
    pub fn is_warm(&self) -> bool {
        self.values.len() >= self.capacity
    }
}

/// Per-sensor rolling windows. Sensors are independent; no cross-sensor state.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    capacity: usize,
    windows: BTreeMap<SensorKind, RollingWindow>,
}

impl WindowBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: BTreeMap::new(),
        }
    }

    pub fn append(&mut self, sensor: SensorKind, value: f64) {
        self.windows
            .entry(sensor)
            .or_insert_with(|| RollingWindow::new(self.capacity))
            .push(value);
    }

    pub fn snapshot(&self, sensor: SensorKind) -> Vec<f64> {
        self.windows
            .get(&sensor)
            .map(RollingWindow::snapshot)
            .unwrap_or_default()
    }

    pub fn len(&self, sensor: SensorKind) -> usize {
        self.windows.get(&sensor).map(RollingWindow::len).unwrap_or(0)
    }

    pub fn is_warm(&self, sensor: SensorKind) -> bool {
        self.windows.get(&sensor).is_some_and(RollingWindow::is_warm)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sensors(&self) -> impl Iterator<Item = SensorKind> + '_ {
        self.windows.keys().copied()
    }
}
