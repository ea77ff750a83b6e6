use std::collections::VecDeque;

use reactor_core::AnomalyEvent;

/// Bounded anomaly log for display; oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct AnomalyHistory {
    cap: usize,
    events: VecDeque<AnomalyEvent>,
}

impl AnomalyHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            events: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, event: AnomalyEvent) {
        if self.events.len() == self.cap {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = AnomalyEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AnomalyEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
