//! Fans notifications out to configured channels.
//!
//! Individual channel failures are logged and reported in the results;
//! they never stop delivery to the remaining channels.

use crate::traits::{DispatchResult, Notification, Notifier};

pub struct Dispatcher {
    channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Create an empty dispatcher (alerts are computed but not delivered).
    pub fn empty() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn with_defaults(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.channel_name().to_string()).collect()
    }

    /// Deliver to every channel, one result per channel.
    pub async fn dispatch(&self, notification: &Notification) -> Vec<DispatchResult> {
        if self.channels.is_empty() {
            tracing::debug!(sensor = %notification.sensor, "No notification channels configured");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            let start = std::time::Instant::now();
            let result = channel.send(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        sensor = %notification.sensor,
                        channel = channel.channel_name(),
                        duration_ms,
                        "Notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        sensor = %notification.sensor,
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms,
                        "Notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                sensor: notification.sensor,
                success,
                error,
                duration_ms,
            });
        }

        results
    }
}
