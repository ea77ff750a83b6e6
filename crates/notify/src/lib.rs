//! Alert delivery for sensor status transitions.
//!
//! This crate provides:
//! - `EdgeTrigger`, which turns per-tick sensor statuses into good→bad transitions
//! - `Notifier` trait for pluggable notification channels
//! - Webhook notifier implementation
//! - Minijinja template rendering for notification messages
//! - Dispatcher that fans a notification out to configured channels
//! - `Alerter`, tying the above together for the tick runner

pub mod alert;
pub mod dispatcher;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use alert::{AlertTransition, Alerter, EdgeTrigger};
pub use dispatcher::Dispatcher;
pub use traits::{DispatchResult, Notification, Notifier, NotifyError};
