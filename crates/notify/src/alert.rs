//! Edge-triggered alerting.
//!
//! [`EdgeTrigger`] remembers the last status of every sensor and reports
//! a transition only when a sensor goes from good to bad. Staying bad,
//! escalating from warning to critical, and recovering all stay silent.
//! [`Alerter`] renders a transition into a [`Notification`] and hands it
//! to the [`Dispatcher`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use reactor_core::{Config, HealthStatus, Range, SensorKind, SensorReading, SensorSpec};

use crate::dispatcher::Dispatcher;
use crate::templating::{
    AlertContext, TemplateContext, TemplateRenderer, DEFAULT_BODY_TEMPLATE,
    DEFAULT_SUBJECT_TEMPLATE,
};
use crate::traits::{DispatchResult, Notification, Notifier, NotifyError};
use crate::webhook::WebhookNotifier;

/// A good→bad status change of one sensor.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AlertTransition {
    pub sensor: SensorKind,
    pub previous: HealthStatus,
    pub current: HealthStatus,
    pub value: f64,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
}

/// Last-known status per sensor. Sensors never seen count as normal.
#[derive(Debug, Default)]
pub struct EdgeTrigger {
    last: BTreeMap<SensorKind, HealthStatus>,
}

impl EdgeTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` and return a transition if it is a good→bad edge.
    pub fn observe(
        &mut self,
        sensor: SensorKind,
        status: HealthStatus,
        value: f64,
        tick: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertTransition> {
        let previous = self.last.insert(sensor, status).unwrap_or(HealthStatus::Normal);
        (!previous.is_bad() && status.is_bad()).then(|| AlertTransition {
            sensor,
            previous,
            current: status,
            value,
            tick,
            timestamp,
        })
    }

    pub fn observe_reading(&mut self, reading: &SensorReading) -> Option<AlertTransition> {
        self.observe(
            reading.sensor,
            reading.status,
            reading.value,
            reading.tick,
            reading.timestamp,
        )
    }

    pub fn last_status(&self, sensor: SensorKind) -> Option<HealthStatus> {
        self.last.get(&sensor).copied()
    }
}

/// Renders transitions and delivers them through the dispatcher.
pub struct Alerter {
    dispatcher: Dispatcher,
    renderer: TemplateRenderer,
    subject_template: String,
    body_template: String,
    bounds: BTreeMap<SensorKind, Range>,
}

impl Alerter {
    /// Templates default to the built-in ones and are syntax-checked here.
    pub fn new(
        dispatcher: Dispatcher,
        subject_template: Option<String>,
        body_template: Option<String>,
        specs: &[SensorSpec],
    ) -> Result<Self, NotifyError> {
        let renderer = TemplateRenderer::new();
        let subject_template =
            subject_template.unwrap_or_else(|| DEFAULT_SUBJECT_TEMPLATE.to_string());
        let body_template = body_template.unwrap_or_else(|| DEFAULT_BODY_TEMPLATE.to_string());
        renderer
            .validate(&subject_template)
            .map_err(|e| NotifyError::Config(format!("invalid subject template: {e}")))?;
        renderer
            .validate(&body_template)
            .map_err(|e| NotifyError::Config(format!("invalid body template: {e}")))?;

        Ok(Self {
            dispatcher,
            renderer,
            subject_template,
            body_template,
            bounds: specs.iter().map(|s| (s.kind, s.bounds)).collect(),
        })
    }

    /// Build from config: one webhook channel when a URL is configured,
    /// no channels otherwise.
    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        let alert = &config.alert;
        let channels: Vec<Box<dyn Notifier>> = match &alert.webhook_url {
            Some(url) => vec![Box::new(WebhookNotifier::from_config(
                url.clone(),
                alert.webhook_method.clone(),
                Some(alert.webhook_headers.clone().into_iter().collect()),
            )?)],
            None => Vec::new(),
        };
        Self::new(
            Dispatcher::with_defaults(channels),
            alert.subject_template.clone(),
            alert.body_template.clone(),
            &config.sensors.specs,
        )
    }

    pub fn is_enabled(&self) -> bool {
        !self.dispatcher.is_empty()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.dispatcher.channel_names()
    }

    /// Render a transition. A template that fails at render time falls
    /// back to a plain message so the alert still goes out.
    pub fn compose(&self, transition: &AlertTransition) -> Notification {
        let ctx = TemplateContext {
            alert: AlertContext {
                sensor: transition.sensor.to_string(),
                unit: transition.sensor.unit().to_string(),
                previous_status: transition.previous.to_string(),
                new_status: transition.current.to_string(),
                value: transition.value,
                bounds: self
                    .bounds
                    .get(&transition.sensor)
                    .map(|b| b.to_string())
                    .unwrap_or_default(),
                tick: transition.tick,
                timestamp: transition.timestamp.to_rfc3339(),
            },
            now: Utc::now().to_rfc3339(),
        };

        let render = |template: &str, fallback: String| {
            self.renderer.render(template, &ctx).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "alert template failed to render; using plain text");
                fallback
            })
        };
        let subject = render(
            &self.subject_template,
            format!("[{}] {}", transition.current, transition.sensor),
        );
        let body = render(
            &self.body_template,
            format!(
                "{} changed from {} to {} (value {})",
                transition.sensor, transition.previous, transition.current, transition.value
            ),
        );

        Notification {
            sensor: transition.sensor,
            previous_status: transition.previous,
            new_status: transition.current,
            value: transition.value,
            timestamp: transition.timestamp,
            subject,
            body,
            metadata: HashMap::from([
                ("tick".to_string(), transition.tick.to_string()),
                ("unit".to_string(), transition.sensor.unit().to_string()),
            ]),
        }
    }

    /// Compose and deliver. Failures are logged by the dispatcher and
    /// reported in the results; nothing is retried.
    pub async fn deliver(&self, transition: &AlertTransition) -> Vec<DispatchResult> {
        let notification = self.compose(transition);
        self.dispatcher.dispatch(&notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::MockNotifier;
    use reactor_core::ReadingOrigin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const NORMAL: HealthStatus = HealthStatus::Normal;
    const BAD: HealthStatus = HealthStatus::Critical;

    #[test]
    fn fires_once_per_good_to_bad_edge() {
        let mut trigger = EdgeTrigger::new();
        let sequence = [NORMAL, NORMAL, BAD, BAD, BAD, NORMAL, BAD];
        let fired: Vec<usize> = sequence
            .iter()
            .enumerate()
            .filter_map(|(i, status)| {
                trigger
                    .observe(SensorKind::Flow, *status, 0.0, i as u64, Utc::now())
                    .map(|_| i)
            })
            .collect();
        assert_eq!(fired, vec![2, 6]);
    }

    #[test]
    fn thirty_bad_ticks_fire_once() {
        let mut trigger = EdgeTrigger::new();
        let fired = (0..30)
            .filter(|t| {
                trigger
                    .observe(SensorKind::Pressure, BAD, 11.0, *t, Utc::now())
                    .is_some()
            })
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn escalation_and_recovery_are_silent() {
        let mut trigger = EdgeTrigger::new();
        let t = Utc::now();
        assert!(trigger.observe(SensorKind::Ph, HealthStatus::Warning, 5.9, 1, t).is_some());
        assert!(trigger.observe(SensorKind::Ph, HealthStatus::Critical, 5.5, 2, t).is_none());
        assert!(trigger.observe(SensorKind::Ph, NORMAL, 7.0, 3, t).is_none());
        assert_eq!(trigger.last_status(SensorKind::Ph), Some(NORMAL));
    }

    #[test]
    fn sensors_are_tracked_independently() {
        let mut trigger = EdgeTrigger::new();
        let t = Utc::now();
        assert!(trigger.observe(SensorKind::Ph, BAD, 5.0, 1, t).is_some());
        assert!(trigger.observe(SensorKind::Flow, BAD, 11.0, 1, t).is_some());
        assert!(trigger.observe(SensorKind::Ph, BAD, 5.0, 2, t).is_none());
    }

    #[test]
    fn transition_records_previous_status() {
        let mut trigger = EdgeTrigger::new();
        let t = Utc::now();
        trigger.observe(SensorKind::Ph, NORMAL, 7.0, 1, t);
        let transition = trigger.observe(SensorKind::Ph, HealthStatus::Warning, 5.9, 2, t).unwrap();
        assert_eq!(transition.previous, NORMAL);
        assert_eq!(transition.current, HealthStatus::Warning);
        assert_eq!(transition.value, 5.9);
    }

    fn counting_alerter(count: Arc<AtomicUsize>, should_fail: bool) -> Alerter {
        let dispatcher = Dispatcher::with_defaults(vec![Box::new(MockNotifier {
            name: "mock".to_string(),
            send_count: count,
            should_fail,
        })]);
        let specs: Vec<SensorSpec> =
            SensorKind::ALL.iter().map(|k| SensorSpec::defaults_for(*k)).collect();
        Alerter::new(dispatcher, None, None, &specs).unwrap()
    }

    #[tokio::test]
    async fn ph_scenario_sends_exactly_one_notification() {
        let count = Arc::new(AtomicUsize::new(0));
        let alerter = counting_alerter(count.clone(), false);
        let spec = SensorSpec::defaults_for(SensorKind::Ph);
        let mut trigger = EdgeTrigger::new();

        let mut fired_at = Vec::new();
        for (i, value) in [7.0, 7.2, 5.5, 5.4, 7.1].into_iter().enumerate() {
            let reading = SensorReading::new(&spec, value, i as u64 + 1, ReadingOrigin::External);
            if let Some(transition) = trigger.observe_reading(&reading) {
                fired_at.push(i + 1);
                let results = alerter.deliver(&transition).await;
                assert!(results[0].success);
            }
        }
        assert_eq!(fired_at, vec![3]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_failure_is_reported_not_raised() {
        let count = Arc::new(AtomicUsize::new(0));
        let alerter = counting_alerter(count.clone(), true);
        let transition = AlertTransition {
            sensor: SensorKind::Flow,
            previous: NORMAL,
            current: BAD,
            value: 12.0,
            tick: 9,
            timestamp: Utc::now(),
        };
        let results = alerter.deliver(&transition).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn compose_fills_payload_and_templates() {
        let alerter = counting_alerter(Arc::new(AtomicUsize::new(0)), false);
        let transition = AlertTransition {
            sensor: SensorKind::Pressure,
            previous: NORMAL,
            current: BAD,
            value: 11.5,
            tick: 4,
            timestamp: Utc::now(),
        };
        let n = alerter.compose(&transition);
        assert_eq!(n.sensor, SensorKind::Pressure);
        assert_eq!(n.previous_status, NORMAL);
        assert_eq!(n.new_status, BAD);
        assert_eq!(n.subject, "[CRITICAL] pressure left its safe range");
        assert!(n.body.contains("[0, 10]"));
        assert_eq!(n.metadata["tick"], "4");

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["sensor"], "pressure");
        assert_eq!(json["previous_status"], "normal");
        assert_eq!(json["new_status"], "critical");
        assert_eq!(json["value"], 11.5);
    }

    #[test]
    fn invalid_configured_template_is_rejected() {
        let result = Alerter::new(
            Dispatcher::empty(),
            Some("{{ unclosed".into()),
            None,
            &[],
        );
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[test]
    fn unconfigured_alerter_has_no_channels() {
        let alerter = Alerter::from_config(&Config::default()).unwrap();
        assert!(!alerter.is_enabled());
    }

    #[test]
    fn configured_webhook_headers_reach_the_channel() {
        let mut config = Config::default();
        config.alert.webhook_url = Some("https://hooks.example/alerts".into());
        config
            .alert
            .webhook_headers
            .insert("X-Api-Key".into(), "${ALERT_TEST_UNSET_KEY_9431}".into());
        match Alerter::from_config(&config) {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("ALERT_TEST_UNSET_KEY_9431")),
            Err(other) => panic!("expected Config error, got: {other:?}"),
            Ok(_) => panic!("unresolved header variable should be rejected"),
        }

        std::env::set_var("ALERT_TEST_SET_KEY_9431", "k");
        config
            .alert
            .webhook_headers
            .insert("X-Api-Key".into(), "${ALERT_TEST_SET_KEY_9431}".into());
        let alerter = Alerter::from_config(&config).unwrap();
        assert_eq!(alerter.channel_names(), vec!["webhook".to_string()]);
        std::env::remove_var("ALERT_TEST_SET_KEY_9431");
    }
}
