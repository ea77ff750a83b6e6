//! Generic HTTP webhook notifier.
//!
//! Delivers alert notifications as JSON payloads to a configured
//! webhook URL with optional custom headers.

use std::collections::HashMap;

use crate::traits::{Notification, Notifier, NotifyError};

/// Delivers notifications as JSON over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and
/// header values are resolved at construction time.
#[derive(Debug)]
pub struct WebhookNotifier {
    /// Target URL (env vars already resolved).
    url: String,
    /// HTTP method (defaults to POST).
    method: reqwest::Method,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier.
    ///
    /// Missing env vars referenced by `url` or header values produce a
    /// [`NotifyError::Config`] error. `method` defaults to `POST`.
    pub fn new(
        url: String,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
        timeout: std::time::Duration,
    ) -> Result<Self, NotifyError> {
        let resolved_url = resolve_env_vars(&url)?;
        if !(resolved_url.starts_with("http://") || resolved_url.starts_with("https://")) {
            return Err(NotifyError::Config(format!(
                "webhook URL must be http(s): {resolved_url}"
            )));
        }

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            client,
        })
    }

    /// Construct a [`WebhookNotifier`] from config-level primitives.
    ///
    /// `method` is parsed from a string (e.g. `"POST"`, `"PUT"`).
    /// Invalid method strings produce [`NotifyError::Config`].
    pub fn from_config(
        url: String,
        method: Option<String>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self, NotifyError> {
        let parsed_method = match method {
            Some(m) => {
                let upper = m.to_uppercase();
                upper
                    .parse::<reqwest::Method>()
                    .map(Some)
                    .map_err(|_| NotifyError::Config(format!("invalid HTTP method: {m}")))?
            }
            None => None,
        };

        Self::new(
            url,
            parsed_method,
            headers.unwrap_or_default(),
            DEFAULT_TIMEOUT,
        )
    }
}

/// Upper bound on one delivery attempt.
const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    /// Deliver a notification as a JSON payload to the configured webhook URL.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_string(notification).map_err(|e| {
            NotifyError::Config(format!("failed to serialize notification: {e}"))
        })?;

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %self.url,
                %status,
                body = %body_text,
                "webhook returned non-2xx status"
            );
            return Err(NotifyError::Rejected(format!(
                "webhook returned {status}: {body_text}"
            )));
        }

        tracing::debug!(
            url = %self.url,
            method = %self.method,
            sensor = %notification.sensor,
            status = %status,
            "webhook notification delivered"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            // Consume the '{'
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name).map_err(|_| {
                NotifyError::Config(format!("env var not found: {var_name}"))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
