//! Minijinja template rendering for alert messages.
//!
//! Subject and body templates come from configuration, so they are
//! arbitrary strings and a fresh [`minijinja::Environment`] is created
//! per render call.

use crate::traits::NotifyError;

pub const DEFAULT_SUBJECT_TEMPLATE: &str =
    "[{{ alert.new_status | upper }}] {{ alert.sensor }} left its safe range";

pub const DEFAULT_BODY_TEMPLATE: &str = "Sensor {{ alert.sensor }} changed from \
{{ alert.previous_status }} to {{ alert.new_status }} at tick {{ alert.tick }}: \
value {{ alert.value | round(3) }} {{ alert.unit }} (bounds {{ alert.bounds }}).";

/// Context data available to alert templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    pub alert: AlertContext,
    /// Current timestamp in ISO 8601 format.
    pub now: String,
}

/// The transition being reported.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertContext {
    pub sensor: String,
    pub unit: String,
    pub previous_status: String,
    pub new_status: String,
    pub value: f64,
    /// Rule bounds, formatted as `[min, max]`.
    pub bounds: String,
    pub tick: u64,
    pub timestamp: String,
}

/// Renders notification templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();

        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);

        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Validate that a template string parses without errors.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Global function: read an environment variable by name.
///
/// Returns an empty string (and logs a warning) when unset.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}
