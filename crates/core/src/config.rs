use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ReactorError;
use crate::sensor::{Range, SensorKind, SensorSpec};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Ranges are parsed strictly: a malformed range is a startup failure,
/// not a silent fallback.
fn profiled_env_range(profile: &str, key: &str, default: Range) -> Result<Range, ReactorError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw
            .parse::<Range>()
            .map_err(|e| ReactorError::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub sensors: SensorsConfig,
    pub model: ModelConfig,
    pub alert: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
            sensors: SensorsConfig::default(),
            model: ModelConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `REACTOR_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ReactorError> {
        let profile = env_or("REACTOR_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ReactorError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Ok(Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            pipeline: PipelineConfig::from_env_profiled(p),
            sensors: SensorsConfig::from_env_profiled(p)?,
            model: ModelConfig::from_env_profiled(p),
            alert: AlertConfig::from_env_profiled(p)?,
        })
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ReactorError> {
        self.pipeline.validate()?;
        self.sensors.validate()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let p = &self.pipeline;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  pipeline:  tick={}ms window={} scoring_every={} threshold={} spike_p={}",
            p.tick_ms, p.window_size, p.scoring_every, p.score_threshold, p.spike_probability
        );
        for spec in &self.sensors.specs {
            tracing::info!(
                "  sensor:    {:<12} plausible={} bounds={}",
                spec.kind.as_str(), spec.plausible, spec.bounds
            );
        }
        tracing::info!("  model:     path={}", self.model.path.display());
        tracing::info!(
            "  alert:     webhook={} headers={}",
            if self.alert.is_configured() { "configured" } else { "(none)" },
            self.alert.webhook_headers.len()
        );
    }

    /// Return a redacted view safe for API responses (no webhook URL).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "pipeline": self.pipeline,
            "sensors": self.sensors.specs,
            "model": { "path": self.model.path },
            "alert": { "configured": self.alert.is_configured() },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origin: "*".to_string(),
        }
    }
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            host: profiled_env_or(p, "HOST", &d.host),
            port: profiled_env_parse(p, "PORT", d.port),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", &d.cors_origin),
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────

/// One hour.
const MAX_TICK_MS: u64 = 3_600_000;
/// Upper bound for preallocated buffers (window, history, viewer queue).
const MAX_BUFFER_LEN: usize = 100_000;
const MAX_STALE_AFTER_TICKS: u32 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Simulation tick period in milliseconds.
    pub tick_ms: u64,
    /// Rolling window capacity W.
    pub window_size: usize,
    /// Model scoring cadence K, in ticks.
    pub scoring_every: u64,
    /// Model decision score below which a window is anomalous.
    pub score_threshold: f64,
    /// Twin goes critical when an active event exceeds this severity.
    pub critical_severity: f64,
    /// Per-tick probability of injecting a fault spike.
    pub spike_probability: f64,
    /// Bounded anomaly history length.
    pub history_cap: usize,
    /// Per-viewer broadcast queue depth.
    pub viewer_queue: usize,
    /// Feed is reported stale after this many missed ticks.
    pub stale_after_ticks: u32,
    /// Fixed simulator seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            window_size: 50,
            scoring_every: 10,
            score_threshold: -0.2,
            critical_severity: 0.5,
            spike_probability: 0.05,
            history_cap: 50,
            viewer_queue: 32,
            stale_after_ticks: 3,
            seed: None,
        }
    }
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            tick_ms: profiled_env_parse(p, "TICK_MS", d.tick_ms),
            window_size: profiled_env_parse(p, "WINDOW_SIZE", d.window_size),
            scoring_every: profiled_env_parse(p, "SCORING_EVERY", d.scoring_every),
            score_threshold: profiled_env_parse(p, "SCORE_THRESHOLD", d.score_threshold),
            critical_severity: profiled_env_parse(p, "CRITICAL_SEVERITY", d.critical_severity),
            spike_probability: profiled_env_parse(p, "SPIKE_PROBABILITY", d.spike_probability),
            history_cap: profiled_env_parse(p, "HISTORY_CAP", d.history_cap),
            viewer_queue: profiled_env_parse(p, "VIEWER_QUEUE", d.viewer_queue),
            stale_after_ticks: profiled_env_parse(p, "STALE_AFTER_TICKS", d.stale_after_ticks),
            seed: profiled_env_opt(p, "SIM_SEED").and_then(|v| v.parse().ok()),
        }
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }

    pub fn validate(&self) -> Result<(), ReactorError> {
        if self.tick_ms == 0 {
            return Err(ReactorError::Config("TICK_MS must be > 0".into()));
        }
        if self.window_size == 0 {
            return Err(ReactorError::Config("WINDOW_SIZE must be > 0".into()));
        }
        if self.scoring_every == 0 {
            return Err(ReactorError::Config("SCORING_EVERY must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.spike_probability) {
            return Err(ReactorError::Config(format!(
                "SPIKE_PROBABILITY must be within [0, 1], got {}",
                self.spike_probability
            )));
        }
        if !(0.0..=1.0).contains(&self.critical_severity) {
            return Err(ReactorError::Config(format!(
                "CRITICAL_SEVERITY must be within [0, 1], got {}",
                self.critical_severity
            )));
        }
        if !(-0.5..0.5).contains(&self.score_threshold) {
            return Err(ReactorError::Config(format!(
                "SCORE_THRESHOLD must be within [-0.5, 0.5), got {}",
                self.score_threshold
            )));
        }
        if self.history_cap == 0 || self.viewer_queue == 0 {
            return Err(ReactorError::Config(
                "HISTORY_CAP and VIEWER_QUEUE must be > 0".into(),
            ));
        }
        if self.tick_ms > MAX_TICK_MS {
            return Err(ReactorError::Config(format!(
                "TICK_MS must be <= {MAX_TICK_MS}, got {}",
                self.tick_ms
            )));
        }
        for (key, value) in [
            ("WINDOW_SIZE", self.window_size),
            ("HISTORY_CAP", self.history_cap),
            ("VIEWER_QUEUE", self.viewer_queue),
        ] {
            if value > MAX_BUFFER_LEN {
                return Err(ReactorError::Config(format!(
                    "{key} must be <= {MAX_BUFFER_LEN}, got {value}"
                )));
            }
        }
        if self.stale_after_ticks > MAX_STALE_AFTER_TICKS {
            return Err(ReactorError::Config(format!(
                "STALE_AFTER_TICKS must be <= {MAX_STALE_AFTER_TICKS}, got {}",
                self.stale_after_ticks
            )));
        }
        Ok(())
    }
}

// ── Sensors ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    pub specs: Vec<SensorSpec>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            specs: SensorKind::ALL.iter().map(|k| SensorSpec::defaults_for(*k)).collect(),
        }
    }
}

impl SensorsConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ReactorError> {
        let margin: f64 = profiled_env_parse(p, "CRITICAL_MARGIN", 0.1);
        let mut specs = Vec::with_capacity(SensorKind::ALL.len());
        for kind in SensorKind::ALL {
            let d = SensorSpec::defaults_for(kind);
            let suffix = kind.env_suffix();
            specs.push(SensorSpec {
                kind,
                start: profiled_env_parse(p, &format!("START_{suffix}"), d.start),
                step: profiled_env_parse(p, &format!("STEP_{suffix}"), d.step),
                plausible: profiled_env_range(p, &format!("RANGE_{suffix}"), d.plausible)?,
                bounds: profiled_env_range(p, &format!("BOUNDS_{suffix}"), d.bounds)?,
                critical_margin: margin,
            });
        }
        Ok(Self { specs })
    }

    pub fn get(&self, kind: SensorKind) -> Option<&SensorSpec> {
        self.specs.iter().find(|s| s.kind == kind)
    }

    pub fn validate(&self) -> Result<(), ReactorError> {
        if self.specs.is_empty() {
            return Err(ReactorError::Config("no sensors configured".into()));
        }
        for spec in &self.specs {
            spec.validate()?;
        }
        Ok(())
    }
}

// ── Detector model ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the JSON model artifact produced by `train`.
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/anomaly_detector.json"),
        }
    }
}

impl ModelConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: PathBuf::from(profiled_env_or(p, "MODEL_PATH", "models/anomaly_detector.json")),
        }
    }
}

// ── Alerts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub webhook_method: Option<String>,
    /// Extra request headers. Values may reference `${VAR}`.
    pub webhook_headers: BTreeMap<String, String>,
    pub subject_template: Option<String>,
    pub body_template: Option<String>,
}

impl AlertConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ReactorError> {
        Ok(Self {
            webhook_url: profiled_env_opt(p, "ALERT_WEBHOOK_URL"),
            webhook_method: profiled_env_opt(p, "ALERT_WEBHOOK_METHOD"),
            webhook_headers: parse_headers(profiled_env_opt(p, "ALERT_WEBHOOK_HEADERS"))?,
            subject_template: profiled_env_opt(p, "ALERT_SUBJECT_TEMPLATE"),
            body_template: profiled_env_opt(p, "ALERT_BODY_TEMPLATE"),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

/// Headers are given as a JSON object, e.g. `{"Authorization":"Bearer ${TOKEN}"}`.
fn parse_headers(raw: Option<String>) -> Result<BTreeMap<String, String>, ReactorError> {
    match raw {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| ReactorError::Config(format!("ALERT_WEBHOOK_HEADERS: {e}"))),
        None => Ok(BTreeMap::new()),
    }
}
