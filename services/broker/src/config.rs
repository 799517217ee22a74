//! Broker configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Unrecognized keys are an error.  Durations are `*_ms` integers.
//!
//! ```toml
//! [broker]
//! id = "broker"
//! bind_addr = "0.0.0.0"
//! frontend_port = 5570
//! backend_port = 5571
//! monitor_port = 5572
//!
//! [timing]
//! ack_deadline_ms = 5000
//! max_retries = 3
//! dedup_window_ms = 600000
//! heartbeat_period_ms = 1000
//! ack_sweep_interval_ms = 1000
//! dedup_gc_interval_ms = 60000
//! shutdown_grace_ms = 5000
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_FRONTEND_PORT: u16 = 5570;
pub const DEFAULT_BACKEND_PORT: u16 = 5571;
pub const DEFAULT_MONITOR_PORT: u16 = 5572;

// ---------------------------------------------------------------------------
// Config type
// ---------------------------------------------------------------------------

/// Resolved broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Logical sender id the broker uses for its own messages.
    pub broker_id: String,
    pub bind_addr: String,
    /// Client-facing endpoint.
    pub frontend_port: u16,
    /// Service-facing endpoint.
    pub backend_port: u16,
    /// Publish-only endpoint republishing every routed message.
    pub monitor_port: u16,
    /// How long a tracked message may stay unacknowledged before a retry.
    pub ack_deadline: Duration,
    /// Retransmissions after the original send; then the entry is dropped.
    pub max_retries: u32,
    /// How long a message id is remembered as seen.
    pub dedup_window: Duration,
    pub heartbeat_period: Duration,
    pub ack_sweep_interval: Duration,
    pub dedup_gc_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            broker_id: "broker".to_owned(),
            bind_addr: "0.0.0.0".to_owned(),
            frontend_port: DEFAULT_FRONTEND_PORT,
            backend_port: DEFAULT_BACKEND_PORT,
            monitor_port: DEFAULT_MONITOR_PORT,
            ack_deadline: Duration::from_secs(5),
            max_retries: 3,
            dedup_window: Duration::from_secs(600),
            heartbeat_period: Duration::from_secs(1),
            ack_sweep_interval: Duration::from_secs(1),
            dedup_gc_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    broker: Option<RawBrokerSection>,
    timing: Option<RawTimingSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBrokerSection {
    id: Option<String>,
    bind_addr: Option<String>,
    frontend_port: Option<u16>,
    backend_port: Option<u16>,
    monitor_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimingSection {
    ack_deadline_ms: Option<u64>,
    max_retries: Option<u32>,
    dedup_window_ms: Option<u64>,
    heartbeat_period_ms: Option<u64>,
    ack_sweep_interval_ms: Option<u64>,
    dedup_gc_interval_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl BrokerConfig {
    /// Load config from a TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let toml_str = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("reading config file '{}': {}", path.display(), e))
        })?;
        Self::load_from_str(&toml_str)
    }

    /// Load config from a TOML string.  Absent keys take their defaults;
    /// unknown keys are rejected.
    pub fn load_from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let defaults = BrokerConfig::default();

        let broker = raw.broker.unwrap_or_default();
        let timing = raw.timing.unwrap_or_default();

        let cfg = BrokerConfig {
            broker_id: broker.id.unwrap_or(defaults.broker_id),
            bind_addr: broker.bind_addr.unwrap_or(defaults.bind_addr),
            frontend_port: broker.frontend_port.unwrap_or(defaults.frontend_port),
            backend_port: broker.backend_port.unwrap_or(defaults.backend_port),
            monitor_port: broker.monitor_port.unwrap_or(defaults.monitor_port),
            ack_deadline: duration_field(timing.ack_deadline_ms, defaults.ack_deadline),
            max_retries: timing.max_retries.unwrap_or(defaults.max_retries),
            dedup_window: duration_field(timing.dedup_window_ms, defaults.dedup_window),
            heartbeat_period: duration_field(timing.heartbeat_period_ms, defaults.heartbeat_period),
            ack_sweep_interval: duration_field(
                timing.ack_sweep_interval_ms,
                defaults.ack_sweep_interval,
            ),
            dedup_gc_interval: duration_field(
                timing.dedup_gc_interval_ms,
                defaults.dedup_gc_interval,
            ),
            shutdown_grace: duration_field(timing.shutdown_grace_ms, defaults.shutdown_grace),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the broker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                "broker.id must not be empty".to_owned(),
            ));
        }
        // Port 0 means "any free port" and may repeat; fixed ports must differ.
        let fixed: Vec<u16> = [self.frontend_port, self.backend_port, self.monitor_port]
            .into_iter()
            .filter(|p| *p != 0)
            .collect();
        let mut deduped = fixed.clone();
        deduped.sort_unstable();
        deduped.dedup();
        if deduped.len() != fixed.len() {
            return Err(ConfigError::InvalidValue(
                "frontend, backend, and monitor ports must be distinct".to_owned(),
            ));
        }
        for (name, d) in [
            ("timing.ack_deadline_ms", self.ack_deadline),
            ("timing.heartbeat_period_ms", self.heartbeat_period),
            ("timing.dedup_window_ms", self.dedup_window),
            ("timing.ack_sweep_interval_ms", self.ack_sweep_interval),
            ("timing.dedup_gc_interval_ms", self.dedup_gc_interval),
            ("timing.shutdown_grace_ms", self.shutdown_grace),
        ] {
            if d.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

fn duration_field(ms: Option<u64>, default: Duration) -> Duration {
    ms.map_or(default, Duration::from_millis)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
