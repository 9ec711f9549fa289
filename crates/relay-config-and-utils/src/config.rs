//! Configuration management for the relay.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Delivery loop pacing and shutdown configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryLoopConfig {
    /// Upper bound on how long the loop sleeps while the queue is empty.
    /// An enqueue wakes it earlier.
    pub idle_poll_interval_ms: u64,
    /// How long the loop waits before re-checking an unreachable broker.
    pub unreachable_backoff_ms: u64,
    /// How long shutdown waits for the in-flight delivery before aborting the worker.
    pub shutdown_timeout_ms: u64,
}

impl Default for DeliveryLoopConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval_ms: 250,
            unreachable_backoff_ms: 200,
            shutdown_timeout_ms: 800,
        }
    }
}

impl DeliveryLoopConfig {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn unreachable_backoff(&self) -> Duration {
        Duration::from_millis(self.unreachable_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Retry and acknowledgement settings for the reliable delivery strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliableConfig {
    /// Total send attempts per record, including the first.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Upper bound on a single send-and-acknowledge round trip.
    pub ack_timeout_ms: u64,
    /// Re-enqueue the payload at the queue tail once retries are exhausted
    /// instead of dropping it.
    pub requeue_exhausted: bool,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
            ack_timeout_ms: 10_000,
            requeue_exhausted: false,
        }
    }
}

impl ReliableConfig {
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Doubles from `initial_retry_delay_ms`, capped at `max_retry_delay_ms`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_retry_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_retry_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Broker health probing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between reachability probes.
    pub probe_interval_ms: u64,
    /// Upper bound on a single probe.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 1_000,
            probe_timeout_ms: 500,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Main relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Directory holding the queue database. Defaults to the base directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub delivery: DeliveryLoopConfig,
    #[serde(default)]
    pub reliable: ReliableConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::default(),
            data_dir: None,
            delivery: DeliveryLoopConfig::default(),
            reliable: ReliableConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the config file under `paths`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file under `paths`.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Resolve the queue database path.
    pub fn queue_database_file(&self, paths: &Paths) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.join("queue.sqlite"),
            None => paths.queue_database_file(),
        }
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) -> ConfigResult<()> {
        if let Ok(log_level) = std::env::var("RELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(dir) = std::env::var("RELAY_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = parse_ms_env("RELAY_SHUTDOWN_TIMEOUT_MS")? {
            self.delivery.shutdown_timeout_ms = ms;
        }
        if let Some(ms) = parse_ms_env("RELAY_PROBE_INTERVAL_MS")? {
            self.health.probe_interval_ms = ms;
        }
        Ok(())
    }
}

fn parse_ms_env(name: &'static str) -> ConfigResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                field: name,
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}
