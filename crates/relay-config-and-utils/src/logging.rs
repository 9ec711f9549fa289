//! Logging initialization for the relay.
//!
//! Every relay component logs through `tracing` macros with structured
//! fields. This module installs the process-wide subscriber once at startup:
//!
//! - Level from `RUST_LOG` when set, otherwise the configured default
//! - Compact or JSON lines on stderr
//! - Optional append-only JSONL file (one object per line)
//!
//! ```ignore
//! init_logging(&LogSettings::new("relayd", "info"))?;
//! tracing::info!("relay started");
//! ```

use crate::{ConfigResult, LogFormat};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Settings for the process-wide log subscriber.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Name of the service, recorded once at startup.
    pub service_name: String,
    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Overridden by the `RUST_LOG` environment variable.
    pub default_level: String,
    /// Format of the stderr output.
    pub format: LogFormat,
    /// Optional JSONL file that receives a copy of every log line.
    pub log_file: Option<PathBuf>,
}

impl LogSettings {
    pub fn new(service_name: &str, default_level: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            default_level: default_level.to_string(),
            format: LogFormat::Compact,
            log_file: None,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed (for example
/// by a test harness); the existing one is left in place.
pub fn init_logging(settings: &LogSettings) -> ConfigResult<bool> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_level));

    let compact = (settings.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let json = (settings.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    let file = match &settings.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(compact)
        .with(json)
        .with(file)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %settings.service_name,
            level = %settings.default_level,
            "Logging initialized"
        );
    }

    Ok(installed)
}
