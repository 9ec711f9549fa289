//! Configuration, file system paths, and logging setup for the broker relay.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    DeliveryLoopConfig, HealthConfig, LogFormat, RelayConfig, ReliableConfig, DEFAULT_LOG_LEVEL,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, LogSettings};
pub use paths::Paths;
