//! Shared ambient layer: configuration and telemetry.

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, RealtimeConfig, ReconnectConfig};
pub use telemetry::{
    init_tracing, try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError,
};
