//! Configuration for the skein runtime.
//!
//! Settings are layered with figment: built-in defaults, then config files
//! (`skein.toml` / `skein.yaml`), then `SKEIN_*` environment variables,
//! then programmatic overrides.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LoggingConfig, PollingConfig, RetryConfig, SkeinConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
