//! skein runtime - the long-polling side of the skein bot framework.
//!
//! This crate provides:
//! - [`Bot`], which owns the root composer and runs the polling loop
//! - [`retry::with_retries`], the backoff helper for calls that must succeed
//! - Configuration loading (`skein.toml`, `skein.yaml`, `SKEIN_*` variables)
//! - Logging setup over `tracing-subscriber`
//!
//! ```ignore
//! use skein_runtime::{Bot, config::load_config, logging};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let bot = Bot::builder(source)
//!         .config(&config)
//!         .catch(|err| async move {
//!             tracing::error!(error = %err, "update failed");
//!             Ok(())
//!         })
//!         .build();
//!
//!     bot.composer().command("start", greet);
//!     bot.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;

pub use bot::{Bot, BotBuilder};
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, PollingConfig, RetryConfig, SkeinConfig,
};
pub use error::{RunError, RunResult};
pub use logging::LoggingBuilder;
pub use retry::{Backoff, Strategy, with_retries};

// Handlers log through the same tracing version as the runtime.
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
