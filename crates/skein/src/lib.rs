//! # skein
//!
//! A bot framework built around middleware composition.
//!
//! ## Overview
//!
//! Every update flows through one chain of middleware. Each middleware gets
//! the context and a `next` handle, and decides whether and when the rest of
//! the chain runs. A [`Composer`](prelude::Composer) builds that chain and
//! derives sub-chains from it: filters, branches, routes, forks and error
//! boundaries.
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────────────────────┐
//! │ UpdateSource │────▶│ Bot (poll)  │────▶│ Composer chain (per update)  │
//! │ (HTTP, ...)  │     │ retry, stop │     │ use / filter / on / fork ... │
//! └──────────────┘     └─────────────┘     └──────────────────────────────┘
//! ```
//!
//! - **Core**: updates, the remote error taxonomy, the source boundary
//! - **Framework**: middleware, composer, filter queries, contexts
//! - **Runtime**: the polling bot, retries, configuration, logging
//! - **Transport**: an HTTP update source
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skein::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config()?;
//!     init_from_config(&config.logging);
//!
//!     let bot = Bot::builder(HttpSource::new(std::env::var("BOT_TOKEN")?)?)
//!         .config(&config)
//!         .catch(|err| async move {
//!             error!(error = %err, "update failed");
//!             Ok(())
//!         })
//!         .build();
//!
//!     bot.composer().command("start", from_fn(|ctx: Arc<Context>, _next: Next| async move {
//!         info!(update = ctx.update().update_id, "hello");
//!         Ok(())
//!     }));
//!
//!     bot.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `http-client` (default): the reqwest-based [`transport::HttpSource`]

pub use skein_core as core;
pub use skein_framework as framework;
pub use skein_runtime as runtime;
pub use skein_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use skein::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Core data and the source boundary
    pub use skein_core::{
        ApiError, ApiResult, BotInfo, BoxError, GetUpdatesParams, Update, UpdateSource,
    };

    // Middleware composition
    pub use skein_framework::{
        BotError, Composer, Context, FilterQuery, Middleware, MiddlewareResult, Next,
        TriggerMatch, UpdateContext, concat, from_fn,
    };

    // Runtime
    pub use skein_runtime::config::{load_config, load_config_from_file};
    pub use skein_runtime::logging::init_from_config;
    pub use skein_runtime::{Bot, PollingConfig, RetryConfig, RunError, SkeinConfig};

    #[cfg(feature = "http-client")]
    pub use skein_transport::HttpSource;

    // Logging macros
    pub use skein_runtime::prelude::*;
}
