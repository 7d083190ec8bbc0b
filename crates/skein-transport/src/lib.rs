//! # skein transport
//!
//! Network implementations of the [`UpdateSource`](skein_core::UpdateSource)
//! boundary.
//!
//! ## Features
//!
//! - `http-client` (default): [`HttpSource`], a reqwest client for
//!   Bot-API-style HTTP endpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  skein-runtime      │  (polling loop, retries)
//! ├─────────────────────┤
//! │  skein-core         │  (UpdateSource, ApiError)
//! ├─────────────────────┤
//! │  skein-transport    │  <- This crate (implementations)
//! ├─────────────────────┤
//! │  Network (HTTP)     │
//! └─────────────────────┘
//! ```
//!
//! Every remote failure is mapped onto [`ApiError`](skein_core::ApiError) so
//! the runtime can tell fatal errors from ones worth retrying.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skein_transport::HttpSource;
//!
//! let source = HttpSource::new(std::env::var("BOT_TOKEN")?)?;
//! let bot = skein_runtime::Bot::builder(source).build();
//! ```

pub mod response;

#[cfg(feature = "http-client")]
pub mod http;

pub use response::{ApiResponse, ResponseParameters, parse_response};

#[cfg(feature = "http-client")]
pub use http::{HttpSource, HttpSourceConfig};
