//! # skein core
//!
//! Shared building blocks for the skein bot framework:
//!
//! - [`Update`] and [`BotInfo`], the data exchanged with the remote platform
//! - [`ApiError`], the classified failure every remote call reports
//! - [`UpdateSource`], the boundary the polling loop fetches updates through
//!
//! Higher layers (`skein-framework`, `skein-runtime`) build the middleware
//! engine and the acquisition loop on top of these types.

pub mod error;
pub mod source;
pub mod update;

pub use error::{ApiError, ApiResult, BoxError};
pub use source::{GetUpdatesParams, UpdateSource};
pub use update::{BotInfo, MESSAGE_KINDS, Update};
