//! # skein framework
//!
//! The middleware composition engine of the skein bot framework.
//!
//! This layer provides:
//! - [`Next`] and the [`Middleware`] sum type every unit is normalized from
//! - [`Composer`], an ordered aggregator with derivation operators
//!   (`filter`, `branch`, `lazy`, `route`, `fork`, `error_boundary`, ...)
//! - the runner ([`run`]) that drives one context through a chain
//! - [`BotError`], the wrapper pairing a middleware failure with its context
//! - [`Context`] and the filter-query predicates behind `on`, `hears`,
//!   `command` and friends
//!
//! ```rust,ignore
//! use skein_framework::{Composer, Context, from_fn};
//!
//! let bot = Composer::<Context>::new();
//! bot.command("start", from_fn(|ctx, next| async move {
//!     println!("hello from update {}", ctx.update().update_id);
//!     next.run().await
//! }));
//! bot.on("message:text", from_fn(|_ctx, _next| async { Ok(()) }));
//! ```

pub mod composer;
pub mod context;
pub mod error;
pub mod filter;
pub mod middleware;
pub mod runner;

pub use composer::Composer;
pub use context::{Context, TriggerMatch, UpdateContext};
pub use error::{BotError, FilterError, MiddlewareError};
pub use filter::{FilterQuery, Trigger, Triggers};
pub use middleware::{
    Middleware, MiddlewareFn, MiddlewareObj, MiddlewareResult, Next, concat, from_fn,
    pass_through,
};
pub use runner::run;

pub use skein_core::BoxError;
