//! Runs a composed chain for a single context.
//!
//! The runner supplies the terminal `next` and nothing else. Errors are not
//! caught here: the caller decides whether to wrap them into a
//! [`BotError`](crate::BotError), hand them to a handler, or propagate them.

use std::sync::Arc;

use crate::middleware::{MiddlewareFn, MiddlewareResult, Next};

/// Drives `ctx` through `middleware` down to the terminal no-op.
pub async fn run<C>(middleware: &MiddlewareFn<C>, ctx: Arc<C>) -> MiddlewareResult {
    middleware(ctx, Next::terminal()).await
}
