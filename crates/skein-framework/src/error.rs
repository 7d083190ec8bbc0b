//! Error types for the skein framework.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use skein_core::{ApiError, BoxError};

/// Misuse of the middleware protocol.
///
/// These are programming errors. They are reported as failures of the
/// offending stage and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiddlewareError {
    /// A stage invoked its `next` more than once.
    #[error("`next` called more than once in the same middleware invocation")]
    NextCalledTwice,
}

/// Errors produced while parsing a filter query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The query string was empty.
    #[error("empty filter query")]
    Empty,

    /// The query had more than three levels.
    #[error("filter query '{0}' has more than three levels")]
    TooDeep(String),

    /// A level after the first was empty.
    #[error("filter query '{0}' contains an empty level")]
    EmptyLevel(String),

    /// The first level does not name a known update kind.
    #[error("unknown update kind '{kind}' in filter query '{query}'")]
    UnknownKind {
        /// The offending first level.
        kind: String,
        /// The full query.
        query: String,
    },
}

// =============================================================================
// BotError
// =============================================================================

/// A middleware failure paired with the context it happened in.
///
/// Built exactly once per failing dispatch, either by the update dispatcher or
/// by an error boundary, and immutable afterwards.
pub struct BotError<C> {
    error: BoxError,
    ctx: Arc<C>,
    message: String,
}

impl<C> BotError<C> {
    /// Wraps `error`, raised while processing `ctx`.
    pub fn new(error: BoxError, ctx: Arc<C>) -> Self {
        let message = describe(&error);
        Self {
            error,
            ctx,
            message,
        }
    }

    /// The original error.
    pub fn error(&self) -> &BoxError {
        &self.error
    }

    /// The context that was being processed.
    pub fn ctx(&self) -> &Arc<C> {
        &self.ctx
    }

    /// The diagnostic message, `"<Name> in middleware: <message>"`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Splits the wrapper into the original error and the context.
    pub fn into_parts(self) -> (BoxError, Arc<C>) {
        (self.error, self.ctx)
    }
}

/// Names the error for diagnostics. Only affects the message.
fn describe(error: &BoxError) -> String {
    let name = if error.is::<MiddlewareError>() {
        "MiddlewareError"
    } else if error.is::<ApiError>() {
        "ApiError"
    } else if error.is::<FilterError>() {
        "FilterError"
    } else if error.is::<std::io::Error>() {
        "IoError"
    } else {
        "Error"
    };

    let message = error.to_string();
    if message.is_empty() {
        format!("{name} in middleware")
    } else {
        format!("{name} in middleware: {message}")
    }
}

impl<C> fmt::Display for BotError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<C> fmt::Debug for BotError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotError")
            .field("message", &self.message)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<C> std::error::Error for BotError<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}
