//! Error types shared across the skein crates.
//!
//! Remote calls report an [`ApiError`]. Its variants carry exactly the
//! information the retry helper and the polling loop need to classify a
//! failure: fatal, retry after a server-specified delay, or retry with
//! backoff.

use std::time::Duration;

use thiserror::Error;

/// Boxed error type carried through middleware chains.
pub use tower::BoxError;

// =============================================================================
// API Errors
// =============================================================================

/// Errors reported by the remote platform or the transport in front of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The credentials were rejected (HTTP 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Another instance is consuming updates with the same credentials (HTTP 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The remote asked the caller to slow down (HTTP 429).
    #[error("too many requests{}", retry_after_suffix(.retry_after))]
    TooManyRequests {
        /// Server-specified wait before the next attempt, if any.
        retry_after: Option<Duration>,
    },

    /// The remote failed internally (HTTP 5xx).
    #[error("server error {code}: {description}")]
    Server {
        /// HTTP-like status code.
        code: u16,
        /// Description returned by the remote.
        description: String,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Any other error reported by the remote.
    #[error("api error {code}: {description}")]
    Api {
        /// HTTP-like status code.
        code: u16,
        /// Description returned by the remote.
        description: String,
    },

    /// The call was aborted through its cancellation token.
    #[error("request cancelled")]
    Cancelled,
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl ApiError {
    /// Builds an error from a status code and description, picking the
    /// matching variant.
    pub fn from_status(code: u16, description: impl Into<String>, retry_after: Option<u64>) -> Self {
        let description = description.into();
        match code {
            401 => Self::Unauthorized(description),
            409 => Self::Conflict(description),
            429 => Self::TooManyRequests {
                retry_after: retry_after.map(Duration::from_secs),
            },
            500..=599 => Self::Server { code, description },
            _ => Self::Api { code, description },
        }
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Returns `true` if polling must stop on this error.
    ///
    /// Rejected credentials and a concurrent consumer cannot be fixed by
    /// waiting.
    pub fn is_fatal_for_polling(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Conflict(_))
    }

    /// Returns the server-specified wait, if the remote sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooManyRequests { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns `true` for 5xx-class failures.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Returns the status code, if the remote produced one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::Conflict(_) => Some(409),
            Self::TooManyRequests { .. } => Some(429),
            Self::Server { code, .. } | Self::Api { code, .. } => Some(*code),
            Self::Network(_) | Self::Cancelled => None,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for remote calls.
pub type ApiResult<T> = Result<T, ApiError>;
