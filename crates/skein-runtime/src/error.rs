//! Runtime error types.

use thiserror::Error;

use skein_core::{ApiError, BoxError};

/// Why a polling session ended with an error.
#[derive(Error, Debug)]
pub enum RunError {
    /// The identity call failed with a non-retryable error.
    #[error("Failed to initialize bot: {0}")]
    Init(#[source] ApiError),

    /// Removing the webhook before polling failed with a non-retryable error.
    #[error("Failed to delete webhook: {0}")]
    DeleteWebhook(#[source] ApiError),

    /// Fetching updates failed fatally (rejected credentials or a
    /// concurrent consumer).
    #[error("Polling stopped: {0}")]
    Polling(#[source] ApiError),

    /// Middleware failed and no error handler was installed.
    #[error("Unhandled error while processing update {update_id}: {message}")]
    UnhandledBotError {
        /// The update being processed.
        update_id: i64,
        /// The diagnostic message of the wrapped error.
        message: String,
        /// The original middleware error.
        #[source]
        source: BoxError,
    },

    /// The installed error handler itself failed.
    #[error("Error handler failed: {0}")]
    ErrorHandler(#[source] BoxError),
}

/// Result type for runtime operations.
pub type RunResult<T> = Result<T, RunError>;
