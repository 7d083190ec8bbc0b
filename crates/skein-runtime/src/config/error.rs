use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// Unknown extension, or its format feature is off.
    #[error("cannot read .{0} config files")]
    UnsupportedFormat(String),

    /// A source failed to parse, or the merged value does not fit the schema.
    #[error("bad configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid configuration: {message}")]
    Validation { message: String },
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Extract(Box::new(err))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
