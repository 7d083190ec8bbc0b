//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, PollingConfig, RetryConfig, SkeinConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &SkeinConfig) -> ConfigResult<()> {
    validate_polling_config(&config.polling)?;
    validate_retry_config(&config.retry)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_polling_config(polling: &PollingConfig) -> ConfigResult<()> {
    if !(1..=100).contains(&polling.limit) {
        return Err(ConfigError::validation(format!(
            "Polling limit must be between 1 and 100, got {}",
            polling.limit
        )));
    }

    if let Some(kinds) = &polling.allowed_updates
        && kinds.iter().any(|k| k.is_empty())
    {
        return Err(ConfigError::validation(
            "Allowed update kinds cannot contain empty names",
        ));
    }

    Ok(())
}

fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "File log output requires logging.file_path",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&SkeinConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_polling_limit_bounds() {
        let mut config = SkeinConfig::default();
        config.polling.limit = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));

        config.polling.limit = 101;
        assert!(validate_config(&config).is_err());

        config.polling.limit = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_retry_delays() {
        let mut config = SkeinConfig::default();
        config.retry.initial_delay_ms = 500;
        config.retry.max_delay_ms = 100;
        assert!(validate_config(&config).is_err());

        config.retry.initial_delay_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = SkeinConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("skein.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
