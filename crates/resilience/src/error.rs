//! Configuration validation errors shared by the retry and circuit breaker
//! builders.

use thiserror::Error;

/// Simple configuration error for validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `ConfigError::Invalid` behavior for the config error display
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures `err.to_string().contains("bad value")` evaluates to true.
    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("bad value");
        assert!(err.to_string().contains("bad value"));
    }
}
