//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("uploads.allowed_mime_types must not be empty")]
    NoMimeTypes,
    #[error("uploads.allowed_mime_types contains malformed entry '{0}'")]
    MalformedMimeType(String),
    #[error("logging.level is not a valid filter: '{0}'")]
    InvalidLogLevel(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Limits that would disable the daemon outright
    let positive: [(&'static str, u64); 8] = [
        ("sessions.max_sessions", config.sessions.max_sessions as u64),
        (
            "sessions.cleanup_interval_minutes",
            config.sessions.cleanup_interval_minutes,
        ),
        ("sessions.timeout_minutes", config.sessions.timeout_minutes),
        ("sessions.close_timeout_secs", config.sessions.close_timeout_secs),
        ("sessions.connect_timeout_secs", config.sessions.connect_timeout_secs),
        ("messages.attempt_timeout_secs", config.messages.attempt_timeout_secs),
        ("messages.max_recipients", config.messages.max_recipients as u64),
        ("uploads.max_file_size", config.uploads.max_file_size as u64),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }

    // MIME allow-list
    if config.uploads.allowed_mime_types.is_empty() {
        errors.push(ValidationError::NoMimeTypes);
    }
    for mime in &config.uploads.allowed_mime_types {
        let well_formed = mime
            .split_once('/')
            .is_some_and(|(t, s)| !t.is_empty() && !s.is_empty() && !s.contains('/'));
        if !well_formed {
            errors.push(ValidationError::MalformedMimeType(mime.clone()));
        }
    }

    if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(config.logging.level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_limits_fail() {
        let mut config = Config::default();
        config.sessions.max_sessions = 0;
        config.messages.max_recipients = 0;

        let errors = validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::Zero("sessions.max_sessions"),
                ValidationError::Zero("messages.max_recipients"),
            ]
        );
    }

    #[test]
    fn test_zero_delay_and_retries_are_allowed() {
        let mut config = Config::default();
        config.messages.default_delay_ms = 0;
        config.messages.max_retries = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_mime_list_checks() {
        let mut config = Config::default();
        config.uploads.allowed_mime_types = vec![];
        assert_eq!(validate(&config).unwrap_err(), vec![ValidationError::NoMimeTypes]);

        config.uploads.allowed_mime_types = vec!["image/png".into(), "png".into()];
        assert_eq!(
            validate(&config).unwrap_err(),
            vec![ValidationError::MalformedMimeType("png".into())]
        );
    }

    #[test]
    fn test_bad_log_level_fails() {
        let mut config = Config::default();
        config.logging.level = "relayd=loud".into();
        let errors = validate(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidLogLevel(_)));
    }
}
