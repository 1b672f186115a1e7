//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and reports every
//! problem found, not just the first.

use thiserror::Error;

use crate::config::schema::AnchorConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

fn push(errors: &mut Vec<ValidationError>, field: &'static str, message: impl Into<String>) {
    errors.push(ValidationError {
        field,
        message: message.into(),
    });
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AnchorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match url::Url::parse(&config.client.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => push(
            &mut errors,
            "client.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        ),
        Err(e) => push(&mut errors, "client.base_url", format!("invalid URL: {}", e)),
    }

    if config.client.requests_per_second == 0 {
        push(&mut errors, "client.requests_per_second", "must be greater than 0");
    }
    if config.client.burst_size == 0 {
        push(&mut errors, "client.burst_size", "must be greater than 0");
    }
    if config.client.timeout_secs == 0 {
        push(&mut errors, "client.timeout_secs", "must be greater than 0");
    }
    if config.bridge.poll_interval_ms == 0 {
        push(&mut errors, "bridge.poll_interval_ms", "must be greater than 0");
    }
    if config.bridge.hash_cache_capacity == 0 {
        push(&mut errors, "bridge.hash_cache_capacity", "must be greater than 0");
    }
    if config.bridge.timestamp_cache_capacity == 0 {
        push(&mut errors, "bridge.timestamp_cache_capacity", "must be greater than 0");
    }
    if config.bridge.epoch_queue_depth == 0 {
        push(&mut errors, "bridge.epoch_queue_depth", "must be greater than 0");
    }
    if config.wallet.lease_duration_secs == 0 {
        push(&mut errors, "wallet.lease_duration_secs", "must be greater than 0");
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
    fn test_default_config_is_valid() {
        assert!(validate_config(&AnchorConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = AnchorConfig::default();
        config.client.base_url = "not a url".into();
        config.client.requests_per_second = 0;
        config.bridge.poll_interval_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field, "client.base_url");
        assert!(errors
            .iter()
            .any(|e| e.field == "bridge.poll_interval_ms"));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut config = AnchorConfig::default();
        config.client.base_url = "ftp://example.com".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "client.base_url: unsupported scheme 'ftp'"
        );
        let err: &dyn std::error::Error = &errors[0];
        assert!(err.source().is_none());
    }
}
