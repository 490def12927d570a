//! Configuration validation logic.

use crate::config::schema::ServerConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a ServerConfig for semantic correctness.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.is_empty() {
        errors.push(ValidationError("service.name must not be empty".to_string()));
    }
    if config.service.port == 0 {
        errors.push(ValidationError("service.port must be > 0".to_string()));
    }

    if config.keepalive.check_period_secs == 0 {
        errors.push(ValidationError(
            "keepalive.check_period_secs must be > 0".to_string(),
        ));
    }
    if config.keepalive.check_timeout_secs == 0 {
        errors.push(ValidationError(
            "keepalive.check_timeout_secs must be > 0".to_string(),
        ));
    }
    if config.keepalive.monitor_period_secs == 0 {
        errors.push(ValidationError(
            "keepalive.monitor_period_secs must be > 0".to_string(),
        ));
    }
    if config.keepalive.receiver_keep_secs <= 0 {
        errors.push(ValidationError(
            "keepalive.receiver_keep_secs must be > 0".to_string(),
        ));
    }

    if config.dispatch.jsonp_enabled && config.dispatch.jsonp_callback_param.is_empty() {
        errors.push(ValidationError(
            "dispatch.jsonp_callback_param must not be empty when JSONP is enabled".to_string(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError(format!(
            "observability.metrics_address '{}' is not a socket address",
            config.observability.metrics_address
        )));
    }

    if config.graceful_timeout_secs == 0 {
        tracing::warn!("graceful_timeout_secs is 0, shutdown will use the 60s default");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
