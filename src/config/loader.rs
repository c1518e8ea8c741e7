//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlidingWindowType;
    use crate::resilience::CallOutcome;

    const SAMPLE: &str = r#"
default_dependency = "hello"

[listener]
bind_address = "127.0.0.1:9000"

[[dependencies]]
name = "hello"
base_url = "http://127.0.0.1:3000"
attempt_timeout_ms = 250

[dependencies.circuit_breaker]
failure_rate_threshold = 40.0
sliding_window_type = "time_based"
sliding_window_size = 30
minimum_number_of_calls = 5

[dependencies.retry]
max_attempts = 4
retry_on = ["timeout"]

[[dependencies]]
name = "billing"
base_url = "http://127.0.0.1:3001"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.dependencies.len(), 2);

        let hello = config.dependency("hello").unwrap();
        assert_eq!(hello.attempt_timeout_ms, Some(250));
        assert_eq!(hello.circuit_breaker.failure_rate_threshold, 40.0);
        assert_eq!(hello.circuit_breaker.sliding_window_type, SlidingWindowType::TimeBased);
        assert_eq!(hello.retry.max_attempts, 4);
        assert_eq!(hello.retry.retry_on, vec![CallOutcome::Timeout]);
        // Untouched sections keep their defaults.
        assert_eq!(hello.bulkhead.max_concurrent_calls, 25);

        let billing = config.dependency("billing").unwrap();
        assert_eq!(billing.circuit_breaker.sliding_window_size, 100);
    }

    #[test]
    fn test_parse_rejects_invalid_config() {
        let text = r#"
default_dependency = "missing"

[[dependencies]]
name = "hello"
base_url = "http://127.0.0.1:3000"

[dependencies.retry]
retry_on = ["rejected"]
"#;
        match parse_config(text) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = parse_config(include_str!("../../config/gateway.toml")).unwrap();
        assert_eq!(config.dependencies.len(), 2);
        let inventory = config.dependency("inventory").unwrap();
        assert_eq!(inventory.retry.budget_ratio, Some(0.1));
        assert_eq!(inventory.rate_limiter.limit_for_period, 50);
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.default_dependency.as_deref(), Some("hello"));
        let _ = fs::remove_file(&path);
    }
}
