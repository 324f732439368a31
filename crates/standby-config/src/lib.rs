//! Configuration parsing and validation for standbyd
//!
//! Supports TOML configuration with:
//! - Versioned schema and content version ordering
//! - State timeouts, switches and maintenance interval lists
//! - Per-resource allow, restrict and time-limited lists
//! - Validation that reports every problem at once

mod policy;
mod schema;
mod validation;
mod version;

pub use policy::*;
pub use schema::*;
pub use validation::*;
pub use version::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<StandbyPolicy> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<StandbyPolicy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(StandbyPolicy::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use standby_api::AllowType;
    use std::time::Duration;

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1
            version = "1.0.0.0"
            strategies = ["network", "running_lock"]

            [service]
            plugin = "standby-default"
            data_dir = "/var/lib/standbyd"

            [switches]
            nap_switch = false

            [parameters]
            dark_timeout = 120
            nap_timeout = 600

            [intervals]
            sleep_interval = [60, 120, 240]

            [night]
            start = "23:00"
            end = "07:00"

            [[resources.network]]
            conditions = ["day_standby", "night_standby"]
            processes = ["netd"]
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.version.as_deref(), Some("1.0.0.0"));
        assert!(!policy.nap_switch);
        assert!(policy.sleep_switch);
        assert_eq!(policy.timeouts.dark, Duration::from_secs(120));
        assert_eq!(policy.timeouts.nap_maintenance, Duration::from_secs(30));
        assert_eq!(
            policy.sleep_intervals,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240)
            ]
        );
        assert_eq!(policy.night.start.hour, 23);
        assert_eq!(policy.strategies.len(), 2);
        assert_eq!(policy.resources[&AllowType::NETWORK].len(), 1);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_config() {
        let config = r#"
            config_version = 1

            [parameters]
            dark_timeout = -10
        "#;
        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { errors }) if errors.len() == 1));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\nstrategies = [\"push\"]\n").unwrap();

        let policy = load_config(&path).unwrap();
        assert_eq!(policy.strategies, vec!["push".to_string()]);
    }
}
