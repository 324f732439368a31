//! Configuration validation

use crate::schema::{RawConfig, RawResourceEntry};
use crate::{parse_condition, parse_version};
use standby_api::AllowType;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Resource '{resource}': unknown condition '{value}'")]
    UnknownCondition { resource: String, value: String },

    #[error("Resource '{resource}': max_duration {value}s for '{name}' is negative")]
    NegativeMaxDuration {
        resource: String,
        name: String,
        value: i64,
    },

    #[error("Interval list '{name}' contains non-positive value {value}")]
    InvalidInterval { name: String, value: i64 },

    #[error("Parameter '{name}' must not be negative (got {value})")]
    NegativeTimeout { name: String, value: i64 },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Plugin name cannot be empty")]
    EmptyPluginName,

    #[error("Invalid version '{0}': expected four dot-separated numbers")]
    InvalidVersion(String),

    #[error("Strategy name cannot be empty")]
    EmptyStrategyName,
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(version) = &config.version {
        if parse_version(version).is_none() {
            errors.push(ValidationError::InvalidVersion(version.clone()));
        }
    }

    if let Some(plugin) = &config.service.plugin {
        if plugin.trim().is_empty() {
            errors.push(ValidationError::EmptyPluginName);
        }
    }

    if config.strategies.iter().any(|s| s.trim().is_empty()) {
        errors.push(ValidationError::EmptyStrategyName);
    }

    let params = &config.parameters;
    for (name, value) in [
        ("dark_timeout", params.dark_timeout),
        ("nap_timeout", params.nap_timeout),
        ("nap_maintenance_timeout", params.nap_maintenance_timeout),
        ("sleep_maintenance_timeout", params.sleep_maintenance_timeout),
    ] {
        if let Some(value) = value
            && value < 0
        {
            errors.push(ValidationError::NegativeTimeout {
                name: name.into(),
                value,
            });
        }
    }

    for (name, list) in [
        ("nap_interval", &config.intervals.nap_interval),
        ("sleep_interval", &config.intervals.sleep_interval),
    ] {
        for value in list.iter().flatten() {
            if *value <= 0 {
                errors.push(ValidationError::InvalidInterval {
                    name: name.into(),
                    value: *value,
                });
            }
        }
    }

    if let Some(night) = &config.night {
        for value in [&night.start, &night.end] {
            if let Err(message) = parse_time(value) {
                errors.push(ValidationError::InvalidTimeFormat {
                    value: value.clone(),
                    message,
                });
            }
        }
    }

    for (resource, entries) in &config.resources {
        if AllowType::from_config_name(resource).is_none() {
            errors.push(ValidationError::UnknownResource(resource.clone()));
            continue;
        }
        for entry in entries {
            errors.extend(validate_resource_entry(resource, entry));
        }
    }

    errors
}

fn validate_resource_entry(resource: &str, entry: &RawResourceEntry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for condition in &entry.conditions {
        if parse_condition(condition).is_none() {
            errors.push(ValidationError::UnknownCondition {
                resource: resource.to_string(),
                value: condition.clone(),
            });
        }
    }

    for limited in entry
        .time_limited_processes
        .iter()
        .chain(&entry.time_limited_apps)
    {
        if limited.max_duration < 0 {
            errors.push(ValidationError::NegativeMaxDuration {
                resource: resource.to_string(),
                name: limited.name.clone(),
                value: limited.max_duration,
            });
        }
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = parts[0]
        .parse()
        .map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = parts[1]
        .parse()
        .map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawNightWindow, RawTimeLimited};
    use std::collections::BTreeMap;

    fn empty_config() -> RawConfig {
        RawConfig {
            config_version: 1,
            version: None,
            strategies: vec![],
            service: Default::default(),
            switches: Default::default(),
            parameters: Default::default(),
            intervals: Default::default(),
            night: None,
            resources: BTreeMap::new(),
        }
    }

    fn entry() -> RawResourceEntry {
        RawResourceEntry {
            is_allow: true,
            conditions: vec!["day_standby".into()],
            processes: vec![],
            apps: vec![],
            time_limited_processes: vec![],
            time_limited_apps: vec![],
        }
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("14:30").unwrap(), (14, 30));
        assert_eq!(parse_time("00:00").unwrap(), (0, 0));
        assert_eq!(parse_time("23:59").unwrap(), (23, 59));

        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("invalid").is_err());
    }

    #[test]
    fn test_empty_config_is_valid() {
        assert!(validate_config(&empty_config()).is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = empty_config();
        config.version = Some("1.0".into());
        config.service.plugin = Some("  ".into());
        config.parameters.dark_timeout = Some(-1);
        config.intervals.sleep_interval = Some(vec![60, 0]);
        config.night = Some(RawNightWindow {
            start: "25:00".into(),
            end: "06:00".into(),
        });

        let mut bad_entry = entry();
        bad_entry.conditions.push("evening".into());
        bad_entry.time_limited_apps.push(RawTimeLimited {
            name: "app1".into(),
            max_duration: -5,
        });
        config.resources.insert("network".into(), vec![bad_entry]);
        config.resources.insert("bluetooth".into(), vec![entry()]);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 8);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidVersion(_))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptyPluginName)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::NegativeTimeout { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidInterval { value: 0, .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidTimeFormat { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownCondition { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::NegativeMaxDuration { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownResource(r) if r == "bluetooth")));
    }
}
