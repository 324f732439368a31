//! Default paths for standbyd components
//!
//! Paths are user-writable by default:
//! - Config: `$XDG_CONFIG_HOME/standbyd/config.toml` or `~/.config/standbyd/config.toml`
//! - Data: `$XDG_DATA_HOME/standbyd` or `~/.local/share/standbyd`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const STANDBY_CONFIG_ENV: &str = "STANDBY_CONFIG";

/// Environment variable for overriding the data directory
pub const STANDBY_DATA_DIR_ENV: &str = "STANDBY_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "standbyd";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "standbyd.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$STANDBY_CONFIG`
/// 2. `$XDG_CONFIG_HOME/standbyd/config.toml`
/// 3. `~/.config/standbyd/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(STANDBY_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$STANDBY_DATA_DIR`
/// 2. `$XDG_DATA_HOME/standbyd`
/// 3. `~/.local/share/standbyd`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(STANDBY_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking STANDBY_DATA_DIR.
/// Used for config defaults where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
