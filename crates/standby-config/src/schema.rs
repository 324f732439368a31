//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Content version, four dot-separated numbers (e.g. "1.0.0.0")
    pub version: Option<String>,

    /// Strategy names, in the order they are consulted
    #[serde(default)]
    pub strategies: Vec<String>,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub switches: RawSwitches,

    /// State timeouts, in seconds
    #[serde(default)]
    pub parameters: RawParameters,

    /// Maintenance interval lists, in seconds
    #[serde(default)]
    pub intervals: RawIntervals,

    /// Wall-clock window treated as night standby
    pub night: Option<RawNightWindow>,

    /// Resource policy, keyed by resource name (`network`, `timer`, ...)
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<RawResourceEntry>>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Policy plugin name (default: standby-default)
    pub plugin: Option<String>,

    /// Data directory for store
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSwitches {
    pub nap_switch: Option<bool>,
    pub sleep_switch: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawParameters {
    pub dark_timeout: Option<i64>,
    pub nap_timeout: Option<i64>,
    pub nap_maintenance_timeout: Option<i64>,
    pub sleep_maintenance_timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawIntervals {
    pub nap_interval: Option<Vec<i64>>,
    pub sleep_interval: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawNightWindow {
    /// Start time (HH:MM)
    pub start: String,
    /// End time (HH:MM), may be earlier than start
    pub end: String,
}

/// One policy entry for a resource kind
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawResourceEntry {
    /// Allow-list entry when true, restrict-list entry when false
    #[serde(default = "default_true")]
    pub is_allow: bool,

    /// Conditions this entry applies under, e.g. `"day_standby"` or
    /// `"day_standby|night_standby"`
    #[serde(default)]
    pub conditions: Vec<String>,

    /// Native process names
    #[serde(default)]
    pub processes: Vec<String>,

    /// App names
    #[serde(default)]
    pub apps: Vec<String>,

    #[serde(default)]
    pub time_limited_processes: Vec<RawTimeLimited>,

    #[serde(default)]
    pub time_limited_apps: Vec<RawTimeLimited>,
}

/// Name with a cap on temporary exemptions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTimeLimited {
    pub name: String,
    /// Seconds
    pub max_duration: i64,
}

fn default_true() -> bool {
    true
}
