//! Validated policy structures

use crate::schema::{RawConfig, RawResourceEntry, RawServiceConfig, RawTimeLimited};
use crate::validation::parse_time;
use standby_api::{AllowType, ResourceCondition};
use standby_util::{DailyWindow, WallClock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

/// Plugin used when the configured one cannot be loaded
pub const DEFAULT_PLUGIN_NAME: &str = "standby-default";

/// Policy values the core reads at runtime
pub trait ConfigProvider: Send + Sync {
    /// Cap in seconds for a temporary exemption of `name`. Names without a
    /// time-limited entry get 0.
    fn max_duration(
        &self,
        name: &str,
        resource: &str,
        condition: ResourceCondition,
        is_app: bool,
    ) -> i32;

    /// Names permanently on the allow (`is_allow`) or restrict list
    fn eligible_persist_list(
        &self,
        resource: &str,
        condition: ResourceCondition,
        is_allow: bool,
        is_app: bool,
    ) -> BTreeSet<String>;

    /// Configured strategy names, in order
    fn strategy_names(&self) -> Vec<String>;

    /// Condition in effect right now
    fn current_condition(&self) -> ResourceCondition;
}

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone)]
pub struct StandbyPolicy {
    /// Content version, if the file declares one
    pub version: Option<String>,

    pub service: ServiceConfig,

    pub nap_switch: bool,
    pub sleep_switch: bool,

    pub timeouts: StandbyTimeouts,

    /// Maintenance back-off while napping
    pub nap_intervals: Vec<Duration>,

    /// Maintenance back-off while sleeping
    pub sleep_intervals: Vec<Duration>,

    /// Local time window treated as night standby
    pub night: DailyWindow,

    pub strategies: Vec<String>,

    pub resources: BTreeMap<AllowType, Vec<ResourceConfig>>,
}

impl StandbyPolicy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let params = &raw.parameters;
        let timeouts = StandbyTimeouts {
            dark: seconds_or(params.dark_timeout, 300),
            nap: seconds_or(params.nap_timeout, 1800),
            nap_maintenance: seconds_or(params.nap_maintenance_timeout, 30),
            sleep_maintenance: seconds_or(params.sleep_maintenance_timeout, 60),
        };

        let nap_intervals = convert_intervals(raw.intervals.nap_interval, &[900, 1800]);
        let sleep_intervals =
            convert_intervals(raw.intervals.sleep_interval, &[3600, 7200, 14400]);

        let night = raw
            .night
            .as_ref()
            .and_then(|n| Some(DailyWindow::new(wall_clock(&n.start)?, wall_clock(&n.end)?)))
            .unwrap_or_else(default_night);

        let resources = raw
            .resources
            .into_iter()
            .filter_map(|(name, entries)| {
                let kind = AllowType::from_config_name(&name)?;
                Some((kind, entries.into_iter().map(ResourceConfig::from_raw).collect()))
            })
            .collect();

        Self {
            version: raw.version,
            service: ServiceConfig::from_raw(raw.service),
            nap_switch: raw.switches.nap_switch.unwrap_or(true),
            sleep_switch: raw.switches.sleep_switch.unwrap_or(true),
            timeouts,
            nap_intervals,
            sleep_intervals,
            night,
            strategies: raw.strategies,
            resources,
        }
    }

    /// Condition in effect at the given local time
    pub fn condition_at(&self, now: &chrono::DateTime<chrono::Local>) -> ResourceCondition {
        if self.night.contains(now) {
            ResourceCondition::NIGHT_STANDBY
        } else {
            ResourceCondition::DAY_STANDBY
        }
    }

    /// Entries for a resource that apply under `condition`
    fn entries_for<'a>(
        &'a self,
        resource: &str,
        condition: ResourceCondition,
        is_allow: bool,
    ) -> impl Iterator<Item = &'a ResourceConfig> + 'a {
        AllowType::from_config_name(resource)
            .and_then(|kind| self.resources.get(&kind))
            .into_iter()
            .flatten()
            .filter(move |entry| entry.is_allow == is_allow && entry.applies_to(condition))
    }
}

impl Default for StandbyPolicy {
    fn default() -> Self {
        Self {
            version: None,
            service: ServiceConfig::default(),
            nap_switch: true,
            sleep_switch: true,
            timeouts: StandbyTimeouts::default(),
            nap_intervals: vec![Duration::from_secs(900), Duration::from_secs(1800)],
            sleep_intervals: vec![
                Duration::from_secs(3600),
                Duration::from_secs(7200),
                Duration::from_secs(14400),
            ],
            night: default_night(),
            strategies: Vec::new(),
            resources: BTreeMap::new(),
        }
    }
}

impl ConfigProvider for StandbyPolicy {
    fn max_duration(
        &self,
        name: &str,
        resource: &str,
        condition: ResourceCondition,
        is_app: bool,
    ) -> i32 {
        self.entries_for(resource, condition, true)
            .flat_map(|entry| {
                if is_app {
                    entry.time_limited_apps.iter()
                } else {
                    entry.time_limited_processes.iter()
                }
            })
            .filter(|limited| limited.name == name)
            .map(|limited| i32::try_from(limited.max_duration.as_secs()).unwrap_or(i32::MAX))
            .max()
            .unwrap_or(0)
    }

    fn eligible_persist_list(
        &self,
        resource: &str,
        condition: ResourceCondition,
        is_allow: bool,
        is_app: bool,
    ) -> BTreeSet<String> {
        self.entries_for(resource, condition, is_allow)
            .flat_map(|entry| {
                if is_app {
                    entry.apps.iter()
                } else {
                    entry.processes.iter()
                }
            })
            .cloned()
            .collect()
    }

    fn strategy_names(&self) -> Vec<String> {
        self.strategies.clone()
    }

    fn current_condition(&self) -> ResourceCondition {
        self.condition_at(&standby_util::now())
    }
}

/// Policy handle that can be swapped at runtime (SIGHUP reload)
#[derive(Debug, Clone)]
pub struct SharedPolicy {
    inner: Arc<RwLock<Arc<StandbyPolicy>>>,
}

impl SharedPolicy {
    pub fn new(policy: StandbyPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(policy))),
        }
    }

    /// Snapshot of the policy currently in effect
    pub fn current(&self) -> Arc<StandbyPolicy> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, policy: StandbyPolicy) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Arc::new(policy),
            Err(poisoned) => {
                warn!("Policy lock poisoned, replacing anyway");
                *poisoned.into_inner() = Arc::new(policy);
            }
        }
    }
}

impl ConfigProvider for SharedPolicy {
    fn max_duration(
        &self,
        name: &str,
        resource: &str,
        condition: ResourceCondition,
        is_app: bool,
    ) -> i32 {
        self.current().max_duration(name, resource, condition, is_app)
    }

    fn eligible_persist_list(
        &self,
        resource: &str,
        condition: ResourceCondition,
        is_allow: bool,
        is_app: bool,
    ) -> BTreeSet<String> {
        self.current()
            .eligible_persist_list(resource, condition, is_allow, is_app)
    }

    fn strategy_names(&self) -> Vec<String> {
        self.current().strategy_names()
    }

    fn current_condition(&self) -> ResourceCondition {
        self.current().current_condition()
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub plugin: String,
    pub data_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            plugin: raw
                .plugin
                .unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
            data_dir: raw
                .data_dir
                .unwrap_or_else(standby_util::default_data_dir),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            plugin: DEFAULT_PLUGIN_NAME.to_string(),
            data_dir: standby_util::default_data_dir(),
        }
    }
}

/// How long each state holds before its transition timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandbyTimeouts {
    /// Dark until Nap (or Sleep)
    pub dark: Duration,
    /// Total time in Nap before Sleep
    pub nap: Duration,
    pub nap_maintenance: Duration,
    pub sleep_maintenance: Duration,
}

impl Default for StandbyTimeouts {
    fn default() -> Self {
        Self {
            dark: Duration::from_secs(300),
            nap: Duration::from_secs(1800),
            nap_maintenance: Duration::from_secs(30),
            sleep_maintenance: Duration::from_secs(60),
        }
    }
}

/// Validated policy entry for one resource kind
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub is_allow: bool,
    pub conditions: Vec<ResourceCondition>,
    pub processes: BTreeSet<String>,
    pub apps: BTreeSet<String>,
    pub time_limited_processes: Vec<TimeLimited>,
    pub time_limited_apps: Vec<TimeLimited>,
}

impl ResourceConfig {
    fn from_raw(raw: RawResourceEntry) -> Self {
        Self {
            is_allow: raw.is_allow,
            conditions: raw
                .conditions
                .iter()
                .filter_map(|c| parse_condition(c))
                .collect(),
            processes: raw.processes.into_iter().collect(),
            apps: raw.apps.into_iter().collect(),
            time_limited_processes: raw
                .time_limited_processes
                .into_iter()
                .map(TimeLimited::from_raw)
                .collect(),
            time_limited_apps: raw
                .time_limited_apps
                .into_iter()
                .map(TimeLimited::from_raw)
                .collect(),
        }
    }

    pub fn applies_to(&self, condition: ResourceCondition) -> bool {
        !condition.is_empty() && self.conditions.iter().any(|c| c.contains(condition))
    }
}

/// A name whose temporary exemptions are capped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLimited {
    pub name: String,
    pub max_duration: Duration,
}

impl TimeLimited {
    fn from_raw(raw: RawTimeLimited) -> Self {
        Self {
            name: raw.name,
            max_duration: Duration::from_secs(u64::try_from(raw.max_duration).unwrap_or(0)),
        }
    }
}

/// Parse a `|`-separated condition list such as `day_standby|night_standby`
pub fn parse_condition(value: &str) -> Option<ResourceCondition> {
    value
        .split('|')
        .map(|part| ResourceCondition::from_config_name(part.trim()))
        .try_fold(ResourceCondition::empty(), |acc, c| Some(acc | c?))
        .filter(|c| !c.is_empty())
}

fn seconds_or(value: Option<i64>, default: u64) -> Duration {
    Duration::from_secs(value.and_then(|v| u64::try_from(v).ok()).unwrap_or(default))
}

fn convert_intervals(values: Option<Vec<i64>>, default: &[u64]) -> Vec<Duration> {
    match values {
        Some(values) => values
            .into_iter()
            .filter_map(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .collect(),
        None => default.iter().copied().map(Duration::from_secs).collect(),
    }
}

fn wall_clock(value: &str) -> Option<WallClock> {
    let (hour, minute) = parse_time(value).ok()?;
    WallClock::new(hour, minute)
}

fn default_night() -> DailyWindow {
    DailyWindow::new(WallClock { hour: 22, minute: 0 }, WallClock { hour: 6, minute: 0 })
}
