//! Plugin roles and the registry that resolves them at startup
//!
//! A plugin supplies one implementation of each role. The registry maps
//! plugin names to factories; loading the configured plugin falls back to
//! the built-in default.

use standby_api::{StandbyMessage, StandbyState, StateSnapshot, TimerTask};
use standby_config::{SharedPolicy, DEFAULT_PLUGIN_NAME};
use standby_host_api::{TaskQueue, TimerSource, WakeLock};
use standby_store::Store;
use standby_util::{Result, StandbyError, TimerId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::DeviceStateCache;

/// Collaborators handed to plugin factories
#[derive(Clone)]
pub struct PluginContext {
    pub policy: SharedPolicy,
    pub timers: Arc<dyn TimerSource>,
    pub queue: Arc<dyn TaskQueue>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub device_state: Arc<DeviceStateCache>,
    pub store: Arc<dyn Store>,
}

/// What a constraint evaluation is asked to approve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalParams {
    pub current_state: StandbyState,
    pub current_phase: u32,
    pub next_state: StandbyState,
    pub next_phase: u32,
}

impl EvalParams {
    /// Whether this evaluates a state change rather than a phase step
    pub fn is_state_change(&self) -> bool {
        self.current_state != self.next_state
    }
}

/// Answer to a constraint evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Veto(String),
    /// The answer comes later as `QueuedTask::EvaluationFinished`
    Pending,
}

/// Decides whether a state or phase change may proceed
pub trait ConstraintManager: Send {
    fn init(&mut self) -> Result<()>;
    fn uninit(&mut self);
    fn start_evaluation(&mut self, params: &EvalParams) -> Verdict;
    fn stop_evaluation(&mut self);
    fn is_evaluating(&self) -> bool;
}

/// Sees every dispatched message first
pub trait ListenerManager: Send {
    fn init(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn uninit(&mut self);
    fn handle_event(&mut self, message: &StandbyMessage);
}

/// Applies restriction strategies as the device moves between states
pub trait StrategyManager: Send {
    fn init(&mut self) -> Result<()>;
    fn uninit(&mut self);
    fn handle_event(&mut self, message: &StandbyMessage);
    fn active_strategies(&self) -> Vec<String>;
}

/// The standby state machine
pub trait StateManager: Send {
    fn init(&mut self) -> Result<()>;
    fn uninit(&mut self);
    fn handle_event(&mut self, message: &StandbyMessage, constraints: &mut dyn ConstraintManager);
    fn on_timer(&mut self, id: TimerId, task: &TimerTask, constraints: &mut dyn ConstraintManager);
    fn end_evaluation(&mut self, passed: bool, constraints: &mut dyn ConstraintManager);
    fn snapshot(&self) -> StateSnapshot;
    fn dump(&self) -> String;
}

/// One implementation per role
pub struct PluginSet {
    pub constraint: Box<dyn ConstraintManager>,
    pub listener: Box<dyn ListenerManager>,
    pub strategy: Box<dyn StrategyManager>,
    pub state: Box<dyn StateManager>,
}

pub type PluginFactory = Box<dyn Fn(&PluginContext) -> Result<PluginSet> + Send + Sync>;

/// Named plugin factories
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Registry with no plugins, not even the default
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in default plugin
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_PLUGIN_NAME, crate::create_default_plugin);
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginContext) -> Result<PluginSet> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Load `name`, falling back to the default plugin
    pub fn load(&self, name: &str, ctx: &PluginContext) -> Result<PluginSet> {
        match self.create(name, ctx) {
            Ok(set) => {
                info!(plugin = name, "Plugin loaded");
                return Ok(set);
            }
            Err(e) if name != DEFAULT_PLUGIN_NAME => {
                warn!(plugin = name, error = %e, "Plugin load failed, falling back to default");
            }
            Err(e) => return Err(e),
        }

        self.create(DEFAULT_PLUGIN_NAME, ctx)
            .inspect(|_| info!(plugin = DEFAULT_PLUGIN_NAME, "Plugin loaded"))
            .map_err(|e| StandbyError::plugin(format!("{} and default plugin failed: {}", name, e)))
    }

    fn create(&self, name: &str, ctx: &PluginContext) -> Result<PluginSet> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StandbyError::plugin(format!("unknown plugin {}", name)))?;
        factory(ctx)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use standby_config::StandbyPolicy;
    use standby_host_api::{MockTaskQueue, MockTimerSource, MockWakeLock};
    use standby_store::SqliteStore;

    fn context() -> PluginContext {
        PluginContext {
            policy: SharedPolicy::new(StandbyPolicy::default()),
            timers: Arc::new(MockTimerSource::new()),
            queue: Arc::new(MockTaskQueue::new()),
            wake_lock: Arc::new(MockWakeLock::new()),
            device_state: Arc::new(DeviceStateCache::new()),
            store: Arc::new(SqliteStore::in_memory().unwrap()),
        }
    }

    #[test]
    fn test_load_default() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.names(), vec![DEFAULT_PLUGIN_NAME]);
        let set = registry.load(DEFAULT_PLUGIN_NAME, &context()).unwrap();
        assert_eq!(set.state.snapshot().state, StandbyState::Working);
    }

    #[test]
    fn test_unknown_plugin_falls_back() {
        let registry = PluginRegistry::new();
        assert!(registry.load("vendor-plugin", &context()).is_ok());
    }

    #[test]
    fn test_failing_plugin_falls_back() {
        let mut registry = PluginRegistry::new();
        registry.register("broken", |_| Err(StandbyError::plugin("no symbols")));
        assert!(registry.load("broken", &context()).is_ok());
    }

    #[test]
    fn test_no_plugin_at_all() {
        let registry = PluginRegistry::empty();
        let result = registry.load("vendor-plugin", &context());
        assert!(matches!(result, Err(StandbyError::PluginLoad(_))));
    }
}
