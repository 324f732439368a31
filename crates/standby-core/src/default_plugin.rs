//! Built-in plugin: the default state machine plus simple constraint,
//! listener and strategy managers

use standby_api::{keys, MessageKind, ResourceCondition, StandbyMessage, StandbyState};
use standby_config::SharedPolicy;
use standby_util::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    ConstraintManager, DeviceStateCache, EvalParams, ListenerManager, PluginContext, PluginSet,
    StandbyStateMachine, StrategyManager, Verdict,
};

/// Factory registered under `standby-default`
pub fn create_default_plugin(ctx: &PluginContext) -> Result<PluginSet> {
    Ok(PluginSet {
        constraint: Box::new(DeviceStateConstraint::new(ctx.device_state.clone())),
        listener: Box::new(EventLogListener::default()),
        strategy: Box::new(ConfiguredStrategyManager::new(ctx.policy.clone())),
        state: Box::new(StandbyStateMachine::new(ctx.clone())),
    })
}

/// Vetoes entering Nap or Sleep while a call, a P2P session or a
/// peripheral is active. Answers immediately.
pub struct DeviceStateConstraint {
    device_state: Arc<DeviceStateCache>,
}

impl DeviceStateConstraint {
    pub fn new(device_state: Arc<DeviceStateCache>) -> Self {
        Self { device_state }
    }
}

impl ConstraintManager for DeviceStateConstraint {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn uninit(&mut self) {}

    fn start_evaluation(&mut self, params: &EvalParams) -> Verdict {
        if !params.is_state_change() {
            return Verdict::Pass;
        }
        match self.device_state.any_active() {
            Some(kind) => Verdict::Veto(format!("{:?} is active", kind)),
            None => Verdict::Pass,
        }
    }

    fn stop_evaluation(&mut self) {}

    fn is_evaluating(&self) -> bool {
        false
    }
}

/// Logs every dispatched message
#[derive(Debug, Default)]
pub struct EventLogListener {
    started: bool,
    seen: u64,
}

impl EventLogListener {
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl ListenerManager for EventLogListener {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn uninit(&mut self) {
        self.seen = 0;
    }

    fn handle_event(&mut self, message: &StandbyMessage) {
        if !self.started {
            return;
        }
        self.seen += 1;
        debug!(kind = ?message.kind, action = ?message.action(), "Standby message");
    }
}

/// Applies every configured strategy while the device sleeps
pub struct ConfiguredStrategyManager {
    policy: SharedPolicy,
    active: Vec<String>,
}

impl ConfiguredStrategyManager {
    pub fn new(policy: SharedPolicy) -> Self {
        Self {
            policy,
            active: Vec::new(),
        }
    }

    fn on_state_transit(&mut self, message: &StandbyMessage) {
        let current = message
            .param_i64(keys::CURRENT_STATE)
            .and_then(StandbyState::from_index);
        match current {
            Some(StandbyState::Sleep) if self.active.is_empty() => {
                self.active = self.policy.current().strategies.clone();
                info!(strategies = ?self.active, "Strategies applied");
            }
            Some(StandbyState::Sleep) | Some(StandbyState::Maintenance) => {}
            Some(_) if !self.active.is_empty() => {
                info!(strategies = ?self.active, "Strategies lifted");
                self.active.clear();
            }
            _ => {}
        }
    }
}

impl StrategyManager for ConfiguredStrategyManager {
    fn init(&mut self) -> Result<()> {
        self.active.clear();
        Ok(())
    }

    fn uninit(&mut self) {
        self.active.clear();
    }

    fn handle_event(&mut self, message: &StandbyMessage) {
        match message.kind {
            MessageKind::StateTransit => self.on_state_transit(message),
            MessageKind::ResCtrlConditionChanged if !self.active.is_empty() => {
                let condition = message
                    .param_i64(keys::RES_CTRL_CONDITION)
                    .and_then(|bits| u32::try_from(bits).ok())
                    .map(ResourceCondition::from_bits_truncate);
                info!(condition = ?condition, "Re-applying strategies for new condition");
            }
            MessageKind::AllowListChanged if !self.active.is_empty() => {
                debug!(
                    uid = ?message.param_i64(keys::UID),
                    name = ?message.param_str(keys::NAME),
                    "Allow list changed while strategies are active"
                );
            }
            _ => {}
        }
    }

    fn active_strategies(&self) -> Vec<String> {
        self.active.clone()
    }
}
