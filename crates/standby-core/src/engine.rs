//! Event dispatcher
//!
//! The engine is owned by the single consumer of the task queue. Every
//! message is delivered listener -> state -> strategy -> admission
//! housekeeping, in that order, and only while the service is ready.

use standby_api::{
    actions, keys, MessageKind, QueuedTask, StandbyMessage, StandbyState, StateSnapshot, TimerTask,
};
use standby_config::{ConfigProvider, StandbyPolicy};
use standby_host_api::ProcessDirectory;
use standby_store::{AuditEvent, AuditEventType};
use standby_util::{format_duration, Result, StandbyError, TimerId, Uid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{AdmissionEngine, PluginContext, PluginRegistry, PluginSet, StandbyService};

/// The dispatcher and the plugin set it drives
pub struct StandbyEngine {
    plugin_name: String,
    plugins: PluginSet,
    admission: Arc<AdmissionEngine>,
    ctx: PluginContext,
    ready: Arc<AtomicBool>,
    day_night_timer: Option<TimerId>,
}

impl StandbyEngine {
    /// Resolve the configured plugin and build the admission engine
    pub fn new(registry: &PluginRegistry, ctx: PluginContext) -> Result<Self> {
        let plugin_name = ctx.policy.current().service.plugin.clone();
        let plugins = registry.load(&plugin_name, &ctx)?;
        let admission = Arc::new(AdmissionEngine::new(
            Arc::new(ctx.policy.clone()),
            ctx.timers.clone(),
            ctx.queue.clone(),
            ctx.store.clone(),
        ));

        info!(plugin = %plugin_name, "Standby engine created");

        Ok(Self {
            plugin_name,
            plugins,
            admission,
            ctx,
            ready: Arc::new(AtomicBool::new(false)),
            day_night_timer: None,
        })
    }

    /// Handle for callers on other threads
    pub fn service(&self) -> StandbyService {
        StandbyService::new(
            self.ready.clone(),
            self.admission.clone(),
            self.ctx.queue.clone(),
            self.ctx.policy.clone(),
            self.ctx.device_state.clone(),
        )
    }

    pub fn admission(&self) -> &Arc<AdmissionEngine> {
        &self.admission
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Bring every role up, recover persisted exemptions and start
    /// accepting messages
    pub fn init_ready_state(&mut self, processes: &dyn ProcessDirectory) -> Result<()> {
        if self.is_ready() {
            debug!("Standby service already ready");
            return Ok(());
        }

        self.plugins
            .state
            .init()
            .map_err(|e| StandbyError::StateInitFailed(e.to_string()))?;
        self.plugins.strategy.init()?;
        self.plugins.constraint.init()?;
        self.plugins.listener.init()?;
        self.plugins.listener.start()?;

        self.arm_day_night_timer();
        self.admission.recover(processes);

        self.ready.store(true, Ordering::SeqCst);
        info!(plugin = %self.plugin_name, "Standby service ready");
        self.audit(AuditEventType::ServiceStarted {
            plugin: self.plugin_name.clone(),
        });
        Ok(())
    }

    pub fn uninit_ready_state(&mut self) {
        if !self.is_ready() {
            return;
        }

        self.plugins.listener.stop();
        self.plugins.listener.uninit();
        self.plugins.constraint.uninit();
        self.plugins.strategy.uninit();
        self.plugins.state.uninit();

        if let Some(id) = self.day_night_timer.take() {
            self.ctx.timers.cancel(id);
        }

        self.ready.store(false, Ordering::SeqCst);
        info!("Standby service stopped");
        self.audit(AuditEventType::ServiceStopped);
    }

    /// Swap in a new policy. The plugin set stays loaded.
    pub fn reload_policy(&mut self, policy: StandbyPolicy) {
        info!(
            version = policy.version.as_deref().unwrap_or("(none)"),
            strategies = policy.strategies.len(),
            "Policy reloaded"
        );
        self.ctx.policy.replace(policy);
        if self.is_ready() {
            self.arm_day_night_timer();
        }
    }

    /// Consume one item from the task queue
    pub fn handle(&mut self, task: QueuedTask) {
        match task {
            QueuedTask::Message(message) => self.dispatch(message),
            QueuedTask::Timer { id, task } => self.on_timer(id, task),
            QueuedTask::EvaluationFinished { passed } => {
                if !self.is_ready() {
                    debug!("Service not ready, dropping evaluation result");
                    return;
                }
                self.plugins
                    .state
                    .end_evaluation(passed, self.plugins.constraint.as_mut());
            }
            QueuedTask::Snapshot(reply) => {
                if reply.send(self.snapshot()).is_err() {
                    debug!("Snapshot requester went away");
                }
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.plugins.state.snapshot()
    }

    pub fn active_strategies(&self) -> Vec<String> {
        self.plugins.strategy.active_strategies()
    }

    /// State machine, strategy and allow-list dump
    pub fn dump(&self) -> String {
        let mut out = self.plugins.state.dump();
        out.push_str(&format!(
            "active strategies: [{}]\n",
            self.active_strategies().join(", ")
        ));
        out.push_str(&self.admission.dump());
        out
    }

    fn dispatch(&mut self, message: StandbyMessage) {
        if !self.is_ready() {
            debug!(kind = ?message.kind, "Service not ready, dropping message");
            return;
        }

        self.plugins.listener.handle_event(&message);
        self.plugins
            .state
            .handle_event(&message, self.plugins.constraint.as_mut());
        self.plugins.strategy.handle_event(&message);
        self.housekeeping(&message);
    }

    fn housekeeping(&mut self, message: &StandbyMessage) {
        if message.kind != MessageKind::CommonEvent {
            return;
        }
        match message.action() {
            Some(actions::PACKAGE_REMOVED) => {
                let uid = message
                    .param_i64(keys::UID)
                    .and_then(|uid| i32::try_from(uid).ok());
                match (uid, message.param_str(keys::NAME)) {
                    (Some(uid), Some(name)) => {
                        info!(uid, name, "Package removed, dropping its exemptions");
                        self.admission
                            .remove_app_allow_record(Uid::new(uid), name, true);
                    }
                    _ => warn!("Package removed event without uid or name"),
                }
            }
            Some(actions::TIME_CHANGED) | Some(actions::TIMEZONE_CHANGED) => {
                debug!("Wall clock changed, re-arming day/night switch");
                self.arm_day_night_timer();
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, id: TimerId, task: TimerTask) {
        debug!(timer = %id, task = task.label(), "Timer fired");
        match &task {
            TimerTask::TransitNextState { .. } | TimerTask::TransitNextPhase { .. } => {
                if !self.is_ready() {
                    debug!(timer = %id, "Service not ready, dropping state timer");
                    return;
                }
                self.plugins
                    .state
                    .on_timer(id, &task, self.plugins.constraint.as_mut());
            }
            TimerTask::RevokeExpired {
                uid,
                name,
                allow_type,
            } => self.admission.revoke(*uid, name, *allow_type, false),
            TimerTask::DayNightSwitch => self.on_day_night_switch(id),
        }
    }

    fn on_day_night_switch(&mut self, id: TimerId) {
        if self.day_night_timer != Some(id) {
            debug!(timer = %id, "Ignoring stale day/night timer");
            return;
        }
        self.day_night_timer = None;
        if !self.is_ready() {
            return;
        }

        if self.snapshot().state == StandbyState::Sleep {
            let condition = self.ctx.policy.current_condition();
            info!(condition = ?condition, "Resource condition changed while sleeping");
            self.dispatch(
                StandbyMessage::new(MessageKind::ResCtrlConditionChanged)
                    .with_param(keys::RES_CTRL_CONDITION, condition.bits()),
            );
        }
        self.arm_day_night_timer();
    }

    fn arm_day_night_timer(&mut self) {
        if let Some(id) = self.day_night_timer.take() {
            self.ctx.timers.cancel(id);
        }
        let delay = self
            .ctx
            .policy
            .current()
            .night
            .until_next_edge(&standby_util::now());
        match self.ctx.timers.arm(delay, TimerTask::DayNightSwitch) {
            Ok(id) => {
                debug!(delay = %format_duration(delay), "Day/night switch armed");
                self.day_night_timer = Some(id);
            }
            Err(e) => warn!(error = %e, "Failed to arm day/night switch"),
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.ctx.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit entry");
        }
    }
}
