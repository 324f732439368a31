//! Service facade for callers outside the event loop
//!
//! Every operation checks readiness first, then the caller's permission,
//! then its arguments. State queries go through the task queue as sync
//! tasks so they observe the state machine in queue order.

use standby_api::{
    keys, AllowInfo, CallerInfo, CallerKind, MessageKind, QueuedTask, ReasonCode,
    ResourceRequest, StandbyMessage, StateSnapshot, SystemEvent, BG_TASK_WORK_SCHEDULER,
};
use standby_config::SharedPolicy;
use standby_host_api::TaskQueue;
use standby_util::{Pid, Result, StandbyError, Uid};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{AdmissionEngine, DeviceStateCache};

/// How long a sync task waits for the event loop
pub const SYNC_TASK_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable handle to the running service
#[derive(Clone)]
pub struct StandbyService {
    ready: Arc<AtomicBool>,
    admission: Arc<AdmissionEngine>,
    queue: Arc<dyn TaskQueue>,
    policy: SharedPolicy,
    device_state: Arc<DeviceStateCache>,
    sync_timeout: Duration,
}

impl StandbyService {
    pub fn new(
        ready: Arc<AtomicBool>,
        admission: Arc<AdmissionEngine>,
        queue: Arc<dyn TaskQueue>,
        policy: SharedPolicy,
        device_state: Arc<DeviceStateCache>,
    ) -> Self {
        Self {
            ready,
            admission,
            queue,
            policy,
            device_state,
            sync_timeout: SYNC_TASK_TIMEOUT,
        }
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn apply_allow_resource(
        &self,
        caller: &CallerInfo,
        mut request: ResourceRequest,
    ) -> Result<()> {
        self.ensure_ready()?;
        check_permission(caller, Some(request.reason_code))?;
        request.allow_type = caller.exempted_types(request.allow_type);
        self.admission.grant(&request, caller.pid)
    }

    pub fn unapply_allow_resource(
        &self,
        caller: &CallerInfo,
        mut request: ResourceRequest,
    ) -> Result<()> {
        self.ensure_ready()?;
        check_permission(caller, Some(request.reason_code))?;
        request.allow_type = caller.exempted_types(request.allow_type);
        self.admission.unapply(&request)
    }

    pub fn get_allow_list(
        &self,
        caller: &CallerInfo,
        allow_type: u32,
        reason_code: ReasonCode,
    ) -> Result<Vec<AllowInfo>> {
        self.ensure_ready()?;
        check_permission(caller, Some(reason_code))?;
        self.admission.get_allow_list(allow_type, reason_code)
    }

    pub fn get_restrict_list(
        &self,
        caller: &CallerInfo,
        restrict_type: u32,
        reason_code: ReasonCode,
    ) -> Result<Vec<AllowInfo>> {
        self.ensure_ready()?;
        check_permission(caller, Some(reason_code))?;
        self.admission.get_restrict_list(restrict_type, reason_code)
    }

    /// Restrict set a strategy should enforce; used by strategy plugins
    pub fn get_eligible_restrict_set(
        &self,
        allow_type: u32,
        strategy: &str,
        reason_code: ReasonCode,
    ) -> Result<BTreeSet<String>> {
        self.ensure_ready()?;
        self.admission
            .eligible_restrict_set(allow_type, strategy, reason_code)
    }

    pub fn is_device_in_standby(&self, caller: &CallerInfo) -> Result<bool> {
        self.ensure_ready()?;
        check_permission(caller, None)?;
        Ok(self.state_snapshot()?.is_in_standby())
    }

    /// Ask the event loop for the state machine's current snapshot
    pub fn state_snapshot(&self) -> Result<StateSnapshot> {
        self.ensure_ready()?;
        let (tx, rx) = mpsc::channel();
        self.queue
            .post(QueuedTask::Snapshot(tx))
            .map_err(|e| StandbyError::host(e.to_string()))?;
        rx.recv_timeout(self.sync_timeout)
            .map_err(|_| StandbyError::Timeout("state snapshot".into()))
    }

    pub fn is_strategy_enabled(&self, caller: &CallerInfo, strategy: &str) -> Result<bool> {
        self.ensure_ready()?;
        check_permission(caller, None)?;
        Ok(self
            .policy
            .current()
            .strategies
            .iter()
            .any(|name| name == strategy))
    }

    pub fn report_work_scheduler_status(
        &self,
        caller: &CallerInfo,
        started: bool,
        uid: Uid,
        name: &str,
    ) -> Result<()> {
        self.ensure_ready()?;
        check_permission(caller, None)?;
        debug!(started, uid = %uid, name, "Work scheduler status changed");
        self.dispatch(
            StandbyMessage::new(MessageKind::BgTaskStatusChanged)
                .with_param(keys::BG_TASK_TYPE, BG_TASK_WORK_SCHEDULER)
                .with_param(keys::BG_TASK_STATUS, started)
                .with_param(keys::UID, uid.get())
                .with_param(keys::NAME, name),
        )
    }

    /// Record a device state; a change is dispatched so a blocked state
    /// machine can re-evaluate
    pub fn report_device_state_changed(
        &self,
        caller: &CallerInfo,
        kind: i32,
        enabled: bool,
    ) -> Result<()> {
        self.ensure_ready()?;
        check_permission(caller, None)?;
        info!(kind, enabled, "Device state reported");
        if !self.device_state.set(kind, enabled) {
            return Ok(());
        }
        self.dispatch(device_state_message(kind, enabled))
    }

    pub fn on_process_status_changed(
        &self,
        caller: &CallerInfo,
        uid: Uid,
        pid: Pid,
        name: &str,
        is_created: bool,
    ) -> Result<()> {
        self.ensure_ready()?;
        check_permission(caller, None)?;
        self.dispatch(
            StandbyMessage::new(MessageKind::ProcessStateChanged)
                .with_param(keys::UID, uid.get())
                .with_param(keys::PID, pid.get())
                .with_param(keys::NAME, name)
                .with_param(keys::IS_CREATED, is_created),
        )
    }

    /// Feed a host-observed system event into the service
    pub fn handle_common_event(&self, event: &SystemEvent) -> Result<()> {
        self.ensure_ready()?;
        if let Some((kind, active)) = event.device_state() {
            let kind = kind.index() as i32;
            if self.device_state.set(kind, active) {
                self.dispatch(device_state_message(kind, active))?;
            }
        }
        match event.to_message() {
            Some(message) => self.dispatch(message),
            None => Ok(()),
        }
    }

    /// Post a message for delivery on the event loop
    pub fn dispatch(&self, message: StandbyMessage) -> Result<()> {
        self.ensure_ready()?;
        self.queue.post(QueuedTask::Message(message)).map_err(|e| {
            warn!(error = %e, "Failed to post message");
            StandbyError::host(e.to_string())
        })
    }

    /// State snapshot, configured strategies and the allow-record table
    pub fn dump_state(&self) -> Result<String> {
        let snapshot = self.state_snapshot()?;
        let policy = self.policy.current();
        let mut out = format!(
            "state: {}, phase: {}, blocked: {}, evaluating: {}\n",
            snapshot.state, snapshot.phase, snapshot.blocked, snapshot.evaluating
        );
        out.push_str(&format!("strategies: [{}]\n", policy.strategies.join(", ")));
        out.push_str(&self.admission.dump());
        Ok(out)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StandbyError::NotReady)
        }
    }
}

/// Native callers pass. Apps need the exemption permission, must be system
/// apps and, where a reason code is given, must use the app API.
pub fn check_permission(caller: &CallerInfo, reason_code: Option<ReasonCode>) -> Result<()> {
    let CallerKind::App {
        exemption_permission,
        system_app,
        ..
    } = &caller.kind
    else {
        return Ok(());
    };
    if !exemption_permission {
        return Err(StandbyError::permission(format!(
            "uid {} lacks the exemption permission",
            caller.uid
        )));
    }
    if !system_app {
        return Err(StandbyError::NotSystemApp(caller.uid.get()));
    }
    if let Some(code) = reason_code
        && code != ReasonCode::AppApi
    {
        return Err(StandbyError::permission("apps must use the app API"));
    }
    Ok(())
}

fn device_state_message(kind: i32, enabled: bool) -> StandbyMessage {
    StandbyMessage::new(MessageKind::DeviceStateChanged)
        .with_param(keys::DEVICE_STATE_KIND, kind)
        .with_param(keys::DEVICE_STATE_ENABLED, enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use standby_api::AllowType;

    fn app(exemption_permission: bool, system_app: bool) -> CallerInfo {
        CallerInfo {
            uid: Uid::new(100),
            pid: Pid::new(5),
            kind: CallerKind::App {
                exemption_permission,
                system_app,
                resources_apply: vec![100],
            },
        }
    }

    #[test]
    fn test_native_always_allowed() {
        let caller = CallerInfo::native(Uid::new(0), Pid::new(1));
        assert!(check_permission(&caller, Some(ReasonCode::NativeApi)).is_ok());
        assert!(check_permission(&caller, None).is_ok());
    }

    #[test]
    fn test_app_permission_checks() {
        assert!(matches!(
            check_permission(&app(false, true), None),
            Err(StandbyError::PermissionDenied(_))
        ));
        assert!(matches!(
            check_permission(&app(true, false), None),
            Err(StandbyError::NotSystemApp(100))
        ));
        assert!(matches!(
            check_permission(&app(true, true), Some(ReasonCode::NativeApi)),
            Err(StandbyError::PermissionDenied(_))
        ));
        assert!(check_permission(&app(true, true), Some(ReasonCode::AppApi)).is_ok());
    }

    #[test]
    fn test_app_mask_narrowed_to_declared_types() {
        let caller = CallerInfo::system_app(Uid::new(100), Pid::new(5), vec![101]);
        let mask = (AllowType::NETWORK | AllowType::TIMER).bits();
        assert_eq!(caller.exempted_types(mask), AllowType::NETWORK.bits());
    }
}
