//! Default standby state machine
//!
//! ```text
//! Working -> Dark -> Nap <-> Maintenance
//!                     |          ^
//!                     v          |
//!                   Sleep <------+
//! ```
//!
//! Every state arms one transition timer on entry, pointing at a next state
//! computed at entry time. Screen on or charging returns to Working from
//! anywhere. Entering Nap or Sleep goes through constraint evaluation; a
//! veto or a failed entry leaves the machine blocked in its current state
//! until the next common event or device-state change.

use standby_api::{
    actions, keys, MessageKind, QueuedTask, StandbyMessage, StandbyState, StateSnapshot, TimerTask,
};
use standby_config::StandbyPolicy;
use standby_host_api::WakeLock;
use standby_store::{AuditEvent, AuditEventType};
use standby_util::{format_duration, millis_to_duration, Result, StandbyError, TimerId};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{ConstraintManager, EvalParams, PluginContext, StateManager, Verdict};

/// Phases Sleep steps through before the wake lock is let go
pub const SLEEP_FINAL_PHASE: u32 = 2;

/// Saturating walk over a maintenance interval list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceBackoff {
    index: usize,
    started: bool,
}

impl MaintenanceBackoff {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Next window: the first interval on the first call, then one step
    /// further each call, stopping at the last. Empty lists give zero.
    pub fn next(&mut self, intervals: &[Duration]) -> Duration {
        let Some(last) = intervals.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        if self.started {
            self.index = (self.index + 1).min(last);
        } else {
            self.started = true;
            self.index = self.index.min(last);
        }
        intervals[self.index]
    }

    /// Window last handed out, or the first one if none was
    pub fn repeat(&mut self, intervals: &[Duration]) -> Duration {
        if !self.started {
            return self.next(intervals);
        }
        intervals
            .get(self.index)
            .or_else(|| intervals.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Wake lock that is acquired and released at most once per hold
struct WakeLockHolder {
    lock: Arc<dyn WakeLock>,
    held: bool,
}

impl WakeLockHolder {
    fn acquire(&mut self) {
        if self.held {
            return;
        }
        match self.lock.acquire() {
            Ok(()) => self.held = true,
            Err(e) => warn!(error = %e, "Failed to acquire wake lock"),
        }
    }

    fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if let Err(e) = self.lock.release() {
            warn!(error = %e, "Failed to release wake lock");
        }
    }
}

/// Evaluation the machine is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingEval {
    State(StandbyState),
    Phase(u32),
}

/// What entering a state will do, computed before anything is committed
struct EntryPlan {
    timer: Option<(Duration, StandbyState)>,
    nap_deadline_ms: Option<i64>,
    nap_backoff: MaintenanceBackoff,
    sleep_backoff: MaintenanceBackoff,
    maintenance_origin: StandbyState,
}

pub struct StandbyStateMachine {
    ctx: PluginContext,
    current: StandbyState,
    phase: u32,
    blocked: bool,
    screen_on: bool,
    charging: bool,

    next_state: Option<StandbyState>,
    state_timer: Option<TimerId>,
    phase_timer: Option<TimerId>,
    pending: Option<PendingEval>,

    /// State Maintenance returns to
    maintenance_origin: StandbyState,
    nap_deadline_ms: Option<i64>,
    nap_backoff: MaintenanceBackoff,
    sleep_backoff: MaintenanceBackoff,

    wake_lock: WakeLockHolder,
}

impl StandbyStateMachine {
    pub fn new(ctx: PluginContext) -> Self {
        let wake_lock = WakeLockHolder {
            lock: ctx.wake_lock.clone(),
            held: false,
        };
        Self {
            ctx,
            current: StandbyState::Working,
            phase: 0,
            blocked: false,
            screen_on: true,
            charging: false,
            next_state: None,
            state_timer: None,
            phase_timer: None,
            pending: None,
            maintenance_origin: StandbyState::Nap,
            nap_deadline_ms: None,
            nap_backoff: MaintenanceBackoff::default(),
            sleep_backoff: MaintenanceBackoff::default(),
            wake_lock,
        }
    }

    pub fn current_state(&self) -> StandbyState {
        self.current
    }

    pub fn next_state(&self) -> Option<StandbyState> {
        self.next_state
    }

    /// Timer-driven transition
    fn transit(&mut self, next: StandbyState, constraints: &mut dyn ConstraintManager) {
        self.wake_lock.acquire();
        if constraints.is_evaluating() || self.pending.is_some() {
            info!(state = %self.current, "Cancelling running evaluation");
            constraints.stop_evaluation();
            self.pending = None;
        }

        if let Err(e) = self.transit_to(next, constraints) {
            warn!(from = %self.current, to = %next, error = %e, "Transition failed");
            self.block();
        }
    }

    fn transit_to(
        &mut self,
        next: StandbyState,
        constraints: &mut dyn ConstraintManager,
    ) -> Result<()> {
        if matches!(next, StandbyState::Nap | StandbyState::Sleep) {
            let params = EvalParams {
                current_state: self.current,
                current_phase: self.phase,
                next_state: next,
                next_phase: 0,
            };
            match constraints.start_evaluation(&params) {
                Verdict::Pass => {}
                Verdict::Veto(reason) => return Err(StandbyError::vetoed(reason)),
                Verdict::Pending => {
                    debug!(to = %next, "Waiting for constraint evaluation");
                    self.pending = Some(PendingEval::State(next));
                    return Ok(());
                }
            }
        }
        self.enter(next)
    }

    fn block(&mut self) {
        self.blocked = true;
        self.pending = None;
        self.wake_lock.release();
    }

    fn plan_entry(&self, next: StandbyState, previous: StandbyState, now_ms: i64) -> EntryPlan {
        let policy: Arc<StandbyPolicy> = self.ctx.policy.current();
        let mut plan = EntryPlan {
            timer: None,
            nap_deadline_ms: self.nap_deadline_ms,
            nap_backoff: self.nap_backoff,
            sleep_backoff: self.sleep_backoff,
            maintenance_origin: self.maintenance_origin,
        };

        match next {
            StandbyState::Working => {
                plan.nap_deadline_ms = None;
                plan.nap_backoff.reset();
                plan.sleep_backoff.reset();
            }
            StandbyState::Dark => {
                let target = if policy.nap_switch {
                    Some(StandbyState::Nap)
                } else if policy.sleep_switch {
                    Some(StandbyState::Sleep)
                } else {
                    None
                };
                plan.timer = target.map(|t| (policy.timeouts.dark, t));
            }
            StandbyState::Nap => {
                if previous == StandbyState::Dark || plan.nap_deadline_ms.is_none() {
                    let nap_ms = i64::try_from(policy.timeouts.nap.as_millis()).unwrap_or(i64::MAX);
                    plan.nap_deadline_ms = Some(now_ms.saturating_add(nap_ms));
                    plan.nap_backoff.reset();
                }
                let remaining = plan
                    .nap_deadline_ms
                    .map(|deadline| (deadline - now_ms).max(0))
                    .unwrap_or(0);
                let window = if previous == next {
                    plan.nap_backoff.repeat(&policy.nap_intervals)
                } else {
                    plan.nap_backoff.next(&policy.nap_intervals)
                };
                let window_first = !window.is_zero()
                    && (window < millis_to_duration(remaining) || !policy.sleep_switch);
                plan.timer = if window_first {
                    Some((window, StandbyState::Maintenance))
                } else if policy.sleep_switch {
                    Some((millis_to_duration(remaining), StandbyState::Sleep))
                } else {
                    None
                };
            }
            StandbyState::Maintenance => {
                if previous != StandbyState::Maintenance {
                    plan.maintenance_origin = previous;
                }
                let timeout = if plan.maintenance_origin == StandbyState::Sleep {
                    policy.timeouts.sleep_maintenance
                } else {
                    policy.timeouts.nap_maintenance
                };
                plan.timer = Some((timeout, plan.maintenance_origin));
            }
            StandbyState::Sleep => {
                if matches!(previous, StandbyState::Dark | StandbyState::Nap) {
                    plan.sleep_backoff.reset();
                }
                // re-entering a blocked state keeps its window
                let window = if previous == next {
                    plan.sleep_backoff.repeat(&policy.sleep_intervals)
                } else {
                    plan.sleep_backoff.next(&policy.sleep_intervals)
                };
                plan.timer = (!window.is_zero()).then_some((window, StandbyState::Maintenance));
            }
        }
        plan
    }

    /// Enter `next`, arming its transition timer. Nothing is committed if
    /// arming fails.
    fn enter(&mut self, next: StandbyState) -> Result<()> {
        let previous = self.current;
        let now_ms = self.ctx.timers.now_monotonic_ms();
        let plan = self.plan_entry(next, previous, now_ms);

        self.cancel_timers();
        let armed = match plan.timer {
            Some((delay, target)) => {
                let id = self
                    .ctx
                    .timers
                    .arm(delay, TimerTask::TransitNextState { from: next })
                    .map_err(|e| StandbyError::timer(e.to_string()))?;
                debug!(state = %next, next = %target, delay = %format_duration(delay), "Transition timer armed");
                Some((id, target))
            }
            None => None,
        };

        self.current = next;
        self.state_timer = armed.map(|(id, _)| id);
        self.next_state = armed.map(|(_, target)| target);
        self.nap_deadline_ms = plan.nap_deadline_ms;
        self.nap_backoff = plan.nap_backoff;
        self.sleep_backoff = plan.sleep_backoff;
        self.maintenance_origin = plan.maintenance_origin;
        self.pending = None;
        self.blocked = false;

        if previous != next {
            self.phase = 0;
            info!(from = %previous, to = %next, "Standby state changed");
            self.post(
                StandbyMessage::new(MessageKind::StateTransit)
                    .with_param(keys::PREVIOUS_STATE, previous.index() as i64)
                    .with_param(keys::CURRENT_STATE, next.index() as i64),
            );
            if let Err(e) = self.ctx.store.append_audit(AuditEvent::new(
                AuditEventType::StateTransited {
                    from: previous,
                    to: next,
                },
            )) {
                warn!(error = %e, "Failed to audit state transition");
            }

            if next == StandbyState::Sleep {
                self.arm_phase_timer();
                return Ok(());
            }
        }

        self.wake_lock.release();
        Ok(())
    }

    fn arm_phase_timer(&mut self) {
        match self.ctx.timers.arm(
            Duration::ZERO,
            TimerTask::TransitNextPhase {
                state: self.current,
            },
        ) {
            Ok(id) => self.phase_timer = Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to arm phase timer");
                self.wake_lock.release();
            }
        }
    }

    fn advance_phase(&mut self, constraints: &mut dyn ConstraintManager) {
        let next_phase = self.phase + 1;
        let params = EvalParams {
            current_state: self.current,
            current_phase: self.phase,
            next_state: self.current,
            next_phase,
        };
        match constraints.start_evaluation(&params) {
            Verdict::Pass => self.enter_phase(next_phase),
            Verdict::Veto(reason) => {
                info!(state = %self.current, phase = next_phase, reason = %reason, "Phase change vetoed");
                self.wake_lock.release();
            }
            Verdict::Pending => self.pending = Some(PendingEval::Phase(next_phase)),
        }
    }

    fn enter_phase(&mut self, next_phase: u32) {
        let previous = self.phase;
        self.phase = next_phase;
        debug!(state = %self.current, from = previous, to = next_phase, "Phase changed");
        self.post(
            StandbyMessage::new(MessageKind::PhaseTransit)
                .with_param(keys::CURRENT_STATE, self.current.index() as i64)
                .with_param(keys::PREVIOUS_PHASE, previous)
                .with_param(keys::CURRENT_PHASE, next_phase),
        );

        if next_phase >= SLEEP_FINAL_PHASE {
            self.wake_lock.release();
        } else {
            self.arm_phase_timer();
        }
    }

    /// Screen on or charging
    fn wake_up(&mut self, constraints: &mut dyn ConstraintManager) {
        if self.current == StandbyState::Working && !self.blocked {
            return;
        }
        if constraints.is_evaluating() {
            constraints.stop_evaluation();
        }
        self.pending = None;
        if let Err(e) = self.enter(StandbyState::Working) {
            warn!(error = %e, "Failed to return to working");
            self.block();
        }
    }

    /// Screen off or discharging; returns whether the machine moved
    fn maybe_go_dark(&mut self) -> bool {
        if self.current != StandbyState::Working || self.screen_on || self.charging {
            return false;
        }
        if let Err(e) = self.enter(StandbyState::Dark) {
            warn!(error = %e, "Failed to enter dark");
            self.block();
        }
        true
    }

    fn retry_if_blocked(&mut self) {
        if !self.blocked {
            return;
        }
        info!(state = %self.current, "Re-evaluating blocked state");
        if let Err(e) = self.enter(self.current) {
            warn!(state = %self.current, error = %e, "Still blocked");
            self.blocked = true;
        }
    }

    fn cancel_timers(&mut self) {
        for id in [self.state_timer.take(), self.phase_timer.take()]
            .into_iter()
            .flatten()
        {
            if !self.ctx.timers.cancel(id) {
                debug!(timer = %id, "Timer already gone");
            }
        }
    }

    fn post(&self, message: StandbyMessage) {
        if let Err(e) = self.ctx.queue.post(QueuedTask::Message(message)) {
            warn!(error = %e, "Failed to post state message");
        }
    }
}

impl StateManager for StandbyStateMachine {
    fn init(&mut self) -> Result<()> {
        self.cancel_timers();
        self.current = StandbyState::Working;
        self.phase = 0;
        self.blocked = false;
        self.pending = None;
        self.next_state = None;
        self.nap_deadline_ms = None;
        self.nap_backoff.reset();
        self.sleep_backoff.reset();
        debug!("State machine initialized");
        Ok(())
    }

    fn uninit(&mut self) {
        self.cancel_timers();
        self.pending = None;
        self.wake_lock.release();
        debug!("State machine uninitialized");
    }

    fn handle_event(&mut self, message: &StandbyMessage, constraints: &mut dyn ConstraintManager) {
        match message.kind {
            MessageKind::CommonEvent => {
                match message.action() {
                    Some(actions::SCREEN_ON) => {
                        self.screen_on = true;
                        self.wake_up(constraints);
                        return;
                    }
                    Some(actions::CHARGING) => {
                        self.charging = true;
                        self.wake_up(constraints);
                        return;
                    }
                    Some(actions::SCREEN_OFF) => {
                        self.screen_on = false;
                        if self.maybe_go_dark() {
                            return;
                        }
                    }
                    Some(actions::DISCHARGING) => {
                        self.charging = false;
                        if self.maybe_go_dark() {
                            return;
                        }
                    }
                    _ => {}
                }
                self.retry_if_blocked();
            }
            MessageKind::DeviceStateChanged => self.retry_if_blocked(),
            _ => {}
        }
    }

    fn on_timer(&mut self, id: TimerId, task: &TimerTask, constraints: &mut dyn ConstraintManager) {
        match task {
            TimerTask::TransitNextState { from } => {
                if self.state_timer != Some(id) || *from != self.current {
                    debug!(timer = %id, "Ignoring stale transition timer");
                    return;
                }
                self.state_timer = None;
                let Some(next) = self.next_state.take() else {
                    return;
                };
                self.transit(next, constraints);
            }
            TimerTask::TransitNextPhase { state } => {
                if self.phase_timer != Some(id) || *state != self.current {
                    debug!(timer = %id, "Ignoring stale phase timer");
                    return;
                }
                self.phase_timer = None;
                self.advance_phase(constraints);
            }
            _ => {}
        }
    }

    fn end_evaluation(&mut self, passed: bool, _constraints: &mut dyn ConstraintManager) {
        match self.pending.take() {
            None => debug!("Ignoring evaluation result with nothing pending"),
            Some(PendingEval::State(next)) if passed => {
                if let Err(e) = self.enter(next) {
                    warn!(to = %next, error = %e, "Transition failed");
                    self.block();
                }
            }
            Some(PendingEval::State(next)) => {
                info!(from = %self.current, to = %next, "Transition vetoed");
                self.block();
            }
            Some(PendingEval::Phase(phase)) if passed => self.enter_phase(phase),
            Some(PendingEval::Phase(phase)) => {
                info!(state = %self.current, phase, "Phase change vetoed");
                self.wake_lock.release();
            }
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.current,
            phase: self.phase,
            blocked: self.blocked,
            evaluating: self.pending.is_some(),
        }
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "current state: {}", self.current);
        let _ = writeln!(out, "current phase: {}", self.phase);
        let _ = writeln!(out, "blocked: {}", self.blocked);
        let _ = writeln!(out, "evaluating: {}", self.pending.is_some());
        if let Some(next) = self.next_state {
            let _ = writeln!(out, "next state: {}", next);
        }
        let _ = writeln!(out, "screen on: {}, charging: {}", self.screen_on, self.charging);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceStateCache;
    use standby_config::{parse_config, SharedPolicy};
    use standby_host_api::{MockTaskQueue, MockTimerSource, MockWakeLock, TimerSource};
    use standby_store::SqliteStore;

    /// Constraint whose verdicts the test controls
    struct ScriptedConstraint {
        verdict: Verdict,
        evaluating: bool,
        stopped: usize,
    }

    impl ScriptedConstraint {
        fn passing() -> Self {
            Self {
                verdict: Verdict::Pass,
                evaluating: false,
                stopped: 0,
            }
        }
    }

    impl ConstraintManager for ScriptedConstraint {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn uninit(&mut self) {}
        fn start_evaluation(&mut self, _params: &EvalParams) -> Verdict {
            self.evaluating = self.verdict == Verdict::Pending;
            self.verdict.clone()
        }
        fn stop_evaluation(&mut self) {
            self.evaluating = false;
            self.stopped += 1;
        }
        fn is_evaluating(&self) -> bool {
            self.evaluating
        }
    }

    struct Harness {
        machine: StandbyStateMachine,
        timers: Arc<MockTimerSource>,
        queue: Arc<MockTaskQueue>,
        wake_lock: Arc<MockWakeLock>,
    }

    const CONFIG: &str = r#"
        config_version = 1

        [parameters]
        dark_timeout = 10
        nap_timeout = 90
        nap_maintenance_timeout = 5
        sleep_maintenance_timeout = 5

        [intervals]
        nap_interval = [30, 60]
        sleep_interval = [20, 40, 80]
    "#;

    fn harness() -> Harness {
        let timers = Arc::new(MockTimerSource::new());
        let queue = Arc::new(MockTaskQueue::new());
        let wake_lock = Arc::new(MockWakeLock::new());
        let ctx = PluginContext {
            policy: SharedPolicy::new(parse_config(CONFIG).unwrap()),
            timers: timers.clone(),
            queue: queue.clone(),
            wake_lock: wake_lock.clone(),
            device_state: Arc::new(DeviceStateCache::new()),
            store: Arc::new(SqliteStore::in_memory().unwrap()),
        };
        let mut machine = StandbyStateMachine::new(ctx);
        machine.init().unwrap();
        Harness {
            machine,
            timers,
            queue,
            wake_lock,
        }
    }

    impl Harness {
        fn advance(&mut self, secs: u64, constraints: &mut dyn ConstraintManager) {
            for (id, task) in self.timers.advance(Duration::from_secs(secs)) {
                self.machine.on_timer(id, &task, constraints);
            }
        }

        fn screen_off(&mut self, constraints: &mut dyn ConstraintManager) {
            self.machine
                .handle_event(&StandbyMessage::common_event(actions::SCREEN_OFF), constraints);
        }

        fn state(&self) -> StandbyState {
            self.machine.snapshot().state
        }
    }

    #[test]
    fn test_backoff_saturates() {
        let intervals: Vec<Duration> = [1, 2, 3].into_iter().map(Duration::from_secs).collect();
        let mut backoff = MaintenanceBackoff::default();
        let windows: Vec<u64> = (0..5).map(|_| backoff.next(&intervals).as_secs()).collect();
        assert_eq!(windows, vec![1, 2, 3, 3, 3]);

        assert_eq!(backoff.repeat(&intervals), Duration::from_secs(3));

        backoff.reset();
        assert_eq!(backoff.repeat(&intervals), Duration::from_secs(1));
        assert_eq!(backoff.next(&intervals), Duration::from_secs(2));
        backoff.reset();
        assert_eq!(backoff.next(&intervals), Duration::from_secs(1));
        assert_eq!(MaintenanceBackoff::default().next(&[]), Duration::ZERO);
    }

    #[test]
    fn test_full_cycle() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();

        h.screen_off(&mut constraints);
        assert_eq!(h.state(), StandbyState::Dark);
        assert_eq!(h.machine.next_state(), Some(StandbyState::Nap));

        h.advance(10, &mut constraints);
        assert_eq!(h.state(), StandbyState::Nap);
        assert_eq!(h.machine.next_state(), Some(StandbyState::Maintenance));

        h.advance(30, &mut constraints);
        assert_eq!(h.state(), StandbyState::Maintenance);
        assert_eq!(h.machine.next_state(), Some(StandbyState::Nap));

        h.advance(5, &mut constraints);
        assert_eq!(h.state(), StandbyState::Nap);
        // second window (60s) outlasts the 55s left before the nap deadline
        assert_eq!(h.machine.next_state(), Some(StandbyState::Sleep));

        h.advance(55, &mut constraints);
        assert_eq!(h.state(), StandbyState::Sleep);
        assert_eq!(h.machine.next_state(), Some(StandbyState::Maintenance));

        // phase timers are armed with zero delay, one step per delivery
        h.advance(0, &mut constraints);
        h.advance(0, &mut constraints);
        assert_eq!(h.machine.snapshot().phase, SLEEP_FINAL_PHASE);
        assert_eq!(h.wake_lock.acquire_count(), h.wake_lock.release_count());

        h.advance(20, &mut constraints);
        assert_eq!(h.state(), StandbyState::Maintenance);
        h.advance(5, &mut constraints);
        assert_eq!(h.state(), StandbyState::Sleep);
        let armed = h.timers.armed();
        assert!(armed.iter().any(|(_, due, task)| {
            *task == TimerTask::TransitNextState { from: StandbyState::Sleep }
                && *due == h.timers.now_monotonic_ms() + 40_000
        }));
    }

    #[test]
    fn test_state_transit_messages() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);

        let QueuedTask::Message(msg) = h.queue.pop().unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(msg.kind, MessageKind::StateTransit);
        assert_eq!(msg.param_i64(keys::PREVIOUS_STATE), Some(0));
        assert_eq!(msg.param_i64(keys::CURRENT_STATE), Some(1));
    }

    #[test]
    fn test_phase_transit_messages() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);
        h.advance(10, &mut constraints);
        h.advance(30, &mut constraints);
        h.advance(5, &mut constraints);
        h.advance(55, &mut constraints);
        h.queue.drain();

        h.advance(0, &mut constraints);
        let QueuedTask::Message(msg) = h.queue.pop().unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(msg.kind, MessageKind::PhaseTransit);
        assert_eq!(msg.param_i64(keys::PREVIOUS_PHASE), Some(0));
        assert_eq!(msg.param_i64(keys::CURRENT_PHASE), Some(1));
    }

    #[test]
    fn test_screen_on_returns_to_working() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);
        h.advance(10, &mut constraints);
        assert_eq!(h.state(), StandbyState::Nap);

        h.machine
            .handle_event(&StandbyMessage::common_event(actions::SCREEN_ON), &mut constraints);
        assert_eq!(h.state(), StandbyState::Working);
        assert_eq!(h.timers.armed_count(), 0);
    }

    #[test]
    fn test_charging_keeps_working() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.machine
            .handle_event(&StandbyMessage::common_event(actions::CHARGING), &mut constraints);
        h.screen_off(&mut constraints);
        assert_eq!(h.state(), StandbyState::Working);

        h.machine
            .handle_event(&StandbyMessage::common_event(actions::DISCHARGING), &mut constraints);
        assert_eq!(h.state(), StandbyState::Dark);
    }

    #[test]
    fn test_veto_blocks_and_recovers() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);

        constraints.verdict = Verdict::Veto("call active".into());
        h.advance(10, &mut constraints);
        let snapshot = h.machine.snapshot();
        assert_eq!(snapshot.state, StandbyState::Dark);
        assert!(snapshot.blocked);
        assert_eq!(h.wake_lock.acquire_count(), 1);
        assert_eq!(h.wake_lock.release_count(), 1);

        constraints.verdict = Verdict::Pass;
        h.machine.handle_event(
            &StandbyMessage::new(MessageKind::DeviceStateChanged),
            &mut constraints,
        );
        assert!(!h.machine.snapshot().blocked);
        h.advance(10, &mut constraints);
        assert_eq!(h.state(), StandbyState::Nap);
    }

    #[test]
    fn test_timer_during_evaluation_cancels_it() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);
        h.advance(10, &mut constraints);
        h.advance(30, &mut constraints);
        h.advance(5, &mut constraints);
        h.advance(55, &mut constraints);
        assert_eq!(h.state(), StandbyState::Sleep);

        // the first phase step hangs in evaluation
        constraints.verdict = Verdict::Pending;
        h.advance(0, &mut constraints);
        assert!(h.machine.snapshot().evaluating);

        // the maintenance timer fires while evaluating, and arming the
        // maintenance timer fails
        *h.timers.fail_arm.lock().unwrap() = true;
        let acquired = h.wake_lock.acquire_count();
        let released = h.wake_lock.release_count();
        h.advance(20, &mut constraints);

        assert_eq!(constraints.stopped, 1);
        let snapshot = h.machine.snapshot();
        assert_eq!(snapshot.state, StandbyState::Sleep);
        assert!(snapshot.blocked);
        assert!(!snapshot.evaluating);
        assert_eq!(h.wake_lock.acquire_count(), acquired);
        assert_eq!(h.wake_lock.release_count(), released + 1);

        // a late verdict is ignored and releases nothing more
        h.machine.end_evaluation(true, &mut constraints);
        assert_eq!(h.wake_lock.release_count(), released + 1);
    }

    #[test]
    fn test_retry_keeps_maintenance_window() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);
        h.advance(10, &mut constraints);
        h.advance(30, &mut constraints);
        h.advance(5, &mut constraints);
        h.advance(55, &mut constraints);
        h.advance(0, &mut constraints);
        h.advance(0, &mut constraints);
        assert_eq!(h.state(), StandbyState::Sleep);

        *h.timers.fail_arm.lock().unwrap() = true;
        h.advance(20, &mut constraints);
        assert!(h.machine.snapshot().blocked);

        *h.timers.fail_arm.lock().unwrap() = false;
        h.machine.handle_event(
            &StandbyMessage::new(MessageKind::DeviceStateChanged),
            &mut constraints,
        );
        let snapshot = h.machine.snapshot();
        assert_eq!(snapshot.state, StandbyState::Sleep);
        assert!(!snapshot.blocked);
        let armed = h.timers.armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].1, h.timers.now_monotonic_ms() + 20_000);

        // the next regular entry steps on as usual
        h.advance(20, &mut constraints);
        h.advance(5, &mut constraints);
        assert_eq!(h.state(), StandbyState::Sleep);
        assert!(h.timers.armed().iter().any(|(_, due, task)| {
            *task == TimerTask::TransitNextState { from: StandbyState::Sleep }
                && *due == h.timers.now_monotonic_ms() + 40_000
        }));
    }

    #[test]
    fn test_pending_state_evaluation() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);

        constraints.verdict = Verdict::Pending;
        h.advance(10, &mut constraints);
        assert_eq!(h.state(), StandbyState::Dark);
        assert!(h.machine.snapshot().evaluating);

        h.machine.end_evaluation(true, &mut constraints);
        assert_eq!(h.state(), StandbyState::Nap);
        assert_eq!(h.wake_lock.release_count(), 1);
    }

    #[test]
    fn test_uninit_tolerates_fired_timers() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);
        // the dark timer fires out from under the machine
        h.timers.advance(Duration::from_secs(10));
        h.machine.uninit();
        assert_eq!(h.timers.armed_count(), 0);
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut h = harness();
        let mut constraints = ScriptedConstraint::passing();
        h.screen_off(&mut constraints);
        h.machine.on_timer(
            TimerId::new(999),
            &TimerTask::TransitNextState {
                from: StandbyState::Dark,
            },
            &mut constraints,
        );
        assert_eq!(h.state(), StandbyState::Dark);
    }
}
