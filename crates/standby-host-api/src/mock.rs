//! Mock collaborators for testing
//!
//! Timers run on a manual clock: nothing fires until the test calls
//! [`MockTimerSource::advance`].

use standby_api::{QueuedTask, TimerTask};
use standby_util::TimerId;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{HostError, HostResult, ProcessDirectory, TaskQueue, TimerSource, WakeLock};

#[derive(Debug, Clone)]
struct PendingTimer {
    due_ms: i64,
    task: TimerTask,
}

/// Timer source driven by a manual clock
pub struct MockTimerSource {
    now_ms: Mutex<i64>,
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<TimerId, PendingTimer>>,

    /// Configure arm to fail
    pub fail_arm: Arc<Mutex<bool>>,
}

impl MockTimerSource {
    pub fn new() -> Self {
        Self {
            now_ms: Mutex::new(0),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
            fail_arm: Arc::new(Mutex::new(false)),
        }
    }

    /// Start the clock at `now_ms`
    pub fn starting_at(now_ms: i64) -> Self {
        let source = Self::new();
        *source.now_ms.lock().unwrap() = now_ms;
        source
    }

    /// Move the clock forward and return the timers that came due, earliest
    /// first. Fired timers are forgotten.
    pub fn advance(&self, by: Duration) -> Vec<(TimerId, TimerTask)> {
        let now = {
            let mut now = self.now_ms.lock().unwrap();
            *now += by.as_millis() as i64;
            *now
        };

        let mut pending = self.pending.lock().unwrap();
        let mut due: Vec<(i64, TimerId)> = pending
            .iter()
            .filter(|(_, timer)| timer.due_ms <= now)
            .map(|(id, timer)| (timer.due_ms, *id))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| pending.remove(&id).map(|timer| (id, timer.task)))
            .collect()
    }

    /// Armed timers as `(id, due_ms, task)`, earliest first
    pub fn armed(&self) -> Vec<(TimerId, i64, TimerTask)> {
        let mut armed: Vec<_> = self
            .pending
            .lock()
            .unwrap()
            .iter()
            .map(|(id, timer)| (*id, timer.due_ms, timer.task.clone()))
            .collect();
        armed.sort_by_key(|(id, due, _)| (*due, *id));
        armed
    }

    pub fn armed_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Default for MockTimerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for MockTimerSource {
    fn arm(&self, delay: Duration, task: TimerTask) -> HostResult<TimerId> {
        if *self.fail_arm.lock().unwrap() {
            return Err(HostError::TimerArm("Mock arm failure".into()));
        }

        let id = TimerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let due_ms = *self.now_ms.lock().unwrap() + delay.as_millis() as i64;
        self.pending
            .lock()
            .unwrap()
            .insert(id, PendingTimer { due_ms, task });
        Ok(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.pending.lock().unwrap().remove(&id).is_some()
    }

    fn now_monotonic_ms(&self) -> i64 {
        *self.now_ms.lock().unwrap()
    }
}

/// Task queue that just records what was posted
#[derive(Default)]
pub struct MockTaskQueue {
    tasks: Mutex<VecDeque<QueuedTask>>,

    /// Configure post to fail
    pub fail_post: Arc<Mutex<bool>>,
}

impl MockTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<QueuedTask> {
        self.tasks.lock().unwrap().pop_front()
    }

    pub fn drain(&self) -> Vec<QueuedTask> {
        self.tasks.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskQueue for MockTaskQueue {
    fn post(&self, task: QueuedTask) -> HostResult<()> {
        if *self.fail_post.lock().unwrap() {
            return Err(HostError::QueueClosed);
        }
        self.tasks.lock().unwrap().push_back(task);
        Ok(())
    }
}

/// Fixed process table
#[derive(Default)]
pub struct MockProcessDirectory {
    processes: Mutex<HashMap<i32, String>>,

    /// Configure the lookup to fail
    pub fail_lookup: Arc<Mutex<bool>>,
}

impl MockProcessDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process(self, pid: i32, name: impl Into<String>) -> Self {
        self.processes.lock().unwrap().insert(pid, name.into());
        self
    }
}

impl ProcessDirectory for MockProcessDirectory {
    fn running_processes(&self) -> HostResult<HashMap<i32, String>> {
        if *self.fail_lookup.lock().unwrap() {
            return Err(HostError::ProcessDirectory("Mock lookup failure".into()));
        }
        Ok(self.processes.lock().unwrap().clone())
    }
}

/// Wake lock that counts the calls it receives
#[derive(Default)]
pub struct MockWakeLock {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MockWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl WakeLock for MockWakeLock {
    fn acquire(&self) -> HostResult<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> HostResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use standby_api::StandbyState;
    use standby_util::Uid;

    fn revoke_task(name: &str) -> TimerTask {
        TimerTask::RevokeExpired {
            uid: Uid::new(100),
            name: name.into(),
            allow_type: 2,
        }
    }

    #[test]
    fn test_mock_timers_fire_in_due_order() {
        let timers = MockTimerSource::new();
        let late = timers.arm(Duration::from_secs(20), revoke_task("late")).unwrap();
        let early = timers.arm(Duration::from_secs(10), revoke_task("early")).unwrap();

        assert!(timers.advance(Duration::from_secs(5)).is_empty());

        let fired = timers.advance(Duration::from_secs(20));
        let ids: Vec<TimerId> = fired.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![early, late]);
        assert_eq!(timers.armed_count(), 0);
        assert_eq!(timers.now_monotonic_ms(), 25_000);
    }

    #[test]
    fn test_mock_cancel_is_idempotent() {
        let timers = MockTimerSource::new();
        let id = timers
            .arm(
                Duration::from_secs(1),
                TimerTask::TransitNextState {
                    from: StandbyState::Dark,
                },
            )
            .unwrap();
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(timers.advance(Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_mock_arm_failure() {
        let timers = MockTimerSource::new();
        *timers.fail_arm.lock().unwrap() = true;
        assert!(timers.arm(Duration::from_secs(1), TimerTask::DayNightSwitch).is_err());
    }

    #[test]
    fn test_mock_queue_is_fifo() {
        let queue = MockTaskQueue::new();
        queue
            .post(QueuedTask::timer(TimerId::new(1), TimerTask::DayNightSwitch))
            .unwrap();
        queue
            .post(QueuedTask::timer(TimerId::new(2), TimerTask::DayNightSwitch))
            .unwrap();

        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.pop(), Some(QueuedTask::Timer { id, .. }) if id == TimerId::new(1)));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_mock_wake_lock_counts() {
        let lock = MockWakeLock::new();
        lock.acquire().unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert_eq!(lock.acquire_count(), 1);
        assert_eq!(lock.release_count(), 2);
    }
}
