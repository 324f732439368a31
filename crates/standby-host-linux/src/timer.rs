//! One-shot timers as tokio tasks
//!
//! Deadlines are measured on the boot clock, so allow records persisted by
//! a previous daemon run stay comparable after a restart.

use nix::time::{clock_gettime, ClockId};
use standby_api::{QueuedTask, TimerTask};
use standby_host_api::{HostError, HostResult, TaskQueue, TimerSource};
use standby_util::{MonotonicInstant, TimerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type TimerTable = Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>;

/// Timers that sleep on the tokio runtime and post `QueuedTask::Timer`
/// when they fire
pub struct TokioTimerSource {
    runtime: Handle,
    queue: Arc<dyn TaskQueue>,
    boot_base_ms: i64,
    origin: MonotonicInstant,
    next_id: AtomicU64,
    timers: TimerTable,
}

impl TokioTimerSource {
    /// Must be called from within a tokio runtime
    pub fn new(queue: Arc<dyn TaskQueue>) -> HostResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| HostError::Internal(format!("no tokio runtime: {}", e)))?;
        Ok(Self::with_handle(runtime, queue))
    }

    pub fn with_handle(runtime: Handle, queue: Arc<dyn TaskQueue>) -> Self {
        let boot_base_ms = boot_time_ms().unwrap_or_else(|e| {
            warn!(error = %e, "Boot clock unavailable, deadlines restart with the daemon");
            0
        });
        Self {
            runtime,
            queue,
            boot_base_ms,
            origin: MonotonicInstant::now(),
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl TimerSource for TokioTimerSource {
    fn arm(&self, delay: Duration, task: TimerTask) -> HostResult<TimerId> {
        let id = TimerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let queue = self.queue.clone();
        let timers = self.timers.clone();

        // Hold the table while spawning so the task cannot remove its entry
        // before it is inserted.
        let mut table = lock(&self.timers);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&timers).remove(&id);
            debug!(timer = %id, task = task.label(), "Timer fired");
            if let Err(e) = queue.post(QueuedTask::timer(id, task)) {
                warn!(timer = %id, error = %e, "Dropping fired timer");
            }
        });
        table.insert(id, handle);
        Ok(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn now_monotonic_ms(&self) -> i64 {
        boot_time_ms().unwrap_or_else(|_| {
            self.boot_base_ms + MonotonicInstant::now().millis_since(self.origin)
        })
    }
}

impl Drop for TokioTimerSource {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.timers).drain() {
            handle.abort();
        }
    }
}

/// Milliseconds since boot, including time spent suspended
fn boot_time_ms() -> HostResult<i64> {
    let now = clock_gettime(ClockId::CLOCK_BOOTTIME)
        .map_err(|e| HostError::Internal(format!("clock_gettime: {}", e)))?;
    Ok(Duration::from(now).as_millis() as i64)
}

fn lock(timers: &TimerTable) -> MutexGuard<'_, HashMap<TimerId, JoinHandle<()>>> {
    match timers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
