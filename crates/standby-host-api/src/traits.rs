//! Collaborator traits the core is driven through

use standby_api::{QueuedTask, TimerTask};
use standby_util::TimerId;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors from host collaborators
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Timer arm failed: {0}")]
    TimerArm(String),

    #[error("Task queue closed")]
    QueueClosed,

    #[error("Process directory unavailable: {0}")]
    ProcessDirectory(String),

    #[error("Wake lock failed: {0}")]
    WakeLock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// One-shot timers whose expiry is delivered onto the task queue as
/// `QueuedTask::Timer`.
pub trait TimerSource: Send + Sync {
    /// Arm a timer that fires once after `delay`
    fn arm(&self, delay: Duration, task: TimerTask) -> HostResult<TimerId>;

    /// Cancel a timer. Cancelling an unknown or already-fired timer returns
    /// false and has no other effect.
    fn cancel(&self, id: TimerId) -> bool;

    /// Milliseconds on the monotonic clock the timers run on
    fn now_monotonic_ms(&self) -> i64;
}

/// The single FIFO queue that owns state machine and dispatcher work
pub trait TaskQueue: Send + Sync {
    fn post(&self, task: QueuedTask) -> HostResult<()>;
}

/// Live process table, read at startup recovery
pub trait ProcessDirectory: Send + Sync {
    /// Map of pid to process name
    fn running_processes(&self) -> HostResult<HashMap<i32, String>>;
}

/// System wake lock that keeps the device awake across a transition
pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> HostResult<()>;
    fn release(&self) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_display() {
        assert_eq!(HostError::QueueClosed.to_string(), "Task queue closed");
        assert_eq!(
            HostError::TimerArm("no slots".into()).to_string(),
            "Timer arm failed: no slots"
        );
    }
}
