//! Linux collaborators for standbyd
//!
//! Provides:
//! - One-shot timers as tokio tasks that post onto the task queue
//! - The task queue itself, an unbounded tokio channel
//! - The process table read from `/proc`
//! - The kernel wake lock through `/sys/power/wake_lock`
//! - A JSON-lines reader for system events

mod events;
mod process;
mod queue;
mod timer;
mod wake_lock;

pub use events::*;
pub use process::*;
pub use queue::*;
pub use timer::*;
pub use wake_lock::*;
