//! Data model shared by every standbyd crate
//!
//! This crate defines:
//! - Standby states, resource kinds and reason codes
//! - Allow-list requests and answers, caller identity
//! - The message envelope and the work items of the task queue
//! - System events reported by the host

mod events;
mod message;
mod task;
mod types;

pub use events::*;
pub use message::*;
pub use task::*;
pub use types::*;
