//! Collaborator interfaces for standbyd
//!
//! This crate defines the narrow contracts between the core and the
//! platform: timers, the task queue, the process table and the wake lock.
//! It contains no platform code itself; mocks live here for tests.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
