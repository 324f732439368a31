//! Shared utilities for standbyd
//!
//! This crate provides:
//! - ID types (Uid, Pid, TimerId) and the allow-record key format
//! - Time utilities (monotonic time, daily windows, mock wall clock)
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
