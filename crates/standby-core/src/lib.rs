//! Core of standbyd
//!
//! This crate holds the logic the daemon runs on its event loop:
//! - Resource admission (allow records, time-bounded exemptions, recovery)
//! - The standby state machine (Working -> Dark -> Nap/Maintenance -> Sleep)
//! - The event dispatcher coupling the two to pluggable policy roles
//! - A cloneable service facade for callers on other threads

mod admission;
mod default_plugin;
mod device_state;
mod engine;
mod plugin;
mod service;
mod state_machine;

pub use admission::*;
pub use default_plugin::*;
pub use device_state::*;
pub use engine::*;
pub use plugin::*;
pub use service::*;
pub use state_machine::*;
