//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use standby_api::StandbyState;
use standby_util::Uid;

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service became ready
    ServiceStarted { plugin: String },

    /// Service stopped
    ServiceStopped,

    /// State machine moved to a new state
    StateTransited {
        from: StandbyState,
        to: StandbyState,
    },

    /// Resource bits newly exempted for an owner
    AllowGranted {
        uid: Uid,
        name: String,
        allow_type: u32,
    },

    /// Resource bits removed from an owner
    AllowRevoked {
        uid: Uid,
        name: String,
        allow_type: u32,
    },

    /// Allow records reloaded at startup
    RecordsRecovered { recovered: usize, dropped: usize },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // set by store
            timestamp: standby_util::now(),
            event,
        }
    }
}
