//! Store trait definitions

use serde_json::Value;

use crate::{AuditEvent, StoreResult};

/// Key of the persisted allow-record table document
pub const ALLOW_RECORDS_KEY: &str = "allow_record";

/// Main store trait
pub trait Store: Send + Sync {
    // Documents

    /// Load a JSON document. `None` means nothing was saved yet.
    fn load_document(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Replace a JSON document
    fn save_document(&self, key: &str, value: &Value) -> StoreResult<()>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;
}
