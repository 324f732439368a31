//! Resource admission engine
//!
//! Owns the allow-record table: one record per (uid, name), each holding one
//! exemption entry per granted resource kind. All access goes through a
//! single mutex, and every mutation is persisted before the lock is released.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use standby_api::{
    keys, AllowInfo, AllowType, MessageKind, QueuedTask, ReasonCode, ResourceRequest,
    StandbyMessage, TimerTask,
};
use standby_config::ConfigProvider;
use standby_host_api::{ProcessDirectory, TaskQueue, TimerSource};
use standby_store::{AuditEvent, AuditEventType, Store, ALLOW_RECORDS_KEY};
use standby_util::{millis_to_duration, record_key, Pid, Result, StandbyError, Uid};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// One exemption entry: a single resource kind until `end_time`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowTime {
    /// Bit position of the resource kind
    pub allow_type_index: u32,
    /// Expiry on the timer source's monotonic clock, in milliseconds
    pub end_time: i64,
    pub reason: String,
}

impl AllowTime {
    fn bit(&self) -> u32 {
        1u32.checked_shl(self.allow_type_index).unwrap_or(0)
    }
}

/// Exemptions held by one (uid, name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowRecord {
    pub uid: Uid,
    pub pid: Pid,
    pub name: String,
    /// OR of the bits of `allow_time_list`
    pub allow_type: u32,
    pub reason_code: u32,
    pub allow_time_list: Vec<AllowTime>,
}

impl AllowRecord {
    fn new(uid: Uid, pid: Pid, name: &str, reason_code: ReasonCode) -> Self {
        Self {
            uid,
            pid,
            name: name.to_string(),
            allow_type: 0,
            reason_code: reason_code.as_u32(),
            allow_time_list: Vec::new(),
        }
    }

    /// OR of the entry bits
    pub fn entries_mask(&self) -> u32 {
        self.allow_time_list.iter().fold(0, |acc, entry| acc | entry.bit())
    }

    /// Whether the stored mask matches the entries
    pub fn is_consistent(&self) -> bool {
        self.allow_type != 0 && self.allow_type == self.entries_mask()
    }

    pub fn entry(&self, index: u32) -> Option<&AllowTime> {
        self.allow_time_list
            .iter()
            .find(|entry| entry.allow_type_index == index)
    }

    /// Insert or extend the entry for `index`. An existing expiry is never
    /// shortened; the reason is always overwritten.
    fn extend(&mut self, index: u32, end_time: i64, reason: &str) {
        match self
            .allow_time_list
            .iter_mut()
            .find(|entry| entry.allow_type_index == index)
        {
            Some(entry) => {
                entry.end_time = entry.end_time.max(end_time);
                entry.reason = reason.to_string();
            }
            None => self.allow_time_list.push(AllowTime {
                allow_type_index: index,
                end_time,
                reason: reason.to_string(),
            }),
        }
        if let Some(kind) = AllowType::from_index(index) {
            self.allow_type |= kind.bits();
        }
    }
}

/// Outcome of a revoke that removed something
#[derive(Debug, Clone, PartialEq, Eq)]
struct Revoked {
    uid: Uid,
    name: String,
    removed: u32,
}

type RecordTable = BTreeMap<String, AllowRecord>;

/// Grants, revokes and answers queries about resource exemptions
pub struct AdmissionEngine {
    records: Mutex<RecordTable>,
    config: Arc<dyn ConfigProvider>,
    timers: Arc<dyn TimerSource>,
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn Store>,
}

impl AdmissionEngine {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        timers: Arc<dyn TimerSource>,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            config,
            timers,
            queue,
            store,
        }
    }

    /// Grant the kinds in `request.allow_type` to (uid, name) for the
    /// requested duration, capped per kind by policy.
    pub fn grant(&self, request: &ResourceRequest, pid: Pid) -> Result<()> {
        let mask = validate_mask(request.allow_type)?;
        if !request.uid.is_valid() {
            return Err(StandbyError::validation("uid must not be negative"));
        }
        if request.duration_secs < 0 {
            return Err(StandbyError::validation("duration must not be negative"));
        }

        let is_app = request.reason_code.is_app();
        let condition = self.config.current_condition();
        let key = record_key(request.uid, &request.name);

        let mut table = self.table();
        let now = self.timers.now_monotonic_ms();

        let record = table.entry(key.clone()).or_insert_with(|| {
            AllowRecord::new(request.uid, pid, &request.name, request.reason_code)
        });
        let old_mask = record.allow_type;

        let mut granted = Vec::new();
        for kind in mask.iter() {
            let (Some(index), Some(kind_name)) = (kind.index(), kind.name()) else {
                continue;
            };
            let mut duration_secs = request.duration_secs;
            if kind != AllowType::WORK_SCHEDULER {
                let cap = self
                    .config
                    .max_duration(&request.name, kind_name, condition, is_app);
                duration_secs = duration_secs.min(cap);
            }
            if duration_secs <= 0 {
                debug!(
                    uid = %request.uid,
                    name = %request.name,
                    resource = kind_name,
                    "No exemption time allowed, skipping"
                );
                continue;
            }
            let duration_ms = i64::from(duration_secs) * 1000;
            record.extend(index, now + duration_ms, &request.reason);
            granted.push(duration_ms);
        }

        if !granted.is_empty() {
            record.pid = pid;
        }
        let new_mask = record.allow_type;
        if new_mask == 0 {
            table.remove(&key);
        }

        for duration_ms in &granted {
            let task = TimerTask::RevokeExpired {
                uid: request.uid,
                name: request.name.clone(),
                allow_type: mask.bits(),
            };
            if let Err(e) = self.timers.arm(millis_to_duration(*duration_ms), task) {
                warn!(error = %e, uid = %request.uid, "Failed to arm revoke timer");
            }
        }

        if !granted.is_empty() {
            self.persist(&table);
        }
        drop(table);

        let added = new_mask ^ (old_mask & new_mask);
        info!(
            uid = %request.uid,
            name = %request.name,
            allow_type = ?mask,
            granted = granted.len(),
            added,
            "Allow resource applied"
        );
        if added != 0 {
            self.notify(request.uid, &request.name, added, true);
        }
        Ok(())
    }

    /// Caller-initiated revoke: removes the named kinds regardless of expiry
    pub fn unapply(&self, request: &ResourceRequest) -> Result<()> {
        validate_mask(request.allow_type)?;
        if !request.uid.is_valid() {
            return Err(StandbyError::validation("uid must not be negative"));
        }
        self.revoke(request.uid, &request.name, request.allow_type, true);
        Ok(())
    }

    /// Remove the entries of (uid, name) whose kind is in `mask`. Without
    /// `force`, only entries that have expired go. Unknown records and
    /// non-intersecting masks are a no-op.
    pub fn revoke(&self, uid: Uid, name: &str, mask: u32, force: bool) {
        let mut table = self.table();
        let now = self.timers.now_monotonic_ms();
        let revoked = revoke_locked(&mut table, &record_key(uid, name), mask, force, now);
        if revoked.is_some() {
            self.persist(&table);
        }
        drop(table);

        if let Some(revoked) = revoked {
            info!(
                uid = %revoked.uid,
                name = %revoked.name,
                removed = revoked.removed,
                force,
                "Allow resource revoked"
            );
            self.notify(revoked.uid, &revoked.name, revoked.removed, false);
        }
    }

    /// Drop the exemptions of an app that went away. Unless `reset_all`,
    /// timer and work-scheduler exemptions survive.
    pub fn remove_app_allow_record(&self, uid: Uid, name: &str, reset_all: bool) {
        let mask = if reset_all {
            AllowType::all()
        } else {
            AllowType::all() - AllowType::TIMER - AllowType::WORK_SCHEDULER
        };
        self.revoke(uid, name, mask.bits(), true);
    }

    /// Temporary and persistent exemptions for the kinds in `mask`.
    /// Expired temporary entries found on the way are reaped.
    pub fn get_allow_list(&self, mask: u32, reason_code: ReasonCode) -> Result<Vec<AllowInfo>> {
        let mask = validate_mask(mask)?;
        let is_app = reason_code.is_app();
        let condition = self.config.current_condition();

        let mut list = Vec::new();
        let mut reaped = Vec::new();
        {
            let mut table = self.table();
            let now = self.timers.now_monotonic_ms();

            for kind in mask.iter() {
                let Some(index) = kind.index() else { continue };
                let mut expired = Vec::new();
                for (key, record) in table.iter() {
                    if record.reason_code != reason_code.as_u32()
                        || record.allow_type & kind.bits() == 0
                    {
                        continue;
                    }
                    let Some(entry) = record.entry(index) else { continue };
                    let remaining = entry.end_time - now;
                    if remaining > 0 {
                        list.push(AllowInfo::new(kind, record.name.clone(), remaining));
                    } else {
                        expired.push(key.clone());
                    }
                }
                for key in expired {
                    if let Some(revoked) = revoke_locked(&mut table, &key, kind.bits(), false, now)
                    {
                        reaped.push(revoked);
                    }
                }
            }
            if !reaped.is_empty() {
                self.persist(&table);
            }
        }

        for revoked in reaped {
            debug!(uid = %revoked.uid, name = %revoked.name, "Reaped expired exemption");
            self.notify(revoked.uid, &revoked.name, revoked.removed, false);
        }

        for kind in mask.iter() {
            let Some(kind_name) = kind.name() else { continue };
            list.extend(
                self.config
                    .eligible_persist_list(kind_name, condition, true, is_app)
                    .into_iter()
                    .map(|name| AllowInfo::new(kind, name, AllowInfo::PERSISTENT)),
            );
        }
        Ok(list)
    }

    /// Names permanently restricted for the kinds in `mask`
    pub fn get_restrict_list(
        &self,
        mask: u32,
        reason_code: ReasonCode,
    ) -> Result<Vec<AllowInfo>> {
        let mask = validate_mask(mask)?;
        let is_app = reason_code.is_app();
        let condition = self.config.current_condition();

        Ok(mask
            .iter()
            .filter_map(|kind| kind.name().map(|name| (kind, name)))
            .flat_map(|(kind, kind_name)| {
                self.config
                    .eligible_persist_list(kind_name, condition, false, is_app)
                    .into_iter()
                    .map(move |name| AllowInfo::new(kind, name, AllowInfo::PERSISTENT))
            })
            .collect())
    }

    /// Restrict set configured for `strategy`, minus whatever is currently
    /// allowed for `mask`
    pub fn eligible_restrict_set(
        &self,
        mask: u32,
        strategy: &str,
        reason_code: ReasonCode,
    ) -> Result<BTreeSet<String>> {
        let condition = self.config.current_condition();
        let restrict = self.config.eligible_persist_list(
            strategy,
            condition,
            false,
            reason_code.is_app(),
        );
        let allowed: BTreeSet<String> = self
            .get_allow_list(mask, reason_code)?
            .into_iter()
            .map(|info| info.name)
            .collect();
        Ok(restrict.difference(&allowed).cloned().collect())
    }

    /// Reload persisted records, keeping only those whose process is still
    /// running under the same pid, and re-arm their expiry timers.
    pub fn recover(&self, processes: &dyn ProcessDirectory) {
        let running = match processes.running_processes() {
            Ok(running) if !running.is_empty() => running,
            Ok(_) => {
                warn!("Process table is empty, skipping allow record recovery");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Cannot read process table, skipping allow record recovery");
                return;
            }
        };

        let document = match self.store.load_document(ALLOW_RECORDS_KEY) {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!("No persisted allow records");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted allow records");
                return;
            }
        };

        let (loaded, malformed) = parse_records(&document);
        let mut dropped = malformed;

        let mut table = self.table();
        let now = self.timers.now_monotonic_ms();
        let mut recovered = 0;
        for (key, record) in loaded {
            if running.get(&record.pid.get()) != Some(&record.name) {
                debug!(uid = %record.uid, name = %record.name, pid = %record.pid, "Process gone, dropping record");
                dropped += 1;
                continue;
            }
            for entry in &record.allow_time_list {
                let task = TimerTask::RevokeExpired {
                    uid: record.uid,
                    name: record.name.clone(),
                    allow_type: AllowType::all().bits(),
                };
                let delay = millis_to_duration((entry.end_time - now).max(0));
                if let Err(e) = self.timers.arm(delay, task) {
                    warn!(error = %e, uid = %record.uid, "Failed to re-arm revoke timer");
                }
            }
            table.insert(key, record);
            recovered += 1;
        }
        self.persist(&table);
        drop(table);

        info!(recovered, dropped, "Recovered allow records");
        self.audit(AuditEventType::RecordsRecovered { recovered, dropped });
    }

    /// Snapshot of the table, ordered by key
    pub fn records(&self) -> Vec<AllowRecord> {
        self.table().values().cloned().collect()
    }

    pub fn record(&self, uid: Uid, name: &str) -> Option<AllowRecord> {
        self.table().get(&record_key(uid, name)).cloned()
    }

    /// Human-readable listing of the table
    pub fn dump(&self) -> String {
        let table = self.table();
        if table.is_empty() {
            return "allow resources record is empty\n".to_string();
        }

        let now = self.timers.now_monotonic_ms();
        let mut out = String::new();
        for (number, record) in table.values().enumerate() {
            let _ = writeln!(out, "No.{}", number + 1);
            let _ = writeln!(out, "\tuid: {}", record.uid);
            let _ = writeln!(out, "\tallow record: ");
            let _ = writeln!(out, "\t\tname: {}", record.name);
            let _ = writeln!(out, "\t\tpid: {}", record.pid);
            let _ = writeln!(out, "\t\tallow type: {}", record.allow_type);
            let _ = writeln!(out, "\t\treason code: {}", record.reason_code);
            for entry in &record.allow_time_list {
                let type_name = AllowType::from_index(entry.allow_type_index)
                    .and_then(AllowType::name)
                    .unwrap_or("unknown");
                let _ = writeln!(out, "\t\t\tallow type: {}", type_name);
                let _ = writeln!(out, "\t\t\tremainTime: {}", entry.end_time - now);
                let _ = writeln!(out, "\t\t\treason: {}", entry.reason);
            }
            out.push('\n');
        }
        out
    }

    fn table(&self) -> MutexGuard<'_, RecordTable> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Allow record lock poisoned, continuing with inner table");
                poisoned.into_inner()
            }
        }
    }

    fn persist(&self, table: &RecordTable) {
        let document = match serde_json::to_value(table) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Failed to serialize allow records");
                return;
            }
        };
        if let Err(e) = self.store.save_document(ALLOW_RECORDS_KEY, &document) {
            warn!(error = %e, "Failed to persist allow records");
        }
    }

    fn notify(&self, uid: Uid, name: &str, allow_type: u32, added: bool) {
        let message = StandbyMessage::new(MessageKind::AllowListChanged)
            .with_param(keys::UID, uid.get())
            .with_param(keys::NAME, name)
            .with_param(keys::ALLOW_TYPE, allow_type)
            .with_param(keys::ADDED, added);
        if let Err(e) = self.queue.post(QueuedTask::Message(message)) {
            warn!(error = %e, "Failed to post allow list change");
        }

        let event = if added {
            AuditEventType::AllowGranted {
                uid,
                name: name.to_string(),
                allow_type,
            }
        } else {
            AuditEventType::AllowRevoked {
                uid,
                name: name.to_string(),
                allow_type,
            }
        };
        self.audit(event);
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit entry");
        }
    }
}

fn validate_mask(raw: u32) -> Result<AllowType> {
    AllowType::from_request(raw)
        .ok_or_else(|| StandbyError::validation(format!("invalid resource mask {:#x}", raw)))
}

fn revoke_locked(
    table: &mut RecordTable,
    key: &str,
    mask: u32,
    force: bool,
    now: i64,
) -> Option<Revoked> {
    let record = table.get_mut(key)?;
    if record.allow_type & mask == 0 {
        return None;
    }

    let mut removed = 0u32;
    record.allow_time_list.retain(|entry| {
        let bit = entry.bit();
        if bit & mask != 0 && (force || now >= entry.end_time) {
            removed |= bit;
            false
        } else {
            true
        }
    });
    if removed == 0 {
        return None;
    }

    let revoked = Revoked {
        uid: record.uid,
        name: record.name.clone(),
        removed,
    };
    if removed == record.allow_type {
        table.remove(key);
    } else {
        record.allow_type &= !removed;
    }
    Some(revoked)
}

/// Parse a persisted document, discarding records that are malformed or
/// whose mask disagrees with their entries. Returns the records and the
/// number discarded.
fn parse_records(document: &Value) -> (Vec<(String, AllowRecord)>, usize) {
    let Some(object) = document.as_object() else {
        warn!("Persisted allow records are not an object");
        return (Vec::new(), 0);
    };

    let mut discarded = 0;
    let mut records = Vec::new();
    for (key, value) in object {
        match serde_json::from_value::<AllowRecord>(value.clone()) {
            Ok(record) if record.is_consistent() => records.push((key.clone(), record)),
            Ok(record) => {
                debug!(uid = %record.uid, name = %record.name, "Discarding inconsistent record");
                discarded += 1;
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Discarding malformed record");
                discarded += 1;
            }
        }
    }
    (records, discarded)
}
