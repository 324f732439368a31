//! Shared types for the standbyd API

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use standby_util::{Pid, Uid};
use std::fmt;

/// Standby states, ordered from fully active to deepest idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandbyState {
    Working = 0,
    Dark = 1,
    Nap = 2,
    Maintenance = 3,
    Sleep = 4,
}

impl StandbyState {
    pub const ALL: [StandbyState; 5] = [
        StandbyState::Working,
        StandbyState::Dark,
        StandbyState::Nap,
        StandbyState::Maintenance,
        StandbyState::Sleep,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StandbyState::Working => "working",
            StandbyState::Dark => "dark",
            StandbyState::Nap => "nap",
            StandbyState::Maintenance => "maintenance",
            StandbyState::Sleep => "sleep",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }
}

impl fmt::Display for StandbyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Resource kinds an exemption can cover. Bit 0 is reserved so that an
    /// empty mask always means "no resources".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct AllowType: u32 {
        const NETWORK = 1 << 1;
        const RUNNING_LOCK = 1 << 2;
        const TIMER = 1 << 3;
        const WORK_SCHEDULER = 1 << 4;
        const AUTO_SYNC = 1 << 5;
        const PUSH = 1 << 6;
        const FREEZE = 1 << 7;
    }
}

const ALLOW_TYPE_NAMES: [(AllowType, &str); 7] = [
    (AllowType::NETWORK, "network"),
    (AllowType::RUNNING_LOCK, "running_lock"),
    (AllowType::TIMER, "timer"),
    (AllowType::WORK_SCHEDULER, "work_scheduler"),
    (AllowType::AUTO_SYNC, "auto_sync"),
    (AllowType::PUSH, "push"),
    (AllowType::FREEZE, "freeze"),
];

impl AllowType {
    /// Known kinds of a caller-supplied mask. Unknown and reserved bits are
    /// dropped; a mask with no known kind is rejected.
    pub fn from_request(raw: u32) -> Option<Self> {
        Some(Self::from_bits_truncate(raw)).filter(|mask| !mask.is_empty())
    }

    /// Bit position of a single-kind value
    pub fn index(self) -> Option<u32> {
        (self.bits().count_ones() == 1).then(|| self.bits().trailing_zeros())
    }

    /// Single-kind value for a bit position
    pub fn from_index(index: u32) -> Option<Self> {
        1u32.checked_shl(index).and_then(Self::from_bits).filter(|t| !t.is_empty())
    }

    /// Config/dump name of a single-kind value
    pub fn name(self) -> Option<&'static str> {
        ALLOW_TYPE_NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        ALLOW_TYPE_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(flag, _)| *flag)
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        ALLOW_TYPE_NAMES.iter().map(|(_, name)| *name)
    }
}

bitflags! {
    /// Ambient context used to select policy values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceCondition: u32 {
        const DAY_STANDBY = 1;
        const NIGHT_STANDBY = 1 << 1;
    }
}

impl ResourceCondition {
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "day_standby" => Some(Self::DAY_STANDBY),
            "night_standby" => Some(Self::NIGHT_STANDBY),
            _ => None,
        }
    }
}

/// Classifies the caller for permission and duration-cap purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NativeApi = 0,
    AppApi = 1,
}

impl ReasonCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::NativeApi),
            1 => Some(Self::AppApi),
            _ => None,
        }
    }

    pub fn is_app(self) -> bool {
        self == Self::AppApi
    }
}

/// One entry of an allow or restrict list answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowInfo {
    /// Single resource kind bits
    pub allow_type: u32,
    pub name: String,
    /// Remaining milliseconds; -1 for persistent entries
    pub duration_ms: i64,
}

impl AllowInfo {
    pub const PERSISTENT: i64 = -1;

    pub fn new(allow_type: AllowType, name: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            allow_type: allow_type.bits(),
            name: name.into(),
            duration_ms,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.duration_ms == Self::PERSISTENT
    }
}

/// A request to grant or revoke an exemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Raw resource mask as supplied by the caller
    pub allow_type: u32,
    pub uid: Uid,
    pub name: String,
    pub duration_secs: i32,
    pub reason: String,
    pub reason_code: ReasonCode,
}

impl ResourceRequest {
    pub fn new(
        allow_type: u32,
        uid: Uid,
        name: impl Into<String>,
        duration_secs: i32,
        reason: impl Into<String>,
        reason_code: ReasonCode,
    ) -> Self {
        Self {
            allow_type,
            uid,
            name: name.into(),
            duration_secs,
            reason: reason.into(),
            reason_code,
        }
    }
}

/// Resource-apply code meaning "every resource kind"
pub const EXEMPT_ALL_RESOURCES: u32 = 100;

/// What the transport layer resolved about the caller's access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallerKind {
    Native,
    App {
        exemption_permission: bool,
        system_app: bool,
        /// Declared resource-apply codes (100 = all, 101..=107 = one kind each)
        #[serde(default)]
        resources_apply: Vec<u32>,
    },
}

/// Identity of the caller of a facade operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    pub uid: Uid,
    pub pid: Pid,
    pub kind: CallerKind,
}

impl CallerInfo {
    pub fn native(uid: Uid, pid: Pid) -> Self {
        Self {
            uid,
            pid,
            kind: CallerKind::Native,
        }
    }

    pub fn system_app(uid: Uid, pid: Pid, resources_apply: Vec<u32>) -> Self {
        Self {
            uid,
            pid,
            kind: CallerKind::App {
                exemption_permission: true,
                system_app: true,
                resources_apply,
            },
        }
    }

    /// Narrow `requested` to the kinds an app declared. Native callers keep
    /// the request unchanged.
    pub fn exempted_types(&self, requested: u32) -> u32 {
        let CallerKind::App { resources_apply, .. } = &self.kind else {
            return requested;
        };
        if resources_apply.contains(&EXEMPT_ALL_RESOURCES) {
            return requested;
        }
        let declared = resources_apply
            .iter()
            .filter(|code| **code > EXEMPT_ALL_RESOURCES)
            .filter_map(|code| AllowType::from_index(code - EXEMPT_ALL_RESOURCES))
            .fold(0u32, |acc, t| acc | t.bits());
        declared & requested
    }
}

/// Device-state kinds tracked by the device-state cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStateKind {
    Telephone = 0,
    WifiP2p = 1,
    Peripheral = 2,
}

impl DeviceStateKind {
    pub const COUNT: usize = 3;

    pub const ALL: [DeviceStateKind; 3] = [
        DeviceStateKind::Telephone,
        DeviceStateKind::WifiP2p,
        DeviceStateKind::Peripheral,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        usize::try_from(value).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Telephony call states that mean "no call in progress"
pub const CALL_STATUS_UNKNOWN: i32 = -1;
pub const CALL_STATUS_DISCONNECTED: i32 = 6;
pub const CALL_STATUS_IDLE: i32 = 8;

/// Wi-Fi P2P states that mean "no P2P session"
pub const P2P_STATE_NONE: i32 = 0;
pub const P2P_STATE_IDLE: i32 = 1;
pub const P2P_STATE_CLOSED: i32 = 5;

pub fn call_state_active(state: i32) -> bool {
    !matches!(
        state,
        CALL_STATUS_UNKNOWN | CALL_STATUS_DISCONNECTED | CALL_STATUS_IDLE
    )
}

pub fn p2p_state_active(state: i32) -> bool {
    !matches!(state, P2P_STATE_NONE | P2P_STATE_IDLE | P2P_STATE_CLOSED)
}

/// Snapshot of the state machine, answered by sync tasks on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: StandbyState,
    pub phase: u32,
    pub blocked: bool,
    pub evaluating: bool,
}

impl StateSnapshot {
    pub fn is_in_standby(&self) -> bool {
        self.state == StandbyState::Sleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_type_rejects_masks_without_known_kind() {
        assert!(AllowType::from_request(0).is_none());
        assert!(AllowType::from_request(1).is_none());
        assert!(AllowType::from_request(1 << 8).is_none());
        assert_eq!(
            AllowType::from_request(1 | AllowType::WORK_SCHEDULER.bits()),
            Some(AllowType::WORK_SCHEDULER)
        );
        assert_eq!(
            AllowType::from_request(AllowType::NETWORK.bits() | AllowType::TIMER.bits()),
            Some(AllowType::NETWORK | AllowType::TIMER)
        );
    }

    #[test]
    fn test_allow_type_index_and_names() {
        assert_eq!(AllowType::NETWORK.index(), Some(1));
        assert_eq!(AllowType::FREEZE.index(), Some(7));
        assert_eq!((AllowType::NETWORK | AllowType::PUSH).index(), None);
        assert_eq!(AllowType::from_index(4), Some(AllowType::WORK_SCHEDULER));
        assert_eq!(AllowType::from_index(0), None);
        assert_eq!(AllowType::from_index(40), None);
        assert_eq!(AllowType::RUNNING_LOCK.name(), Some("running_lock"));
        assert_eq!(AllowType::from_config_name("AUTO_SYNC"), Some(AllowType::AUTO_SYNC));
        assert_eq!(AllowType::from_config_name("running_lock"), Some(AllowType::RUNNING_LOCK));
        assert_eq!(
            ResourceCondition::from_config_name("night_standby"),
            Some(ResourceCondition::NIGHT_STANDBY)
        );
        assert_eq!(AllowType::names().count(), 7);
    }

    #[test]
    fn test_state_names_and_order() {
        assert_eq!(StandbyState::Maintenance.name(), "maintenance");
        assert!(StandbyState::Working < StandbyState::Sleep);
        assert_eq!(StandbyState::from_index(2), Some(StandbyState::Nap));
        assert_eq!(StandbyState::from_index(5), None);
        assert_eq!(StandbyState::from_index(-1), None);
    }

    #[test]
    fn test_exempted_types_for_apps() {
        let uid = Uid::new(20010001);
        let pid = Pid::new(77);
        let requested = (AllowType::NETWORK | AllowType::TIMER).bits();

        assert_eq!(CallerInfo::native(uid, pid).exempted_types(requested), requested);
        assert_eq!(
            CallerInfo::system_app(uid, pid, vec![100]).exempted_types(requested),
            requested
        );
        // 101 declares NETWORK only
        assert_eq!(
            CallerInfo::system_app(uid, pid, vec![101, 107]).exempted_types(requested),
            AllowType::NETWORK.bits()
        );
        assert_eq!(CallerInfo::system_app(uid, pid, vec![]).exempted_types(requested), 0);
    }

    #[test]
    fn test_device_activity_tables() {
        assert!(!call_state_active(CALL_STATUS_IDLE));
        assert!(!call_state_active(CALL_STATUS_UNKNOWN));
        assert!(call_state_active(2));
        assert!(!p2p_state_active(P2P_STATE_CLOSED));
        assert!(p2p_state_active(3));
        assert_eq!(DeviceStateKind::from_i32(1), Some(DeviceStateKind::WifiP2p));
        assert_eq!(DeviceStateKind::from_i32(3), None);
    }

    #[test]
    fn test_reason_code_roundtrip_values() {
        assert_eq!(ReasonCode::from_u32(1), Some(ReasonCode::AppApi));
        assert_eq!(ReasonCode::NativeApi.as_u32(), 0);
        assert_eq!(ReasonCode::from_u32(9), None);
    }
}
