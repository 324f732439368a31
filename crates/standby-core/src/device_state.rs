//! Cache of device states that can veto deeper standby

use standby_api::DeviceStateKind;
use std::sync::Mutex;
use tracing::debug;

/// Telephony, Wi-Fi P2P and peripheral activity, shared between the facade
/// (writer) and the constraint checker (reader)
#[derive(Debug, Default)]
pub struct DeviceStateCache {
    states: Mutex<[bool; DeviceStateKind::COUNT]>,
}

impl DeviceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state. Returns false if `kind` is unknown or the value did
    /// not change.
    pub fn set(&self, kind: i32, enabled: bool) -> bool {
        let Some(kind) = DeviceStateKind::from_i32(kind) else {
            debug!(kind, "Ignoring unknown device state kind");
            return false;
        };
        self.set_kind(kind, enabled)
    }

    pub fn set_kind(&self, kind: DeviceStateKind, enabled: bool) -> bool {
        let mut states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = &mut states[kind.index()];
        if *slot == enabled {
            return false;
        }
        *slot = enabled;
        debug!(kind = ?kind, enabled, "Device state changed");
        true
    }

    pub fn get(&self, kind: DeviceStateKind) -> bool {
        self.snapshot()[kind.index()]
    }

    /// First active kind, if any
    pub fn any_active(&self) -> Option<DeviceStateKind> {
        let states = self.snapshot();
        DeviceStateKind::ALL
            .into_iter()
            .find(|kind| states[kind.index()])
    }

    fn snapshot(&self) -> [bool; DeviceStateKind::COUNT] {
        match self.states.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_changes_only() {
        let cache = DeviceStateCache::new();
        assert!(!cache.set(0, false));
        assert!(cache.set(0, true));
        assert!(!cache.set(0, true));
        assert!(cache.get(DeviceStateKind::Telephone));
        assert!(cache.set(0, false));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let cache = DeviceStateCache::new();
        assert!(!cache.set(3, true));
        assert!(!cache.set(-1, true));
        assert_eq!(cache.any_active(), None);
    }

    #[test]
    fn test_any_active() {
        let cache = DeviceStateCache::new();
        cache.set_kind(DeviceStateKind::Peripheral, true);
        assert_eq!(cache.any_active(), Some(DeviceStateKind::Peripheral));
    }
}
