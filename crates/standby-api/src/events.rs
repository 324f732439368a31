//! System events fed into the dispatcher by the host

use serde::{Deserialize, Serialize};
use standby_util::Uid;

use crate::{
    call_state_active, keys, p2p_state_active, DeviceStateKind, MessageKind, StandbyMessage,
};

/// Common-event action names
pub mod actions {
    pub const SCREEN_ON: &str = "usual.event.SCREEN_ON";
    pub const SCREEN_OFF: &str = "usual.event.SCREEN_OFF";
    pub const CHARGING: &str = "usual.event.CHARGING";
    pub const DISCHARGING: &str = "usual.event.DISCHARGING";
    pub const USB_DEVICE_ATTACHED: &str = "usual.event.hardware.usb.action.USB_DEVICE_ATTACHED";
    pub const USB_DEVICE_DETACHED: &str = "usual.event.hardware.usb.action.USB_DEVICE_DETACHED";
    pub const POWER_SAVE_MODE_CHANGED: &str = "usual.event.POWER_SAVE_MODE_CHANGED";
    pub const BOOT_COMPLETED: &str = "usual.event.BOOT_COMPLETED";
    pub const PACKAGE_REMOVED: &str = "usual.event.PACKAGE_REMOVED";
    pub const TIME_CHANGED: &str = "usual.event.TIME_CHANGED";
    pub const TIMEZONE_CHANGED: &str = "usual.event.TIMEZONE_CHANGED";
}

/// Typed form of what the host observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    ScreenStatus { on: bool },
    ChargingStatus { charging: bool },
    UsbDevice { attached: bool },
    /// Raw telephony call state
    CallStateChanged { state: i32 },
    /// Raw Wi-Fi P2P state
    WifiP2pStateChanged { state: i32 },
    PowerModeChanged { mode: i64 },
    BootCompleted,
    ThermalScenario { scenario: i64, scene_info: String },
    AppUninstalled { uid: Uid, name: String },
    TimeChanged,
    TimezoneChanged,
}

impl SystemEvent {
    /// Device-state update carried by this event, if any
    pub fn device_state(&self) -> Option<(DeviceStateKind, bool)> {
        match self {
            SystemEvent::CallStateChanged { state } => {
                Some((DeviceStateKind::Telephone, call_state_active(*state)))
            }
            SystemEvent::WifiP2pStateChanged { state } => {
                Some((DeviceStateKind::WifiP2p, p2p_state_active(*state)))
            }
            SystemEvent::UsbDevice { attached } => Some((DeviceStateKind::Peripheral, *attached)),
            _ => None,
        }
    }

    /// Message to dispatch for this event. Call and P2P state only touch the
    /// device-state cache.
    pub fn to_message(&self) -> Option<StandbyMessage> {
        let msg = match self {
            SystemEvent::ScreenStatus { on } => StandbyMessage::common_event(if *on {
                actions::SCREEN_ON
            } else {
                actions::SCREEN_OFF
            }),
            SystemEvent::ChargingStatus { charging } => StandbyMessage::common_event(if *charging {
                actions::CHARGING
            } else {
                actions::DISCHARGING
            }),
            SystemEvent::UsbDevice { attached } => StandbyMessage::common_event(if *attached {
                actions::USB_DEVICE_ATTACHED
            } else {
                actions::USB_DEVICE_DETACHED
            }),
            SystemEvent::CallStateChanged { .. } | SystemEvent::WifiP2pStateChanged { .. } => {
                return None;
            }
            SystemEvent::PowerModeChanged { mode } => {
                StandbyMessage::common_event(actions::POWER_SAVE_MODE_CHANGED)
                    .with_param(keys::POWER_MODE, *mode)
            }
            SystemEvent::BootCompleted => StandbyMessage::common_event(actions::BOOT_COMPLETED),
            SystemEvent::ThermalScenario {
                scenario,
                scene_info,
            } => StandbyMessage::new(MessageKind::SceneReport)
                .with_param(keys::SCENARIO, *scenario)
                .with_param(keys::SCENE_INFO, scene_info.as_str()),
            SystemEvent::AppUninstalled { uid, name } => {
                StandbyMessage::common_event(actions::PACKAGE_REMOVED)
                    .with_param(keys::UID, uid.get())
                    .with_param(keys::NAME, name.as_str())
            }
            SystemEvent::TimeChanged => StandbyMessage::common_event(actions::TIME_CHANGED),
            SystemEvent::TimezoneChanged => StandbyMessage::common_event(actions::TIMEZONE_CHANGED),
        };
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_and_charging_actions() {
        let msg = SystemEvent::ScreenStatus { on: false }.to_message().unwrap();
        assert!(msg.is_common_event(actions::SCREEN_OFF));

        let msg = SystemEvent::ChargingStatus { charging: true }
            .to_message()
            .unwrap();
        assert!(msg.is_common_event(actions::CHARGING));
    }

    #[test]
    fn test_call_state_only_updates_cache() {
        let event = SystemEvent::CallStateChanged { state: 3 };
        assert!(event.to_message().is_none());
        assert_eq!(event.device_state(), Some((DeviceStateKind::Telephone, true)));

        let idle = SystemEvent::CallStateChanged { state: 8 };
        assert_eq!(idle.device_state(), Some((DeviceStateKind::Telephone, false)));
    }

    #[test]
    fn test_usb_is_peripheral_and_message() {
        let event = SystemEvent::UsbDevice { attached: true };
        assert_eq!(event.device_state(), Some((DeviceStateKind::Peripheral, true)));
        assert!(event
            .to_message()
            .unwrap()
            .is_common_event(actions::USB_DEVICE_ATTACHED));
    }

    #[test]
    fn test_uninstall_message_params() {
        let msg = SystemEvent::AppUninstalled {
            uid: Uid::new(20010042),
            name: "com.example.mail".into(),
        }
        .to_message()
        .unwrap();
        assert!(msg.is_common_event(actions::PACKAGE_REMOVED));
        assert_eq!(msg.param_i64(keys::UID), Some(20010042));
        assert_eq!(msg.param_str(keys::NAME), Some("com.example.mail"));
    }

    #[test]
    fn test_event_json_tag() {
        let event: SystemEvent =
            serde_json::from_str(r#"{"event":"screen_status","on":true}"#).unwrap();
        assert_eq!(event, SystemEvent::ScreenStatus { on: true });
    }
}
