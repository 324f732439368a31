//! The event envelope carried through the dispatcher

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Message parameter keys
pub mod keys {
    pub const PREVIOUS_STATE: &str = "previous_state";
    pub const CURRENT_STATE: &str = "current_state";
    pub const PREVIOUS_PHASE: &str = "previous_phase";
    pub const CURRENT_PHASE: &str = "current_phase";
    pub const RES_CTRL_CONDITION: &str = "res_ctrl_condition";
    pub const UID: &str = "uid";
    pub const PID: &str = "pid";
    pub const NAME: &str = "name";
    pub const ALLOW_TYPE: &str = "allowType";
    pub const ADDED: &str = "added";
    pub const IS_CREATED: &str = "isCreated";
    pub const BG_TASK_TYPE: &str = "type";
    pub const BG_TASK_STATUS: &str = "started";
    pub const DEVICE_STATE_KIND: &str = "DIS_COMP_TYPE";
    pub const DEVICE_STATE_ENABLED: &str = "DIS_COMP_STATE";
    pub const POWER_MODE: &str = "current_power_mode";
    pub const SCENARIO: &str = "scenario";
    pub const SCENE_INFO: &str = "sceneInfo";
}

/// Background task type reported with `BgTaskStatusChanged`
pub const BG_TASK_WORK_SCHEDULER: &str = "work_scheduler";

/// Kinds of message the dispatcher delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    StateTransit,
    PhaseTransit,
    AllowListChanged,
    ProcessStateChanged,
    BgTaskStatusChanged,
    CommonEvent,
    DeviceStateChanged,
    ResCtrlConditionChanged,
    SceneReport,
}

/// `{kind, action?, params}`; consumed and dropped after one delivery cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandbyMessage {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl StandbyMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            action: None,
            params: BTreeMap::new(),
        }
    }

    /// A `CommonEvent` message for the given action string
    pub fn common_event(action: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::CommonEvent,
            action: Some(action.into()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn is_common_event(&self, action: &str) -> bool {
        self.kind == MessageKind::CommonEvent && self.action() == Some(action)
    }

    /// Integer param; numeric strings are accepted too
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_params() {
        let msg = StandbyMessage::new(MessageKind::AllowListChanged)
            .with_param(keys::UID, 100)
            .with_param(keys::NAME, "app1")
            .with_param(keys::ADDED, true);

        assert_eq!(msg.param_i64(keys::UID), Some(100));
        assert_eq!(msg.param_str(keys::NAME), Some("app1"));
        assert_eq!(msg.param_bool(keys::ADDED), Some(true));
        assert_eq!(msg.param_i64("missing"), None);
    }

    #[test]
    fn test_numeric_string_param() {
        let msg = StandbyMessage::common_event("usual.event.PACKAGE_REMOVED")
            .with_param(keys::UID, "20010042");
        assert_eq!(msg.param_i64(keys::UID), Some(20010042));
        assert!(msg.is_common_event("usual.event.PACKAGE_REMOVED"));
        assert!(!msg.is_common_event("usual.event.SCREEN_ON"));
    }

    #[test]
    fn test_message_json_shape() {
        let msg = StandbyMessage::new(MessageKind::PhaseTransit).with_param(keys::CURRENT_PHASE, 2);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "phase_transit");
        assert_eq!(json["params"]["current_phase"], 2);
        assert!(json.get("action").is_none());
    }
}
