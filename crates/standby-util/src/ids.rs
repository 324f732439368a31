//! Strongly-typed identifiers for standbyd

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric owner identity of an allow record (a uid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(i32);

impl Uid {
    pub const fn new(uid: i32) -> Self {
        Self(uid)
    }

    pub fn get(self) -> i32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Uid {
    fn from(uid: i32) -> Self {
        Self(uid)
    }
}

/// Process identifier of the most recent granting process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(i32);

impl Pid {
    pub const fn new(pid: i32) -> Self {
        Self(pid)
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Pid {
    fn from(pid: i32) -> Self {
        Self(pid)
    }
}

/// Handle returned by a timer source when a one-shot timer is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Key of an allow record in the admission table: `"{uid}_{name}"`
pub fn record_key(uid: Uid, name: &str) -> String {
    format!("{}_{}", uid, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_format() {
        assert_eq!(record_key(Uid::new(100), "app1"), "100_app1");
        assert_eq!(record_key(Uid::new(0), "com.example_mail"), "0_com.example_mail");
    }

    #[test]
    fn test_uid_validity() {
        assert!(Uid::new(0).is_valid());
        assert!(!Uid::new(-1).is_valid());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&Pid::new(42)).unwrap();
        assert_eq!(json, "42");
        let uid: Uid = serde_json::from_str("1000").unwrap();
        assert_eq!(uid, Uid::new(1000));
    }
}
