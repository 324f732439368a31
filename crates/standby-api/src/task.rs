//! Work items carried by the single task queue

use serde::{Deserialize, Serialize};
use standby_util::{TimerId, Uid};
use std::sync::mpsc::Sender;

use crate::{StandbyMessage, StandbyState, StateSnapshot};

/// What a one-shot timer does when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerTask {
    /// Leave `from` for its precomputed next state
    TransitNextState { from: StandbyState },

    /// Advance the phase counter of `state`
    TransitNextPhase { state: StandbyState },

    /// Lazy revoke of one exemption that reached its expiry
    RevokeExpired {
        uid: Uid,
        name: String,
        allow_type: u32,
    },

    /// Wall-clock day/night boundary
    DayNightSwitch,
}

impl TimerTask {
    pub fn label(&self) -> &'static str {
        match self {
            TimerTask::TransitNextState { .. } => "transit_next_state",
            TimerTask::TransitNextPhase { .. } => "transit_next_phase",
            TimerTask::RevokeExpired { .. } => "revoke_expired",
            TimerTask::DayNightSwitch => "day_night_switch",
        }
    }
}

/// Items consumed by the event loop, strictly in FIFO order
#[derive(Debug)]
pub enum QueuedTask {
    /// Dispatch a message to listener, state, strategy and housekeeping
    Message(StandbyMessage),

    /// A timer fired
    Timer { id: TimerId, task: TimerTask },

    /// A constraint evaluation that answered `Pending` has finished
    EvaluationFinished { passed: bool },

    /// Sync task: reply with the current state snapshot
    Snapshot(Sender<StateSnapshot>),
}

impl QueuedTask {
    pub fn timer(id: TimerId, task: TimerTask) -> Self {
        QueuedTask::Timer { id, task }
    }
}

impl From<StandbyMessage> for QueuedTask {
    fn from(msg: StandbyMessage) -> Self {
        QueuedTask::Message(msg)
    }
}
