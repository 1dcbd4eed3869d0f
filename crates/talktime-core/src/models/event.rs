//! Call lifecycle events
//!
//! Transport-neutral view of the signaling events that drive the call engine.
//! The ESL layer produces these from switch headers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call parked and waiting for an admission decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkEvent {
    pub call_id: String,
    /// Caller identity (username / phone number)
    pub username: String,
    pub called_party: String,
    pub source_address: String,
    pub timestamp: DateTime<Utc>,
}

/// Call connected to its destination leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub a_leg_id: Option<String>,
    pub b_leg_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEvent {
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HangupEvent {
    pub call_id: String,
    pub hangup_cause: Option<String>,
    pub codec: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Events consumed by the call engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallEvent {
    Park(ParkEvent),
    Unpark { call_id: String },
    Bridge(BridgeEvent),
    Answer(AnswerEvent),
    Hangup(HangupEvent),
}

impl CallEvent {
    /// Channel the event refers to
    pub fn call_id(&self) -> &str {
        match self {
            CallEvent::Park(e) => &e.call_id,
            CallEvent::Unpark { call_id } => call_id,
            CallEvent::Bridge(e) => &e.b_leg_id,
            CallEvent::Answer(e) => &e.call_id,
            CallEvent::Hangup(e) => &e.call_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::Park(_) => "park",
            CallEvent::Unpark { .. } => "unpark",
            CallEvent::Bridge(_) => "bridge",
            CallEvent::Answer(_) => "answer",
            CallEvent::Hangup(_) => "hangup",
        }
    }
}
