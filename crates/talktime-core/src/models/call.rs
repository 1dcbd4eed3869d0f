//! Call session and call history models
//!
//! `CallSession` is the in-memory state of an admitted call. `CallHistoryRecord`
//! is its durable projection, written at admission and updated on every
//! transition until it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call history status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Admitted, talk time reserved
    Reserved,
    /// Answered by the far end
    Answered,
    /// Settled after an answered call
    Completed,
    /// Refused at admission
    Rejected,
    /// Hung up before answer
    Failed,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Reserved => write!(f, "RESERVED"),
            CallStatus::Answered => write!(f, "ANSWERED"),
            CallStatus::Completed => write!(f, "COMPLETED"),
            CallStatus::Rejected => write!(f, "REJECTED"),
            CallStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl CallStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RESERVED" => Some(CallStatus::Reserved),
            "ANSWERED" => Some(CallStatus::Answered),
            "COMPLETED" => Some(CallStatus::Completed),
            "REJECTED" => Some(CallStatus::Rejected),
            "FAILED" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    /// Terminal records are never updated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Rejected | CallStatus::Failed
        )
    }

    pub fn terminal_names() -> [&'static str; 3] {
        ["COMPLETED", "REJECTED", "FAILED"]
    }
}

/// In-flight call owned by the session tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    /// Switch channel identifier
    pub call_id: String,
    pub user_id: i64,
    pub calling_party: String,
    pub called_party: String,
    pub source_address: String,
    pub created_at: DateTime<Utc>,

    /// Set once, never cleared
    pub answered_at: Option<DateTime<Utc>>,

    /// Remaining balance when the call was admitted
    pub reserved_seconds: i64,

    /// When the watchdog asked the switch to drop the call
    pub terminate_requested_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        user_id: i64,
        calling_party: impl Into<String>,
        called_party: impl Into<String>,
        source_address: impl Into<String>,
        created_at: DateTime<Utc>,
        reserved_seconds: i64,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            user_id,
            calling_party: calling_party.into(),
            called_party: called_party.into(),
            source_address: source_address.into(),
            created_at,
            answered_at: None,
            reserved_seconds,
            terminate_requested_at: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.answered_at.is_some()
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate_requested_at.is_some()
    }

    /// Whole seconds from answer to `ended_at`, rounded up, never negative.
    /// Zero for unanswered calls.
    pub fn billable_seconds(&self, ended_at: DateTime<Utc>) -> i64 {
        match self.answered_at {
            Some(answered_at) => {
                let millis = (ended_at - answered_at).num_milliseconds();
                if millis <= 0 {
                    0
                } else {
                    (millis + 999) / 1000
                }
            }
            None => 0,
        }
    }
}

/// Durable audit row for one call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallHistoryRecord {
    pub id: i64,
    pub call_id: String,
    pub calling_party: String,
    pub called_party: String,
    pub source_address: String,

    /// None when the caller could not be identified
    pub user_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub status: CallStatus,
    pub hangup_cause: Option<String>,
    pub codec: Option<String>,
}

impl CallHistoryRecord {
    /// Row for a call refused at admission
    pub fn rejected(
        call_id: &str,
        calling_party: &str,
        called_party: &str,
        source_address: &str,
        user_id: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            call_id: call_id.to_string(),
            calling_party: calling_party.to_string(),
            called_party: called_party.to_string(),
            source_address: source_address.to_string(),
            user_id,
            created_at,
            started_at: None,
            ended_at: None,
            duration_seconds: 0,
            status: CallStatus::Rejected,
            hangup_cause: None,
            codec: None,
        }
    }

    /// Row for a freshly admitted session
    pub fn reserved(session: &CallSession) -> Self {
        Self {
            id: 0,
            call_id: session.call_id.clone(),
            calling_party: session.calling_party.clone(),
            called_party: session.called_party.clone(),
            source_address: session.source_address.clone(),
            user_id: Some(session.user_id),
            created_at: session.created_at,
            started_at: None,
            ended_at: None,
            duration_seconds: 0,
            status: CallStatus::Reserved,
            hangup_cause: None,
            codec: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn session() -> CallSession {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        CallSession::new("abc", 1, "01711000000", "8801811000000", "10.0.0.1", t0, 120)
    }

    #[test]
    fn test_billable_seconds_rounds_up() {
        let mut s = session();
        let answered = s.created_at + Duration::seconds(5);
        s.answered_at = Some(answered);

        assert_eq!(s.billable_seconds(answered + Duration::seconds(45)), 45);
        assert_eq!(s.billable_seconds(answered + Duration::milliseconds(45_001)), 46);
        assert_eq!(s.billable_seconds(answered + Duration::milliseconds(1)), 1);
        assert_eq!(s.billable_seconds(answered), 0);
        assert_eq!(s.billable_seconds(answered - Duration::seconds(3)), 0);
    }

    #[test]
    fn test_unanswered_is_free() {
        let s = session();
        assert_eq!(s.billable_seconds(s.created_at + Duration::seconds(30)), 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CallStatus::Reserved.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Rejected.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert_eq!(CallStatus::from_str("failed"), Some(CallStatus::Failed));
    }

    #[test]
    fn test_reserved_record_from_session() {
        let s = session();
        let record = CallHistoryRecord::reserved(&s);
        assert_eq!(record.status, CallStatus::Reserved);
        assert_eq!(record.user_id, Some(1));
        assert_eq!(record.call_id, "abc");
        assert_eq!(record.started_at, None);
    }
}
