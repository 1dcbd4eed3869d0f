//! Call session tracker
//!
//! Registry of in-flight calls keyed by call id. Operations on one call id
//! are serialized by the map's shard lock; different call ids never block
//! each other for longer than a shard access.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use talktime_core::models::CallSession;

/// Concurrent `call_id -> CallSession` registry
#[derive(Default)]
pub struct SessionTracker {
    sessions: DashMap<String, CallSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless a session with the same call id exists
    pub fn insert_if_absent(&self, session: CallSession) -> bool {
        match self.sessions.entry(session.call_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(session);
                true
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.value().clone())
    }

    /// Record the answer time. The first write wins; returns the stored
    /// value, or `None` when the call is not tracked.
    pub fn mark_answered(&self, call_id: &str, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut session = self.sessions.get_mut(call_id)?;
        Some(*session.answered_at.get_or_insert(at))
    }

    /// Claim the right to terminate a call, stamping the cut-off instant.
    /// True exactly once per session, and only while the session is still
    /// tracked.
    pub fn claim_termination(&self, call_id: &str, at: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(call_id) {
            Some(mut session) if !session.is_terminate_requested() => {
                session.terminate_requested_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Remove and return the session. Settlement is driven by whoever gets `Some`.
    pub fn take(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.remove(call_id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn session(call_id: &str) -> CallSession {
        CallSession::new(call_id, 1, "01711000000", "01811000000", "10.0.0.1", Utc::now(), 60)
    }

    #[test]
    fn test_insert_if_absent() {
        let tracker = SessionTracker::new();
        assert!(tracker.insert_if_absent(session("c1")));
        assert!(!tracker.insert_if_absent(session("c1")));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_first_answer_wins() {
        let tracker = SessionTracker::new();
        tracker.insert_if_absent(session("c1"));

        let first = Utc::now();
        let later = first + Duration::seconds(5);

        assert_eq!(tracker.mark_answered("c1", first), Some(first));
        assert_eq!(tracker.mark_answered("c1", later), Some(first));
        assert_eq!(tracker.get("c1").unwrap().answered_at, Some(first));
        assert_eq!(tracker.mark_answered("missing", first), None);
    }

    #[test]
    fn test_termination_claimed_once() {
        let tracker = SessionTracker::new();
        tracker.insert_if_absent(session("c1"));

        let at = Utc::now();
        assert!(tracker.claim_termination("c1", at));
        assert!(!tracker.claim_termination("c1", at + Duration::seconds(1)));
        assert_eq!(tracker.get("c1").unwrap().terminate_requested_at, Some(at));

        tracker.take("c1");
        assert!(!tracker.claim_termination("c1", at));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_yields_one_winner() {
        let tracker = Arc::new(SessionTracker::new());
        tracker.insert_if_absent(session("c1"));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.take("c1").is_some() })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(tracker.is_empty());
    }
}
