//! Call history recorder
//!
//! Writes the audit row for every call attempt: created at admission,
//! updated on answer, finalized at settlement. Terminal rows are frozen by
//! the repository.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use talktime_core::{
    models::{CallHistoryRecord, CallSession, CallStatus, ParkEvent},
    traits::CallHistoryRepository,
    AppError, AppResult,
};
use tracing::{debug, instrument, warn};

/// Final state of a settled call
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub status: CallStatus,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub hangup_cause: String,
    pub codec: Option<String>,
}

pub struct CallHistoryRecorder {
    repo: Arc<dyn CallHistoryRepository>,
}

impl CallHistoryRecorder {
    pub fn new(repo: Arc<dyn CallHistoryRepository>) -> Self {
        Self { repo }
    }

    /// Row for a call refused at admission
    #[instrument(skip(self, event), fields(call_id = %event.call_id))]
    pub async fn record_rejected(&self, event: &ParkEvent, user_id: Option<i64>) -> AppResult<()> {
        let record = CallHistoryRecord::rejected(
            &event.call_id,
            &event.username,
            &event.called_party,
            &event.source_address,
            user_id,
            event.timestamp,
        );
        self.create(&record).await
    }

    #[instrument(skip(self, session), fields(call_id = %session.call_id))]
    pub async fn record_reserved(&self, session: &CallSession) -> AppResult<()> {
        self.create(&CallHistoryRecord::reserved(session)).await
    }

    async fn create(&self, record: &CallHistoryRecord) -> AppResult<()> {
        match self.repo.create(record).await {
            Ok(_) => Ok(()),
            Err(AppError::Conflict(message)) => {
                warn!("Duplicate call history row: {}", message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn record_answered(&self, call_id: &str, started_at: DateTime<Utc>) -> AppResult<()> {
        let Some(mut record) = self.repo.find_by_call_id(call_id).await? else {
            warn!("No call history row to mark answered for {}", call_id);
            return Ok(());
        };

        record.status = CallStatus::Answered;
        record.started_at = Some(started_at);

        if !self.repo.update(&record).await? {
            debug!("Call {} already finalized, answer not recorded", call_id);
        }
        Ok(())
    }

    /// Finalize the row for a taken session, creating it if admission never wrote one
    #[instrument(skip(self, session, outcome), fields(call_id = %session.call_id, status = %outcome.status))]
    pub async fn record_settled(&self, session: &CallSession, outcome: CallOutcome) -> AppResult<()> {
        let existing = self.repo.find_by_call_id(&session.call_id).await?;
        let missing = existing.is_none();
        let mut record = existing.unwrap_or_else(|| CallHistoryRecord::reserved(session));

        record.status = outcome.status;
        record.started_at = session.answered_at;
        record.ended_at = Some(outcome.ended_at);
        record.duration_seconds = outcome.duration_seconds;
        record.hangup_cause = Some(outcome.hangup_cause);
        record.codec = outcome.codec;

        if missing {
            warn!("Call {} had no history row, creating it at settlement", session.call_id);
            return self.create(&record).await;
        }

        if !self.repo.update(&record).await? {
            warn!("Call {} was already finalized", session.call_id);
        }
        Ok(())
    }

    pub async fn recent_for_user(&self, user_id: i64, limit: i64) -> AppResult<Vec<CallHistoryRecord>> {
        self.repo.find_by_user(user_id, limit).await
    }

    pub async fn find(&self, call_id: &str) -> AppResult<Option<CallHistoryRecord>> {
        self.repo.find_by_call_id(call_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talktime_db::MemoryStore;

    fn session() -> CallSession {
        CallSession::new("c1", 1, "01711000000", "01811000000", "10.0.0.1", Utc::now(), 60)
    }

    #[tokio::test]
    async fn test_lifecycle_updates_one_row() {
        let recorder = CallHistoryRecorder::new(Arc::new(MemoryStore::new()));
        let mut session = session();
        recorder.record_reserved(&session).await.unwrap();

        let answered = Utc::now();
        session.answered_at = Some(answered);
        recorder.record_answered("c1", answered).await.unwrap();
        assert_eq!(
            recorder.find("c1").await.unwrap().unwrap().status,
            CallStatus::Answered
        );

        let outcome = CallOutcome {
            status: CallStatus::Completed,
            ended_at: answered + chrono::Duration::seconds(45),
            duration_seconds: 45,
            hangup_cause: "NORMAL_CLEARING".to_string(),
            codec: Some("PCMU".to_string()),
        };
        recorder.record_settled(&session, outcome).await.unwrap();

        let row = recorder.find("c1").await.unwrap().unwrap();
        assert_eq!(row.status, CallStatus::Completed);
        assert_eq!(row.duration_seconds, 45);
        assert_eq!(row.started_at, Some(answered));
        assert_eq!(row.codec.as_deref(), Some("PCMU"));
    }

    #[tokio::test]
    async fn test_settlement_without_row_creates_it() {
        let recorder = CallHistoryRecorder::new(Arc::new(MemoryStore::new()));
        let outcome = CallOutcome {
            status: CallStatus::Failed,
            ended_at: Utc::now(),
            duration_seconds: 0,
            hangup_cause: "NO_ANSWER".to_string(),
            codec: None,
        };

        recorder.record_settled(&session(), outcome).await.unwrap();

        let row = recorder.find("c1").await.unwrap().unwrap();
        assert_eq!(row.status, CallStatus::Failed);
        assert_eq!(row.user_id, Some(1));
    }
}
