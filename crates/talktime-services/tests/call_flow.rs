//! End-to-end call flows against the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talktime_core::{
    config::MeteringConfig,
    models::{AnswerEvent, Balance, CallEvent, CallStatus, HangupEvent, ParkEvent},
    traits::{BalanceRepository, CallControl, CallHistoryRepository, EffectCommand},
    AppResult,
};
use talktime_db::MemoryStore;
use talktime_services::{
    BalanceLedger, CallEngine, CallHistoryRecorder, EngineSettings, EntitlementResolver,
    SessionTracker, TimerFired, TimerKind, Watchdog,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Effect(String, String),
    Transfer(String, String),
    Terminate(String),
}

#[derive(Default)]
struct RecordingControl {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingControl {
    fn terminations(&self, call_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| **s == Sent::Terminate(call_id.to_string()))
            .count()
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl CallControl for RecordingControl {
    async fn apply_effect(&self, call_id: &str, effect: &EffectCommand) -> AppResult<()> {
        self.sent
            .lock()
            .push(Sent::Effect(call_id.to_string(), effect.code.clone()));
        Ok(())
    }

    async fn transfer(&self, call_id: &str, destination: &str) -> AppResult<()> {
        self.sent
            .lock()
            .push(Sent::Transfer(call_id.to_string(), destination.to_string()));
        Ok(())
    }

    async fn terminate(&self, call_id: &str) -> AppResult<()> {
        self.sent.lock().push(Sent::Terminate(call_id.to_string()));
        Ok(())
    }
}

/// Balance repository that counts deduction attempts
struct CountingBalances {
    inner: Arc<MemoryStore>,
    deductions: AtomicUsize,
}

#[async_trait]
impl BalanceRepository for CountingBalances {
    async fn find_by_user(&self, user_id: i64) -> AppResult<Option<Balance>> {
        BalanceRepository::find_by_user(self.inner.as_ref(), user_id).await
    }

    async fn get_or_create(&self, user_id: i64) -> AppResult<Balance> {
        self.inner.get_or_create(user_id).await
    }

    async fn add_seconds(&self, user_id: i64, seconds: i64) -> AppResult<Balance> {
        self.inner.add_seconds(user_id, seconds).await
    }

    async fn deduct_seconds(&self, user_id: i64, seconds: i64) -> AppResult<bool> {
        self.deductions.fetch_add(1, Ordering::SeqCst);
        self.inner.deduct_seconds(user_id, seconds).await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    balances: Arc<CountingBalances>,
    control: Arc<RecordingControl>,
    engine: Arc<CallEngine>,
    shutdown: CancellationToken,
}

impl Harness {
    fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let balances = Arc::new(CountingBalances {
            inner: store.clone(),
            deductions: AtomicUsize::new(0),
        });
        let control = Arc::new(RecordingControl::default());
        let (handle, watchdog, fired) = Watchdog::channel();

        let engine = Arc::new(CallEngine::new(
            store.clone(),
            Arc::new(BalanceLedger::new(balances.clone())),
            Arc::new(EntitlementResolver::new(store.clone(), store.clone())),
            Arc::new(SessionTracker::new()),
            Arc::new(CallHistoryRecorder::new(store.clone())),
            control.clone(),
            handle,
            EngineSettings::from(&MeteringConfig::default()),
        ));

        let shutdown = CancellationToken::new();
        tokio::spawn(watchdog.run(shutdown.clone()));
        tokio::spawn(engine.clone().run_watchdog(fired, shutdown.clone()));

        Self {
            store,
            balances,
            control,
            engine,
            shutdown,
        }
    }

    async fn user_with_balance(&self, username: &str, seconds: i64) -> i64 {
        let user = self.store.add_user(username);
        self.store.get_or_create(user.id).await.unwrap();
        if seconds > 0 {
            self.store.add_seconds(user.id, seconds).await.unwrap();
        }
        user.id
    }

    async fn park(&self, call_id: &str, username: &str) {
        self.engine
            .dispatch(CallEvent::Park(ParkEvent {
                call_id: call_id.to_string(),
                username: username.to_string(),
                called_party: "01811000000".to_string(),
                source_address: "10.0.0.1".to_string(),
                timestamp: Utc::now(),
            }))
            .await;
    }

    async fn answer(&self, call_id: &str, at: DateTime<Utc>) {
        self.engine
            .dispatch(CallEvent::Answer(AnswerEvent {
                call_id: call_id.to_string(),
                timestamp: at,
            }))
            .await;
    }

    async fn hangup(&self, call_id: &str, at: DateTime<Utc>) {
        self.engine
            .dispatch(CallEvent::Hangup(hangup_event(call_id, at)))
            .await;
    }

    async fn remaining(&self, user_id: i64) -> i64 {
        BalanceRepository::find_by_user(self.store.as_ref(), user_id)
            .await
            .unwrap()
            .map(|b| b.remaining_seconds)
            .unwrap_or(0)
    }

    async fn status(&self, call_id: &str) -> CallStatus {
        self.store
            .find_by_call_id(call_id)
            .await
            .unwrap()
            .expect("call history row")
            .status
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn hangup_event(call_id: &str, at: DateTime<Utc>) -> HangupEvent {
    HangupEvent {
        call_id: call_id.to_string(),
        hangup_cause: Some("NORMAL_CLEARING".to_string()),
        codec: Some("PCMU".to_string()),
        timestamp: at,
    }
}

#[tokio::test]
async fn test_caller_without_talk_time_is_rejected() {
    let h = Harness::start();
    h.user_with_balance("01711000000", 0).await;

    h.park("c1", "01711000000").await;

    assert_eq!(h.status("c1").await, CallStatus::Rejected);
    assert_eq!(h.control.sent(), vec![Sent::Terminate("c1".to_string())]);
    assert_eq!(h.engine.active_session_count(), 0);
}

#[tokio::test]
async fn test_unknown_caller_is_rejected() {
    let h = Harness::start();

    h.park("c1", "01799999999").await;

    let row = h.store.find_by_call_id("c1").await.unwrap().unwrap();
    assert_eq!(row.status, CallStatus::Rejected);
    assert_eq!(row.user_id, None);
    assert_eq!(h.control.terminations("c1"), 1);
}

#[tokio::test]
async fn test_answered_call_is_metered() {
    let h = Harness::start();
    let user_id = h.user_with_balance("01711000000", 120).await;

    h.park("c1", "01711000000").await;
    assert_eq!(h.status("c1").await, CallStatus::Reserved);
    assert_eq!(
        h.control.sent(),
        vec![Sent::Transfer("c1".to_string(), "01811000000".to_string())]
    );

    let t0 = Utc::now();
    h.answer("c1", t0).await;
    assert_eq!(h.status("c1").await, CallStatus::Answered);

    h.hangup("c1", t0 + ChronoDuration::seconds(45)).await;

    assert_eq!(h.remaining(user_id).await, 75);
    let row = h.store.find_by_call_id("c1").await.unwrap().unwrap();
    assert_eq!(row.status, CallStatus::Completed);
    assert_eq!(row.duration_seconds, 45);
    assert_eq!(row.hangup_cause.as_deref(), Some("NORMAL_CLEARING"));
    assert_eq!(row.codec.as_deref(), Some("PCMU"));
    assert_eq!(h.engine.active_session_count(), 0);
}

#[tokio::test]
async fn test_partial_seconds_round_up() {
    let h = Harness::start();
    let user_id = h.user_with_balance("01711000000", 120).await;

    h.park("c1", "01711000000").await;
    let t0 = Utc::now();
    h.answer("c1", t0).await;
    h.hangup("c1", t0 + ChronoDuration::milliseconds(10_200)).await;

    assert_eq!(h.remaining(user_id).await, 109);
}

#[tokio::test]
async fn test_duplicate_answer_keeps_first_timestamp() {
    let h = Harness::start();
    let user_id = h.user_with_balance("01711000000", 120).await;

    h.park("c1", "01711000000").await;
    let t0 = Utc::now();
    h.answer("c1", t0).await;
    h.answer("c1", t0 + ChronoDuration::seconds(20)).await;
    h.hangup("c1", t0 + ChronoDuration::seconds(30)).await;

    assert_eq!(h.remaining(user_id).await, 90);
}

#[tokio::test]
async fn test_unanswered_call_is_not_charged() {
    let h = Harness::start();
    let user_id = h.user_with_balance("01711000000", 120).await;

    h.park("c1", "01711000000").await;
    h.hangup("c1", Utc::now() + ChronoDuration::seconds(15)).await;

    assert_eq!(h.remaining(user_id).await, 120);
    assert_eq!(h.balances.deductions.load(Ordering::SeqCst), 0);
    let row = h.store.find_by_call_id("c1").await.unwrap().unwrap();
    assert_eq!(row.status, CallStatus::Failed);
    assert_eq!(row.duration_seconds, 0);
}

#[tokio::test]
async fn test_second_hangup_is_ignored() {
    let h = Harness::start();
    let user_id = h.user_with_balance("01711000000", 120).await;

    h.park("c1", "01711000000").await;
    let t0 = Utc::now();
    h.answer("c1", t0).await;
    h.hangup("c1", t0 + ChronoDuration::seconds(10)).await;
    h.hangup("c1", t0 + ChronoDuration::seconds(50)).await;

    assert_eq!(h.remaining(user_id).await, 110);
    assert_eq!(h.balances.deductions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_terminates_exhausted_call_once() {
    let h = Harness::start();
    h.user_with_balance("01711000000", 10).await;

    h.park("c1", "01711000000").await;
    h.answer("c1", Utc::now()).await;

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(h.control.terminations("c1"), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.control.terminations("c1"), 1);
    assert_eq!(h.engine.active_session_count(), 1);

    h.hangup("c1", Utc::now()).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.control.terminations("c1"), 1);
    assert_eq!(h.status("c1").await, CallStatus::Completed);
    assert_eq!(h.balances.deductions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_hangup_is_evicted() {
    let h = Harness::start();
    h.user_with_balance("01711000000", 10).await;

    h.park("c1", "01711000000").await;
    h.answer("c1", Utc::now()).await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.control.terminations("c1"), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(h.engine.active_session_count(), 0);
    let row = h.store.find_by_call_id("c1").await.unwrap().unwrap();
    assert_eq!(row.status, CallStatus::Completed);
    assert_eq!(row.hangup_cause.as_deref(), Some("WATCHDOG_EVICTED"));
    assert_eq!(h.balances.deductions.load(Ordering::SeqCst), 1);
    assert_eq!(h.control.terminations("c1"), 1);
}

#[tokio::test]
async fn test_eviction_bills_up_to_cut_off() {
    let h = Harness::start();
    let user_id = h.user_with_balance("01711000000", 10).await;

    h.park("c1", "01711000000").await;
    h.answer("c1", Utc::now() - ChronoDuration::seconds(70)).await;

    let before_cut_off = Utc::now();
    for kind in [TimerKind::Terminate, TimerKind::Evict] {
        h.engine
            .on_watchdog_fired(TimerFired {
                call_id: "c1".to_string(),
                kind,
            })
            .await;
    }

    assert_eq!(h.remaining(user_id).await, 0);
    let balance = BalanceRepository::find_by_user(h.store.as_ref(), user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.total_used_seconds, 10);

    let row = h.store.find_by_call_id("c1").await.unwrap().unwrap();
    assert_eq!(row.status, CallStatus::Completed);
    assert_eq!(row.duration_seconds, 10);
    assert_eq!(row.hangup_cause.as_deref(), Some("WATCHDOG_EVICTED"));
    let ended_at = row.ended_at.unwrap();
    assert!(ended_at >= before_cut_off && ended_at <= Utc::now());
}

#[tokio::test(start_paused = true)]
async fn test_hangup_cancels_watchdog() {
    let h = Harness::start();
    h.user_with_balance("01711000000", 10).await;

    h.park("c1", "01711000000").await;
    h.hangup("c1", Utc::now()).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.control.terminations("c1"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hangup_racing_watchdog_settles_once() {
    let h = Harness::start();
    h.user_with_balance("01711000000", 100_000).await;
    let calls = 50;

    for i in 0..calls {
        let call_id = format!("c{}", i);
        h.park(&call_id, "01711000000").await;
        h.answer(&call_id, Utc::now()).await;

        let tasks = vec![
            {
                let engine = h.engine.clone();
                let call_id = call_id.clone();
                tokio::spawn(async move {
                    engine
                        .on_watchdog_fired(TimerFired {
                            call_id,
                            kind: TimerKind::Terminate,
                        })
                        .await
                })
            },
            {
                let engine = h.engine.clone();
                let call_id = call_id.clone();
                tokio::spawn(async move {
                    engine
                        .on_watchdog_fired(TimerFired {
                            call_id,
                            kind: TimerKind::Evict,
                        })
                        .await
                })
            },
            {
                let engine = h.engine.clone();
                let call_id = call_id.clone();
                tokio::spawn(async move {
                    engine
                        .dispatch(CallEvent::Hangup(hangup_event(&call_id, Utc::now())))
                        .await
                })
            },
        ];

        for task in tasks {
            task.await.unwrap();
        }

        assert!(h.control.terminations(&call_id) <= 1);
        assert!(matches!(
            h.status(&call_id).await,
            CallStatus::Completed | CallStatus::Failed
        ));
    }

    assert_eq!(h.engine.active_session_count(), 0);
    assert_eq!(h.balances.deductions.load(Ordering::SeqCst), calls);
}
