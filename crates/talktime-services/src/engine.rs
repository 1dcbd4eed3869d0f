//! Call admission and metering engine
//!
//! State machine driven by signaling events:
//!
//! ```text
//! NONE -> PARKED -> ADMITTED -> (TRANSFERRED) -> ANSWERED -> SETTLED
//!            \          \                            \
//!             REJECTED   FAILED (hangup unanswered)   watchdog terminate
//! ```
//!
//! A session is settled by whichever path takes it out of the tracker first:
//! a hangup or a watchdog eviction. Termination is claimed on the session
//! itself, so the switch receives at most one kill per call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use talktime_core::{
    config::MeteringConfig,
    models::{AnswerEvent, BridgeEvent, CallEvent, CallSession, CallStatus, HangupEvent, ParkEvent},
    traits::{CallControl, CallEventHandler, UserDirectory},
    AppError, AppResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{NO_EFFECT, WATCHDOG_EVICTED};
use crate::effects;
use crate::ledger::BalanceLedger;
use crate::recorder::{CallHistoryRecorder, CallOutcome};
use crate::resolver::EntitlementResolver;
use crate::session::SessionTracker;
use crate::watchdog::{TimerFired, TimerKind, WatchdogHandle};

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub eviction_grace: Duration,
    pub default_hangup_cause: String,
}

impl From<&MeteringConfig> for EngineSettings {
    fn from(config: &MeteringConfig) -> Self {
        Self {
            eviction_grace: Duration::from_secs(config.eviction_grace_secs),
            default_hangup_cause: config.default_hangup_cause.clone(),
        }
    }
}

/// Destination leg carrying a voice effect
#[derive(Debug, Clone, Serialize)]
pub struct ActiveBridge {
    pub a_leg_id: Option<String>,
    pub b_leg_id: String,
    pub username: String,
    pub effect_code: String,
    pub bridged_at: DateTime<Utc>,
}

pub struct CallEngine {
    users: Arc<dyn UserDirectory>,
    ledger: Arc<BalanceLedger>,
    resolver: Arc<EntitlementResolver>,
    sessions: Arc<SessionTracker>,
    recorder: Arc<CallHistoryRecorder>,
    control: Arc<dyn CallControl>,
    watchdog: WatchdogHandle,
    bridges: DashMap<String, ActiveBridge>,
    settings: EngineSettings,
}

impl CallEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<BalanceLedger>,
        resolver: Arc<EntitlementResolver>,
        sessions: Arc<SessionTracker>,
        recorder: Arc<CallHistoryRecorder>,
        control: Arc<dyn CallControl>,
        watchdog: WatchdogHandle,
        settings: EngineSettings,
    ) -> Self {
        Self {
            users,
            ledger,
            resolver,
            sessions,
            recorder,
            control,
            watchdog,
            bridges: DashMap::new(),
            settings,
        }
    }

    /// Dispatch one event. Failures are logged and never escape.
    pub async fn dispatch(&self, event: CallEvent) {
        let kind = event.kind();
        let call_id = event.call_id().to_string();

        let result = match event {
            CallEvent::Park(e) => self.handle_park(e).await,
            CallEvent::Unpark { call_id } => {
                debug!("Call {} unparked", call_id);
                Ok(())
            }
            CallEvent::Bridge(e) => self.handle_bridge(e).await,
            CallEvent::Answer(e) => self.handle_answer(e).await,
            CallEvent::Hangup(e) => self.handle_hangup(e).await,
        };

        if let Err(e) = result {
            error!("Failed to handle {} event for call {}: {}", kind, call_id, e);
        }
    }

    /// Admit or reject a parked call
    #[instrument(skip(self, event), fields(call_id = %event.call_id, user = %event.username))]
    pub async fn handle_park(&self, event: ParkEvent) -> AppResult<()> {
        info!(
            "Call parked: {} -> {} from {}",
            event.username, event.called_party, event.source_address
        );

        let user = match self.users.find_by_username(&event.username).await {
            Ok(user) => user,
            Err(e) => {
                warn!("Identity lookup failed for {}: {}", event.username, e);
                None
            }
        };

        let Some(user) = user else {
            let reason = AppError::AdmissionRejected(format!("unknown caller {}", event.username));
            return self.reject(&event, None, reason).await;
        };

        let remaining = match self.ledger.reserve(user.id).await {
            Ok(remaining) => remaining,
            Err(e) => {
                error!("Ledger unavailable for user {}: {}", user.id, e);
                0
            }
        };

        if remaining <= 0 {
            let reason = AppError::AdmissionRejected(format!(
                "user {} has no talk time remaining",
                user.id
            ));
            return self.reject(&event, Some(user.id), reason).await;
        }

        let session = CallSession::new(
            event.call_id.clone(),
            user.id,
            event.username.clone(),
            event.called_party.clone(),
            event.source_address.clone(),
            event.timestamp,
            remaining,
        );

        if !self.sessions.insert_if_absent(session.clone()) {
            warn!("Call {} is already admitted, ignoring duplicate park", event.call_id);
            return Ok(());
        }

        self.watchdog.arm(
            &event.call_id,
            TimerKind::Terminate,
            Duration::from_secs(remaining as u64),
        );

        if let Err(e) = self.recorder.record_reserved(&session).await {
            error!("Failed to record admission of call {}: {}", event.call_id, e);
        }

        info!(
            "Call {} admitted for user {} with {}s reserved",
            event.call_id, user.id, remaining
        );

        if let Err(e) = self
            .control
            .transfer(&event.call_id, &event.called_party)
            .await
        {
            error!("Transfer of call {} failed: {}", event.call_id, e);
        }
        Ok(())
    }

    async fn reject(&self, event: &ParkEvent, user_id: Option<i64>, reason: AppError) -> AppResult<()> {
        warn!("Call {}: {}", event.call_id, reason);

        if let Err(e) = self.recorder.record_rejected(event, user_id).await {
            error!("Failed to record rejection of call {}: {}", event.call_id, e);
        }
        if let Err(e) = self.control.terminate(&event.call_id).await {
            error!("Terminate of rejected call {} failed: {}", event.call_id, e);
        }
        Ok(())
    }

    /// Apply the caller's voice effect to the destination leg
    #[instrument(skip(self, event), fields(b_leg = %event.b_leg_id, user = %event.username))]
    pub async fn handle_bridge(&self, event: BridgeEvent) -> AppResult<()> {
        let effect_code = match self.resolver.effect_for_call(&event.username).await {
            Ok(code) => code,
            Err(e) => {
                warn!("Effect resolution failed for {}: {}", event.username, e);
                NO_EFFECT.to_string()
            }
        };

        self.bridges.insert(
            event.b_leg_id.clone(),
            ActiveBridge {
                a_leg_id: event.a_leg_id.clone(),
                b_leg_id: event.b_leg_id.clone(),
                username: event.username.clone(),
                effect_code: effect_code.clone(),
                bridged_at: Utc::now(),
            },
        );

        if effect_code == NO_EFFECT {
            debug!("No voice effect for {}", event.username);
            return Ok(());
        }

        let Some(command) = effects::command_for(&effect_code) else {
            warn!("Unknown effect code {} for {}", effect_code, event.username);
            return Ok(());
        };

        info!("Applying effect {} to leg {}", effect_code, event.b_leg_id);
        self.control.apply_effect(&event.b_leg_id, &command).await
    }

    #[instrument(skip(self, event), fields(call_id = %event.call_id))]
    pub async fn handle_answer(&self, event: AnswerEvent) -> AppResult<()> {
        let Some(answered_at) = self.sessions.mark_answered(&event.call_id, event.timestamp) else {
            debug!("Answer for untracked call {}", event.call_id);
            return Ok(());
        };

        info!("Call {} answered at {}", event.call_id, answered_at);
        self.recorder.record_answered(&event.call_id, answered_at).await
    }

    #[instrument(skip(self, event), fields(call_id = %event.call_id))]
    pub async fn handle_hangup(&self, event: HangupEvent) -> AppResult<()> {
        self.bridges.remove(&event.call_id);

        let Some(session) = self.sessions.take(&event.call_id) else {
            debug!("Hangup for untracked call {}", event.call_id);
            return Ok(());
        };
        self.watchdog.cancel(&event.call_id);

        self.settle(session, event.timestamp, event.hangup_cause, event.codec, None)
            .await;
        Ok(())
    }

    /// React to an expired call timer
    #[instrument(skip(self))]
    pub async fn on_watchdog_fired(&self, timer: TimerFired) {
        match timer.kind {
            TimerKind::Terminate => {
                if !self.sessions.claim_termination(&timer.call_id, Utc::now()) {
                    debug!("Watchdog fired for settled call {}", timer.call_id);
                    return;
                }

                warn!("Talk time exhausted, terminating call {}", timer.call_id);
                if let Err(e) = self.control.terminate(&timer.call_id).await {
                    error!("Terminate of call {} failed: {}", timer.call_id, e);
                }
                self.watchdog
                    .arm(&timer.call_id, TimerKind::Evict, self.settings.eviction_grace);
            }
            TimerKind::Evict => {
                let Some(session) = self.sessions.take(&timer.call_id) else {
                    return;
                };

                warn!(
                    "No hangup received for call {} within {:?}, evicting",
                    timer.call_id, self.settings.eviction_grace
                );

                // Billed up to the cut-off, not the eviction, and never past the reservation.
                let ended_at = session.terminate_requested_at.unwrap_or_else(Utc::now);
                let cap = Some(session.reserved_seconds);
                self.settle(session, ended_at, Some(WATCHDOG_EVICTED.to_string()), None, cap)
                    .await;
            }
        }
    }

    /// Final ledger deduction and history update for a taken session
    async fn settle(
        &self,
        session: CallSession,
        ended_at: DateTime<Utc>,
        hangup_cause: Option<String>,
        codec: Option<String>,
        billable_cap: Option<i64>,
    ) {
        let hangup_cause = hangup_cause.unwrap_or_else(|| self.settings.default_hangup_cause.clone());

        let outcome = if session.is_answered() {
            let measured = session.billable_seconds(ended_at);
            let duration = billable_cap.map_or(measured, |cap| measured.min(cap));
            match self.ledger.settle(session.user_id, duration).await {
                Ok(()) => info!(
                    "Call {} settled: {}s deducted from user {}",
                    session.call_id, duration, session.user_id
                ),
                Err(e @ AppError::LedgerInsufficientFunds { .. }) => {
                    warn!("Settlement anomaly on call {}: {}", session.call_id, e)
                }
                Err(e) => error!(
                    "Deduction of {}s for call {} failed: {}",
                    duration, session.call_id, e
                ),
            }

            CallOutcome {
                status: CallStatus::Completed,
                ended_at,
                duration_seconds: duration,
                hangup_cause,
                codec,
            }
        } else {
            info!("Call {} ended unanswered ({})", session.call_id, hangup_cause);
            CallOutcome {
                status: CallStatus::Failed,
                ended_at,
                duration_seconds: 0,
                hangup_cause,
                codec,
            }
        };

        if let Err(e) = self.recorder.record_settled(&session, outcome).await {
            error!("Failed to record settlement of call {}: {}", session.call_id, e);
        }
    }

    /// Consume expired timers until shutdown
    pub async fn run_watchdog(
        self: Arc<Self>,
        mut fired: mpsc::UnboundedReceiver<TimerFired>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                timer = fired.recv() => match timer {
                    Some(timer) => self.on_watchdog_fired(timer).await,
                    None => break,
                },
            }
        }
        debug!("Watchdog consumer stopped");
    }

    /// Destination leg currently bridged for `username`
    pub fn find_b_leg_for_user(&self, username: &str) -> Option<String> {
        self.bridges
            .iter()
            .find(|b| b.username == username)
            .map(|b| b.b_leg_id.clone())
    }

    pub fn active_bridges(&self) -> Vec<ActiveBridge> {
        self.bridges.iter().map(|b| b.value().clone()).collect()
    }

    pub fn active_bridge_count(&self) -> usize {
        self.bridges.len()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl CallEventHandler for CallEngine {
    async fn handle_event(&self, event: CallEvent) {
        self.dispatch(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::Watchdog;
    use mockall::mock;
    use talktime_core::{
        models::{Entitlement, User},
        traits::{BalanceRepository, CallHistoryRepository, EffectCommand},
    };
    use talktime_db::MemoryStore;

    mock! {
        pub Control {}

        #[async_trait]
        impl CallControl for Control {
            async fn apply_effect(&self, call_id: &str, effect: &EffectCommand) -> AppResult<()>;
            async fn transfer(&self, call_id: &str, destination: &str) -> AppResult<()>;
            async fn terminate(&self, call_id: &str) -> AppResult<()>;
        }
    }

    mock! {
        pub Directory {}

        #[async_trait]
        impl UserDirectory for Directory {
            async fn find_by_username(&self, username: &str) -> AppResult<Option<User>>;
            async fn find_by_id(&self, id: i64) -> AppResult<Option<User>>;
        }
    }

    fn engine(
        store: Arc<MemoryStore>,
        users: Arc<dyn UserDirectory>,
        control: MockControl,
    ) -> CallEngine {
        let (handle, _watchdog, _fired) = Watchdog::channel();
        CallEngine::new(
            users,
            Arc::new(BalanceLedger::new(store.clone())),
            Arc::new(EntitlementResolver::new(store.clone(), store.clone())),
            Arc::new(SessionTracker::new()),
            Arc::new(CallHistoryRecorder::new(store)),
            Arc::new(control),
            handle,
            EngineSettings::from(&MeteringConfig::default()),
        )
    }

    fn park(call_id: &str, username: &str) -> ParkEvent {
        ParkEvent {
            call_id: call_id.to_string(),
            username: username.to_string(),
            called_party: "01811000000".to_string(),
            source_address: "10.0.0.1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_directory_failure_rejects_call() {
        let store = Arc::new(MemoryStore::new());

        let mut directory = MockDirectory::new();
        directory
            .expect_find_by_username()
            .returning(|_| Err(AppError::Database("connection reset".to_string())));

        let mut control = MockControl::new();
        control
            .expect_terminate()
            .withf(|call_id| call_id == "c1")
            .times(1)
            .returning(|_| Ok(()));
        control.expect_transfer().never();

        let engine = engine(store.clone(), Arc::new(directory), control);
        engine.dispatch(CallEvent::Park(park("c1", "01711000000"))).await;

        let row = store.find_by_call_id("c1").await.unwrap().unwrap();
        assert_eq!(row.status, CallStatus::Rejected);
        assert_eq!(row.user_id, None);
        assert_eq!(engine.active_session_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_outage_rejects_call() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("01711000000");
        store.add_seconds(user.id, 60).await.unwrap();
        store.set_balances_unavailable(true);

        let mut control = MockControl::new();
        control.expect_terminate().times(1).returning(|_| Ok(()));
        control.expect_transfer().never();

        let engine = engine(store.clone(), store.clone(), control);
        engine.dispatch(CallEvent::Park(park("c1", "01711000000"))).await;

        let row = store.find_by_call_id("c1").await.unwrap().unwrap();
        assert_eq!(row.status, CallStatus::Rejected);
        assert_eq!(row.user_id, Some(user.id));
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_block_admission() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("01711000000");
        store.add_seconds(user.id, 60).await.unwrap();

        let mut control = MockControl::new();
        control
            .expect_transfer()
            .times(1)
            .returning(|_, _| Err(AppError::TransportCommand("socket closed".to_string())));

        let engine = engine(store.clone(), store.clone(), control);
        engine.dispatch(CallEvent::Park(park("c1", "01711000000"))).await;

        assert_eq!(engine.active_session_count(), 1);
        let row = store.find_by_call_id("c1").await.unwrap().unwrap();
        assert_eq!(row.status, CallStatus::Reserved);
    }

    #[tokio::test]
    async fn test_bridge_applies_default_effect_to_b_leg() {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("01711000000");
        let voice = store.add_voice_type("Female", "902");
        let mut grant = Entitlement::permanent(user.id, voice.id, "902", Utc::now());
        grant.is_default = true;
        store.insert_entitlement(grant);

        let mut control = MockControl::new();
        control
            .expect_apply_effect()
            .withf(|call_id, effect| {
                call_id == "b-leg" && effect.code == "902" && effect.params.len() == 3
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = engine(store.clone(), store.clone(), control);
        engine
            .dispatch(CallEvent::Bridge(BridgeEvent {
                a_leg_id: Some("a-leg".to_string()),
                b_leg_id: "b-leg".to_string(),
                username: "01711000000".to_string(),
            }))
            .await;

        assert_eq!(engine.find_b_leg_for_user("01711000000"), Some("b-leg".to_string()));
        assert_eq!(engine.active_bridge_count(), 1);
        assert_eq!(engine.active_bridges()[0].effect_code, "902");
    }

    #[tokio::test]
    async fn test_bridge_without_grants_sends_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("01711000000");

        let mut control = MockControl::new();
        control.expect_apply_effect().never();

        let engine = engine(store.clone(), store.clone(), control);
        engine
            .dispatch(CallEvent::Bridge(BridgeEvent {
                a_leg_id: None,
                b_leg_id: "b-leg".to_string(),
                username: "01711000000".to_string(),
            }))
            .await;

        assert_eq!(engine.active_bridges()[0].effect_code, NO_EFFECT);
    }
}
