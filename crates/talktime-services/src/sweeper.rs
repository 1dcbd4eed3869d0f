//! Entitlement expiry sweeper
//!
//! Scans every entitlement, classifies the expired ones, and migrates each
//! into history in its own transaction. A record renewed after the scan read
//! it is skipped; a failed record is reported and the scan moves on. The
//! resolver cache is invalidated once per sweep.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use talktime_core::{
    models::{EntitlementHistory, ExpiryReason},
    traits::{EntitlementHistoryRepository, EntitlementRepository},
    AppError, AppResult,
};
use tracing::{error, info, instrument, warn};

use crate::resolver::EntitlementResolver;

/// Per-reason tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReasonCounts {
    pub trial_expired: i64,
    pub subscription_expired: i64,
    pub both_expired: i64,
}

impl ReasonCounts {
    pub fn add(&mut self, reason: ExpiryReason, n: i64) {
        match reason {
            ExpiryReason::TrialExpired => self.trial_expired += n,
            ExpiryReason::SubscriptionExpired => self.subscription_expired += n,
            ExpiryReason::BothExpired => self.both_expired += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.trial_expired + self.subscription_expired + self.both_expired
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub moved_to_history: usize,
    /// Renewed or removed between the scan and its migration
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub cleanup_time: DateTime<Utc>,
}

/// An entitlement the next sweep would migrate
#[derive(Debug, Clone, Serialize)]
pub struct SweepCandidate {
    pub entitlement_id: i64,
    pub user_id: i64,
    pub effect_code: String,
    pub reason: ExpiryReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepPreview {
    pub total_scanned: usize,
    pub counts: ReasonCounts,
    pub candidates: Vec<SweepCandidate>,
    pub preview_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupStatistics {
    pub total_history_records: i64,
    pub by_reason: ReasonCounts,
    pub recent_expired_count: i64,
    pub recent_window_days: i64,
    pub current_active_entitlements: i64,
}

/// Migrates expired entitlements into history
pub struct ExpirySweeper {
    entitlements: Arc<dyn EntitlementRepository>,
    history: Arc<dyn EntitlementHistoryRepository>,
    resolver: Arc<EntitlementResolver>,
    recent_window_days: i64,
}

impl ExpirySweeper {
    pub fn new(
        entitlements: Arc<dyn EntitlementRepository>,
        history: Arc<dyn EntitlementHistoryRepository>,
        resolver: Arc<EntitlementResolver>,
        recent_window_days: i64,
    ) -> Self {
        Self {
            entitlements,
            history,
            resolver,
            recent_window_days,
        }
    }

    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep against a fixed clock
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        info!("Starting entitlement expiry sweep");

        let entitlements = self.entitlements.find_all().await?;
        let mut report = SweepReport {
            processed: entitlements.len(),
            moved_to_history: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            cleanup_time: now,
        };

        for entitlement in &entitlements {
            let Some(reason) = entitlement.expiry_reason_at(now) else {
                continue;
            };

            match self
                .entitlements
                .migrate_to_history(entitlement, reason, now)
                .await
            {
                Ok(Some(_)) => {
                    report.moved_to_history += 1;
                    info!(
                        "Moved entitlement {} (user {}, effect {}) to history: {}",
                        entitlement.id, entitlement.user_id, entitlement.effect_code, reason
                    );
                }
                Ok(None) => {
                    report.skipped += 1;
                    info!(
                        "Entitlement {} changed during the sweep, left in place",
                        entitlement.id
                    );
                }
                Err(e) => {
                    let failure = AppError::SweepRecordFailure {
                        entitlement_id: entitlement.id,
                        message: e.to_string(),
                    };
                    error!("{}", failure);
                    report.failed += 1;
                    report.errors.push(failure.to_string());
                }
            }
        }

        self.resolver.invalidate();

        if report.failed > 0 {
            warn!(
                "Sweep finished with {} failures: {} of {} moved",
                report.failed, report.moved_to_history, report.processed
            );
        } else {
            info!(
                "Sweep finished: {} of {} moved to history",
                report.moved_to_history, report.processed
            );
        }
        Ok(report)
    }

    pub async fn preview(&self) -> AppResult<SweepPreview> {
        self.preview_at(Utc::now()).await
    }

    /// Classify without mutating anything
    pub async fn preview_at(&self, now: DateTime<Utc>) -> AppResult<SweepPreview> {
        let entitlements = self.entitlements.find_all().await?;

        let mut counts = ReasonCounts::default();
        let candidates: Vec<SweepCandidate> = entitlements
            .iter()
            .filter_map(|e| {
                e.expiry_reason_at(now).map(|reason| SweepCandidate {
                    entitlement_id: e.id,
                    user_id: e.user_id,
                    effect_code: e.effect_code.clone(),
                    reason,
                })
            })
            .inspect(|c| counts.add(c.reason, 1))
            .collect();

        Ok(SweepPreview {
            total_scanned: entitlements.len(),
            counts,
            candidates,
            preview_time: now,
        })
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self) -> AppResult<CleanupStatistics> {
        let mut by_reason = ReasonCounts::default();
        for (reason, count) in self.history.count_by_reason().await? {
            by_reason.add(reason, count);
        }

        let since = Utc::now() - Duration::days(self.recent_window_days);

        Ok(CleanupStatistics {
            total_history_records: self.history.count().await?,
            by_reason,
            recent_expired_count: self.history.count_expired_since(since).await?,
            recent_window_days: self.recent_window_days,
            current_active_entitlements: self.entitlements.count().await?,
        })
    }

    pub async fn history_for_user(&self, user_id: i64) -> AppResult<Vec<EntitlementHistory>> {
        self.history.find_by_user(user_id).await
    }

    pub async fn all_history(&self) -> AppResult<Vec<EntitlementHistory>> {
        self.history.find_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use talktime_core::models::Entitlement;
    use talktime_db::MemoryStore;

    /// Store whose scan is followed by a purchase renewing every grant it returned
    struct RenewAfterScan {
        store: Arc<MemoryStore>,
        renewal: DateTime<Utc>,
    }

    #[async_trait]
    impl EntitlementRepository for RenewAfterScan {
        async fn find_all(&self) -> AppResult<Vec<Entitlement>> {
            let snapshot = EntitlementRepository::find_all(self.store.as_ref()).await?;
            for entitlement in &snapshot {
                let mut renewed = entitlement.clone();
                renewed.apply_purchase(Some(self.renewal));
                EntitlementRepository::update(self.store.as_ref(), &renewed).await?;
            }
            Ok(snapshot)
        }

        async fn find_by_user(&self, user_id: i64) -> AppResult<Vec<Entitlement>> {
            EntitlementRepository::find_by_user(self.store.as_ref(), user_id).await
        }

        async fn find_by_user_and_effect(
            &self,
            user_id: i64,
            effect_id: i64,
        ) -> AppResult<Option<Entitlement>> {
            self.store.find_by_user_and_effect(user_id, effect_id).await
        }

        async fn create(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
            EntitlementRepository::create(self.store.as_ref(), entitlement).await
        }

        async fn update(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
            EntitlementRepository::update(self.store.as_ref(), entitlement).await
        }

        async fn set_default(&self, user_id: i64, entitlement_id: i64) -> AppResult<()> {
            self.store.set_default(user_id, entitlement_id).await
        }

        async fn clear_default(&self, user_id: i64) -> AppResult<u64> {
            self.store.clear_default(user_id).await
        }

        async fn migrate_to_history(
            &self,
            entitlement: &Entitlement,
            reason: ExpiryReason,
            expired_at: DateTime<Utc>,
        ) -> AppResult<Option<EntitlementHistory>> {
            self.store
                .migrate_to_history(entitlement, reason, expired_at)
                .await
        }

        async fn count(&self) -> AppResult<i64> {
            EntitlementRepository::count(self.store.as_ref()).await
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        resolver: Arc<EntitlementResolver>,
        sweeper: ExpirySweeper,
        user_id: i64,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntitlementResolver::new(store.clone(), store.clone()));
        let sweeper = ExpirySweeper::new(store.clone(), store.clone(), resolver.clone(), 7);
        let user_id = store.add_user("01711000000").id;
        Fixture {
            store,
            resolver,
            sweeper,
            user_id,
        }
    }

    fn insert(
        f: &Fixture,
        code: &str,
        trial: Option<DateTime<Utc>>,
        subscription: Option<DateTime<Utc>>,
    ) -> Entitlement {
        let voice = f.store.ensure_voice_type(code, code);
        let mut entitlement = Entitlement::permanent(f.user_id, voice.id, code, Utc::now());
        entitlement.trial_expires_at = trial;
        entitlement.subscription_expires_at = subscription;
        f.store.insert_entitlement(entitlement)
    }

    fn seed_mixed(f: &Fixture, now: DateTime<Utc>) {
        let past = Some(now - Duration::days(1));
        let future = Some(now + Duration::days(1));

        insert(f, "901", None, None);
        insert(f, "902", past, None);
        insert(f, "903", None, past);
        insert(f, "905", past, past);
        insert(f, "906", past, future);
        insert(f, "907", future, past);
    }

    #[tokio::test]
    async fn test_preview_does_not_mutate() {
        let f = fixture();
        let now = Utc::now();
        seed_mixed(&f, now);

        let preview = f.sweeper.preview_at(now).await.unwrap();

        assert_eq!(preview.total_scanned, 6);
        assert_eq!(
            preview.counts,
            ReasonCounts {
                trial_expired: 1,
                subscription_expired: 1,
                both_expired: 1,
            }
        );
        assert_eq!(f.store.entitlements_snapshot().len(), 6);
        assert!(f.store.history_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let f = fixture();
        let now = Utc::now();
        seed_mixed(&f, now);

        let first = f.sweeper.sweep_at(now).await.unwrap();
        assert_eq!(first.processed, 6);
        assert_eq!(first.moved_to_history, 3);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.failed, 0);

        let second = f.sweeper.sweep_at(now).await.unwrap();
        assert_eq!(second.processed, 3);
        assert_eq!(second.moved_to_history, 0);

        let history = f.store.history_snapshot();
        assert_eq!(history.len(), 3);
        let reasons: Vec<_> = history.iter().map(|h| h.expiry_reason).collect();
        assert!(reasons.contains(&ExpiryReason::BothExpired));
        assert!(history.iter().all(|h| h.expired_at == now));
    }

    #[tokio::test]
    async fn test_grant_renewed_mid_sweep_stays_active() {
        let f = fixture();
        let now = Utc::now();
        insert(&f, "903", Some(now - Duration::days(1)), None);

        let sweeper = ExpirySweeper::new(
            Arc::new(RenewAfterScan {
                store: f.store.clone(),
                renewal: now + Duration::days(30),
            }),
            f.store.clone(),
            f.resolver.clone(),
            7,
        );

        let report = sweeper.sweep_at(now).await.unwrap();

        assert_eq!(report.moved_to_history, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert!(f.store.history_snapshot().is_empty());
        assert_eq!(f.store.entitlements_snapshot().len(), 1);
        assert_eq!(
            f.resolver.active_effects_for("01711000000").await.unwrap(),
            vec!["903"]
        );
    }

    #[tokio::test]
    async fn test_record_failure_does_not_abort_sweep() {
        let f = fixture();
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        let broken = insert(&f, "902", past, None);
        insert(&f, "903", None, past);
        f.store.fail_migration_for(broken.id);

        let report = f.sweeper.sweep_at(now).await.unwrap();

        assert_eq!(report.moved_to_history, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains(&broken.id.to_string()));
        assert_eq!(f.store.entitlements_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_invalidates_resolver() {
        let f = fixture();
        insert(&f, "901", None, None);

        f.resolver.active_effects_for("01711000000").await.unwrap();
        assert!(f.resolver.is_cached());

        f.sweeper.sweep().await.unwrap();
        assert!(!f.resolver.is_cached());
    }

    #[tokio::test]
    async fn test_statistics() {
        let f = fixture();
        let now = Utc::now();
        seed_mixed(&f, now);
        f.sweeper.sweep_at(now).await.unwrap();

        let stats = f.sweeper.statistics().await.unwrap();
        assert_eq!(stats.total_history_records, 3);
        assert_eq!(stats.by_reason.total(), 3);
        assert_eq!(stats.recent_expired_count, 3);
        assert_eq!(stats.current_active_entitlements, 3);

        assert_eq!(f.sweeper.history_for_user(f.user_id).await.unwrap().len(), 3);
        assert!(f.sweeper.history_for_user(f.user_id + 100).await.unwrap().is_empty());
    }
}
