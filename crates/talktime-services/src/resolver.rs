//! Entitlement resolver with an explicit snapshot cache
//!
//! The cache holds one snapshot of every entitlement grouped by user. Reads
//! evaluate the activity predicate at read time, so an expiry that passes
//! between refreshes is already honored. The snapshot is dropped on every
//! entitlement mutation and on the scheduled refresh.
//!
//! Rebuilds are single-flight: concurrent misses queue behind one rebuild and
//! reuse its result. Each snapshot is tagged with the cache epoch it was built
//! from and is only installed if no invalidation happened meanwhile.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use talktime_core::{
    models::{Entitlement, User},
    traits::{EntitlementRepository, UserDirectory},
    AppError, AppResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::constants::NO_EFFECT;

/// Entitlements grouped by user, as of one cache epoch
struct Snapshot {
    epoch: u64,
    built_at: DateTime<Utc>,
    by_user: HashMap<i64, Vec<Entitlement>>,
}

impl Snapshot {
    fn build(epoch: u64, entitlements: Vec<Entitlement>) -> Self {
        let mut by_user: HashMap<i64, Vec<Entitlement>> = HashMap::new();
        for entitlement in entitlements {
            by_user
                .entry(entitlement.user_id)
                .or_default()
                .push(entitlement);
        }
        for grants in by_user.values_mut() {
            grants.sort_by(|a, b| a.effect_code.cmp(&b.effect_code));
        }

        Self {
            epoch,
            built_at: Utc::now(),
            by_user,
        }
    }

    fn active_for(&self, user_id: i64, now: DateTime<Utc>) -> impl Iterator<Item = &Entitlement> {
        self.by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter(move |e| e.is_active_at(now))
    }

    fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Entitlement> {
        self.by_user
            .values()
            .flatten()
            .filter(move |e| e.is_active_at(now))
    }
}

#[derive(Default)]
struct SnapshotCache {
    current: RwLock<Option<Arc<Snapshot>>>,
    epoch: AtomicU64,
    rebuild: Mutex<()>,
}

impl SnapshotCache {
    fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn install(&self, snapshot: Arc<Snapshot>) -> bool {
        let mut current = self.current.write();
        if self.epoch() != snapshot.epoch {
            return false;
        }
        *current = Some(snapshot);
        true
    }

    fn invalidate(&self) {
        let mut current = self.current.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *current = None;
    }
}

/// Users and grant counts across the active snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AccessStatistics {
    pub total_users: usize,
    pub total_active_grants: usize,
    pub effect_usage: BTreeMap<String, usize>,
    pub most_active_user: Option<TopUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUser {
    pub user_id: i64,
    pub grant_count: usize,
}

/// Resolves which voice effects a caller may use
pub struct EntitlementResolver {
    entitlements: Arc<dyn EntitlementRepository>,
    users: Arc<dyn UserDirectory>,
    cache: SnapshotCache,
}

impl EntitlementResolver {
    pub fn new(entitlements: Arc<dyn EntitlementRepository>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            entitlements,
            users,
            cache: SnapshotCache::default(),
        }
    }

    async fn snapshot(&self) -> AppResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.cache.current() {
            return Ok(snapshot);
        }

        let _guard = self.cache.rebuild.lock().await;
        if let Some(snapshot) = self.cache.current() {
            debug!("Entitlement snapshot rebuilt by a concurrent reader");
            return Ok(snapshot);
        }

        let epoch = self.cache.epoch();
        let entitlements = self.entitlements.find_all().await?;
        let snapshot = Arc::new(Snapshot::build(epoch, entitlements));

        if self.cache.install(snapshot.clone()) {
            debug!(
                "Entitlement snapshot built at {} for {} users (epoch {})",
                snapshot.built_at,
                snapshot.by_user.len(),
                epoch
            );
        } else {
            debug!("Discarding entitlement snapshot from stale epoch {}", epoch);
        }
        Ok(snapshot)
    }

    async fn lookup_user(&self, username: &str) -> AppResult<Option<User>> {
        self.users.find_by_username(username).await
    }

    async fn require_user(&self, username: &str) -> AppResult<User> {
        self.lookup_user(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))
    }

    /// Active effect codes for a user, sorted. Empty for unknown users.
    #[instrument(skip(self))]
    pub async fn active_effects_for(&self, username: &str) -> AppResult<Vec<String>> {
        let Some(user) = self.lookup_user(username).await? else {
            debug!("No user named {}, no effects", username);
            return Ok(Vec::new());
        };

        let snapshot = self.snapshot().await?;
        let codes: BTreeSet<String> = snapshot
            .active_for(user.id, Utc::now())
            .map(|e| e.effect_code.clone())
            .collect();
        Ok(codes.into_iter().collect())
    }

    /// The user's active default entitlement
    #[instrument(skip(self))]
    pub async fn default_entitlement_for(&self, username: &str) -> AppResult<Option<Entitlement>> {
        let Some(user) = self.lookup_user(username).await? else {
            return Ok(None);
        };

        let snapshot = self.snapshot().await?;
        let default = snapshot
            .active_for(user.id, Utc::now())
            .find(|e| e.is_default)
            .cloned();
        Ok(default)
    }

    pub async fn default_effect_for(&self, username: &str) -> AppResult<Option<String>> {
        Ok(self
            .default_entitlement_for(username)
            .await?
            .map(|e| e.effect_code))
    }

    /// Effect to apply on a call: the default, else the first active code,
    /// else the no-effect sentinel
    pub async fn effect_for_call(&self, username: &str) -> AppResult<String> {
        if let Some(code) = self.default_effect_for(username).await? {
            return Ok(code);
        }

        Ok(self
            .active_effects_for(username)
            .await?
            .into_iter()
            .next()
            .unwrap_or_else(|| NO_EFFECT.to_string()))
    }

    pub async fn has_access(&self, username: &str, effect_code: &str) -> AppResult<bool> {
        Ok(self
            .active_effects_for(username)
            .await?
            .iter()
            .any(|code| code == effect_code))
    }

    /// Make `effect_code` the user's default.
    ///
    /// Decided against the store rather than the snapshot so a concurrent
    /// expiry or purchase is never missed.
    #[instrument(skip(self))]
    pub async fn set_default(&self, username: &str, effect_code: &str) -> AppResult<Entitlement> {
        let user = self.require_user(username).await?;
        let now = Utc::now();

        let active: Vec<Entitlement> = self
            .entitlements
            .find_by_user(user.id)
            .await?
            .into_iter()
            .filter(|e| e.is_active_at(now))
            .collect();

        if active.is_empty() {
            return Err(AppError::EntitlementNotFound(format!(
                "User {} has no active voice effects",
                username
            )));
        }

        let mut chosen = active
            .into_iter()
            .find(|e| e.effect_code == effect_code)
            .ok_or_else(|| {
                AppError::EntitlementNotFound(format!(
                    "Effect {} is not active for user {}",
                    effect_code, username
                ))
            })?;

        self.entitlements.set_default(user.id, chosen.id).await?;
        self.invalidate();

        info!("Default effect for {} set to {}", username, effect_code);
        chosen.is_default = true;
        Ok(chosen)
    }

    /// Remove the user's default. Returns the number of grants changed.
    #[instrument(skip(self))]
    pub async fn clear_default(&self, username: &str) -> AppResult<u64> {
        let user = self.require_user(username).await?;
        let cleared = self.entitlements.clear_default(user.id).await?;
        self.invalidate();

        info!("Cleared default effect for {} ({} grants)", username, cleared);
        Ok(cleared)
    }

    /// Ids of users holding an active grant for `effect_code`
    pub async fn users_for_effect(&self, effect_code: &str) -> AppResult<Vec<i64>> {
        let snapshot = self.snapshot().await?;
        let users: BTreeSet<i64> = snapshot
            .active(Utc::now())
            .filter(|e| e.effect_code == effect_code)
            .map(|e| e.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }

    pub async fn access_statistics(&self) -> AppResult<AccessStatistics> {
        let snapshot = self.snapshot().await?;
        let now = Utc::now();

        let mut effect_usage: BTreeMap<String, usize> = BTreeMap::new();
        let mut per_user: BTreeMap<i64, usize> = BTreeMap::new();
        for grant in snapshot.active(now) {
            *effect_usage.entry(grant.effect_code.clone()).or_default() += 1;
            *per_user.entry(grant.user_id).or_default() += 1;
        }

        let most_active_user = per_user
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(&user_id, &grant_count)| TopUser {
                user_id,
                grant_count,
            });

        Ok(AccessStatistics {
            total_users: per_user.len(),
            total_active_grants: per_user.values().sum(),
            effect_usage,
            most_active_user,
        })
    }

    /// Drop the snapshot. The next read rebuilds it from the store.
    pub fn invalidate(&self) {
        self.cache.invalidate();
        debug!("Entitlement cache invalidated");
    }

    /// Operator and scheduled cache clear
    pub fn clear_cache(&self) {
        self.invalidate();
        info!("Entitlement cache cleared");
    }

    pub fn is_cached(&self) -> bool {
        self.cache.current().is_some()
    }
}
