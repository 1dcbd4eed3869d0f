//! In-memory repositories
//!
//! A single `MemoryStore` implements every storage trait over one mutex-guarded
//! set of tables, so multi-table operations (history migration, default
//! switching) are atomic just like their SQL counterparts. Used by tests and
//! local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use talktime_core::{
    models::{
        Balance, CallHistoryRecord, Entitlement, EntitlementHistory, ExpiryReason, User, VoiceType,
    },
    traits::{
        BalanceRepository, CallHistoryRepository, EntitlementHistoryRepository,
        EntitlementRepository, UserDirectory, VoiceTypeRepository,
    },
    AppError, AppResult,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    voice_types: BTreeMap<i64, VoiceType>,
    balances: HashMap<i64, Balance>,
    entitlements: BTreeMap<i64, Entitlement>,
    history: Vec<EntitlementHistory>,
    calls: BTreeMap<String, CallHistoryRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Faults {
    failing_migrations: HashSet<i64>,
    balances_unavailable: bool,
    scan_delay: Option<Duration>,
}

/// In-memory implementation of every storage trait
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    entitlement_scans: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Seeding =====

    pub fn add_user(&self, username: &str) -> User {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let user = User {
            id,
            username: username.to_string(),
        };
        tables.users.insert(id, user.clone());
        user
    }

    pub fn add_voice_type(&self, voice_name: &str, code: &str) -> VoiceType {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let voice = VoiceType {
            id,
            voice_name: voice_name.to_string(),
            code: code.to_string(),
        };
        tables.voice_types.insert(id, voice.clone());
        voice
    }

    /// Voice type with `code`, added if the catalog lacks it
    pub fn ensure_voice_type(&self, voice_name: &str, code: &str) -> VoiceType {
        let existing = self
            .tables
            .lock()
            .voice_types
            .values()
            .find(|v| v.code == code)
            .cloned();
        existing.unwrap_or_else(|| self.add_voice_type(voice_name, code))
    }

    /// Insert an entitlement as-is, bypassing uniqueness checks
    pub fn insert_entitlement(&self, mut entitlement: Entitlement) -> Entitlement {
        let mut tables = self.tables.lock();
        entitlement.id = tables.next_id();
        tables.entitlements.insert(entitlement.id, entitlement.clone());
        entitlement
    }

    // ===== Inspection =====

    pub fn entitlements_snapshot(&self) -> Vec<Entitlement> {
        self.tables.lock().entitlements.values().cloned().collect()
    }

    pub fn history_snapshot(&self) -> Vec<EntitlementHistory> {
        self.tables.lock().history.clone()
    }

    /// Number of full entitlement scans served
    pub fn entitlement_scans(&self) -> u64 {
        self.entitlement_scans.load(Ordering::SeqCst)
    }

    // ===== Fault injection =====

    /// Make the history migration of one entitlement fail
    pub fn fail_migration_for(&self, entitlement_id: i64) {
        self.faults.lock().failing_migrations.insert(entitlement_id);
    }

    /// Make every balance operation fail with a database error
    pub fn set_balances_unavailable(&self, unavailable: bool) {
        self.faults.lock().balances_unavailable = unavailable;
    }

    /// Delay full entitlement scans, to widen rebuild races in tests
    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        self.faults.lock().scan_delay = delay;
    }

    fn check_balances(&self) -> AppResult<()> {
        if self.faults.lock().balances_unavailable {
            return Err(AppError::Database("balance store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceRepository for MemoryStore {
    async fn find_by_user(&self, user_id: i64) -> AppResult<Option<Balance>> {
        self.check_balances()?;
        Ok(self.tables.lock().balances.get(&user_id).cloned())
    }

    async fn get_or_create(&self, user_id: i64) -> AppResult<Balance> {
        self.check_balances()?;
        let mut tables = self.tables.lock();
        Ok(tables
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::empty(user_id))
            .clone())
    }

    async fn add_seconds(&self, user_id: i64, seconds: i64) -> AppResult<Balance> {
        self.check_balances()?;
        let mut tables = self.tables.lock();
        let balance = tables
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::empty(user_id));
        balance.credit(seconds);
        Ok(balance.clone())
    }

    async fn deduct_seconds(&self, user_id: i64, seconds: i64) -> AppResult<bool> {
        self.check_balances()?;
        let mut tables = self.tables.lock();
        let balance = tables
            .balances
            .get_mut(&user_id)
            .ok_or(AppError::BalanceNotFound(user_id))?;
        Ok(balance.debit(seconds))
    }
}

#[async_trait]
impl EntitlementRepository for MemoryStore {
    async fn find_all(&self) -> AppResult<Vec<Entitlement>> {
        self.entitlement_scans.fetch_add(1, Ordering::SeqCst);
        let delay = self.faults.lock().scan_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.entitlements_snapshot())
    }

    async fn find_by_user(&self, user_id: i64) -> AppResult<Vec<Entitlement>> {
        Ok(self
            .tables
            .lock()
            .entitlements
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_by_user_and_effect(
        &self,
        user_id: i64,
        effect_id: i64,
    ) -> AppResult<Option<Entitlement>> {
        Ok(self
            .tables
            .lock()
            .entitlements
            .values()
            .find(|e| e.user_id == user_id && e.effect_id == effect_id)
            .cloned())
    }

    async fn create(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
        let mut tables = self.tables.lock();
        if tables
            .entitlements
            .values()
            .any(|e| e.user_id == entitlement.user_id && e.effect_id == entitlement.effect_id)
        {
            return Err(AppError::Conflict(format!(
                "User {} already holds effect {}",
                entitlement.user_id, entitlement.effect_code
            )));
        }
        let mut created = entitlement.clone();
        created.id = tables.next_id();
        if let Some(voice) = tables.voice_types.get(&created.effect_id) {
            created.effect_code = voice.code.clone();
        }
        tables.entitlements.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
        let mut tables = self.tables.lock();
        let stored = tables
            .entitlements
            .get_mut(&entitlement.id)
            .ok_or_else(|| AppError::EntitlementNotFound(entitlement.id.to_string()))?;
        stored.is_purchased = entitlement.is_purchased;
        stored.trial_expires_at = entitlement.trial_expires_at;
        stored.subscription_expires_at = entitlement.subscription_expires_at;
        Ok(stored.clone())
    }

    async fn set_default(&self, user_id: i64, entitlement_id: i64) -> AppResult<()> {
        let mut tables = self.tables.lock();
        let owned = tables
            .entitlements
            .get(&entitlement_id)
            .map(|e| e.user_id == user_id)
            .unwrap_or(false);
        if !owned {
            return Err(AppError::EntitlementNotFound(entitlement_id.to_string()));
        }
        for entitlement in tables.entitlements.values_mut() {
            if entitlement.user_id == user_id {
                entitlement.is_default = entitlement.id == entitlement_id;
            }
        }
        Ok(())
    }

    async fn clear_default(&self, user_id: i64) -> AppResult<u64> {
        let mut tables = self.tables.lock();
        let mut changed = 0;
        for entitlement in tables.entitlements.values_mut() {
            if entitlement.user_id == user_id && entitlement.is_default {
                entitlement.is_default = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn migrate_to_history(
        &self,
        entitlement: &Entitlement,
        reason: ExpiryReason,
        expired_at: DateTime<Utc>,
    ) -> AppResult<Option<EntitlementHistory>> {
        if self.faults.lock().failing_migrations.contains(&entitlement.id) {
            return Err(AppError::Database(format!(
                "injected failure migrating entitlement {}",
                entitlement.id
            )));
        }

        let mut tables = self.tables.lock();
        let unchanged = tables.entitlements.get(&entitlement.id).is_some_and(|stored| {
            stored.trial_expires_at == entitlement.trial_expires_at
                && stored.subscription_expires_at == entitlement.subscription_expires_at
        });
        if !unchanged {
            return Ok(None);
        }

        tables.entitlements.remove(&entitlement.id);
        let mut history = EntitlementHistory::from_expired(entitlement, reason, expired_at);
        history.id = tables.next_id();
        tables.history.push(history.clone());
        Ok(Some(history))
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(self.tables.lock().entitlements.len() as i64)
    }
}

#[async_trait]
impl EntitlementHistoryRepository for MemoryStore {
    async fn find_all(&self) -> AppResult<Vec<EntitlementHistory>> {
        let mut rows = self.history_snapshot();
        rows.sort_by(|a, b| b.expired_at.cmp(&a.expired_at));
        Ok(rows)
    }

    async fn find_by_user(&self, user_id: i64) -> AppResult<Vec<EntitlementHistory>> {
        let mut rows: Vec<_> = self
            .history_snapshot()
            .into_iter()
            .filter(|h| h.user_id == user_id)
            .collect();
        rows.sort_by(|a, b| b.expired_at.cmp(&a.expired_at));
        Ok(rows)
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(self.tables.lock().history.len() as i64)
    }

    async fn count_by_reason(&self) -> AppResult<Vec<(ExpiryReason, i64)>> {
        let mut counts: BTreeMap<ExpiryReason, i64> = BTreeMap::new();
        for row in self.tables.lock().history.iter() {
            *counts.entry(row.expiry_reason).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn count_expired_since(&self, since: DateTime<Utc>) -> AppResult<i64> {
        Ok(self
            .tables
            .lock()
            .history
            .iter()
            .filter(|h| h.expired_at >= since)
            .count() as i64)
    }
}

#[async_trait]
impl CallHistoryRepository for MemoryStore {
    async fn create(&self, record: &CallHistoryRecord) -> AppResult<CallHistoryRecord> {
        let mut tables = self.tables.lock();
        if tables.calls.contains_key(&record.call_id) {
            return Err(AppError::Conflict(format!(
                "Call {} already recorded",
                record.call_id
            )));
        }
        let mut created = record.clone();
        created.id = tables.next_id();
        tables.calls.insert(created.call_id.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_call_id(&self, call_id: &str) -> AppResult<Option<CallHistoryRecord>> {
        Ok(self.tables.lock().calls.get(call_id).cloned())
    }

    async fn update(&self, record: &CallHistoryRecord) -> AppResult<bool> {
        let mut tables = self.tables.lock();
        match tables.calls.get_mut(&record.call_id) {
            Some(stored) if !stored.status.is_terminal() => {
                let id = stored.id;
                *stored = record.clone();
                stored.id = id;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_user(&self, user_id: i64, limit: i64) -> AppResult<Vec<CallHistoryRecord>> {
        let mut rows: Vec<_> = self
            .tables
            .lock()
            .calls
            .values()
            .filter(|c| c.user_id == Some(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.tables.lock().users.get(&id).cloned())
    }
}

#[async_trait]
impl VoiceTypeRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<VoiceType>> {
        Ok(self.tables.lock().voice_types.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> AppResult<Option<VoiceType>> {
        Ok(self
            .tables
            .lock()
            .voice_types
            .values()
            .find(|v| v.code == code)
            .cloned())
    }
}
