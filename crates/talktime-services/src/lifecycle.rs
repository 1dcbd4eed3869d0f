//! Purchase and registration hooks
//!
//! Entry points the administration surface calls after a package purchase,
//! a voice subscription approval, or a new registration. Each hook that
//! touches entitlements invalidates the resolver cache once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use talktime_core::{
    config::RegistrationConfig,
    models::{Balance, Entitlement},
    traits::{EntitlementRepository, UserDirectory, VoiceTypeRepository},
    AppError, AppResult,
};
use tracing::{info, instrument, warn};

use crate::ledger::BalanceLedger;
use crate::resolver::EntitlementResolver;

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub user_id: i64,
    pub balance: Balance,
    /// Effect codes newly granted
    pub granted: Vec<String>,
}

pub struct LifecycleHooks {
    users: Arc<dyn UserDirectory>,
    voice_types: Arc<dyn VoiceTypeRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
    ledger: Arc<BalanceLedger>,
    resolver: Arc<EntitlementResolver>,
    registration: RegistrationConfig,
}

impl LifecycleHooks {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        voice_types: Arc<dyn VoiceTypeRepository>,
        entitlements: Arc<dyn EntitlementRepository>,
        ledger: Arc<BalanceLedger>,
        resolver: Arc<EntitlementResolver>,
        registration: RegistrationConfig,
    ) -> Self {
        Self {
            users,
            voice_types,
            entitlements,
            ledger,
            resolver,
            registration,
        }
    }

    /// Credit a purchased or approved top-up package
    #[instrument(skip(self))]
    pub async fn on_package_purchased(&self, user_id: i64, seconds: i64) -> AppResult<Balance> {
        self.ledger.add_seconds(user_id, seconds).await
    }

    /// Grant or convert a voice effect as purchased, bounded by `expiry`
    #[instrument(skip(self))]
    pub async fn on_voice_purchase_approved(
        &self,
        user_id: i64,
        effect_id: i64,
        expiry: Option<DateTime<Utc>>,
    ) -> AppResult<Entitlement> {
        let voice = self
            .voice_types
            .find_by_id(effect_id)
            .await?
            .ok_or_else(|| AppError::EffectNotFound(effect_id.to_string()))?;

        let entitlement = match self
            .entitlements
            .find_by_user_and_effect(user_id, effect_id)
            .await?
        {
            Some(mut existing) => {
                existing.apply_purchase(expiry);
                self.entitlements.update(&existing).await?
            }
            None => {
                let purchased = Entitlement::purchased(user_id, voice.id, &voice.code, expiry, Utc::now());
                self.entitlements.create(&purchased).await?
            }
        };

        self.resolver.invalidate();
        info!(
            "Voice {} purchased by user {} until {:?}",
            voice.code, user_id, expiry
        );
        Ok(entitlement)
    }

    /// Welcome balance plus the trial and permanent effect grants
    #[instrument(skip(self))]
    pub async fn on_new_user_registered(&self, user_id: i64) -> AppResult<RegistrationOutcome> {
        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(AppError::UserNotFound(user_id.to_string()));
        }

        let balance = self
            .ledger
            .add_seconds(user_id, self.registration.welcome_seconds)
            .await?;

        let now = Utc::now();
        let mut granted = Vec::new();

        let trial_code = self.registration.trial_effect_code.clone();
        let trial_days = self.registration.trial_days;
        if self
            .assign(user_id, &trial_code, |effect_id| {
                Entitlement::trial(user_id, effect_id, &trial_code, trial_days, now)
            })
            .await?
        {
            granted.push(trial_code.clone());
        }

        let permanent_code = self.registration.permanent_effect_code.clone();
        if self
            .assign(user_id, &permanent_code, |effect_id| {
                Entitlement::permanent(user_id, effect_id, &permanent_code, now)
            })
            .await?
        {
            granted.push(permanent_code.clone());
        }

        self.resolver.invalidate();
        info!(
            "Registered user {}: {}s welcome balance, granted {:?}",
            user_id, balance.remaining_seconds, granted
        );

        Ok(RegistrationOutcome {
            user_id,
            balance,
            granted,
        })
    }

    /// Create the grant built by `build` unless the user already holds `code`
    async fn assign<F>(&self, user_id: i64, code: &str, build: F) -> AppResult<bool>
    where
        F: FnOnce(i64) -> Entitlement,
    {
        let Some(voice) = self.voice_types.find_by_code(code).await? else {
            warn!("Voice type {} missing from catalog, not granted", code);
            return Ok(false);
        };

        if self
            .entitlements
            .find_by_user_and_effect(user_id, voice.id)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        match self.entitlements.create(&build(voice.id)).await {
            Ok(_) => Ok(true),
            Err(AppError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
