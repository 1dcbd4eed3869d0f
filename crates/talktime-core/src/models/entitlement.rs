//! Entitlement model
//!
//! An entitlement grants one user access to one voice effect. Access is bounded
//! by two independent clocks: an optional trial expiry and an optional
//! subscription expiry. A missing clock means "no constraint of that kind".

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Returns true while either clock still covers the user.
///
/// | trial  | subscription | active |
/// |--------|--------------|--------|
/// | none   | none         | yes    |
/// | t      | none         | t > now |
/// | none   | s            | s > now |
/// | t      | s            | t > now or s > now |
pub fn is_active(
    trial_expires_at: Option<DateTime<Utc>>,
    subscription_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match (trial_expires_at, subscription_expires_at) {
        (None, None) => true,
        (Some(trial), None) => trial > now,
        (None, Some(subscription)) => subscription > now,
        (Some(trial), Some(subscription)) => trial > now || subscription > now,
    }
}

/// Why an entitlement was moved to history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpiryReason {
    TrialExpired,
    SubscriptionExpired,
    BothExpired,
}

impl ExpiryReason {
    /// Classify an entitlement's clocks. `None` means it is still active.
    pub fn classify(
        trial_expires_at: Option<DateTime<Utc>>,
        subscription_expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if is_active(trial_expires_at, subscription_expires_at, now) {
            return None;
        }

        match (trial_expires_at, subscription_expires_at) {
            (Some(_), Some(_)) => Some(ExpiryReason::BothExpired),
            (Some(_), None) => Some(ExpiryReason::TrialExpired),
            (None, Some(_)) => Some(ExpiryReason::SubscriptionExpired),
            (None, None) => None,
        }
    }

    /// Parse from the stored representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRIAL_EXPIRED" => Some(ExpiryReason::TrialExpired),
            "SUBSCRIPTION_EXPIRED" => Some(ExpiryReason::SubscriptionExpired),
            "BOTH_EXPIRED" => Some(ExpiryReason::BothExpired),
            _ => None,
        }
    }

    pub fn all() -> [ExpiryReason; 3] {
        [
            ExpiryReason::TrialExpired,
            ExpiryReason::SubscriptionExpired,
            ExpiryReason::BothExpired,
        ]
    }
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryReason::TrialExpired => write!(f, "TRIAL_EXPIRED"),
            ExpiryReason::SubscriptionExpired => write!(f, "SUBSCRIPTION_EXPIRED"),
            ExpiryReason::BothExpired => write!(f, "BOTH_EXPIRED"),
        }
    }
}

/// Per-user, per-effect access record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Store identifier (0 before insertion)
    pub id: i64,

    pub user_id: i64,

    /// Voice type identifier
    pub effect_id: i64,

    /// Voice type code, joined from the effect catalog
    pub effect_code: String,

    /// Paid for, as opposed to granted on registration
    pub is_purchased: bool,

    pub assigned_at: DateTime<Utc>,

    pub trial_expires_at: Option<DateTime<Utc>>,

    pub subscription_expires_at: Option<DateTime<Utc>>,

    /// At most one per user
    pub is_default: bool,
}

impl Entitlement {
    /// Trial grant lasting `days` from `now`
    pub fn trial(user_id: i64, effect_id: i64, effect_code: &str, days: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            effect_id,
            effect_code: effect_code.to_string(),
            is_purchased: false,
            assigned_at: now,
            trial_expires_at: Some(now + Duration::days(days)),
            subscription_expires_at: None,
            is_default: false,
        }
    }

    /// Grant with neither clock set
    pub fn permanent(user_id: i64, effect_id: i64, effect_code: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            effect_id,
            effect_code: effect_code.to_string(),
            is_purchased: false,
            assigned_at: now,
            trial_expires_at: None,
            subscription_expires_at: None,
            is_default: false,
        }
    }

    /// Purchased grant bounded by `expiry` (none means it never lapses)
    pub fn purchased(
        user_id: i64,
        effect_id: i64,
        effect_code: &str,
        expiry: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            effect_id,
            effect_code: effect_code.to_string(),
            is_purchased: true,
            assigned_at: now,
            trial_expires_at: None,
            subscription_expires_at: expiry,
            is_default: false,
        }
    }

    #[inline]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        is_active(self.trial_expires_at, self.subscription_expires_at, now)
    }

    #[inline]
    pub fn expiry_reason_at(&self, now: DateTime<Utc>) -> Option<ExpiryReason> {
        ExpiryReason::classify(self.trial_expires_at, self.subscription_expires_at, now)
    }

    /// Convert an approved purchase over an existing grant
    pub fn apply_purchase(&mut self, expiry: Option<DateTime<Utc>>) {
        self.is_purchased = true;
        self.trial_expires_at = None;
        self.subscription_expires_at = expiry;
    }
}

/// Immutable record of an entitlement removed by the sweeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementHistory {
    pub id: i64,
    pub original_entitlement_id: i64,
    pub user_id: i64,
    pub effect_id: i64,
    pub effect_code: String,
    pub is_purchased: bool,
    pub assigned_at: DateTime<Utc>,
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub is_default: bool,
    pub expired_at: DateTime<Utc>,
    pub expiry_reason: ExpiryReason,
    pub created_at: DateTime<Utc>,
}

impl EntitlementHistory {
    pub fn from_expired(entitlement: &Entitlement, reason: ExpiryReason, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            original_entitlement_id: entitlement.id,
            user_id: entitlement.user_id,
            effect_id: entitlement.effect_id,
            effect_code: entitlement.effect_code.clone(),
            is_purchased: entitlement.is_purchased,
            assigned_at: entitlement.assigned_at,
            trial_expires_at: entitlement.trial_expires_at,
            subscription_expires_at: entitlement.subscription_expires_at,
            is_default: entitlement.is_default,
            expired_at: now,
            expiry_reason: reason,
            created_at: now,
        }
    }
}

/// Billing period of a voice subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTerm {
    Monthly,
    Yearly,
}

impl SubscriptionTerm {
    /// Expiry one calendar period after `from`
    pub fn expiry_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            SubscriptionTerm::Monthly => Months::new(1),
            SubscriptionTerm::Yearly => Months::new(12),
        };
        from.checked_add_months(months).unwrap_or(from)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" => Some(SubscriptionTerm::Monthly),
            "yearly" => Some(SubscriptionTerm::Yearly),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_activity_table() {
        let past = Some(now() - Duration::days(1));
        let future = Some(now() + Duration::days(1));

        let cases = [
            (None, None, true, None),
            (past, None, false, Some(ExpiryReason::TrialExpired)),
            (None, future, true, None),
            (past, future, true, None),
            (past, past, false, Some(ExpiryReason::BothExpired)),
            (future, past, true, None),
            (None, past, false, Some(ExpiryReason::SubscriptionExpired)),
            (future, None, true, None),
        ];

        for (trial, subscription, active, reason) in cases {
            assert_eq!(
                is_active(trial, subscription, now()),
                active,
                "trial={:?} subscription={:?}",
                trial,
                subscription
            );
            assert_eq!(ExpiryReason::classify(trial, subscription, now()), reason);
        }
    }

    #[test]
    fn test_expiry_instant_is_inactive() {
        assert!(!is_active(Some(now()), None, now()));
    }

    #[test]
    fn test_apply_purchase_clears_trial() {
        let mut grant = Entitlement::trial(1, 3, "903", 3, now());
        let expiry = now() + Duration::days(30);
        grant.apply_purchase(Some(expiry));

        assert!(grant.is_purchased);
        assert_eq!(grant.trial_expires_at, None);
        assert_eq!(grant.subscription_expires_at, Some(expiry));
    }

    #[test]
    fn test_history_copies_fields() {
        let mut grant = Entitlement::trial(9, 3, "903", 3, now());
        grant.id = 42;
        let later = now() + Duration::days(4);
        let history = EntitlementHistory::from_expired(&grant, ExpiryReason::TrialExpired, later);

        assert_eq!(history.original_entitlement_id, 42);
        assert_eq!(history.effect_code, "903");
        assert_eq!(history.expired_at, later);
        assert_eq!(history.trial_expires_at, grant.trial_expires_at);
    }

    #[test]
    fn test_subscription_terms() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            SubscriptionTerm::Monthly.expiry_from(start),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
        assert_eq!(
            SubscriptionTerm::Yearly.expiry_from(start),
            Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(SubscriptionTerm::from_str("YEARLY"), Some(SubscriptionTerm::Yearly));
    }

    #[test]
    fn test_expiry_reason_round_trip_names() {
        for reason in ExpiryReason::all() {
            assert_eq!(ExpiryReason::from_str(&reason.to_string()), Some(reason));
        }
    }
}
