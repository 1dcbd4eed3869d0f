//! Lifecycle hook DTOs
//!
//! Bodies posted by the administration surface after purchases and
//! registrations.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use talktime_core::models::SubscriptionTerm;
use validator::Validate;

/// Package purchase or top-up approval
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PackagePurchasedRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,

    #[validate(range(min = 1, message = "Seconds must be positive"))]
    pub seconds: i64,
}

/// Approved voice subscription.
///
/// An explicit `expiry` wins over `term`; with neither the grant never expires.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VoicePurchaseApprovedRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,

    #[validate(range(min = 1))]
    pub effect_id: i64,

    pub expiry: Option<DateTime<Utc>>,

    pub term: Option<SubscriptionTerm>,
}

impl VoicePurchaseApprovedRequest {
    pub fn resolve_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiry
            .or_else(|| self.term.map(|term| term.expiry_from(now)))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserRegisteredRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_expiry_resolution() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let explicit = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();

        let mut req = VoicePurchaseApprovedRequest {
            user_id: 1,
            effect_id: 2,
            expiry: Some(explicit),
            term: Some(SubscriptionTerm::Monthly),
        };
        assert_eq!(req.resolve_expiry(now), Some(explicit));

        req.expiry = None;
        assert_eq!(
            req.resolve_expiry(now),
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap())
        );

        req.term = None;
        assert_eq!(req.resolve_expiry(now), None);
    }

    #[test]
    fn test_seconds_must_be_positive() {
        let req = PackagePurchasedRequest {
            user_id: 1,
            seconds: 0,
        };
        assert!(req.validate().is_err());
    }
}
