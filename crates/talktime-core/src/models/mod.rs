//! Domain models for TalkTime
//!
//! This module contains all the core domain models used throughout the application.

pub mod balance;
pub mod call;
pub mod entitlement;
pub mod event;
pub mod user;

pub use balance::Balance;
pub use call::{CallHistoryRecord, CallSession, CallStatus};
pub use entitlement::{
    is_active, Entitlement, EntitlementHistory, ExpiryReason, SubscriptionTerm,
};
pub use event::{AnswerEvent, BridgeEvent, CallEvent, HangupEvent, ParkEvent};
pub use user::{User, VoiceType};
