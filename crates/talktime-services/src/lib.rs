//! Business logic services for TalkTime
//!
//! This crate contains the services that meter prepaid calls and resolve
//! voice-effect entitlements.
//!
//! # Architecture
//!
//! Services are explicitly constructed once at startup and shared through `Arc`:
//! - Each service owns its collaborators as trait objects
//! - The call engine is the only consumer of signaling events
//! - Timers for every in-flight call live in one shared watchdog task
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `BalanceLedger` - Talk-time reserve, credit, and deduction
//! - `SessionTracker` - Registry of in-flight calls
//! - `EntitlementResolver` - Cached effect resolution with single-flight rebuilds
//! - `ExpirySweeper` - Migration of expired entitlements into history
//! - `Watchdog` - Shared timer queue for call cut-off and eviction
//! - `CallHistoryRecorder` - Call audit trail writes
//! - `CallEngine` - Admission and metering state machine
//! - `LifecycleHooks` - Purchase and registration entry points
//! - `Scheduler` - Cron-driven sweep and cache refresh

pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod recorder;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod sweeper;
pub mod watchdog;

pub use engine::{ActiveBridge, CallEngine, EngineSettings};
pub use ledger::BalanceLedger;
pub use lifecycle::{LifecycleHooks, RegistrationOutcome};
pub use recorder::{CallHistoryRecorder, CallOutcome};
pub use resolver::{AccessStatistics, EntitlementResolver, TopUser};
pub use scheduler::{ScheduledJob, Scheduler};
pub use session::SessionTracker;
pub use sweeper::{CleanupStatistics, ExpirySweeper, ReasonCounts, SweepPreview, SweepReport};
pub use watchdog::{TimerFired, TimerKind, Watchdog, WatchdogHandle};

/// Business logic constants
pub mod constants {
    /// Effect code meaning "apply nothing"
    pub const NO_EFFECT: &str = "904";

    /// Hangup cause recorded for sessions evicted after the watchdog fired
    pub const WATCHDOG_EVICTED: &str = "WATCHDOG_EVICTED";

    /// Calls returned per user by the history listing
    pub const RECENT_CALLS_LIMIT: i64 = 50;
}

/// Voice changer presets keyed by effect code
pub mod effects {
    use talktime_core::traits::EffectCommand;

    use crate::constants::NO_EFFECT;

    /// Changer command for `code`; `None` for the no-effect sentinel and
    /// for unknown codes.
    pub fn command_for(code: &str) -> Option<EffectCommand> {
        let params: &[&str] = match code {
            "901" => &[],
            "902" => &["-15", "-4", "300"],
            "903" => &["8", "4", "120"],
            _ => return None,
        };

        Some(EffectCommand {
            code: code.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_preset_table() {
            assert!(command_for("901").unwrap().params.is_empty());
            assert_eq!(command_for("902").unwrap().params, vec!["-15", "-4", "300"]);
            assert_eq!(command_for("903").unwrap().params, vec!["8", "4", "120"]);
            assert!(command_for(NO_EFFECT).is_none());
            assert!(command_for("999").is_none());
        }
    }
}
