//! Shared handler state

use std::sync::Arc;
use talktime_services::{
    BalanceLedger, CallEngine, CallHistoryRecorder, EntitlementResolver, ExpirySweeper,
    LifecycleHooks,
};

/// Services reachable from HTTP handlers, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<BalanceLedger>,
    pub resolver: Arc<EntitlementResolver>,
    pub sweeper: Arc<ExpirySweeper>,
    pub recorder: Arc<CallHistoryRecorder>,
    pub engine: Arc<CallEngine>,
    pub hooks: Arc<LifecycleHooks>,
}
