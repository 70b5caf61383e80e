use std::sync::Arc;

use dq_domain::config::Config;
use dq_engine::workflow::WorkflowEngine;
use dq_ledger::CallLedger;
use dq_providers::ProviderRegistry;
use dq_storage::RelationalStore;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;

/// Shared application state passed to all API handlers.
///
/// Every capability is injected: the gateway never constructs a store or
/// provider outside bootstrap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Capabilities ──────────────────────────────────────────────
    pub store: Arc<dyn RelationalStore>,
    pub llm: Arc<ProviderRegistry>,
    pub ledger: CallLedger,

    // ── Runtime ───────────────────────────────────────────────────
    pub engine: Arc<WorkflowEngine>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
}
