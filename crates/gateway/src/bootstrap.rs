//! Application assembly: construct the capabilities and wire the shared
//! state. Dev mode runs entirely against the in-memory reference store —
//! external database and vector-index drivers are deployment adapters,
//! injected here when present.

use std::sync::Arc;
use std::time::Duration;

use dq_domain::config::Config;
use dq_engine::workflow::WorkflowEngine;
use dq_ledger::CallLedger;
use dq_providers::{Embedder, ProviderRegistry};
use dq_storage::{MemoryStore, RelationalStore, VectorStore};

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Build the application state against the in-memory store.
pub fn build_state(config: Arc<Config>) -> AppState {
    let store = Arc::new(MemoryStore::new());
    let registry = ProviderRegistry::from_config(&config.llm);
    build_state_with(config, store, registry)
}

/// Assembly with explicit store and provider registry (tests and custom
/// deployments).
pub fn build_state_with(
    config: Arc<Config>,
    store: Arc<MemoryStore>,
    registry: ProviderRegistry,
) -> AppState {
    let embedder = registry.embedder().unwrap_or_else(|| {
        Arc::new(UnconfiguredEmbedder {
            dim: config.llm.embedding.dim,
        })
    });

    let tools = Arc::new(dq_tools::standard_registry(
        store.clone() as Arc<dyn RelationalStore>,
        store.clone() as Arc<dyn VectorStore>,
        embedder,
    ));
    let ledger = CallLedger::new(store.clone());

    let engine = Arc::new(WorkflowEngine {
        tools,
        ledger: ledger.clone(),
        pricing: config.llm.pricing.clone(),
        default_temperature: config.llm.default_temperature,
        step_timeout: Duration::from_secs(config.runtime.step_timeout_s),
        turn_timeout: Duration::from_secs(config.runtime.workflow_timeout_s),
    });

    AppState {
        config,
        store,
        llm: Arc::new(registry),
        ledger,
        engine,
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
    }
}

/// Embedder stand-in used when no embedding provider resolves: every call
/// fails as a tool error, the turn keeps running.
struct UnconfiguredEmbedder {
    dim: usize,
}

#[async_trait::async_trait]
impl Embedder for UnconfiguredEmbedder {
    async fn embed(&self, _texts: &[String]) -> dq_domain::Result<Vec<Vec<f32>>> {
        Err(dq_domain::Error::Config(
            "no embedding provider is configured".into(),
        ))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
