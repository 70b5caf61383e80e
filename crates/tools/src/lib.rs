//! The tool catalog: declarative specs, validated dispatch, and the
//! analytical tools the agent team relies on.

mod citations;
mod cluster;
mod datasets;
mod gaps;
mod registry;
mod search;
mod trends;
mod viz;

use std::sync::Arc;

use dq_providers::Embedder;
use dq_storage::{RelationalStore, VectorStore};

pub use registry::{SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

/// Assemble the full analytical tool set over the injected capabilities.
pub fn standard_registry(
    store: Arc<dyn RelationalStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    datasets::register(&mut registry, store.clone());
    search::register(&mut registry, vectors, embedder.clone());
    cluster::register(&mut registry, embedder.clone());
    gaps::register(&mut registry, embedder);
    trends::register(&mut registry);
    viz::register(&mut registry);
    citations::register(&mut registry);
    registry
}
