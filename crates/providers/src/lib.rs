//! LLM and embedding capability implementations.
//!
//! The runtime consumes the [`LlmProvider`] and [`Embedder`] traits; this
//! crate provides the OpenAI-compatible HTTP adapter and the registry that
//! constructs providers from configuration and resolves per-tier model ids.

pub mod openai_compat;
pub mod registry;
pub mod traits;
pub(crate) mod util;

pub use registry::{ProviderInitError, ProviderRegistry};
pub use traits::{
    ChatRequest, ChatResponse, Embedder, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
