use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Per-tier model identifiers, format `"provider_id/model_name"`.
    #[serde(default)]
    pub tiers: TierModels,
    /// Sampling temperature used when a call does not override it.
    /// Low by default for deterministic agent behavior.
    #[serde(default = "d_temperature")]
    pub default_temperature: f32,
    /// Request timeout for a single LLM call, in milliseconds.
    #[serde(default = "d_120000")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Per-model pricing for cost estimation (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            tiers: TierModels::default(),
            default_temperature: 0.1,
            default_timeout_ms: 120_000,
            embedding: EmbeddingConfig::default(),
            pricing: HashMap::new(),
        }
    }
}

/// Model identifiers per workflow tier plus the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    #[serde(default = "d_classifier_model")]
    pub classifier: String,
    #[serde(default = "d_fast_model")]
    pub simple: String,
    #[serde(default = "d_fast_model")]
    pub medium: String,
    #[serde(default = "d_complex_model")]
    pub complex: String,
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            classifier: d_classifier_model(),
            simple: d_fast_model(),
            medium: d_fast_model(),
            complex: d_complex_model(),
        }
    }
}

/// Embedding deployment settings. The dimension is fixed deployment-wide;
/// changing it is a breaking migration of every stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "d_embedding_model")]
    pub model: String,
    #[serde(default = "d_1536")]
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: d_embedding_model(),
            dim: 1536,
        }
    }
}

/// An OpenAI-compatible provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique id, referenced by tier model strings (`"<id>/<model>"`).
    pub id: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Model used when a request names no model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Calculate estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_temperature() -> f32 {
    0.1
}
fn d_120000() -> u64 {
    120_000
}
fn d_classifier_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn d_fast_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn d_complex_model() -> String {
    "openai/gpt-4o".into()
}
fn d_embedding_model() -> String {
    "openai/text-embedding-3-small".into()
}
fn d_1536() -> usize {
    1536
}
fn d_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
