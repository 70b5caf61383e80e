//! Semantic search over the caller's review corpus: embed the query, hit
//! the vector store, keep the result table in context.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use dq_context::{Cell, ContextState, Dtype, TableArtifact};
use dq_domain::error::Result;
use dq_providers::Embedder;
use dq_storage::VectorStore;

use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

const DEFAULT_NAMESPACE: &str = "reviews";
const DEFAULT_K: usize = 10;

pub(crate) fn register(
    registry: &mut ToolRegistry,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
) {
    registry.register(
        ToolSpec {
            name: "semantic_search",
            description: "Find the most semantically similar reviews or documents for a query. \
                          Results are kept available for later analysis steps.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Natural-language search query" },
                    "namespace": { "type": "string", "description": "Corpus to search (default 'reviews')" },
                    "k": { "type": "integer", "description": "Number of hits (default 10)" },
                    "name": { "type": "string", "description": "Name to store the hits under (defaults to the query)" }
                },
                "required": ["query"]
            }),
            effect: SideEffect::EXTERNAL_READ_CONTEXT_WRITE,
        },
        Arc::new(SemanticSearch { vectors, embedder }),
    );
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    name: Option<String>,
}

struct SemanticSearch {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

#[async_trait::async_trait]
impl ToolExecutor for SemanticSearch {
    async fn execute(&self, args: Value, ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: SearchArgs = parse_args(args)?;
        let namespace = args.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.into());
        let k = args.k.unwrap_or(DEFAULT_K).max(1);
        let name = args.name.unwrap_or_else(|| args.query.clone());

        let vectors = self.embedder.embed(std::slice::from_ref(&args.query)).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| dq_domain::Error::Internal("embedder returned no vector".into()))?;

        let hits = self
            .vectors
            .similarity_search(&ctx.user_id, &namespace, &query_vector, k)
            .await?;

        let table = hits_to_table(&hits);
        let summary = if hits.is_empty() {
            format!("No matches in `{namespace}` for \"{}\".", args.query)
        } else {
            format!(
                "{} match(es) in `{namespace}` for \"{}\"; best score {:.3}.",
                hits.len(),
                args.query,
                hits[0].score
            )
        };
        let payload = serde_json::json!({
            "name": name,
            "namespace": namespace,
            "hits": hits,
        });

        ctx.insert_search_results(&name, table);
        Ok(ToolOutcome::ok(summary, payload))
    }
}

/// Project hits into a `{id, score, text}` table; the text column falls
/// back to the whole payload rendering when no `text` field is present.
fn hits_to_table(hits: &[dq_storage::SearchHit]) -> TableArtifact {
    let rows = hits
        .iter()
        .map(|h| {
            let text = h
                .payload
                .get("text")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| h.payload.to_string());
            vec![
                Cell::Str(h.id.clone()),
                Cell::Float(f64::from(h.score)),
                Cell::Str(text),
            ]
        })
        .collect();
    TableArtifact {
        columns: vec!["id".into(), "score".into(), "text".into()],
        dtypes: vec![Dtype::Str, Dtype::Float, Dtype::Str],
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dq_storage::{MemoryStore, VectorEntry, VectorStore};

    struct FixedEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            // Orthogonal-ish vectors keyed on text length parity.
            Ok(texts
                .iter()
                .map(|t| {
                    if t.len() % 2 == 0 {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
        fn dim(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn search_stores_hit_table_in_context() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                "u1",
                "reviews",
                vec![
                    VectorEntry::new(
                        "r1",
                        vec![1.0, 0.0],
                        serde_json::json!({"text": "fast shipping"}),
                    ),
                    VectorEntry::new(
                        "r2",
                        vec![0.0, 1.0],
                        serde_json::json!({"text": "slow support"}),
                    ),
                ],
            )
            .await
            .unwrap();

        let mut registry = ToolRegistry::new();
        register(&mut registry, store, Arc::new(FixedEmbedder));

        let mut ctx = ContextState::new("u1");
        let outcome = registry
            .dispatch(
                "semantic_search",
                serde_json::json!({ "query": "ship", "k": 1, "name": "shipping" }),
                &mut ctx,
            )
            .await;

        assert!(!outcome.is_error, "{}", outcome.summary);
        let table = ctx.search_results.get("shipping").unwrap().as_full().unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows[0][0], Cell::Str("r1".into()));
        assert_eq!(table.rows[0][2], Cell::Str("fast shipping".into()));
    }

    #[tokio::test]
    async fn empty_namespace_returns_empty_table_not_error() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = ToolRegistry::new();
        register(&mut registry, store, Arc::new(FixedEmbedder));

        let mut ctx = ContextState::new("u1");
        let outcome = registry
            .dispatch(
                "semantic_search",
                serde_json::json!({ "query": "anything" }),
                &mut ctx,
            )
            .await;
        assert!(!outcome.is_error);
        assert!(outcome.summary.starts_with("No matches"));
    }
}
