//! Density clustering of embedded text columns.
//!
//! DBSCAN over cosine distance; outliers carry the reserved noise label
//! `-1`. The clustered copy of the table lands in `clustering[name]` with
//! a `__cluster_id__` column appended.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use dq_context::{Cell, ContextState, Dtype};
use dq_domain::error::{Error, Result};
use dq_providers::Embedder;

use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

pub(crate) const CLUSTER_COLUMN: &str = "__cluster_id__";
pub(crate) const NOISE_LABEL: i64 = -1;

const DEFAULT_EPS: f64 = 0.3;
const DEFAULT_MIN_SAMPLES: usize = 3;

pub(crate) fn register(registry: &mut ToolRegistry, embedder: Arc<dyn Embedder>) {
    registry.register(
        ToolSpec {
            name: "cluster_dataset",
            description: "Group a dataset's text column into semantic clusters using density \
                          clustering. Outliers get cluster id -1.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "dataset_name": { "type": "string", "description": "Dataset to cluster (must already be loaded)" },
                    "text_column": { "type": "string", "description": "Text column to embed (defaults to the first text column)" },
                    "eps": { "type": "number", "description": "Cosine-distance neighborhood radius (default 0.3)" },
                    "min_samples": { "type": "integer", "description": "Minimum neighborhood size for a core point (default 3)" }
                },
                "required": ["dataset_name"]
            }),
            effect: SideEffect::CONTEXT_WRITE,
        },
        Arc::new(ClusterDataset { embedder }),
    );
}

#[derive(Deserialize)]
pub(crate) struct ClusterArgs {
    pub dataset_name: String,
    #[serde(default)]
    pub text_column: Option<String>,
    #[serde(default)]
    pub eps: Option<f64>,
    #[serde(default)]
    pub min_samples: Option<usize>,
}

struct ClusterDataset {
    embedder: Arc<dyn Embedder>,
}

#[async_trait::async_trait]
impl ToolExecutor for ClusterDataset {
    async fn execute(&self, args: Value, ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: ClusterArgs = parse_args(args)?;
        let summary = cluster_into_context(self.embedder.as_ref(), ctx, &args).await?;
        Ok(ToolOutcome::ok(
            format!(
                "Clustered `{}` on `{}`: {} cluster(s), {} outlier(s) across {} rows.",
                args.dataset_name,
                summary.text_column,
                summary.cluster_count,
                summary.noise_count,
                summary.total_rows,
            ),
            serde_json::to_value(&summary)?,
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared clustering path (also auto-invoked by gap detection)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, serde::Serialize)]
pub(crate) struct ClusterSummary {
    pub dataset_name: String,
    pub text_column: String,
    pub total_rows: usize,
    pub cluster_count: usize,
    pub noise_count: usize,
}

pub(crate) async fn cluster_into_context(
    embedder: &dyn Embedder,
    ctx: &mut ContextState,
    args: &ClusterArgs,
) -> Result<ClusterSummary> {
    let table = ctx.dataset_table(&args.dataset_name).ok_or_else(|| {
        Error::NotFound(format!(
            "dataset '{}' is not loaded in this conversation; fetch it with \
             get_dataset_data_from_sql first",
            args.dataset_name
        ))
    })?;

    let text_column = match &args.text_column {
        Some(c) => {
            table.column_index(c).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "dataset '{}' has no column '{c}'",
                    args.dataset_name
                ))
            })?;
            c.clone()
        }
        None => table
            .columns
            .iter()
            .zip(&table.dtypes)
            .find(|(_, d)| **d == Dtype::Str)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "dataset '{}' has no text column to cluster",
                    args.dataset_name
                ))
            })?,
    };

    let texts: Vec<String> = table
        .column(&text_column)
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.as_str().unwrap_or_default().to_string())
        .collect();
    if texts.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "dataset '{}' is empty; nothing to cluster",
            args.dataset_name
        )));
    }

    let embeddings = embedder.embed(&texts).await?;
    let labels = dbscan(
        &embeddings,
        args.eps.unwrap_or(DEFAULT_EPS),
        args.min_samples.unwrap_or(DEFAULT_MIN_SAMPLES),
    );

    let noise_count = labels.iter().filter(|&&l| l == NOISE_LABEL).count();
    let cluster_count = labels
        .iter()
        .filter(|&&l| l != NOISE_LABEL)
        .collect::<std::collections::HashSet<_>>()
        .len();

    let clustered = table.with_column(
        CLUSTER_COLUMN,
        Dtype::Int,
        labels.iter().map(|&l| Cell::Int(l)).collect(),
    );
    let total_rows = clustered.row_count();
    ctx.insert_clustering(&args.dataset_name, clustered);

    Ok(ClusterSummary {
        dataset_name: args.dataset_name.clone(),
        text_column,
        total_rows,
        cluster_count,
        noise_count,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DBSCAN over cosine distance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Classic DBSCAN. Quadratic neighborhood queries — the row budget keeps
/// in-context tables small enough for that.
pub(crate) fn dbscan(vectors: &[Vec<f32>], eps: f64, min_samples: usize) -> Vec<i64> {
    let n = vectors.len();
    let mut labels = vec![NOISE_LABEL; n];
    let mut visited = vec![false; n];
    let mut next_cluster: i64 = 0;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| cosine_distance(&vectors[i], &vectors[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seed = neighbors(i);
        if seed.len() < min_samples {
            continue; // stays noise unless claimed as a border point
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = cluster;

        let mut queue: Vec<usize> = seed;
        while let Some(j) = queue.pop() {
            if labels[j] == NOISE_LABEL {
                labels[j] = cluster;
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let reach = neighbors(j);
            if reach.len() >= min_samples {
                queue.extend(reach);
            }
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use dq_context::TableArtifact;

    /// Embedder that maps texts onto two tight groups plus one far outlier.
    struct GroupedEmbedder;

    #[async_trait::async_trait]
    impl Embedder for GroupedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with("ship") {
                        vec![1.0, 0.02]
                    } else if t.starts_with("price") {
                        vec![0.02, 1.0]
                    } else {
                        vec![-1.0, -1.0]
                    }
                })
                .collect())
        }
        fn dim(&self) -> usize {
            2
        }
    }

    fn reviews(texts: &[&str]) -> TableArtifact {
        TableArtifact::new(
            vec!["id".into(), "text".into()],
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| vec![Cell::Int(i as i64), Cell::Str((*t).into())])
                .collect(),
        )
    }

    #[test]
    fn dbscan_separates_two_groups_and_noise() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.05],
            vec![0.98, 0.02],
            vec![0.0, 1.0],
            vec![0.05, 0.99],
            vec![0.02, 0.98],
            vec![-1.0, -1.0],
        ];
        let labels = dbscan(&vectors, 0.1, 3);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[6], NOISE_LABEL);
    }

    #[test]
    fn dbscan_all_noise_when_sparse() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let labels = dbscan(&vectors, 0.05, 2);
        assert!(labels.iter().all(|&l| l == NOISE_LABEL));
    }

    #[tokio::test]
    async fn cluster_tool_writes_clustered_copy() {
        let mut registry = ToolRegistry::new();
        register(&mut registry, Arc::new(GroupedEmbedder));

        let mut ctx = ContextState::new("u1");
        ctx.insert_dataset(
            "reviews",
            reviews(&[
                "shipping was fast",
                "shipping box damaged",
                "shipping again",
                "price too high",
                "price is fair",
                "pricey subscription",
                "unrelated rant",
            ]),
        );

        let outcome = registry
            .dispatch(
                "cluster_dataset",
                serde_json::json!({ "dataset_name": "reviews", "eps": 0.1, "min_samples": 3 }),
                &mut ctx,
            )
            .await;
        assert!(!outcome.is_error, "{}", outcome.summary);

        let clustered = ctx.clustering_table("reviews").unwrap();
        assert_eq!(clustered.columns.last().unwrap(), CLUSTER_COLUMN);
        let labels: Vec<i64> = clustered
            .column(CLUSTER_COLUMN)
            .unwrap()
            .iter()
            .map(|c| match c {
                Cell::Int(i) => *i,
                other => panic!("unexpected cell {other:?}"),
            })
            .collect();
        assert_eq!(labels[6], NOISE_LABEL);
        assert_eq!(outcome.payload["cluster_count"], 2);
        // Source table keeps its shape.
        assert_eq!(ctx.dataset_table("reviews").unwrap().columns.len(), 2);
    }

    #[tokio::test]
    async fn missing_dataset_is_a_descriptive_error() {
        let mut registry = ToolRegistry::new();
        register(&mut registry, Arc::new(GroupedEmbedder));

        let mut ctx = ContextState::new("u1");
        let outcome = registry
            .dispatch(
                "cluster_dataset",
                serde_json::json!({ "dataset_name": "ghost" }),
                &mut ctx,
            )
            .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.payload["kind"], "not_found");
        assert!(outcome.summary.contains("get_dataset_data_from_sql"));
    }
}
