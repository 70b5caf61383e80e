//! Cluster-coverage gap detection.
//!
//! Requires a clustering of the dataset — auto-invokes the clustering path
//! when none exists yet. Reports underrepresented clusters (below half the
//! average size), the outlier rate, and top-3 concentration.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use dq_context::{Cell, ClusterGap, ContextState, GapAnalysis};
use dq_domain::error::{Error, Result};
use dq_providers::Embedder;

use crate::cluster::{cluster_into_context, ClusterArgs, CLUSTER_COLUMN, NOISE_LABEL};
use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

/// A cluster is underrepresented below this fraction of the average size.
const UNDERREPRESENTED_RATIO: f64 = 0.5;

pub(crate) fn register(registry: &mut ToolRegistry, embedder: Arc<dyn Embedder>) {
    registry.register(
        ToolSpec {
            name: "detect_gaps_from_clusters",
            description: "Analyze cluster coverage of a dataset: underrepresented topics, \
                          outlier rate, and how concentrated the top clusters are. Clusters \
                          the dataset first if needed.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "dataset_name": { "type": "string", "description": "Dataset to analyze" },
                    "text_column": { "type": "string", "description": "Text column used when clustering is needed" },
                    "eps": { "type": "number" },
                    "min_samples": { "type": "integer" }
                },
                "required": ["dataset_name"]
            }),
            effect: SideEffect::CONTEXT_WRITE,
        },
        Arc::new(DetectGaps { embedder }),
    );
}

struct DetectGaps {
    embedder: Arc<dyn Embedder>,
}

#[async_trait::async_trait]
impl ToolExecutor for DetectGaps {
    async fn execute(&self, args: Value, ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: ClusterArgs = parse_args(args)?;

        if ctx.clustering_table(&args.dataset_name).is_none() {
            cluster_into_context(self.embedder.as_ref(), ctx, &args).await?;
        }

        let clustered = ctx
            .clustering_table(&args.dataset_name)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "clustering for '{}' vanished after auto-invoke",
                    args.dataset_name
                ))
            })?;

        let labels: Vec<i64> = clustered
            .column(CLUSTER_COLUMN)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "clustering for '{}' carries no {CLUSTER_COLUMN} column",
                    args.dataset_name
                ))
            })?
            .iter()
            .filter_map(|c| match c {
                Cell::Int(i) => Some(*i),
                _ => None,
            })
            .collect();

        let analysis = analyze_labels(&labels);
        let summary = render_summary(&args.dataset_name, &analysis);
        let payload = serde_json::to_value(&analysis)?;

        ctx.gap_analysis.insert(args.dataset_name.clone(), analysis);
        Ok(ToolOutcome::ok(summary, payload))
    }
}

fn analyze_labels(labels: &[i64]) -> GapAnalysis {
    let total_rows = labels.len();
    let noise = labels.iter().filter(|&&l| l == NOISE_LABEL).count();

    let mut sizes: HashMap<i64, usize> = HashMap::new();
    for &label in labels {
        if label != NOISE_LABEL {
            *sizes.entry(label).or_insert(0) += 1;
        }
    }

    let cluster_count = sizes.len();
    let clustered_rows: usize = sizes.values().sum();
    let avg_cluster_size = if cluster_count == 0 {
        0.0
    } else {
        clustered_rows as f64 / cluster_count as f64
    };

    let mut underrepresented: Vec<ClusterGap> = sizes
        .iter()
        .filter(|(_, &size)| (size as f64) < UNDERREPRESENTED_RATIO * avg_cluster_size)
        .map(|(&cluster_id, &size)| ClusterGap {
            cluster_id,
            size,
            share: if clustered_rows == 0 {
                0.0
            } else {
                size as f64 / clustered_rows as f64
            },
        })
        .collect();
    underrepresented.sort_by_key(|g| (g.size, g.cluster_id));

    let mut ordered_sizes: Vec<usize> = sizes.values().copied().collect();
    ordered_sizes.sort_unstable_by(|a, b| b.cmp(a));
    let top3: usize = ordered_sizes.iter().take(3).sum();
    let top3_concentration = if clustered_rows == 0 {
        0.0
    } else {
        top3 as f64 / clustered_rows as f64
    };

    GapAnalysis {
        total_rows,
        cluster_count,
        avg_cluster_size,
        underrepresented,
        outlier_rate: if total_rows == 0 {
            0.0
        } else {
            noise as f64 / total_rows as f64
        },
        top3_concentration,
    }
}

fn render_summary(dataset_name: &str, analysis: &GapAnalysis) -> String {
    format!(
        "Gap analysis for `{dataset_name}`: {} cluster(s) over {} rows; \
         {} underrepresented, outlier rate {:.1}%, top-3 concentration {:.1}%.",
        analysis.cluster_count,
        analysis.total_rows,
        analysis.underrepresented.len(),
        analysis.outlier_rate * 100.0,
        analysis.top3_concentration * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dq_context::TableArtifact;
    use dq_domain::error::Result as DqResult;

    #[test]
    fn analyze_labels_flags_small_clusters() {
        // Cluster 0: 8 rows, cluster 1: 8 rows, cluster 2: 2 rows, 2 noise.
        let mut labels = vec![0i64; 8];
        labels.extend(vec![1i64; 8]);
        labels.extend(vec![2i64; 2]);
        labels.extend(vec![NOISE_LABEL; 2]);

        let analysis = analyze_labels(&labels);
        assert_eq!(analysis.total_rows, 20);
        assert_eq!(analysis.cluster_count, 3);
        assert_eq!(analysis.underrepresented.len(), 1);
        assert_eq!(analysis.underrepresented[0].cluster_id, 2);
        assert!((analysis.outlier_rate - 0.1).abs() < 1e-9);
        // Three clusters total, so the top 3 cover everything clustered.
        assert!((analysis.top3_concentration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn analyze_labels_empty_input() {
        let analysis = analyze_labels(&[]);
        assert_eq!(analysis.cluster_count, 0);
        assert_eq!(analysis.outlier_rate, 0.0);
        assert_eq!(analysis.top3_concentration, 0.0);
    }

    #[test]
    fn top3_concentration_with_many_clusters() {
        // Sizes: 10, 5, 4, 1 → top3 = 19/20.
        let mut labels = Vec::new();
        for (id, size) in [(0i64, 10), (1, 5), (2, 4), (3, 1)] {
            labels.extend(vec![id; size]);
        }
        let analysis = analyze_labels(&labels);
        assert!((analysis.top3_concentration - 0.95).abs() < 1e-9);
    }

    struct NoEmbeds;

    #[async_trait::async_trait]
    impl Embedder for NoEmbeds {
        async fn embed(&self, _texts: &[String]) -> DqResult<Vec<Vec<f32>>> {
            panic!("must not be called when clustering already exists");
        }
        fn dim(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn reuses_existing_clustering_without_re_embedding() {
        let mut registry = ToolRegistry::new();
        register(&mut registry, Arc::new(NoEmbeds));

        let mut ctx = ContextState::new("u1");
        let table = TableArtifact::new(
            vec!["text".into(), CLUSTER_COLUMN.into()],
            vec![
                vec![Cell::Str("a".into()), Cell::Int(0)],
                vec![Cell::Str("b".into()), Cell::Int(0)],
                vec![Cell::Str("c".into()), Cell::Int(NOISE_LABEL)],
            ],
        );
        ctx.insert_clustering("reviews", table);

        let outcome = registry
            .dispatch(
                "detect_gaps_from_clusters",
                serde_json::json!({ "dataset_name": "reviews" }),
                &mut ctx,
            )
            .await;
        assert!(!outcome.is_error, "{}", outcome.summary);
        assert!(ctx.gap_analysis.contains_key("reviews"));
        let analysis = &ctx.gap_analysis["reviews"];
        assert_eq!(analysis.cluster_count, 1);
        assert!((analysis.outlier_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    struct GroupedEmbedder;

    #[async_trait::async_trait]
    impl Embedder for GroupedEmbedder {
        async fn embed(&self, texts: &[String]) -> DqResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("ship") {
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
    async fn auto_invokes_clustering_when_absent() {
        let mut registry = ToolRegistry::new();
        register(&mut registry, Arc::new(GroupedEmbedder));

        let mut ctx = ContextState::new("u1");
        ctx.insert_dataset(
            "reviews",
            TableArtifact::new(
                vec!["text".into()],
                vec![
                    vec![Cell::Str("ship a".into())],
                    vec![Cell::Str("ship b".into())],
                    vec![Cell::Str("ship c".into())],
                    vec![Cell::Str("price a".into())],
                    vec![Cell::Str("price b".into())],
                    vec![Cell::Str("price c".into())],
                ],
            ),
        );

        let outcome = registry
            .dispatch(
                "detect_gaps_from_clusters",
                serde_json::json!({ "dataset_name": "reviews" }),
                &mut ctx,
            )
            .await;
        assert!(!outcome.is_error, "{}", outcome.summary);
        assert!(ctx.clustering_table("reviews").is_some());
        assert!(ctx.gap_analysis.contains_key("reviews"));
        assert_eq!(ctx.gap_analysis["reviews"].cluster_count, 2);
    }
}
