//! Temporal trend analysis: bucket numeric metrics over a time column and
//! fit a per-metric linear trend.
//!
//! The bucket granularity is chosen from the data span; metrics default to
//! every numeric column of the dataset.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use serde_json::Value;

use dq_context::{ContextState, MetricTrend, TrendAnalysis, TrendGrouping, TrendPoint};
use dq_domain::error::{Error, Result};

use crate::cluster::CLUSTER_COLUMN;
use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

pub(crate) fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec {
            name: "analyze_temporal_trends",
            description: "Bucket a dataset's numeric metrics over time (day/week/month/quarter/\
                          year chosen from the data span) and fit a linear trend per metric.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "dataset_name": { "type": "string", "description": "Dataset to analyze" },
                    "metrics": { "type": "array", "items": { "type": "string" }, "description": "Numeric columns (defaults to all numeric columns)" },
                    "time_column": { "type": "string", "description": "Datetime column (defaults to the first one)" }
                },
                "required": ["dataset_name"]
            }),
            effect: SideEffect::CONTEXT_WRITE,
        },
        Arc::new(AnalyzeTemporalTrends),
    );
}

#[derive(Deserialize)]
struct TrendArgs {
    dataset_name: String,
    #[serde(default)]
    metrics: Option<Vec<String>>,
    #[serde(default)]
    time_column: Option<String>,
}

struct AnalyzeTemporalTrends;

#[async_trait::async_trait]
impl ToolExecutor for AnalyzeTemporalTrends {
    async fn execute(&self, args: Value, ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: TrendArgs = parse_args(args)?;

        let table = ctx.dataset_table(&args.dataset_name).ok_or_else(|| {
            Error::NotFound(format!(
                "dataset '{}' is not loaded in this conversation; fetch it with \
                 get_dataset_data_from_sql first",
                args.dataset_name
            ))
        })?;

        let time_column = match &args.time_column {
            Some(c) => c.clone(),
            None => table
                .datetime_columns()
                .first()
                .map(|c| c.to_string())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "dataset '{}' has no datetime column",
                        args.dataset_name
                    ))
                })?,
        };
        let time_idx = table.column_index(&time_column).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "dataset '{}' has no column '{time_column}'",
                args.dataset_name
            ))
        })?;

        // Auto-detect numeric metrics when unspecified.
        let metrics: Vec<String> = match &args.metrics {
            Some(m) => {
                for c in m {
                    if table.column_index(c).is_none() {
                        return Err(Error::InvalidArgument(format!(
                            "dataset '{}' has no column '{c}'",
                            args.dataset_name
                        )));
                    }
                }
                m.clone()
            }
            None => table
                .numeric_columns()
                .into_iter()
                .filter(|c| *c != CLUSTER_COLUMN)
                .map(String::from)
                .collect(),
        };
        if metrics.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "dataset '{}' has no numeric columns to trend",
                args.dataset_name
            )));
        }

        let timestamps: Vec<Option<DateTime<Utc>>> = table
            .rows
            .iter()
            .map(|r| r[time_idx].as_datetime())
            .collect();
        let observed: Vec<DateTime<Utc>> = timestamps.iter().flatten().copied().collect();
        let (min_t, max_t) = match (observed.iter().min(), observed.iter().max()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "column '{time_column}' holds no parseable timestamps"
                )))
            }
        };
        let span_days = (max_t - min_t).num_days();
        let grouping = choose_grouping(span_days);

        let mut metric_trends = Vec::with_capacity(metrics.len());
        for metric in &metrics {
            let metric_idx = table
                .column_index(metric)
                .ok_or_else(|| Error::InvalidArgument(format!("no column '{metric}'")))?;

            // bucket label → (sum, count); BTreeMap keeps buckets ordered.
            let mut buckets: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            for (row, ts) in table.rows.iter().zip(&timestamps) {
                let (Some(ts), Some(v)) = (ts, row[metric_idx].as_f64()) else {
                    continue;
                };
                let entry = buckets.entry(bucket_label(*ts, grouping)).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }

            let points: Vec<TrendPoint> = buckets
                .into_iter()
                .map(|(bucket, (sum, count))| TrendPoint {
                    bucket,
                    value: sum / count as f64,
                })
                .collect();

            let slope = least_squares_slope(&points);
            metric_trends.push(MetricTrend {
                column: metric.clone(),
                slope,
                direction: direction(slope, &points),
                points,
            });
        }

        let analysis = TrendAnalysis {
            time_column,
            grouping,
            span_days,
            metrics: metric_trends,
        };

        let summary = render_summary(&args.dataset_name, &analysis);
        let payload = serde_json::to_value(&analysis)?;
        ctx.trend_analysis
            .insert(args.dataset_name.clone(), analysis);
        Ok(ToolOutcome::ok(summary, payload))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Grouping and fitting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn choose_grouping(span_days: i64) -> TrendGrouping {
    match span_days {
        d if d <= 31 => TrendGrouping::Day,
        d if d <= 180 => TrendGrouping::Week,
        d if d <= 730 => TrendGrouping::Month,
        d if d <= 1825 => TrendGrouping::Quarter,
        _ => TrendGrouping::Year,
    }
}

/// Zero-padded labels so lexical order equals chronological order.
fn bucket_label(ts: DateTime<Utc>, grouping: TrendGrouping) -> String {
    match grouping {
        TrendGrouping::Day => ts.format("%Y-%m-%d").to_string(),
        TrendGrouping::Week => ts.format("%G-W%V").to_string(),
        TrendGrouping::Month => ts.format("%Y-%m").to_string(),
        TrendGrouping::Quarter => {
            format!("{}-Q{}", ts.year(), (ts.month() - 1) / 3 + 1)
        }
        TrendGrouping::Year => ts.format("%Y").to_string(),
    }
}

fn least_squares_slope(points: &[TrendPoint]) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = points.iter().map(|p| p.value).sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, p) in points.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (p.value - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn direction(slope: f64, points: &[TrendPoint]) -> String {
    let mean_abs = points.iter().map(|p| p.value.abs()).sum::<f64>()
        / points.len().max(1) as f64;
    let threshold = 0.01 * mean_abs.max(f64::EPSILON);
    if slope > threshold {
        "increasing".into()
    } else if slope < -threshold {
        "decreasing".into()
    } else {
        "stable".into()
    }
}

fn render_summary(dataset_name: &str, analysis: &TrendAnalysis) -> String {
    let mut s = format!(
        "Trends for `{dataset_name}` by {} over {} day(s):\n",
        analysis.grouping.as_str(),
        analysis.span_days,
    );
    for m in &analysis.metrics {
        s.push_str(&format!(
            "- `{}`: {} (slope {:+.4} per {})\n",
            m.column,
            m.direction,
            m.slope,
            analysis.grouping.as_str(),
        ));
    }
    s
}
