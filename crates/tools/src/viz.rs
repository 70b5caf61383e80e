//! Chart-config builder. Pure: produces a renderer-agnostic payload, the
//! client decides how to draw it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dq_context::ContextState;
use dq_domain::error::{Error, Result};

use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

pub(crate) fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec {
            name: "build_visualization",
            description: "Build a chart configuration (bar, line, pie, or table) from labels \
                          and data series for the client to render.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "chart_type": { "type": "string", "enum": ["bar", "line", "pie", "table"] },
                    "title": { "type": "string" },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "series": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": { "type": "string" },
                                "data": { "type": "array", "items": { "type": "number" } }
                            },
                            "required": ["label", "data"]
                        }
                    }
                },
                "required": ["chart_type", "title"]
            }),
            effect: SideEffect::PURE,
        },
        Arc::new(BuildVisualization),
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChartType {
    Bar,
    Line,
    Pie,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Series {
    label: String,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct VizArgs {
    chart_type: ChartType,
    title: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    series: Vec<Series>,
}

struct BuildVisualization;

#[async_trait::async_trait]
impl ToolExecutor for BuildVisualization {
    async fn execute(&self, args: Value, _ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: VizArgs = parse_args(args)?;

        for s in &args.series {
            if !args.labels.is_empty() && s.data.len() != args.labels.len() {
                return Err(Error::InvalidArgument(format!(
                    "series '{}' has {} points but {} labels",
                    s.label,
                    s.data.len(),
                    args.labels.len()
                )));
            }
        }

        let payload = serde_json::json!({
            "chart": {
                "type": args.chart_type,
                "title": args.title,
                "labels": args.labels,
                "datasets": args.series,
            }
        });

        Ok(ToolOutcome::ok(
            format!(
                "Built a {} chart \"{}\" with {} series.",
                serde_json::to_value(args.chart_type)?
                    .as_str()
                    .unwrap_or("?"),
                args.title,
                args.series.len()
            ),
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_bar_chart_config() {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        let mut ctx = ContextState::new("u1");

        let outcome = registry
            .dispatch(
                "build_visualization",
                serde_json::json!({
                    "chart_type": "bar",
                    "title": "Ratings by month",
                    "labels": ["2025-01", "2025-02"],
                    "series": [{ "label": "avg rating", "data": [4.1, 4.4] }],
                }),
                &mut ctx,
            )
            .await;

        assert!(!outcome.is_error, "{}", outcome.summary);
        assert_eq!(outcome.payload["chart"]["type"], "bar");
        assert_eq!(outcome.payload["chart"]["datasets"][0]["data"][1], 4.4);
    }

    #[tokio::test]
    async fn unknown_chart_type_is_invalid_argument() {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        let mut ctx = ContextState::new("u1");

        let outcome = registry
            .dispatch(
                "build_visualization",
                serde_json::json!({ "chart_type": "sunburst", "title": "x" }),
                &mut ctx,
            )
            .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.payload["kind"], "invalid_argument");
    }

    #[tokio::test]
    async fn label_series_length_mismatch_is_rejected() {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        let mut ctx = ContextState::new("u1");

        let outcome = registry
            .dispatch(
                "build_visualization",
                serde_json::json!({
                    "chart_type": "line",
                    "title": "x",
                    "labels": ["a", "b", "c"],
                    "series": [{ "label": "s", "data": [1.0] }],
                }),
                &mut ctx,
            )
            .await;
        assert!(outcome.is_error);
    }
}
