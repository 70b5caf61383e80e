//! Citation block assembly. Pure: turns source entries into a numbered
//! markdown block for the final answer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use dq_context::ContextState;
use dq_domain::error::{Error, Result};

use crate::registry::{parse_args, SideEffect, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec};

pub(crate) fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec {
            name: "format_citations",
            description: "Assemble source entries into a numbered citation block to append to \
                          the answer.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "sources": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": { "type": "string" },
                                "url": { "type": "string" },
                                "snippet": { "type": "string" }
                            },
                            "required": ["title"]
                        }
                    }
                },
                "required": ["sources"]
            }),
            effect: SideEffect::PURE,
        },
        Arc::new(FormatCitations),
    );
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct Source {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Deserialize)]
struct CitationArgs {
    sources: Vec<Source>,
}

struct FormatCitations;

#[async_trait::async_trait]
impl ToolExecutor for FormatCitations {
    async fn execute(&self, args: Value, _ctx: &mut ContextState) -> Result<ToolOutcome> {
        let args: CitationArgs = parse_args(args)?;
        if args.sources.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one source is required".into(),
            ));
        }

        let mut block = String::from("**Sources**\n");
        for (i, source) in args.sources.iter().enumerate() {
            let n = i + 1;
            match &source.url {
                Some(url) => block.push_str(&format!("{n}. [{}]({url})", source.title)),
                None => block.push_str(&format!("{n}. {}", source.title)),
            }
            if let Some(snippet) = &source.snippet {
                block.push_str(&format!(" — \"{snippet}\""));
            }
            block.push('\n');
        }

        Ok(ToolOutcome::ok(
            block.clone(),
            serde_json::json!({
                "citation_block": block,
                "sources": args.sources,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_numbered_block() {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        let mut ctx = ContextState::new("u1");

        let outcome = registry
            .dispatch(
                "format_citations",
                serde_json::json!({
                    "sources": [
                        { "title": "Review r1", "snippet": "too slow" },
                        { "title": "Docs", "url": "https://example.com/docs" },
                    ]
                }),
                &mut ctx,
            )
            .await;

        assert!(!outcome.is_error);
        let block = outcome.payload["citation_block"].as_str().unwrap();
        assert!(block.contains("1. Review r1"));
        assert!(block.contains("2. [Docs](https://example.com/docs)"));
    }

    #[tokio::test]
    async fn empty_sources_is_invalid() {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        let mut ctx = ContextState::new("u1");

        let outcome = registry
            .dispatch(
                "format_citations",
                serde_json::json!({ "sources": [] }),
                &mut ctx,
            )
            .await;
        assert!(outcome.is_error);
    }
}
