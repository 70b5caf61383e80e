//! Tool registry — declarative tool specs and validated dispatch.
//!
//! Tools are declared statically at startup; the set is closed per process.
//! Dispatch is total under validation: argument mismatches and runtime
//! errors are captured and returned as error outcomes, never raised to the
//! engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use dq_context::ContextState;
use dq_domain::chat::ToolDefinition;
use dq_domain::error::{Error, ErrorKind, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Side-effect classes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a tool touches. `external_write` is reserved; nothing in the
/// analytical set uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideEffect {
    pub external_read: bool,
    pub context_write: bool,
    pub external_write: bool,
}

impl SideEffect {
    pub const PURE: SideEffect = SideEffect {
        external_read: false,
        context_write: false,
        external_write: false,
    };
    pub const CONTEXT_WRITE: SideEffect = SideEffect {
        external_read: false,
        context_write: true,
        external_write: false,
    };
    pub const EXTERNAL_READ: SideEffect = SideEffect {
        external_read: true,
        context_write: false,
        external_write: false,
    };
    pub const EXTERNAL_READ_CONTEXT_WRITE: SideEffect = SideEffect {
        external_read: true,
        context_write: true,
        external_write: false,
    };
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The result of a tool invocation: a short markdown summary for the LLM
/// plus the structured payload, both captured in the step log.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub summary: String,
    pub payload: Value,
    pub is_error: bool,
    pub error_kind: Option<ErrorKind>,
}

impl ToolOutcome {
    pub fn ok(summary: impl Into<String>, payload: Value) -> Self {
        Self {
            summary: summary.into(),
            payload,
            is_error: false,
            error_kind: None,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let kind = err.kind();
        Self {
            summary: format!("Tool failed: {err}"),
            payload: serde_json::json!({
                "error": err.to_string(),
                "kind": kind,
            }),
            is_error: true,
            error_kind: Some(kind),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specs and executors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative description of one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    /// LLM-facing description.
    pub description: &'static str,
    /// JSON Schema for the arguments.
    pub parameters: Value,
    pub effect: SideEffect,
}

/// The execution capability behind a tool. Errors returned here are
/// converted to error outcomes by the registry.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: Value, ctx: &mut ContextState) -> Result<ToolOutcome>;
}

struct RegisteredTool {
    spec: ToolSpec,
    executor: Arc<dyn ToolExecutor>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, executor: Arc<dyn ToolExecutor>) {
        self.tools
            .insert(spec.name.to_string(), RegisteredTool { spec, executor });
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions for the LLM, optionally filtered to an agent's
    /// bound subset.
    pub fn definitions(&self, allow: Option<&[String]>) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| allow.map_or(true, |names| names.iter().any(|n| n == t.spec.name)))
            .map(|t| ToolDefinition {
                name: t.spec.name.to_string(),
                description: t.spec.description.to_string(),
                parameters: t.spec.parameters.clone(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatch a tool by name. Never returns an error: unknown tools,
    /// invalid arguments, and execution failures all come back as error
    /// outcomes for the coordinator to see.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        ctx: &mut ContextState,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::from_error(&Error::NotFound(format!("tool '{name}'")));
        };

        tracing::debug!(tool = name, "dispatching tool");
        match tool.executor.execute(args, ctx).await {
            Ok(outcome) => {
                if outcome.is_error {
                    tracing::warn!(tool = name, summary = %outcome.summary, "tool returned error outcome");
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::from_error(&e)
            }
        }
    }
}

/// Deserialize tool arguments into their typed shape, mapping any mismatch
/// to `InvalidArgument`.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| Error::InvalidArgument(format!("invalid tool arguments: {e}")))
}
