//! The wire-event grammar for the client stream.
//!
//! Every event serializes as `{"type": ..., "data": {...}}`. A stream starts
//! with exactly one `connected`, ends with exactly one of `complete` or
//! `error`, and every `agent_step_start` has a matching `agent_step_complete`
//! before the terminal event. The shape is uniform across workflow tiers —
//! the simple and medium tiers emit a degenerate sequence with no
//! `agent_step_*` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow tier chosen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on the client stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireEvent {
    /// First event of every stream.
    Connected {},

    /// Emitted after classification, before the chosen pipeline runs.
    WorkflowRouted {
        complexity: Complexity,
        reasoning: String,
        session_id: Uuid,
    },

    /// An agent step has started.
    AgentStepStart {
        step_id: Uuid,
        agent_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Token-level delta for an in-flight step.
    AgentStepContent { step_id: Uuid, content_chunk: String },

    /// A tool invocation within a step.
    ToolCall {
        step_id: Uuid,
        tool_name: String,
        tool_kwargs: serde_json::Value,
        agent_name: String,
    },

    /// The result of a tool invocation.
    ToolResult {
        step_id: Uuid,
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_output: Option<serde_json::Value>,
        #[serde(default)]
        is_error: bool,
    },

    /// A step reached `completed` or `errored`.
    AgentStepComplete {
        step_id: Uuid,
        agent_name: String,
        content: String,
        is_structured: bool,
        step_order: u32,
    },

    /// Final-answer token delta.
    Content { content: String },

    /// Terminal success.
    Complete {
        message_id: Uuid,
        session_id: Uuid,
        metadata: serde_json::Value,
    },

    /// Terminal failure.
    Error { error: String },
}

impl WireEvent {
    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WireEvent::Complete { .. } | WireEvent::Error { .. })
    }

    /// The `type` string this event carries on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            WireEvent::Connected {} => "connected",
            WireEvent::WorkflowRouted { .. } => "workflow_routed",
            WireEvent::AgentStepStart { .. } => "agent_step_start",
            WireEvent::AgentStepContent { .. } => "agent_step_content",
            WireEvent::ToolCall { .. } => "tool_call",
            WireEvent::ToolResult { .. } => "tool_result",
            WireEvent::AgentStepComplete { .. } => "agent_step_complete",
            WireEvent::Content { .. } => "content",
            WireEvent::Complete { .. } => "complete",
            WireEvent::Error { .. } => "error",
        }
    }
}
