//! Execution events — the engine's transient output.
//!
//! These live only on the channel between the engine and the streamer; the
//! persisted projection is the `AgentStep` log built by the step tracker.

use serde_json::Value;
use uuid::Uuid;

/// A typed record emitted by the engine while a team run progresses.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// An agent step began. `agent_name` may be absent on degraded event
    /// sources; the tracker falls back to `"unknown-agent"`.
    AgentStarted {
        step_id: Uuid,
        agent_name: Option<String>,
    },

    /// Token-level delta of an agent's streamed text.
    RunContent { step_id: Uuid, delta: String },

    /// A tool invocation began within a step.
    ToolCallStarted {
        step_id: Uuid,
        agent_name: Option<String>,
        tool_name: String,
        tool_kwargs: Value,
    },

    /// A tool invocation finished.
    ToolCallCompleted {
        step_id: Uuid,
        tool_name: String,
        output: Option<String>,
        raw_output: Option<Value>,
        is_error: bool,
    },

    /// The coordinator handed a task to a team member.
    TeamToolCallStarted {
        step_id: Uuid,
        agent_name: Option<String>,
        member: String,
        task: String,
    },

    /// The delegated member run finished.
    TeamToolCallCompleted {
        step_id: Uuid,
        member: String,
        output: Option<String>,
        is_error: bool,
    },

    /// An agent's run for a step finished; the step completes.
    RunCompleted {
        step_id: Uuid,
        agent_name: Option<String>,
    },

    /// A fatal engine error. The dispatcher turns this into the terminal
    /// wire `error`.
    Error { message: String },
}

impl ExecutionEvent {
    pub fn step_id(&self) -> Option<Uuid> {
        match self {
            ExecutionEvent::AgentStarted { step_id, .. }
            | ExecutionEvent::RunContent { step_id, .. }
            | ExecutionEvent::ToolCallStarted { step_id, .. }
            | ExecutionEvent::ToolCallCompleted { step_id, .. }
            | ExecutionEvent::TeamToolCallStarted { step_id, .. }
            | ExecutionEvent::TeamToolCallCompleted { step_id, .. }
            | ExecutionEvent::RunCompleted { step_id, .. } => Some(*step_id),
            ExecutionEvent::Error { .. } => None,
        }
    }
}
