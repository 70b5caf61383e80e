//! Step tracker — projects execution events into wire events and the
//! persisted step log.
//!
//! All deltas are keyed by `step_id` so out-of-order content is buffered
//! correctly; completion is idempotent (a duplicate completion for the same
//! step is discarded); `step_order` is assigned densely in completion order.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use dq_domain::entity::StepToolCall;
use dq_domain::wire::WireEvent;
use dq_storage::StepDraft;

use crate::events::ExecutionEvent;

/// Fallback used when an event arrives without an agent id.
pub const UNKNOWN_AGENT: &str = "unknown-agent";

struct ActiveStep {
    agent_name: String,
    content_buffer: String,
    tool_call: Option<StepToolCall>,
}

/// Tracks in-flight steps for one turn.
#[derive(Default)]
pub struct StepTracker {
    active: HashMap<Uuid, ActiveStep>,
    /// Insertion order of active steps, for deterministic force-completion.
    active_order: Vec<Uuid>,
    completed: Vec<StepDraft>,
    completed_ids: HashSet<Uuid>,
    current_step_id: Option<Uuid>,
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The step most recently started.
    pub fn current_step_id(&self) -> Option<Uuid> {
        self.current_step_id
    }

    /// Completed steps in completion order, dense from 0.
    pub fn completed_steps(&self) -> &[StepDraft] {
        &self.completed
    }

    pub fn into_completed_steps(self) -> Vec<StepDraft> {
        self.completed
    }

    /// Whether any step is still open.
    pub fn has_active_steps(&self) -> bool {
        !self.active.is_empty()
    }

    /// Feed one engine event; returns the wire events to forward.
    pub fn handle(&mut self, event: ExecutionEvent) -> Vec<WireEvent> {
        match event {
            ExecutionEvent::AgentStarted {
                step_id,
                agent_name,
            } => self.start(step_id, agent_name),

            ExecutionEvent::RunContent { step_id, delta } => {
                if self.completed_ids.contains(&step_id) {
                    // Late delta for a finished step — discard.
                    return Vec::new();
                }
                let mut out = self.ensure_started(step_id, None);
                if let Some(step) = self.active.get_mut(&step_id) {
                    step.content_buffer.push_str(&delta);
                }
                out.push(WireEvent::AgentStepContent {
                    step_id,
                    content_chunk: delta,
                });
                out
            }

            ExecutionEvent::ToolCallStarted {
                step_id,
                agent_name,
                tool_name,
                tool_kwargs,
            } => self.tool_started(step_id, agent_name, tool_name, tool_kwargs),

            ExecutionEvent::ToolCallCompleted {
                step_id,
                tool_name,
                output,
                raw_output,
                is_error,
            } => self.tool_completed(step_id, tool_name, output, raw_output, is_error),

            ExecutionEvent::TeamToolCallStarted {
                step_id,
                agent_name,
                member,
                task,
            } => self.tool_started(
                step_id,
                agent_name,
                format!("{}{member}", crate::agent::DELEGATE_PREFIX),
                serde_json::json!({ "task": task }),
            ),

            ExecutionEvent::TeamToolCallCompleted {
                step_id,
                member,
                output,
                is_error,
            } => self.tool_completed(
                step_id,
                format!("{}{member}", crate::agent::DELEGATE_PREFIX),
                output,
                None,
                is_error,
            ),

            ExecutionEvent::RunCompleted { step_id, .. } => self.complete(step_id),

            // Fatal errors terminate at the dispatcher; nothing to track.
            ExecutionEvent::Error { .. } => Vec::new(),
        }
    }

    fn start(&mut self, step_id: Uuid, agent_name: Option<String>) -> Vec<WireEvent> {
        if self.completed_ids.contains(&step_id) {
            return Vec::new();
        }
        self.current_step_id = Some(step_id);
        if let Some(existing) = self.active.get_mut(&step_id) {
            // A named start after an implicit one upgrades the agent name.
            if let Some(name) = agent_name {
                existing.agent_name = name;
            }
            return Vec::new();
        }
        let agent_name = agent_name.unwrap_or_else(|| UNKNOWN_AGENT.to_string());
        self.active.insert(
            step_id,
            ActiveStep {
                agent_name: agent_name.clone(),
                content_buffer: String::new(),
                tool_call: None,
            },
        );
        self.active_order.push(step_id);
        vec![WireEvent::AgentStepStart {
            step_id,
            agent_name,
            timestamp: Utc::now(),
        }]
    }

    /// Start a step implicitly for an event that arrived before its
    /// `AgentStarted` — keeps the start/complete pairing intact.
    fn ensure_started(&mut self, step_id: Uuid, agent_name: Option<String>) -> Vec<WireEvent> {
        if self.active.contains_key(&step_id) || self.completed_ids.contains(&step_id) {
            return Vec::new();
        }
        self.start(step_id, agent_name)
    }

    fn tool_started(
        &mut self,
        step_id: Uuid,
        agent_name: Option<String>,
        tool_name: String,
        tool_kwargs: Value,
    ) -> Vec<WireEvent> {
        if self.completed_ids.contains(&step_id) {
            return Vec::new();
        }
        let mut out = self.ensure_started(step_id, agent_name);
        let step_agent = self
            .active
            .get(&step_id)
            .map(|s| s.agent_name.clone())
            .unwrap_or_else(|| UNKNOWN_AGENT.to_string());

        if let Some(step) = self.active.get_mut(&step_id) {
            // First call wins the step's structured payload; parallel calls
            // within one step fold their outputs below.
            if step.tool_call.is_none() {
                step.tool_call = Some(StepToolCall {
                    tool_name: tool_name.clone(),
                    tool_kwargs: tool_kwargs.clone(),
                    output: None,
                    is_error: false,
                });
            }
        }
        out.push(WireEvent::ToolCall {
            step_id,
            tool_name,
            tool_kwargs,
            agent_name: step_agent,
        });
        out
    }

    fn tool_completed(
        &mut self,
        step_id: Uuid,
        tool_name: String,
        output: Option<String>,
        raw_output: Option<Value>,
        is_error: bool,
    ) -> Vec<WireEvent> {
        if self.completed_ids.contains(&step_id) {
            return Vec::new();
        }
        let mut out = self.ensure_started(step_id, None);
        if let Some(step) = self.active.get_mut(&step_id) {
            let call = step.tool_call.get_or_insert_with(|| StepToolCall {
                tool_name: tool_name.clone(),
                tool_kwargs: Value::Null,
                output: None,
                is_error: false,
            });
            let result = raw_output
                .clone()
                .or_else(|| output.clone().map(Value::String));
            // Fold parallel results into an array rather than overwriting.
            call.output = match (call.output.take(), result) {
                (None, new) => new,
                (Some(prior), None) => Some(prior),
                (Some(Value::Array(mut items)), Some(new)) => {
                    items.push(new);
                    Some(Value::Array(items))
                }
                (Some(prior), Some(new)) => Some(Value::Array(vec![prior, new])),
            };
            call.is_error = call.is_error || is_error;
        }
        out.push(WireEvent::ToolResult {
            step_id,
            tool_name,
            output,
            raw_output,
            is_error,
        });
        out
    }

    fn complete(&mut self, step_id: Uuid) -> Vec<WireEvent> {
        // Idempotent: a second completion for the same step is a no-op.
        if !self.completed_ids.insert(step_id) {
            return Vec::new();
        }
        let Some(step) = self.active.remove(&step_id) else {
            self.completed_ids.remove(&step_id);
            return Vec::new();
        };
        self.active_order.retain(|id| *id != step_id);

        let step_order = self.completed.len() as u32;
        let is_structured = step.tool_call.is_some();
        let content = step.content_buffer;

        self.completed.push(StepDraft {
            step_order,
            agent_name: step.agent_name.clone(),
            prediction: if is_structured {
                None
            } else {
                Some(content.clone())
            },
            tool_call: step.tool_call,
        });

        vec![WireEvent::AgentStepComplete {
            step_id,
            agent_name: step.agent_name,
            content,
            is_structured,
            step_order,
        }]
    }

    /// Force-complete one step as errored (timeout or cancel): the tool
    /// call, if any, is marked errored; otherwise the buffered content
    /// becomes the prediction.
    pub fn force_complete(&mut self, step_id: Uuid, reason: &str) -> Vec<WireEvent> {
        if let Some(step) = self.active.get_mut(&step_id) {
            match &mut step.tool_call {
                Some(call) => call.is_error = true,
                None => {
                    if !step.content_buffer.is_empty() {
                        step.content_buffer.push('\n');
                    }
                    step.content_buffer.push_str(&format!("[{reason}]"));
                }
            }
        }
        self.complete(step_id)
    }

    /// Force-complete every open step, oldest first. Used at cancellation
    /// and when the turn budget trips, so that every `agent_step_start`
    /// still gets its `agent_step_complete`.
    pub fn force_complete_all(&mut self, reason: &str) -> Vec<WireEvent> {
        let open: Vec<Uuid> = self.active_order.clone();
        let mut out = Vec::new();
        for step_id in open {
            out.extend(self.force_complete(step_id, reason));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(tracker: &mut StepTracker, agent: &str) -> Uuid {
        let step_id = Uuid::new_v4();
        let events = tracker.handle(ExecutionEvent::AgentStarted {
            step_id,
            agent_name: Some(agent.into()),
        });
        assert!(matches!(events[0], WireEvent::AgentStepStart { .. }));
        step_id
    }

    #[test]
    fn content_buffers_by_step_and_flattens_to_prediction() {
        let mut tracker = StepTracker::new();
        let a = started(&mut tracker, "coordinator");
        let b = started(&mut tracker, "report_writer");

        tracker.handle(ExecutionEvent::RunContent { step_id: a, delta: "Hel".into() });
        tracker.handle(ExecutionEvent::RunContent { step_id: b, delta: "Report".into() });
        tracker.handle(ExecutionEvent::RunContent { step_id: a, delta: "lo".into() });

        let done_b = tracker.handle(ExecutionEvent::RunCompleted { step_id: b, agent_name: None });
        let done_a = tracker.handle(ExecutionEvent::RunCompleted { step_id: a, agent_name: None });

        match &done_b[0] {
            WireEvent::AgentStepComplete { content, step_order, is_structured, .. } => {
                assert_eq!(content, "Report");
                assert_eq!(*step_order, 0);
                assert!(!is_structured);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &done_a[0] {
            WireEvent::AgentStepComplete { content, step_order, .. } => {
                assert_eq!(content, "Hello");
                assert_eq!(*step_order, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let steps = tracker.completed_steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].prediction.as_deref(), Some("Report"));
        assert_eq!(steps[1].prediction.as_deref(), Some("Hello"));
    }

    #[test]
    fn missing_agent_id_falls_back_to_unknown() {
        let mut tracker = StepTracker::new();
        let step_id = Uuid::new_v4();
        let events = tracker.handle(ExecutionEvent::AgentStarted {
            step_id,
            agent_name: None,
        });
        match &events[0] {
            WireEvent::AgentStepStart { agent_name, .. } => {
                assert_eq!(agent_name, UNKNOWN_AGENT);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_completion_is_discarded() {
        let mut tracker = StepTracker::new();
        let step_id = Uuid::new_v4();
        tracker.handle(ExecutionEvent::TeamToolCallStarted {
            step_id,
            agent_name: Some("coordinator".into()),
            member: "gap_analysis".into(),
            task: "find gaps".into(),
        });
        tracker.handle(ExecutionEvent::TeamToolCallCompleted {
            step_id,
            member: "gap_analysis".into(),
            output: Some("2 gaps".into()),
            is_error: false,
        });

        let first = tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });
        assert_eq!(first.len(), 1);
        let second = tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });
        assert!(second.is_empty());
        // And a late duplicate TeamToolCallCompleted is a no-op too.
        let late = tracker.handle(ExecutionEvent::TeamToolCallCompleted {
            step_id,
            member: "gap_analysis".into(),
            output: Some("2 gaps".into()),
            is_error: false,
        });
        assert!(late.is_empty());
        assert_eq!(tracker.completed_steps().len(), 1);
    }

    #[test]
    fn tool_step_is_structured_and_keeps_output() {
        let mut tracker = StepTracker::new();
        let step_id = Uuid::new_v4();
        tracker.handle(ExecutionEvent::AgentStarted {
            step_id,
            agent_name: Some("data_discovery".into()),
        });
        tracker.handle(ExecutionEvent::ToolCallStarted {
            step_id,
            agent_name: None,
            tool_name: "get_dataset_data_from_sql".into(),
            tool_kwargs: serde_json::json!({"query": "SELECT 1"}),
        });
        tracker.handle(ExecutionEvent::ToolCallCompleted {
            step_id,
            tool_name: "get_dataset_data_from_sql".into(),
            output: Some("2 rows".into()),
            raw_output: Some(serde_json::json!({"row_count": 2})),
            is_error: false,
        });
        let done = tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });

        match &done[0] {
            WireEvent::AgentStepComplete { is_structured, .. } => assert!(is_structured),
            other => panic!("unexpected {other:?}"),
        }
        let draft = &tracker.completed_steps()[0];
        assert!(draft.prediction.is_none());
        let call = draft.tool_call.as_ref().unwrap();
        assert_eq!(call.tool_name, "get_dataset_data_from_sql");
        assert_eq!(call.output.as_ref().unwrap()["row_count"], 2);
        assert!(!call.is_error);
    }

    #[test]
    fn parallel_tool_results_fold_into_one_step() {
        let mut tracker = StepTracker::new();
        let step_id = Uuid::new_v4();
        tracker.handle(ExecutionEvent::ToolCallStarted {
            step_id,
            agent_name: Some("coordinator".into()),
            tool_name: "semantic_search".into(),
            tool_kwargs: serde_json::json!({"query": "a"}),
        });
        tracker.handle(ExecutionEvent::ToolCallCompleted {
            step_id,
            tool_name: "semantic_search".into(),
            output: None,
            raw_output: Some(serde_json::json!({"hits": 1})),
            is_error: false,
        });
        tracker.handle(ExecutionEvent::ToolCallCompleted {
            step_id,
            tool_name: "semantic_search".into(),
            output: None,
            raw_output: Some(serde_json::json!({"hits": 2})),
            is_error: false,
        });
        tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });

        let call = tracker.completed_steps()[0].tool_call.as_ref().unwrap();
        let folded = call.output.as_ref().unwrap().as_array().unwrap();
        assert_eq!(folded.len(), 2);
    }

    #[test]
    fn out_of_order_content_before_start_is_buffered() {
        let mut tracker = StepTracker::new();
        let step_id = Uuid::new_v4();

        let events = tracker.handle(ExecutionEvent::RunContent {
            step_id,
            delta: "early".into(),
        });
        // Implicit start keeps the start/complete pairing.
        assert!(matches!(events[0], WireEvent::AgentStepStart { .. }));
        assert!(matches!(events[1], WireEvent::AgentStepContent { .. }));

        tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });
        assert_eq!(
            tracker.completed_steps()[0].prediction.as_deref(),
            Some("early")
        );
    }

    #[test]
    fn late_content_after_completion_is_discarded() {
        let mut tracker = StepTracker::new();
        let step_id = started(&mut tracker, "coordinator");
        tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });

        let late = tracker.handle(ExecutionEvent::RunContent {
            step_id,
            delta: "ghost".into(),
        });
        assert!(late.is_empty());
        assert_eq!(tracker.completed_steps()[0].prediction.as_deref(), Some(""));
    }

    #[test]
    fn force_complete_all_closes_open_steps_in_order() {
        let mut tracker = StepTracker::new();
        let a = started(&mut tracker, "coordinator");
        let b = started(&mut tracker, "trend_analysis");
        tracker.handle(ExecutionEvent::RunContent { step_id: b, delta: "partial".into() });

        let events = tracker.force_complete_all("cancelled");
        assert_eq!(events.len(), 2);
        let steps = tracker.completed_steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].agent_name, "coordinator");
        assert_eq!(steps[0].prediction.as_deref(), Some("[cancelled]"));
        assert_eq!(steps[1].prediction.as_deref(), Some("partial\n[cancelled]"));
        let _ = (a, b);
    }

    #[test]
    fn step_order_is_dense_across_mixed_steps() {
        let mut tracker = StepTracker::new();
        for i in 0..5 {
            let step_id = Uuid::new_v4();
            tracker.handle(ExecutionEvent::AgentStarted {
                step_id,
                agent_name: Some(format!("agent{i}")),
            });
            tracker.handle(ExecutionEvent::RunCompleted { step_id, agent_name: None });
        }
        let orders: Vec<u32> = tracker.completed_steps().iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }
}
