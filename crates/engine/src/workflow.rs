//! The team workflow loop.
//!
//! Entry point: [`WorkflowEngine::run`] spawns the async loop and returns a
//! channel of [`ExecutionEvent`]s plus a join handle for the result. The
//! coordinator is the root: it streams, delegates to specialists through
//! `delegate_to_*` tool calls, and synthesizes the final answer once no
//! tool calls remain. Specialists run their own bounded tool loops and
//! return control; their failures surface to the coordinator as errored
//! tool results, never as turn failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use dq_context::ContextState;
use dq_domain::chat::{ContentPart, Message, MessageContent, Role, ToolCall};
use dq_domain::config::ModelPricing;
use dq_domain::error::Error;
use dq_domain::stream::{StreamEvent, ToolCallAssembler, Usage};
use dq_ledger::{CallContext, CallLedger, CallStart, CallType, ResponseMessage};
use dq_providers::{ChatRequest, LlmProvider};
use dq_tools::{ToolOutcome, ToolRegistry};

use crate::agent::{AgentSpec, Team, DELEGATE_PREFIX};
use crate::cancel::CancelToken;
use crate::events::ExecutionEvent;

/// Maximum number of coordinator tool-call loops before we force-stop.
const MAX_TOOL_LOOPS: usize = 25;
/// Specialists get a tighter loop budget.
const SPECIALIST_MAX_LOOPS: usize = 8;
/// Tool payload bytes shown to the LLM before truncation.
const TOOL_PAYLOAD_LIMIT: usize = 4000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one team run needs, resolved by the dispatcher.
pub struct WorkflowInput {
    pub question: String,
    pub team: Team,
    pub context: ContextState,
    pub provider: Arc<dyn LlmProvider>,
    /// Bare model name on `provider` for team members without overrides.
    pub model: String,
    pub cancel: CancelToken,
    pub call_context: CallContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed,
    Cancelled,
    TimedOut,
    Failed(String),
}

/// What a run produced. The mutated context rides back for snapshot
/// persistence regardless of the outcome.
pub struct WorkflowResult {
    pub context: ContextState,
    pub final_text: String,
    pub usage: Usage,
    pub outcome: WorkflowOutcome,
}

/// A running workflow: drain `events` for streaming, then await `result`.
pub struct WorkflowHandle {
    pub events: mpsc::Receiver<ExecutionEvent>,
    pub result: JoinHandle<WorkflowResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkflowEngine {
    pub tools: Arc<ToolRegistry>,
    pub ledger: CallLedger,
    pub pricing: HashMap<String, ModelPricing>,
    pub default_temperature: f32,
    pub step_timeout: Duration,
    pub turn_timeout: Duration,
}

impl WorkflowEngine {
    /// Run one team workflow. Returns immediately; the loop runs on its
    /// own task so persistence never depends on the event consumer.
    pub fn run(self: Arc<Self>, input: WorkflowInput) -> WorkflowHandle {
        let (tx, rx) = mpsc::channel::<ExecutionEvent>(256);

        let span = tracing::info_span!(
            "workflow",
            question_len = input.question.len(),
            user_id = %input.context.user_id,
        );
        let result = tokio::spawn(tracing::Instrument::instrument(
            async move {
                tracing::debug!("workflow started");
                self.run_inner(input, tx).await
            },
            span,
        ));

        WorkflowHandle { events: rx, result }
    }

    async fn run_inner(
        &self,
        input: WorkflowInput,
        tx: mpsc::Sender<ExecutionEvent>,
    ) -> WorkflowResult {
        let WorkflowInput {
            question,
            team,
            mut context,
            provider,
            model,
            cancel,
            call_context,
        } = input;

        let deadline = Instant::now() + self.turn_timeout;
        let mut usage = Usage::default();

        let delegation_defs = team.delegation_tools();

        // ── Coordinator message assembly ─────────────────────────────
        let mut system = team.coordinator.system_prompt.clone();
        let digest = context_digest(&context);
        if !digest.is_empty() {
            system.push_str("\n\nConversation context already available:\n");
            system.push_str(&digest);
        }
        let mut messages = vec![Message::system(&system)];
        messages.extend(history_messages(&context));
        messages.push(Message::user(&question));

        let coordinator_step = Uuid::new_v4();
        let _ = tx
            .send(ExecutionEvent::AgentStarted {
                step_id: coordinator_step,
                agent_name: Some(team.coordinator.name.clone()),
            })
            .await;

        let finish =
            |context: ContextState, usage: Usage, final_text: String, outcome: WorkflowOutcome| {
                WorkflowResult {
                    context,
                    final_text,
                    usage,
                    outcome,
                }
            };

        let mut parent_call_id: Option<Uuid> = None;

        for loop_idx in 0..MAX_TOOL_LOOPS {
            tracing::debug!(loop_idx, "coordinator loop iteration");

            if cancel.is_cancelled() {
                return finish(context, usage, String::new(), WorkflowOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                return finish(context, usage, String::new(), WorkflowOutcome::TimedOut);
            }

            // ── Coordinator LLM cycle ────────────────────────────────
            let req = ChatRequest {
                messages: messages.clone(),
                tools: delegation_defs.clone(),
                temperature: Some(self.default_temperature),
                model: Some(model.clone()),
                ..Default::default()
            };
            let scope = self
                .ledger
                .scope(CallStart {
                    call_type: CallType::Chat,
                    provider: provider.provider_id().to_string(),
                    model: model.clone(),
                    messages: messages.clone(),
                    system_prompt: Some(system.clone()),
                    tools: Some(delegation_defs.clone()),
                    tool_choice: None,
                    context: call_context.clone(),
                })
                .await;
            parent_call_id = Some(scope.id());

            let cycle = match consume_cycle(
                provider.as_ref(),
                &req,
                coordinator_step,
                &tx,
                &cancel,
                self.step_deadline(deadline),
            )
            .await
            {
                Ok(cycle) => cycle,
                Err(e) => {
                    // Coordinator LLM errors are fatal for the turn.
                    scope.fail(e.to_string()).await;
                    let outcome = match &e {
                        Error::Timeout(_) => WorkflowOutcome::TimedOut,
                        Error::Cancelled => WorkflowOutcome::Cancelled,
                        other => WorkflowOutcome::Failed(other.to_string()),
                    };
                    let _ = tx
                        .send(ExecutionEvent::Error {
                            message: format!("coordinator failed: {e}"),
                        })
                        .await;
                    return finish(context, usage, String::new(), outcome);
                }
            };

            if let Some(cycle_usage) = &cycle.usage {
                usage.add(cycle_usage);
            }
            scope
                .complete(
                    ResponseMessage {
                        role: "assistant".into(),
                        content: (!cycle.text.is_empty()).then(|| cycle.text.clone()),
                        tool_calls: (!cycle.tool_calls.is_empty())
                            .then(|| cycle.tool_calls.clone()),
                    },
                    cycle.usage.clone(),
                    self.estimate_cost(&model, cycle.usage.as_ref()),
                    cycle.finish_reason.clone(),
                )
                .await;

            if cycle.cancelled {
                return finish(context, usage, cycle.text, WorkflowOutcome::Cancelled);
            }

            // No tool calls — this cycle's text is the final synthesis.
            if cycle.tool_calls.is_empty() {
                let _ = tx
                    .send(ExecutionEvent::RunCompleted {
                        step_id: coordinator_step,
                        agent_name: Some(team.coordinator.name.clone()),
                    })
                    .await;
                return finish(context, usage, cycle.text, WorkflowOutcome::Completed);
            }

            // ── Delegations and (defensively) direct tools ───────────
            messages.push(build_assistant_tool_message(&cycle.text, &cycle.tool_calls));

            for tc in &cycle.tool_calls {
                if cancel.is_cancelled() {
                    return finish(context, usage, String::new(), WorkflowOutcome::Cancelled);
                }
                if Instant::now() >= deadline {
                    return finish(context, usage, String::new(), WorkflowOutcome::TimedOut);
                }

                if let Some(member) = tc.tool_name.strip_prefix(DELEGATE_PREFIX) {
                    let task = tc
                        .arguments
                        .get("task")
                        .and_then(Value::as_str)
                        .unwrap_or(&question)
                        .to_string();
                    let step_id = Uuid::new_v4();
                    let _ = tx
                        .send(ExecutionEvent::TeamToolCallStarted {
                            step_id,
                            agent_name: Some(team.coordinator.name.clone()),
                            member: member.to_string(),
                            task: task.clone(),
                        })
                        .await;

                    let (summary, is_error) = match team.specialist(member) {
                        Some(spec) => {
                            let specialist_ctx = parent_call_id
                                .map(|id| call_context.child_of(id))
                                .unwrap_or_else(|| call_context.clone());
                            self.run_specialist(
                                spec,
                                provider.clone(),
                                &model,
                                &task,
                                &mut context,
                                &tx,
                                &cancel,
                                deadline,
                                specialist_ctx,
                                &mut usage,
                            )
                            .await
                        }
                        None => (
                            format!("no team member named '{member}'"),
                            true,
                        ),
                    };

                    let _ = tx
                        .send(ExecutionEvent::TeamToolCallCompleted {
                            step_id,
                            member: member.to_string(),
                            output: Some(summary.clone()),
                            is_error,
                        })
                        .await;
                    let _ = tx
                        .send(ExecutionEvent::RunCompleted {
                            step_id,
                            agent_name: Some(team.coordinator.name.clone()),
                        })
                        .await;

                    messages.push(if is_error {
                        Message::tool_error(&tc.call_id, &summary)
                    } else {
                        Message::tool_result(&tc.call_id, &summary)
                    });
                } else {
                    // The coordinator only carries delegation tools, but a
                    // model may still name something else; dispatch resolves
                    // it to an error outcome rather than crashing the turn.
                    let (content, is_error) = self
                        .run_tool_step(
                            &team.coordinator.name,
                            tc,
                            &mut context,
                            &tx,
                            deadline,
                            None,
                        )
                        .await;
                    messages.push(if is_error {
                        Message::tool_error(&tc.call_id, &content)
                    } else {
                        Message::tool_result(&tc.call_id, &content)
                    });
                }
            }
        }

        let _ = tx
            .send(ExecutionEvent::Error {
                message: format!("tool loop limit reached ({MAX_TOOL_LOOPS} iterations)"),
            })
            .await;
        finish(
            context,
            usage,
            String::new(),
            WorkflowOutcome::Failed("tool loop limit reached".into()),
        )
    }

    // ── Specialist sub-run ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_specialist(
        &self,
        spec: &AgentSpec,
        provider: Arc<dyn LlmProvider>,
        team_model: &str,
        task: &str,
        context: &mut ContextState,
        tx: &mpsc::Sender<ExecutionEvent>,
        cancel: &CancelToken,
        deadline: Instant,
        call_context: CallContext,
        usage: &mut Usage,
    ) -> (String, bool) {
        let model = spec.model.clone().unwrap_or_else(|| team_model.to_string());
        let step_id = Uuid::new_v4();
        let _ = tx
            .send(ExecutionEvent::AgentStarted {
                step_id,
                agent_name: Some(spec.name.clone()),
            })
            .await;

        let mut system = spec.system_prompt.clone();
        let digest = context_digest(context);
        if !digest.is_empty() {
            system.push_str("\n\nConversation context already available:\n");
            system.push_str(&digest);
        }
        let defs = self.tools.definitions(Some(&spec.tools));
        let mut messages = vec![Message::system(&system), Message::user(task)];

        for _ in 0..SPECIALIST_MAX_LOOPS {
            if cancel.is_cancelled() {
                return ("cancelled".into(), true);
            }
            if Instant::now() >= deadline {
                return ("turn budget exhausted".into(), true);
            }

            let req = ChatRequest {
                messages: messages.clone(),
                tools: defs.clone(),
                temperature: Some(self.default_temperature),
                model: Some(model.clone()),
                ..Default::default()
            };
            let scope = self
                .ledger
                .scope(CallStart {
                    call_type: CallType::Chat,
                    provider: provider.provider_id().to_string(),
                    model: model.clone(),
                    messages: messages.clone(),
                    system_prompt: Some(system.clone()),
                    tools: (!defs.is_empty()).then(|| defs.clone()),
                    tool_choice: None,
                    context: call_context.clone().tagged(spec.name.clone()),
                })
                .await;

            let cycle = match consume_cycle(
                provider.as_ref(),
                &req,
                step_id,
                tx,
                cancel,
                self.step_deadline(deadline),
            )
            .await
            {
                Ok(cycle) => cycle,
                Err(e) => {
                    // Specialist LLM errors behave like tool errors: the
                    // step closes, control returns to the coordinator.
                    scope.fail(e.to_string()).await;
                    let _ = tx
                        .send(ExecutionEvent::RunCompleted {
                            step_id,
                            agent_name: Some(spec.name.clone()),
                        })
                        .await;
                    return (format!("{} failed: {e}", spec.name), true);
                }
            };

            if let Some(cycle_usage) = &cycle.usage {
                usage.add(cycle_usage);
            }
            scope
                .complete(
                    ResponseMessage {
                        role: "assistant".into(),
                        content: (!cycle.text.is_empty()).then(|| cycle.text.clone()),
                        tool_calls: (!cycle.tool_calls.is_empty())
                            .then(|| cycle.tool_calls.clone()),
                    },
                    cycle.usage.clone(),
                    self.estimate_cost(&model, cycle.usage.as_ref()),
                    cycle.finish_reason.clone(),
                )
                .await;

            if cycle.cancelled {
                return ("cancelled".into(), true);
            }

            if cycle.tool_calls.is_empty() {
                let _ = tx
                    .send(ExecutionEvent::RunCompleted {
                        step_id,
                        agent_name: Some(spec.name.clone()),
                    })
                    .await;
                return (cycle.text, false);
            }

            messages.push(build_assistant_tool_message(&cycle.text, &cycle.tool_calls));
            for tc in &cycle.tool_calls {
                if cancel.is_cancelled() {
                    return ("cancelled".into(), true);
                }
                let (content, is_error) = self
                    .run_tool_step(&spec.name, tc, context, tx, deadline, Some(&spec.tools))
                    .await;
                messages.push(if is_error {
                    Message::tool_error(&tc.call_id, &content)
                } else {
                    Message::tool_result(&tc.call_id, &content)
                });
            }
        }

        let _ = tx
            .send(ExecutionEvent::RunCompleted {
                step_id,
                agent_name: Some(spec.name.clone()),
            })
            .await;
        (
            format!("{} hit its loop limit without an answer", spec.name),
            true,
        )
    }

    // ── One tool invocation as its own step ─────────────────────────

    async fn run_tool_step(
        &self,
        agent_name: &str,
        tc: &ToolCall,
        context: &mut ContextState,
        tx: &mpsc::Sender<ExecutionEvent>,
        deadline: Instant,
        allowed: Option<&Vec<String>>,
    ) -> (String, bool) {
        let step_id = Uuid::new_v4();
        let _ = tx
            .send(ExecutionEvent::AgentStarted {
                step_id,
                agent_name: Some(agent_name.to_string()),
            })
            .await;
        let _ = tx
            .send(ExecutionEvent::ToolCallStarted {
                step_id,
                agent_name: Some(agent_name.to_string()),
                tool_name: tc.tool_name.clone(),
                tool_kwargs: tc.arguments.clone(),
            })
            .await;

        let outcome = if allowed.is_some_and(|names| !names.iter().any(|n| n == &tc.tool_name)) {
            ToolOutcome::from_error(&Error::Unauthorized(format!(
                "tool '{}' is not bound to agent '{agent_name}'",
                tc.tool_name
            )))
        } else {
            let budget = self
                .step_deadline(deadline)
                .saturating_duration_since(Instant::now());
            match tokio::time::timeout(
                budget,
                self.tools.dispatch(&tc.tool_name, tc.arguments.clone(), context),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ToolOutcome::from_error(&Error::Timeout(format!(
                    "tool '{}' exceeded the step budget",
                    tc.tool_name
                ))),
            }
        };

        let _ = tx
            .send(ExecutionEvent::ToolCallCompleted {
                step_id,
                tool_name: tc.tool_name.clone(),
                output: Some(outcome.summary.clone()),
                raw_output: Some(outcome.payload.clone()),
                is_error: outcome.is_error,
            })
            .await;
        let _ = tx
            .send(ExecutionEvent::RunCompleted {
                step_id,
                agent_name: Some(agent_name.to_string()),
            })
            .await;

        (render_tool_content(&outcome), outcome.is_error)
    }

    fn step_deadline(&self, turn_deadline: Instant) -> Instant {
        (Instant::now() + self.step_timeout).min(turn_deadline)
    }

    fn estimate_cost(&self, model: &str, usage: Option<&Usage>) -> Option<f64> {
        let usage = usage?;
        let pricing = self.pricing.get(model)?;
        Some(pricing.estimate_cost(usage.prompt_tokens, usage.completion_tokens))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One streamed LLM cycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CycleResult {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    cancelled: bool,
}

/// Stream one completion: forward text deltas as `RunContent` for the
/// given step, pipe tool-call fragments through the assembler, stop early
/// on cancellation, and fail on the step budget.
async fn consume_cycle(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    step_id: Uuid,
    tx: &mpsc::Sender<ExecutionEvent>,
    cancel: &CancelToken,
    step_deadline: Instant,
) -> dq_domain::Result<CycleResult> {
    let mut stream = provider.chat_stream(req).await?;

    let mut text = String::new();
    let mut assembler = ToolCallAssembler::new();
    let mut usage: Option<Usage> = None;
    let mut finish_reason: Option<String> = None;
    let mut cancelled = false;

    loop {
        let next = match tokio::time::timeout_at(step_deadline, stream.next()).await {
            Ok(item) => item,
            Err(_) => {
                return Err(Error::Timeout("agent step exceeded its budget".into()));
            }
        };
        let Some(event_result) = next else { break };

        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        match event_result? {
            StreamEvent::Token { text: delta } => {
                text.push_str(&delta);
                let _ = tx
                    .send(ExecutionEvent::RunContent {
                        step_id,
                        delta,
                    })
                    .await;
            }
            StreamEvent::Done {
                usage: done_usage,
                finish_reason: done_reason,
            } => {
                if done_usage.is_some() {
                    usage = done_usage;
                }
                if done_reason.is_some() {
                    finish_reason = done_reason;
                }
            }
            StreamEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: provider.provider_id().to_string(),
                    message,
                });
            }
            tool_event => assembler.observe(&tool_event),
        }
    }

    let (tool_calls, malformed) = assembler.finish();
    for call_id in malformed {
        tracing::warn!(
            %call_id,
            "tool call arguments are not valid JSON; defaulting to empty object"
        );
    }

    Ok(CycleResult {
        text,
        tool_calls,
        usage,
        finish_reason,
        cancelled,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The assistant message carrying this cycle's text and tool-use parts,
/// pushed back into the transcript before dispatching tools.
fn build_assistant_tool_message(text: &str, tool_calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.into() });
    }
    for tc in tool_calls {
        parts.push(ContentPart::ToolUse {
            id: tc.call_id.clone(),
            name: tc.tool_name.clone(),
            input: tc.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}

/// Rendered tool result for the LLM: the markdown summary plus the
/// structured payload (truncated).
fn render_tool_content(outcome: &ToolOutcome) -> String {
    let payload = outcome.payload.to_string();
    if payload == "null" || payload == "{}" {
        return outcome.summary.clone();
    }
    format!("{}\n\n{}", outcome.summary, truncate_str(&payload, TOOL_PAYLOAD_LIMIT))
}

/// Truncate on a char boundary, appending `...` when shortened.
pub(crate) fn truncate_str(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Short inventory of what the context already holds, injected into
/// system prompts so agents do not re-fetch or re-compute artifacts.
fn context_digest(ctx: &ContextState) -> String {
    let mut lines = Vec::new();
    for (name, data) in &ctx.dataset_data {
        lines.push(format!(
            "- dataset `{name}`: {} rows ({})",
            data.row_count(),
            data.columns().join(", ")
        ));
    }
    for name in ctx.search_results.keys() {
        lines.push(format!("- semantic search results `{name}`"));
    }
    for name in ctx.clustering.keys() {
        lines.push(format!("- clustering of `{name}`"));
    }
    for name in ctx.gap_analysis.keys() {
        lines.push(format!("- gap analysis of `{name}`"));
    }
    for name in ctx.trend_analysis.keys() {
        lines.push(format!("- trend analysis of `{name}`"));
    }
    lines.join("\n")
}

fn history_messages(ctx: &ContextState) -> Vec<Message> {
    ctx.conversation_history
        .iter()
        .map(|h| match h.role.as_str() {
            "assistant" => Message::assistant(&h.content),
            _ => Message::user(&h.content),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_char_boundary_safe() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello...");
        let s = "héllo";
        let t = truncate_str(s, 2);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn assistant_tool_message_carries_text_and_calls() {
        let msg = build_assistant_tool_message(
            "thinking out loud",
            &[ToolCall {
                call_id: "c1".into(),
                tool_name: "delegate_to_gap_analysis".into(),
                arguments: serde_json::json!({"task": "find gaps"}),
            }],
        );
        match msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ToolUse { .. }));
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn context_digest_lists_artifacts() {
        use dq_context::{Cell, TableArtifact};

        let mut ctx = ContextState::new("u1");
        assert!(context_digest(&ctx).is_empty());

        ctx.insert_dataset(
            "reviews",
            TableArtifact::new(
                vec!["text".into()],
                vec![vec![Cell::Str("a".into())]],
            ),
        );
        let digest = context_digest(&ctx);
        assert!(digest.contains("dataset `reviews`"));
        assert!(digest.contains("1 rows"));
    }
}
