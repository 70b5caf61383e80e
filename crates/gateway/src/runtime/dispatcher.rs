//! The tiered dispatcher.
//!
//! One call to [`run_turn`] drives a whole turn: resolve the session,
//! append the user message, restore the context snapshot, classify, run
//! the chosen tier, and persist. The turn runs on its own task — a client
//! that disconnects mid-stream never prevents persistence — and emits the
//! uniform wire-event sequence regardless of tier.

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use dq_context::{ContextState, HistoryEntry};
use dq_domain::chat::Message;
use dq_domain::entity::{ChatMessage, MessageRole, Session};
use dq_domain::stream::{StreamEvent, Usage};
use dq_domain::wire::{Complexity, WireEvent};
use dq_engine::classifier::{classify, Classification};
use dq_engine::steps::StepTracker;
use dq_engine::workflow::{WorkflowInput, WorkflowOutcome};
use dq_engine::{CancelToken, ExecutionEvent, Team};
use dq_ledger::{CallContext, CallStart, CallType, ResponseMessage};
use dq_providers::{ChatRequest as LlmRequest, LlmProvider};
use dq_storage::{RelationalStore, StepDraft};
use futures_util::StreamExt;

use super::persist;
use crate::state::AppState;

/// The inbound request shape. `conversation_history` is filled from
/// persisted messages when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_table_name: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<HistoryEntry>>,
}

/// Identity plus request, as handed over by the HTTP boundary.
pub struct TurnInput {
    pub user_id: String,
    pub request: ChatRequest,
}

const SIMPLE_SYSTEM_PROMPT: &str = "\
You are a concise, friendly assistant for an analytics product. Answer \
directly from general knowledge; you have no tools in this mode, so never \
fabricate dataset results.";

/// Run one turn. Returns the wire-event receiver; the terminal event is
/// exactly one `complete` or `error`.
pub fn run_turn(state: AppState, input: TurnInput) -> mpsc::Receiver<WireEvent> {
    let (tx, rx) = mpsc::channel::<WireEvent>(256);

    let span = tracing::info_span!("turn", user_id = %input.user_id);
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            run_turn_inner(state, input, tx).await;
        },
        span,
    ));

    rx
}

async fn run_turn_inner(state: AppState, input: TurnInput, tx: mpsc::Sender<WireEvent>) {
    let _ = tx.send(WireEvent::Connected {}).await;

    let TurnInput { user_id, request } = input;

    // ── Session resolution (missing sessions are created, not errors) ──
    let session = match resolve_session(&state, &user_id, request.session_id).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "session resolution failed");
            let _ = tx
                .send(WireEvent::Error {
                    error: "failed to open a session".into(),
                })
                .await;
            return;
        }
    };
    let session_id = session.id;

    // ── One active turn per session ────────────────────────────────
    let _permit = match state.session_locks.acquire(session_id) {
        Ok(p) => p,
        Err(busy) => {
            let _ = tx
                .send(WireEvent::Error {
                    error: busy.to_string(),
                })
                .await;
            return;
        }
    };
    let cancel = state.cancel_map.register(session_id);

    let outcome = drive_turn(&state, &user_id, &request, session, &cancel, &tx).await;
    if let Err(error) = outcome {
        let _ = tx.send(WireEvent::Error { error }).await;
    }

    state.cancel_map.remove(session_id);
    state.session_locks.prune_idle();
}

/// Everything between the session lock and the terminal event. Returns
/// `Err(message)` when the terminal event must be `error`.
async fn drive_turn(
    state: &AppState,
    user_id: &str,
    request: &ChatRequest,
    session: Session,
    cancel: &CancelToken,
    tx: &mpsc::Sender<WireEvent>,
) -> Result<(), String> {
    let session_id = session.id;

    // ── History (fetched before the new user message lands) ────────
    let history = match &request.conversation_history {
        Some(h) => h.clone(),
        None => match state
            .store
            .recent_messages(session_id, state.config.runtime.history_window)
            .await
        {
            Ok(messages) => messages.iter().map(history_entry).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "history fetch failed; continuing without");
                Vec::new()
            }
        },
    };

    // ── Causal chain: user message parented to the last assistant ──
    let parent = state
        .store
        .last_assistant_message(session_id)
        .await
        .ok()
        .flatten()
        .map(|m| m.id);
    let user_message = ChatMessage::user(session_id, &request.message, parent);
    if let Err(e) = state.store.append_message(user_message.clone()).await {
        tracing::error!(error = %e, "failed to append user message");
        return Err("failed to record the message".into());
    }

    // ── Context restore + request attachments ──────────────────────
    let mut context = match &session.snapshot {
        Some(snapshot) => ContextState::restore(user_id, snapshot),
        None => ContextState::new(user_id),
    };
    context.attach_history(&history);
    if let Some(extra) = &request.context {
        for (key, value) in extra {
            context.extras.insert(key.clone(), value.clone());
        }
    }
    if let Some(table) = &request.dataset_table_name {
        context
            .extras
            .insert("requested_dataset_table".into(), Value::String(table.clone()));
    }

    let mut call_context = CallContext::for_request(user_id, session_id);
    call_context.company_id = request.company_id.clone();

    // ── Classify and route ─────────────────────────────────────────
    let classification = match state.llm.resolve(&state.config.llm.tiers.classifier) {
        Ok((provider, model)) => {
            classify(
                provider,
                model,
                &state.ledger,
                &request.message,
                &history,
                call_context.clone(),
            )
            .await
        }
        Err(e) => {
            tracing::warn!(error = %e, "classifier unresolvable; defaulting to complex");
            Classification {
                complexity: Complexity::Complex,
                reasoning: "classifier unavailable; defaulting to complex".into(),
            }
        }
    };
    let complexity = classification.complexity;
    let _ = tx
        .send(WireEvent::WorkflowRouted {
            complexity,
            reasoning: classification.reasoning,
            session_id,
        })
        .await;

    let run = match complexity {
        Complexity::Simple | Complexity::Medium => {
            run_bypass_tier(state, complexity, request, &history, context, &call_context, cancel, tx)
                .await
        }
        Complexity::Complex => {
            run_complex_tier(state, request, context, call_context, cancel, tx).await
        }
    };

    // ── Persist and terminate ──────────────────────────────────────
    let assistant_content = match &run.outcome {
        WorkflowOutcome::Completed => run.text.clone(),
        other => persist::failure_note(other),
    };
    let mut assistant = ChatMessage::assistant(session_id, assistant_content, Some(user_message.id));
    assistant
        .metadata
        .insert("complexity".into(), Value::String(complexity.as_str().into()));
    assistant.metadata.insert(
        "outcome".into(),
        Value::String(outcome_label(&run.outcome).into()),
    );

    let snapshot = run
        .context
        .encode_or_empty(state.config.runtime.large_table_threshold);
    let committed = persist::commit_turn(
        state.store.as_ref(),
        session_id,
        assistant,
        run.steps,
        snapshot,
    )
    .await;

    match (committed, run.outcome) {
        (Ok(committed), WorkflowOutcome::Completed) => {
            let _ = tx
                .send(WireEvent::Complete {
                    message_id: committed.message_id,
                    session_id,
                    metadata: serde_json::json!({ "complexity": complexity }),
                })
                .await;
            Ok(())
        }
        (Ok(_), WorkflowOutcome::Cancelled) => Err("cancelled".into()),
        (Ok(_), WorkflowOutcome::TimedOut) => Err("workflow timed out".into()),
        (Ok(_), WorkflowOutcome::Failed(reason)) => {
            tracing::error!(%reason, "workflow failed");
            Err("internal error".into())
        }
        (Err(e), _) => {
            tracing::error!(error = %e, "end-of-turn persistence failed");
            Err("failed to persist this turn".into())
        }
    }
}

/// What one tier run produced.
struct TierRun {
    context: ContextState,
    text: String,
    steps: Vec<StepDraft>,
    outcome: WorkflowOutcome,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Simple / medium bypass tiers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One direct chat call streaming straight to `content` events — no
/// tools, no agent steps.
#[allow(clippy::too_many_arguments)]
async fn run_bypass_tier(
    state: &AppState,
    tier: Complexity,
    request: &ChatRequest,
    history: &[HistoryEntry],
    context: ContextState,
    call_context: &CallContext,
    cancel: &CancelToken,
    tx: &mpsc::Sender<WireEvent>,
) -> TierRun {
    let model_ref = match tier {
        Complexity::Simple => &state.config.llm.tiers.simple,
        _ => &state.config.llm.tiers.medium,
    };
    let (provider, model) = match state.llm.resolve(model_ref) {
        Ok(r) => r,
        Err(e) => {
            return TierRun {
                context,
                text: String::new(),
                steps: Vec::new(),
                outcome: WorkflowOutcome::Failed(e.to_string()),
            }
        }
    };

    let mut messages = vec![Message::system(SIMPLE_SYSTEM_PROMPT)];
    if tier == Complexity::Medium {
        // Medium answers follow-ups out of the recent conversation.
        for entry in history {
            match entry.role.as_str() {
                "assistant" => messages.push(Message::assistant(&entry.content)),
                _ => messages.push(Message::user(&entry.content)),
            }
        }
    }
    messages.push(Message::user(&request.message));

    let req = LlmRequest {
        messages: messages.clone(),
        temperature: Some(state.config.llm.default_temperature),
        model: Some(model.clone()),
        ..Default::default()
    };
    let scope = state
        .ledger
        .scope(CallStart {
            call_type: CallType::Chat,
            provider: provider.provider_id().to_string(),
            model: model.clone(),
            messages,
            system_prompt: Some(SIMPLE_SYSTEM_PROMPT.into()),
            tools: None,
            tool_choice: None,
            context: call_context.clone().tagged(tier.as_str()),
        })
        .await;

    let mut stream = match provider.chat_stream(&req).await {
        Ok(s) => s,
        Err(e) => {
            scope.fail(e.to_string()).await;
            return TierRun {
                context,
                text: String::new(),
                steps: Vec::new(),
                outcome: WorkflowOutcome::Failed(e.to_string()),
            };
        }
    };

    let mut text = String::new();
    let mut usage: Option<Usage> = None;
    let mut finish_reason = None;
    let mut outcome = WorkflowOutcome::Completed;

    while let Some(event) = stream.next().await {
        if cancel.is_cancelled() {
            outcome = WorkflowOutcome::Cancelled;
            break;
        }
        match event {
            Ok(StreamEvent::Token { text: delta }) => {
                text.push_str(&delta);
                let _ = tx.send(WireEvent::Content { content: delta }).await;
            }
            Ok(StreamEvent::Done {
                usage: done_usage,
                finish_reason: done_reason,
            }) => {
                usage = done_usage.or(usage);
                finish_reason = done_reason.or(finish_reason);
            }
            Ok(_) => {}
            Err(e) => {
                scope.fail(e.to_string()).await;
                return TierRun {
                    context,
                    text,
                    steps: Vec::new(),
                    outcome: WorkflowOutcome::Failed(e.to_string()),
                };
            }
        }
    }

    let cost = usage.as_ref().and_then(|u| {
        state
            .config
            .llm
            .pricing
            .get(&model)
            .map(|p| p.estimate_cost(u.prompt_tokens, u.completion_tokens))
    });
    scope
        .complete(
            ResponseMessage {
                role: "assistant".into(),
                content: Some(text.clone()),
                tool_calls: None,
            },
            usage,
            cost,
            finish_reason,
        )
        .await;

    TierRun {
        context,
        text,
        steps: Vec::new(),
        outcome,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Complex tier — the team workflow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_complex_tier(
    state: &AppState,
    request: &ChatRequest,
    context: ContextState,
    call_context: CallContext,
    cancel: &CancelToken,
    tx: &mpsc::Sender<WireEvent>,
) -> TierRun {
    let user_id = context.user_id.clone();
    let model_ref = state.config.llm.tiers.complex.clone();
    let (provider, model) = match state.llm.resolve(&model_ref) {
        Ok(r) => r,
        Err(e) => {
            return TierRun {
                context,
                text: String::new(),
                steps: Vec::new(),
                outcome: WorkflowOutcome::Failed(e.to_string()),
            }
        }
    };

    let mut handle = state.engine.clone().run(WorkflowInput {
        question: request.message.clone(),
        team: Team::standard(model_ref),
        context,
        provider,
        model,
        cancel: cancel.clone(),
        call_context,
    });

    // Project engine events into wire events as they arrive.
    let mut tracker = StepTracker::new();
    while let Some(event) = handle.events.recv().await {
        if let ExecutionEvent::Error { message } = &event {
            tracing::warn!(%message, "engine error event");
        }
        for wire in tracker.handle(event) {
            let _ = tx.send(wire).await;
        }
    }

    let result = match handle.result.await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "workflow task aborted");
            // The context is lost with the task; the turn degrades to a
            // fresh snapshot rather than failing persistence.
            return TierRun {
                context: ContextState::new(user_id),
                text: String::new(),
                steps: finalize_steps(tracker, "internal error"),
                outcome: WorkflowOutcome::Failed("workflow task aborted".into()),
            };
        }
    };

    match result.outcome {
        WorkflowOutcome::Completed => {
            // Final-answer content goes out only after every step closed.
            for wire in tracker.force_complete_all("run completed") {
                let _ = tx.send(wire).await;
            }
            let _ = tx
                .send(WireEvent::Content {
                    content: result.final_text.clone(),
                })
                .await;
            TierRun {
                context: result.context,
                text: result.final_text,
                steps: tracker.into_completed_steps(),
                outcome: WorkflowOutcome::Completed,
            }
        }
        outcome => {
            let reason = outcome_label(&outcome);
            for wire in tracker.force_complete_all(reason) {
                let _ = tx.send(wire).await;
            }
            TierRun {
                context: result.context,
                text: result.final_text,
                steps: tracker.into_completed_steps(),
                outcome,
            }
        }
    }
}

fn finalize_steps(mut tracker: StepTracker, reason: &str) -> Vec<StepDraft> {
    tracker.force_complete_all(reason);
    tracker.into_completed_steps()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn resolve_session(
    state: &AppState,
    user_id: &str,
    session_id: Option<Uuid>,
) -> dq_domain::Result<Session> {
    if let Some(id) = session_id {
        match state.store.get_session(id).await? {
            Some(session) if session.user_id == user_id => return Ok(session),
            Some(_) => {
                tracing::warn!(%id, "session belongs to another user; creating a fresh one");
            }
            None => {
                tracing::info!(%id, "unknown session id; creating a fresh one");
            }
        }
    }
    let session = state.store.create_session(user_id).await?;
    tracing::info!(session_id = %session.id, "new session created");
    Ok(session)
}

fn history_entry(message: &ChatMessage) -> HistoryEntry {
    HistoryEntry {
        role: match message.role {
            MessageRole::User => "user".into(),
            MessageRole::Assistant => "assistant".into(),
            MessageRole::System => "system".into(),
        },
        content: message.content.clone(),
    }
}

fn outcome_label(outcome: &WorkflowOutcome) -> &'static str {
    match outcome {
        WorkflowOutcome::Completed => "completed",
        WorkflowOutcome::Cancelled => "cancelled",
        WorkflowOutcome::TimedOut => "timed_out",
        WorkflowOutcome::Failed(_) => "failed",
    }
}
