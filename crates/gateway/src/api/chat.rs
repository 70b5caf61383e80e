//! Chat endpoints — the primary interface for running turns.
//!
//! - `POST /v1/chat`        — non-streaming: drains the turn and returns
//!   the aggregate response
//! - `POST /v1/chat/stream` — SSE: forwards each wire event as it happens

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;

use dq_domain::wire::WireEvent;

use crate::runtime::{run_turn, ChatRequest, TurnInput};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let user_id = super::user_id_from_headers(&headers);
    let mut rx = run_turn(state, TurnInput { user_id, request: body });

    let mut content = String::new();
    let mut steps = Vec::new();
    let mut tool_calls = Vec::new();
    let mut complexity = None;
    let mut session_id = None;
    let mut message_id = None;
    let mut error = None;

    while let Some(event) = rx.recv().await {
        match event {
            WireEvent::Content { content: delta } => content.push_str(&delta),
            WireEvent::WorkflowRouted {
                complexity: c,
                session_id: s,
                ..
            } => {
                complexity = Some(c);
                session_id = Some(s);
            }
            WireEvent::ToolCall {
                tool_name,
                tool_kwargs,
                agent_name,
                ..
            } => tool_calls.push(serde_json::json!({
                "tool_name": tool_name,
                "tool_kwargs": tool_kwargs,
                "agent_name": agent_name,
            })),
            WireEvent::AgentStepComplete {
                agent_name,
                content,
                is_structured,
                step_order,
                ..
            } => steps.push(serde_json::json!({
                "step_order": step_order,
                "agent_name": agent_name,
                "content": content,
                "is_structured": is_structured,
            })),
            WireEvent::Complete {
                message_id: m,
                session_id: s,
                ..
            } => {
                message_id = Some(m);
                session_id = Some(s);
            }
            WireEvent::Error { error: e } => error = Some(e),
            _ => {}
        }
    }

    Json(serde_json::json!({
        "session_id": session_id,
        "message_id": message_id,
        "complexity": complexity,
        "content": content,
        "steps": steps,
        "tool_calls": tool_calls,
        "error": error,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    let user_id = super::user_id_from_headers(&headers);
    let rx = run_turn(state, TurnInput { user_id, request: body });

    Sse::new(make_sse_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Serialize wire events onto SSE. The turn task is already detached —
/// dropping this stream (client disconnect) never stops the turn or its
/// persistence.
fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<WireEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.type_name()).data(data));
        }
    }
}
