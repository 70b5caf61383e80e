//! Session endpoints: listing, history, deletion, and turn cancellation.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

use dq_domain::entity::{MessageRole, Session};
use dq_storage::RelationalStore;

use crate::state::AppState;

/// Resolve a session owned by the caller, or respond 404. Ownership
/// failures are indistinguishable from missing sessions on purpose.
async fn owned_session(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
) -> Result<Session, axum::response::Response> {
    let user_id = super::user_id_from_headers(headers);
    match state.store.get_session(id).await {
        Ok(Some(session)) if session.user_id == user_id => Ok(session),
        Ok(_) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "session not found" })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!(error = %e, "session lookup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "storage error" })),
            )
                .into_response())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = super::user_id_from_headers(&headers);
    match state.store.list_sessions(&user_id).await {
        Ok(sessions) => {
            let items: Vec<_> = sessions
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "id": s.id,
                        "created_at": s.created_at,
                        "updated_at": s.updated_at,
                        "active": state.cancel_map.is_running(s.id),
                    })
                })
                .collect();
            Json(serde_json::json!({ "sessions": items })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "session list failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "storage error" })),
            )
                .into_response()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MESSAGE_PAGE: usize = 200;

pub async fn session_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let session = match owned_session(&state, &headers, id).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let messages = match state.store.recent_messages(session.id, MESSAGE_PAGE).await {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "message fetch failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "storage error" })),
            )
                .into_response();
        }
    };

    let mut items = Vec::with_capacity(messages.len());
    for message in &messages {
        let steps = if message.role == MessageRole::Assistant {
            state
                .store
                .steps_for_message(message.id)
                .await
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        items.push(serde_json::json!({
            "id": message.id,
            "role": message.role,
            "content": message.content,
            "created_at": message.created_at,
            "parent_message_id": message.parent_message_id,
            "metadata": message.metadata,
            "steps": steps,
        }));
    }

    Json(serde_json::json!({ "session_id": session.id, "messages": items })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let session = match owned_session(&state, &headers, id).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.store.delete_session(session.id).await {
        Ok(()) => Json(serde_json::json!({ "deleted": session.id })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "session delete failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "storage error" })),
            )
                .into_response()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let session = match owned_session(&state, &headers, id).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    if state.cancel_map.cancel(session.id) {
        Json(serde_json::json!({ "cancelled": session.id })).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "no turn is running for this session" })),
        )
            .into_response()
    }
}
