//! LLM call ledger queries — post-hoc debugging of a request's call tree.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallQuery {
    pub trace_id: Uuid,
}

/// GET /v1/llm-calls?trace_id=…
///
/// Returns every ledger row of a trace, ordered by start instant —
/// visible chat calls and hidden calls alike.
pub async fn list_calls(
    State(state): State<AppState>,
    query: Option<Query<CallQuery>>,
) -> impl IntoResponse {
    let Some(Query(query)) = query else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "trace_id query parameter is required" })),
        )
            .into_response();
    };

    let calls = state.ledger.calls_by_trace(query.trace_id).await;
    Json(serde_json::json!({
        "trace_id": query.trace_id,
        "count": calls.len(),
        "calls": calls,
    }))
    .into_response()
}
