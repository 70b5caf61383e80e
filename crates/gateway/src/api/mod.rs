//! HTTP API surface.

pub mod calls;
pub mod chat;
pub mod router;
pub mod sessions;

use axum::http::HeaderMap;

/// Caller identity, as established by the fronting auth layer (out of
/// scope here) and forwarded in a header. Dev mode falls back to a fixed
/// local identity.
pub(crate) fn user_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("local")
        .to_string()
}
