//! Per-session cancellation registry.
//!
//! Each running turn registers a [`CancelToken`] under its session id;
//! `POST /v1/sessions/:id/cancel` (or a dropped client that asked for
//! abort) signals the runtime to stop the turn cleanly.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use dq_engine::CancelToken;

/// Tracks active cancellation tokens per session.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a session.
    pub fn register(&self, session_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(session_id, token.clone());
        token
    }

    /// Cancel a running turn. Returns true if a token was found.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.tokens.lock().get(&session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token (called when a turn completes).
    pub fn remove(&self, session_id: Uuid) {
        self.tokens.lock().remove(&session_id);
    }

    /// Check if a session has an active (running) turn.
    pub fn is_running(&self, session_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let id = Uuid::new_v4();
        let token = map.register(id);
        assert!(!token.is_cancelled());
        assert!(map.is_running(id));

        assert!(map.cancel(id));
        assert!(token.is_cancelled());

        map.remove(id);
        assert!(!map.is_running(id));
        assert!(!map.cancel(id));
    }

    #[test]
    fn cancel_nonexistent_session_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(Uuid::new_v4()));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let id = Uuid::new_v4();
        let old_token = map.register(id);
        let new_token = map.register(id);

        map.cancel(id);
        assert!(new_token.is_cancelled());
        // The orphaned token is no longer reachable through the map.
        assert!(!old_token.is_cancelled());
    }
}
