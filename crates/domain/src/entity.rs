//! Persisted entities: sessions, messages, and agent steps.
//!
//! Messages within a session form a causal chain: each assistant message's
//! `parent_message_id` points at the triggering user message, and each
//! non-first user message's points at the preceding assistant message.
//! Messages and steps are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat session owned by exactly one user. The `snapshot`, when present,
/// is the encoded form of the session's `ContextState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            snapshot: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    pub fn user(session_id: Uuid, content: impl Into<String>, parent: Option<Uuid>) -> Self {
        Self::new(session_id, MessageRole::User, content, parent)
    }

    pub fn assistant(session_id: Uuid, content: impl Into<String>, parent: Option<Uuid>) -> Self {
        Self::new(session_id, MessageRole::Assistant, content, parent)
    }

    fn new(
        session_id: Uuid,
        role: MessageRole,
        content: impl Into<String>,
        parent: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            parent_message_id: parent,
            metadata: serde_json::Map::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent step
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The structured payload of a step that invoked a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepToolCall {
    pub tool_name: String,
    pub tool_kwargs: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// One completed agent invocation within an assistant turn.
///
/// Exactly one of `tool_call` / `prediction` is non-null; `(message_id,
/// step_order)` is unique and `step_order` is dense from 0 within a message.
/// Steps are created in completion order and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: Uuid,
    pub message_id: Uuid,
    pub step_order: u32,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<StepToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentStep {
    /// The exactly-one-of-two field invariant.
    pub fn is_well_formed(&self) -> bool {
        self.tool_call.is_some() != self.prediction.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(tool_call: Option<StepToolCall>, prediction: Option<String>) -> AgentStep {
        AgentStep {
            id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            step_order: 0,
            agent_name: "coordinator".into(),
            tool_call,
            prediction,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn step_requires_exactly_one_payload() {
        let tc = StepToolCall {
            tool_name: "list_user_datasets".into(),
            tool_kwargs: serde_json::json!({}),
            output: None,
            is_error: false,
        };
        assert!(step(Some(tc.clone()), None).is_well_formed());
        assert!(step(None, Some("done".into())).is_well_formed());
        assert!(!step(None, None).is_well_formed());
        assert!(!step(Some(tc), Some("both".into())).is_well_formed());
    }

    #[test]
    fn assistant_message_links_parent() {
        let session = Session::new("u1");
        let user = ChatMessage::user(session.id, "hi", None);
        let assistant = ChatMessage::assistant(session.id, "hello", Some(user.id));
        assert_eq!(assistant.parent_message_id, Some(user.id));
        assert_eq!(assistant.role, MessageRole::Assistant);
    }
}
