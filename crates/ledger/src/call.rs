use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dq_domain::chat::{Message, ToolCall, ToolChoice, ToolDefinition};
use dq_domain::stream::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What kind of model invocation a ledger row records. Hidden calls
/// (classification, sentiment, …) are logged exactly like user-visible chat
/// calls; the call type is the only distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Chat,
    RagQuery,
    RagSynthesis,
    SentimentAnalysis,
    Summarization,
    Embedding,
    Classification,
    Extraction,
    System,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Success,
    Error,
    Cancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contextual keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Contextual keys linking a call to its request. Every request mints a
/// fresh `trace_id`; calls derived from another call inherit the parent's
/// trace and set `parent_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub trace_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_call_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CallContext {
    /// A fresh trace for a new request.
    pub fn for_request(user_id: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            parent_call_id: None,
            user_id: Some(user_id.into()),
            session_id: Some(session_id),
            task_id: None,
            company_id: None,
            review_id: None,
            metadata: serde_json::Map::new(),
            tags: Vec::new(),
        }
    }

    /// A derived context: same trace, parented to the given call.
    pub fn child_of(&self, parent_call_id: Uuid) -> Self {
        let mut ctx = self.clone();
        ctx.parent_call_id = Some(parent_call_id);
        ctx
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The ledger row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The model's reply, as recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One outbound model invocation.
///
/// Invariants: `total_tokens = prompt_tokens + completion_tokens`;
/// `latency_ms = completed_at - started_at` once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCall {
    pub id: Uuid,
    pub call_type: CallType,
    pub status: CallStatus,
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_message: Option<ResponseMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub context: CallContext,
}

/// Fields applied when a pending row is finalized.
#[derive(Debug, Clone)]
pub struct CallUpdate {
    pub status: CallStatus,
    pub response_message: Option<ResponseMessage>,
    pub finish_reason: Option<String>,
    pub error_message: Option<String>,
    pub usage: Option<Usage>,
    pub estimated_cost: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

impl LlmCall {
    /// Apply a finalizing update, computing `latency_ms` and the token
    /// total invariant from the update's usage.
    pub fn finalize(&mut self, update: CallUpdate) {
        self.status = update.status;
        self.response_message = update.response_message;
        self.finish_reason = update.finish_reason;
        self.error_message = update.error_message;
        if let Some(usage) = update.usage {
            self.prompt_tokens = Some(usage.prompt_tokens);
            self.completion_tokens = Some(usage.completion_tokens);
            self.total_tokens = Some(usage.prompt_tokens + usage.completion_tokens);
        }
        self.estimated_cost = update.estimated_cost;
        self.completed_at = Some(update.completed_at);
        self.latency_ms = Some(
            (update.completed_at - self.started_at)
                .num_milliseconds()
                .max(0),
        );
    }
}
