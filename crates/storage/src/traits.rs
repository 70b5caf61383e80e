use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use dq_context::{Dtype, TableArtifact};
use dq_domain::entity::{AgentStep, ChatMessage, Session, StepToolCall};
use dq_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relational store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Metadata about one user-owned dataset table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatasetInfo {
    /// Fully scoped table identifier (`__user_<owner>_<name>`).
    pub table_name: String,
    /// Name the user knows the dataset by.
    pub friendly_name: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub dtypes: Vec<Dtype>,
}

/// One completed step awaiting persistence. `step_order` was assigned by
/// the streamer in completion order; the commit re-checks density.
#[derive(Debug, Clone)]
pub struct StepDraft {
    pub step_order: u32,
    pub agent_name: String,
    pub tool_call: Option<StepToolCall>,
    pub prediction: Option<String>,
}

/// The single end-of-turn write.
#[derive(Debug, Clone)]
pub struct TurnWrite {
    pub session_id: Uuid,
    /// Present when the user message was not already appended pre-dispatch.
    pub user_message: Option<ChatMessage>,
    pub assistant_message: ChatMessage,
    pub steps: Vec<StepDraft>,
    /// Encoded `ContextState`; overwrites the session snapshot.
    pub snapshot: Value,
}

#[derive(Debug, Clone)]
pub struct CommittedTurn {
    pub message_id: Uuid,
    pub session_id: Uuid,
}

/// Transactional CRUD over sessions, messages, steps — plus the scoped
/// `execute_sql` used by the SQL tool. Injected as `Arc<dyn RelationalStore>`.
#[async_trait::async_trait]
pub trait RelationalStore: Send + Sync {
    async fn create_session(&self, user_id: &str) -> Result<Session>;
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>>;
    async fn delete_session(&self, id: Uuid) -> Result<()>;

    /// Append one message. Messages are append-only.
    async fn append_message(&self, message: ChatMessage) -> Result<()>;
    /// The most recent `limit` messages of a session, oldest first.
    async fn recent_messages(&self, session_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>>;
    async fn last_assistant_message(&self, session_id: Uuid) -> Result<Option<ChatMessage>>;
    async fn steps_for_message(&self, message_id: Uuid) -> Result<Vec<AgentStep>>;

    /// Atomically append the assistant message, its dense step log, and the
    /// new session snapshot. Nothing is visible if any part fails.
    async fn commit_turn(&self, write: TurnWrite) -> Result<CommittedTurn>;

    /// Execute a parameterized, read-only query scoped to the caller's
    /// tables. Identifiers outside the caller's namespace fail with
    /// `Unauthorized`; DDL is refused.
    async fn execute_sql(
        &self,
        user_id: &str,
        query: &str,
        params: &[Value],
    ) -> Result<TableArtifact>;

    /// Enumerate the caller's dataset tables with field metadata.
    async fn list_user_tables(&self, user_id: &str) -> Result<Vec<DatasetInfo>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vector store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One similarity search hit, best first.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// One stored vector with its payload.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl VectorEntry {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Value) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Cosine similarity search over per-user namespaces.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn similarity_search(
        &self,
        user_id: &str,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>>;

    async fn upsert(
        &self,
        user_id: &str,
        namespace: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<()>;
}
