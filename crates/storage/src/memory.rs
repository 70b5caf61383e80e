//! In-memory reference implementation of the store capabilities.
//!
//! Backs the test suites and dev mode: sessions, messages, steps, and
//! ledger rows in RwLock'd maps, registered user tables with a small
//! read-only SELECT subset, and exact cosine search for vectors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use dq_context::{Cell, TableArtifact};
use dq_domain::entity::{AgentStep, ChatMessage, MessageRole, Session};
use dq_domain::error::{Error, Result};
use dq_ledger::{CallUpdate, LedgerStore, LlmCall};

use crate::sql::{owner_prefix, validate_scoped_sql};
use crate::traits::{
    CommittedTurn, DatasetInfo, RelationalStore, SearchHit, TurnWrite, VectorEntry, VectorStore,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct UserTable {
    owner: String,
    friendly_name: String,
    table: TableArtifact,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    /// session_id → messages, append order.
    messages: HashMap<Uuid, Vec<ChatMessage>>,
    /// message_id → steps, step_order ascending.
    steps: HashMap<Uuid, Vec<AgentStep>>,
    /// Scoped table name → table.
    user_tables: HashMap<String, UserTable>,
}

/// The in-memory store. Implements [`RelationalStore`], [`VectorStore`],
/// and the ledger sink.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    calls: RwLock<HashMap<Uuid, LlmCall>>,
    /// (user_id, namespace) → vectors.
    vectors: RwLock<HashMap<(String, String), Vec<VectorEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset table for a user (dev seeding and tests).
    /// Returns the fully scoped table name.
    pub fn register_user_table(
        &self,
        user_id: &str,
        friendly_name: &str,
        table: TableArtifact,
    ) -> String {
        let table_name = format!("{}{}", owner_prefix(user_id), friendly_name);
        self.inner.write().user_tables.insert(
            table_name.clone(),
            UserTable {
                owner: user_id.to_string(),
                friendly_name: friendly_name.to_string(),
                table,
            },
        );
        table_name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RelationalStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl RelationalStore for MemoryStore {
    async fn create_session(&self, user_id: &str) -> Result<Session> {
        let session = Session::new(user_id);
        self.inner
            .write()
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.read().sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let inner = self.inner.read();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(sessions)
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .sessions
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        if let Some(messages) = inner.messages.remove(&id) {
            for message in &messages {
                inner.steps.remove(&message.id);
            }
        }
        Ok(())
    }

    async fn append_message(&self, message: ChatMessage) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&message.session_id) {
            return Err(Error::NotFound(format!(
                "session {}",
                message.session_id
            )));
        }
        inner
            .messages
            .entry(message.session_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn recent_messages(&self, session_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read();
        let messages = inner.messages.get(&session_id).cloned().unwrap_or_default();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn last_assistant_message(&self, session_id: Uuid) -> Result<Option<ChatMessage>> {
        let inner = self.inner.read();
        Ok(inner
            .messages
            .get(&session_id)
            .and_then(|m| {
                m.iter()
                    .rev()
                    .find(|msg| msg.role == MessageRole::Assistant)
            })
            .cloned())
    }

    async fn steps_for_message(&self, message_id: Uuid) -> Result<Vec<AgentStep>> {
        Ok(self
            .inner
            .read()
            .steps
            .get(&message_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_turn(&self, write: TurnWrite) -> Result<CommittedTurn> {
        // Validate the step log before touching any state.
        for (i, step) in write.steps.iter().enumerate() {
            if step.step_order != i as u32 {
                return Err(Error::Internal(format!(
                    "step log is not dense: position {i} carries step_order {}",
                    step.step_order
                )));
            }
            if step.tool_call.is_some() == step.prediction.is_some() {
                return Err(Error::Internal(format!(
                    "step {i} must carry exactly one of tool_call / prediction"
                )));
            }
        }

        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&write.session_id)
            .ok_or_else(|| Error::NotFound(format!("session {}", write.session_id)))?;
        session.snapshot = Some(write.snapshot);
        session.updated_at = Utc::now();

        let messages = inner.messages.entry(write.session_id).or_default();
        if let Some(user_message) = write.user_message {
            if !messages.iter().any(|m| m.id == user_message.id) {
                messages.push(user_message);
            }
        }
        let message_id = write.assistant_message.id;
        messages.push(write.assistant_message);

        let steps = write
            .steps
            .into_iter()
            .map(|draft| AgentStep {
                id: Uuid::new_v4(),
                message_id,
                step_order: draft.step_order,
                agent_name: draft.agent_name,
                tool_call: draft.tool_call,
                prediction: draft.prediction,
                created_at: Utc::now(),
            })
            .collect();
        inner.steps.insert(message_id, steps);

        Ok(CommittedTurn {
            message_id,
            session_id: write.session_id,
        })
    }

    async fn execute_sql(
        &self,
        user_id: &str,
        query: &str,
        params: &[Value],
    ) -> Result<TableArtifact> {
        validate_scoped_sql(user_id, query)?;
        let select = parse_select(query, params)?;

        let inner = self.inner.read();
        let entry = inner
            .user_tables
            .get(&select.table)
            .filter(|t| t.owner == user_id)
            .ok_or_else(|| Error::NotFound(format!("dataset table '{}'", select.table)))?;

        evaluate_select(&entry.table, &select)
    }

    async fn list_user_tables(&self, user_id: &str) -> Result<Vec<DatasetInfo>> {
        let inner = self.inner.read();
        let mut infos: Vec<DatasetInfo> = inner
            .user_tables
            .iter()
            .filter(|(_, t)| t.owner == user_id)
            .map(|(name, t)| DatasetInfo {
                table_name: name.clone(),
                friendly_name: t.friendly_name.clone(),
                row_count: t.table.row_count(),
                columns: t.table.columns.clone(),
                dtypes: t.table.dtypes.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(infos)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SELECT subset evaluator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq)]
enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, PartialEq)]
struct Predicate {
    column: String,
    op: CmpOp,
    literal: Value,
}

#[derive(Debug, PartialEq)]
struct SelectQuery {
    projection: Projection,
    table: String,
    predicate: Option<Predicate>,
    limit: Option<usize>,
}

/// Parse the supported subset: `SELECT <cols|*> FROM <table>
/// [WHERE <col> <op> <literal|?>] [LIMIT <n>]`. Anything else is an
/// `InvalidArgument` — the reference store does not pretend to be a
/// database.
fn parse_select(query: &str, params: &[Value]) -> Result<SelectQuery> {
    let normalized = query.trim().trim_end_matches(';').trim();
    let lowered = normalized.to_lowercase();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let lowered_tokens: Vec<String> = lowered.split_whitespace().map(String::from).collect();

    if lowered_tokens.first().map(String::as_str) != Some("select") {
        return Err(Error::InvalidArgument(
            "reference store supports SELECT statements only".into(),
        ));
    }
    let from_idx = lowered_tokens
        .iter()
        .position(|t| t == "from")
        .ok_or_else(|| Error::InvalidArgument("SELECT without FROM".into()))?;
    if from_idx + 1 >= tokens.len() {
        return Err(Error::InvalidArgument("FROM without a table".into()));
    }

    let projection_raw = tokens[1..from_idx].join(" ");
    let projection = if projection_raw.trim() == "*" {
        Projection::All
    } else {
        Projection::Columns(
            projection_raw
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        )
    };

    let table = tokens[from_idx + 1].to_string();
    let mut rest = from_idx + 2;

    let mut predicate = None;
    if lowered_tokens.get(rest).map(String::as_str) == Some("where") {
        // Exactly `col op literal`.
        let column = tokens
            .get(rest + 1)
            .ok_or_else(|| Error::InvalidArgument("WHERE without a column".into()))?
            .to_string();
        let op = match tokens.get(rest + 2).copied() {
            Some("=") => CmpOp::Eq,
            Some("!=") | Some("<>") => CmpOp::Ne,
            Some("<") => CmpOp::Lt,
            Some("<=") => CmpOp::Le,
            Some(">") => CmpOp::Gt,
            Some(">=") => CmpOp::Ge,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported WHERE operator {other:?}"
                )))
            }
        };
        let raw = tokens
            .get(rest + 3)
            .ok_or_else(|| Error::InvalidArgument("WHERE without a value".into()))?;
        let literal = parse_literal(raw, params)?;
        predicate = Some(Predicate {
            column,
            op,
            literal,
        });
        rest += 4;
    }

    let mut limit = None;
    if lowered_tokens.get(rest).map(String::as_str) == Some("limit") {
        let n = tokens
            .get(rest + 1)
            .and_then(|t| t.parse::<usize>().ok())
            .ok_or_else(|| Error::InvalidArgument("LIMIT requires a number".into()))?;
        limit = Some(n);
        rest += 2;
    }

    if rest != tokens.len() {
        return Err(Error::InvalidArgument(format!(
            "unsupported SQL tail: '{}'",
            tokens[rest..].join(" ")
        )));
    }

    Ok(SelectQuery {
        projection,
        table,
        predicate,
        limit,
    })
}

fn parse_literal(raw: &str, params: &[Value]) -> Result<Value> {
    if raw == "?" || raw == "$1" {
        return params
            .first()
            .cloned()
            .ok_or_else(|| Error::InvalidArgument("placeholder without a parameter".into()));
    }
    if let Some(stripped) = raw.strip_prefix('\'') {
        return Ok(Value::String(
            stripped.trim_end_matches('\'').to_string(),
        ));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Value::from(f));
    }
    Err(Error::InvalidArgument(format!(
        "unsupported literal '{raw}'"
    )))
}

fn evaluate_select(table: &TableArtifact, select: &SelectQuery) -> Result<TableArtifact> {
    let keep: Vec<usize> = match &select.projection {
        Projection::All => (0..table.columns.len()).collect(),
        Projection::Columns(cols) => cols
            .iter()
            .map(|c| {
                table
                    .column_index(c)
                    .ok_or_else(|| Error::InvalidArgument(format!("unknown column '{c}'")))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let predicate_idx = match &select.predicate {
        Some(p) => Some((
            table
                .column_index(&p.column)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown column '{}'", p.column)))?,
            p,
        )),
        None => None,
    };

    let mut rows = Vec::new();
    for row in &table.rows {
        if let Some((idx, p)) = &predicate_idx {
            if !cell_matches(&row[*idx], p.op, &p.literal) {
                continue;
            }
        }
        rows.push(keep.iter().map(|&i| row[i].clone()).collect::<Vec<Cell>>());
        if let Some(limit) = select.limit {
            if rows.len() >= limit {
                break;
            }
        }
    }

    Ok(TableArtifact {
        columns: keep.iter().map(|&i| table.columns[i].clone()).collect(),
        dtypes: keep.iter().map(|&i| table.dtypes[i]).collect(),
        rows,
    })
}

fn cell_matches(cell: &Cell, op: CmpOp, literal: &Value) -> bool {
    use std::cmp::Ordering;

    let ord = match (cell, literal) {
        (Cell::Str(s), Value::String(l)) => Some(s.as_str().cmp(l.as_str())),
        (Cell::Bool(b), Value::Bool(l)) => Some(b.cmp(l)),
        (cell, Value::Number(n)) => cell
            .as_f64()
            .zip(n.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        _ => None,
    };

    match ord {
        Some(ord) => match op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        },
        None => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ledger sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_call(&self, call: LlmCall) -> Result<()> {
        self.calls.write().insert(call.id, call);
        Ok(())
    }

    async fn update_call(&self, id: Uuid, update: CallUpdate) -> Result<()> {
        let mut calls = self.calls.write();
        let call = calls
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("llm call {id}")))?;
        call.finalize(update);
        Ok(())
    }

    async fn calls_by_trace(&self, trace_id: Uuid) -> Result<Vec<LlmCall>> {
        let calls = self.calls.read();
        let mut rows: Vec<LlmCall> = calls
            .values()
            .filter(|c| c.context.trace_id == trace_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.started_at);
        Ok(rows)
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut calls = self.calls.write();
        let before = calls.len();
        calls.retain(|_, c| c.completed_at.map_or(true, |t| t >= cutoff));
        Ok((before - calls.len()) as u64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vector store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait::async_trait]
impl VectorStore for MemoryStore {
    async fn similarity_search(
        &self,
        user_id: &str,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let vectors = self.vectors.read();
        let entries = match vectors.get(&(user_id.to_string(), namespace.to_string())) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|e| SearchHit {
                id: e.id.clone(),
                score: cosine_similarity(vector, &e.vector),
                payload: e.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn upsert(
        &self,
        user_id: &str,
        namespace: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<()> {
        let mut vectors = self.vectors.write();
        let bucket = vectors
            .entry((user_id.to_string(), namespace.to_string()))
            .or_default();
        for entry in entries {
            bucket.retain(|e| e.id != entry.id);
            bucket.push(entry);
        }
        Ok(())
    }
}
