//! Ledger front-end: start/complete/fail over an injected row sink, plus
//! the scoped guard that guarantees every started call is settled.
//!
//! A sink failure is logged and swallowed — failing to log a call never
//! blocks the enclosing operation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use dq_domain::chat::{Message, ToolChoice, ToolDefinition};
use dq_domain::stream::Usage;
use dq_domain::Result;

use crate::call::{CallContext, CallStatus, CallType, CallUpdate, LlmCall, ResponseMessage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The row sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where ledger rows land. Rows are written outside the end-of-turn
/// transaction; they are the forensic record when that transaction fails.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_call(&self, call: LlmCall) -> Result<()>;
    /// Finalize a pending row. The sink computes nothing; the update
    /// carries the completed state.
    async fn update_call(&self, id: Uuid, update: CallUpdate) -> Result<()>;
    async fn calls_by_trace(&self, trace_id: Uuid) -> Result<Vec<LlmCall>>;
    /// Delete rows completed before the cutoff. Returns the count removed.
    async fn purge_completed_before(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CallLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters for starting a ledger row.
pub struct CallStart {
    pub call_type: CallType,
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub context: CallContext,
}

#[derive(Clone)]
pub struct CallLedger {
    store: Arc<dyn LedgerStore>,
}

impl CallLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a pending row and return its id.
    pub async fn start(&self, params: CallStart) -> Uuid {
        let call = LlmCall {
            id: Uuid::new_v4(),
            call_type: params.call_type,
            status: CallStatus::Pending,
            provider: params.provider,
            model: params.model,
            messages: params.messages,
            system_prompt: params.system_prompt,
            tools: params.tools,
            tool_choice: params.tool_choice,
            response_message: None,
            finish_reason: None,
            error_message: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            estimated_cost: None,
            latency_ms: None,
            started_at: Utc::now(),
            completed_at: None,
            context: params.context,
        };
        let id = call.id;
        if let Err(e) = self.store.insert_call(call).await {
            tracing::warn!(call_id = %id, error = %e, "ledger insert failed");
        }
        id
    }

    /// Mark a row successful.
    pub async fn complete(
        &self,
        call_id: Uuid,
        response_message: ResponseMessage,
        usage: Option<Usage>,
        estimated_cost: Option<f64>,
        finish_reason: Option<String>,
    ) {
        self.settle(
            call_id,
            CallUpdate {
                status: CallStatus::Success,
                response_message: Some(response_message),
                finish_reason,
                error_message: None,
                usage,
                estimated_cost,
                completed_at: Utc::now(),
            },
        )
        .await;
    }

    /// Mark a row failed.
    pub async fn fail(&self, call_id: Uuid, error_message: impl Into<String>) {
        self.settle(
            call_id,
            CallUpdate {
                status: CallStatus::Error,
                response_message: None,
                finish_reason: None,
                error_message: Some(error_message.into()),
                usage: None,
                estimated_cost: None,
                completed_at: Utc::now(),
            },
        )
        .await;
    }

    /// Mark a row cancelled.
    pub async fn cancel(&self, call_id: Uuid) {
        self.settle(
            call_id,
            CallUpdate {
                status: CallStatus::Cancelled,
                response_message: None,
                finish_reason: None,
                error_message: Some("cancelled".into()),
                usage: None,
                estimated_cost: None,
                completed_at: Utc::now(),
            },
        )
        .await;
    }

    async fn settle(&self, call_id: Uuid, update: CallUpdate) {
        if let Err(e) = self.store.update_call(call_id, update).await {
            tracing::warn!(call_id = %call_id, error = %e, "ledger update failed");
        }
    }

    /// Start a row and return a guard that settles it on every exit path:
    /// if the guard is dropped before `complete`/`fail`, the row is marked
    /// failed.
    pub async fn scope(&self, params: CallStart) -> CallScope {
        let call_id = self.start(params).await;
        CallScope {
            ledger: self.clone(),
            call_id,
            settled: false,
        }
    }

    pub async fn calls_by_trace(&self, trace_id: Uuid) -> Vec<LlmCall> {
        match self.store.calls_by_trace(trace_id).await {
            Ok(calls) => calls,
            Err(e) => {
                tracing::warn!(%trace_id, error = %e, "ledger trace query failed");
                Vec::new()
            }
        }
    }

    /// Retention: delete rows older than the configured window.
    pub async fn purge_older_than(&self, retention_days: u32) -> u64 {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        match self.store.purge_completed_before(cutoff).await {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(purged = n, retention_days, "ledger retention purge");
                }
                n
            }
            Err(e) => {
                tracing::warn!(error = %e, "ledger purge failed");
                0
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CallScope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Guard for one in-flight call. Consuming `complete`/`fail` settles the
/// row; dropping the guard unsettled marks it failed.
pub struct CallScope {
    ledger: CallLedger,
    call_id: Uuid,
    settled: bool,
}

impl CallScope {
    pub fn id(&self) -> Uuid {
        self.call_id
    }

    pub async fn complete(
        mut self,
        response_message: ResponseMessage,
        usage: Option<Usage>,
        estimated_cost: Option<f64>,
        finish_reason: Option<String>,
    ) {
        self.settled = true;
        self.ledger
            .complete(self.call_id, response_message, usage, estimated_cost, finish_reason)
            .await;
    }

    pub async fn fail(mut self, error_message: impl Into<String>) {
        self.settled = true;
        self.ledger.fail(self.call_id, error_message).await;
    }

    pub async fn cancel(mut self) {
        self.settled = true;
        self.ledger.cancel(self.call_id).await;
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(call_id = %self.call_id, "call scope dropped unsettled; marking failed");
        let ledger = self.ledger.clone();
        let call_id = self.call_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                ledger.fail(call_id, "dropped without completion").await;
            });
        }
    }
}
