//! End-of-turn persistence: the single transaction that appends the
//! assistant message, its step log, and the refreshed session snapshot.
//!
//! Ledger rows are written outside this transaction (by the engine, as
//! calls happen); when the commit fails they remain as the forensic
//! record and the client receives a terminal error.

use serde_json::Value;
use uuid::Uuid;

use dq_domain::entity::ChatMessage;
use dq_domain::error::Result;
use dq_engine::workflow::WorkflowOutcome;
use dq_storage::{CommittedTurn, RelationalStore, StepDraft, TurnWrite};

/// Commit one finished turn.
pub async fn commit_turn(
    store: &dyn RelationalStore,
    session_id: Uuid,
    assistant_message: ChatMessage,
    steps: Vec<StepDraft>,
    snapshot: Value,
) -> Result<CommittedTurn> {
    store
        .commit_turn(TurnWrite {
            session_id,
            // The user message was appended pre-dispatch.
            user_message: None,
            assistant_message,
            steps,
            snapshot,
        })
        .await
}

/// The brief, non-leaky note recorded as the assistant message when a
/// turn does not complete.
pub fn failure_note(outcome: &WorkflowOutcome) -> String {
    match outcome {
        WorkflowOutcome::Completed => String::new(),
        WorkflowOutcome::Cancelled => "This request was cancelled before it finished.".into(),
        WorkflowOutcome::TimedOut => {
            "This request ran out of time before it finished. Try a narrower question.".into()
        }
        WorkflowOutcome::Failed(_) => {
            "Something went wrong while processing this request. Please try again.".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notes_never_leak_internals() {
        let note = failure_note(&WorkflowOutcome::Failed(
            "provider openai: HTTP 500 - secret stack trace".into(),
        ));
        assert!(!note.contains("500"));
        assert!(!note.contains("stack trace"));
        assert!(!note.is_empty());

        assert!(failure_note(&WorkflowOutcome::Cancelled).contains("cancelled"));
    }
}
