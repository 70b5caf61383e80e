//! Query classifier — maps (question, recent history) onto a workflow tier
//! with a fast model.
//!
//! The classifier call is hidden from the user but logged exactly like a
//! chat call, distinguished only by `call_type = classification`. Any
//! failure degrades to the `complex` tier, the only one that can answer
//! everything.

use std::sync::Arc;

use dq_context::HistoryEntry;
use dq_domain::chat::Message;
use dq_domain::wire::Complexity;
use dq_ledger::{CallContext, CallLedger, CallStart, CallType, ResponseMessage};
use dq_providers::{ChatRequest, LlmProvider};

const CLASSIFIER_PROMPT: &str = "\
You route user questions for an analytical chat product into one of three \
workflow tiers. Respond with JSON only: {\"complexity\": \"simple\" | \
\"medium\" | \"complex\", \"reasoning\": \"<one short sentence>\"}.

- simple: greetings, small talk, or general knowledge that needs neither \
the user's data nor anything from the prior conversation.
- medium: follow-ups already answerable from the recent conversation \
(references to \"that\", \"the previous result\", \"tell me more\") with no \
new data retrieval.
- complex: anything needing dataset access, clustering, gap or trend \
analysis, multi-step tool use, or citation-backed synthesis.";

/// The classifier's verdict.
#[derive(Debug, Clone)]
pub struct Classification {
    pub complexity: Complexity,
    pub reasoning: String,
}

impl Classification {
    fn fallback(reason: &str) -> Self {
        Self {
            complexity: Complexity::Complex,
            reasoning: format!("classifier unavailable ({reason}); defaulting to complex"),
        }
    }
}

/// Classify one question against the recent history. The caller resolves
/// the classifier model to a provider handle.
pub async fn classify(
    provider: Arc<dyn LlmProvider>,
    model: String,
    ledger: &CallLedger,
    question: &str,
    history: &[HistoryEntry],
    call_context: CallContext,
) -> Classification {
    let mut user_prompt = String::new();
    if !history.is_empty() {
        user_prompt.push_str("Recent conversation:\n");
        for entry in history {
            user_prompt.push_str(&format!("{}: {}\n", entry.role, entry.content));
        }
        user_prompt.push('\n');
    }
    user_prompt.push_str(&format!("Question: {question}"));

    let messages = vec![Message::system(CLASSIFIER_PROMPT), Message::user(&user_prompt)];
    let req = ChatRequest {
        messages: messages.clone(),
        temperature: Some(0.0),
        json_mode: true,
        model: Some(model.clone()),
        ..Default::default()
    };

    let scope = ledger
        .scope(CallStart {
            call_type: CallType::Classification,
            provider: provider.provider_id().to_string(),
            model,
            messages,
            system_prompt: Some(CLASSIFIER_PROMPT.to_string()),
            tools: None,
            tool_choice: None,
            context: call_context.tagged("hidden").tagged("classifier"),
        })
        .await;

    let response = match provider.chat(&req).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "classifier call failed");
            scope.fail(e.to_string()).await;
            return Classification::fallback("provider error");
        }
    };

    scope
        .complete(
            ResponseMessage {
                role: "assistant".into(),
                content: Some(response.content.clone()),
                tool_calls: None,
            },
            response.usage.clone(),
            None,
            response.finish_reason.clone(),
        )
        .await;

    match parse_classification(&response.content) {
        Some(c) => c,
        None => {
            tracing::warn!(raw = %response.content, "unparseable classifier response");
            Classification::fallback("unparseable response")
        }
    }
}

fn parse_classification(raw: &str) -> Option<Classification> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    let complexity = match value.get("complexity")?.as_str()? {
        "simple" => Complexity::Simple,
        "medium" => Complexity::Medium,
        "complex" => Complexity::Complex,
        _ => return None,
    };
    Some(Classification {
        complexity,
        reasoning: value
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string(),
    })
}
