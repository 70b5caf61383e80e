//! Dispatcher-level end-to-end flows against scripted providers and the
//! in-memory store: tier routing, wire-stream shape, persistence,
//! session busy rejection, and cancellation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use dq_domain::chat::ToolCall;
use dq_domain::entity::MessageRole;
use dq_domain::stream::{BoxStream, StreamEvent, Usage};
use dq_domain::wire::{Complexity, WireEvent};
use dq_gateway::bootstrap::build_state_with;
use dq_gateway::runtime::{run_turn, ChatRequest, TurnInput};
use dq_gateway::state::AppState;
use dq_providers::{ChatRequest as LlmRequest, ChatResponse, LlmProvider, ProviderRegistry};
use dq_storage::{MemoryStore, RelationalStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One provider playing every model role: `chat` answers with the
/// classifier verdict, `chat_stream` replays scripted turns.
struct ScriptedLlm {
    classifier_json: String,
    turns: Mutex<VecDeque<(String, Vec<ToolCall>)>>,
    /// Delay before each token, to give tests a cancellation window.
    token_delay: Duration,
}

impl ScriptedLlm {
    fn new(classifier_json: &str, turns: Vec<(&str, Vec<ToolCall>)>) -> Arc<Self> {
        Arc::new(Self {
            classifier_json: classifier_json.into(),
            turns: Mutex::new(
                turns
                    .into_iter()
                    .map(|(t, c)| (t.to_string(), c))
                    .collect(),
            ),
            token_delay: Duration::ZERO,
        })
    }

    fn slow(classifier_json: &str, turns: Vec<(&str, Vec<ToolCall>)>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            classifier_json: classifier_json.into(),
            turns: Mutex::new(
                turns
                    .into_iter()
                    .map(|(t, c)| (t.to_string(), c))
                    .collect(),
            ),
            token_delay: delay,
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, _req: &LlmRequest) -> dq_domain::Result<ChatResponse> {
        Ok(ChatResponse {
            content: self.classifier_json.clone(),
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 6,
                total_tokens: 18,
            }),
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        _req: &LlmRequest,
    ) -> dq_domain::Result<BoxStream<'static, dq_domain::Result<StreamEvent>>> {
        let (text, tool_calls) = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| ("Nothing more to say.".into(), Vec::new()));
        let delay = self.token_delay;

        let stream = async_stream::stream! {
            for word in text.split_inclusive(' ') {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamEvent::Token { text: word.to_string() });
            }
            for tc in tool_calls {
                yield Ok(StreamEvent::ToolCallFinished {
                    call_id: tc.call_id,
                    tool_name: tc.tool_name,
                    arguments: tc.arguments,
                });
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

struct FlatEmbedder;

#[async_trait::async_trait]
impl dq_providers::Embedder for FlatEmbedder {
    async fn embed(&self, texts: &[String]) -> dq_domain::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
    fn dim(&self) -> usize {
        2
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn app_state(provider: Arc<dyn LlmProvider>) -> (AppState, Arc<MemoryStore>) {
    let mut config = dq_domain::config::Config::default();
    config.llm.tiers.classifier = "scripted/fast".into();
    config.llm.tiers.simple = "scripted/fast".into();
    config.llm.tiers.medium = "scripted/fast".into();
    config.llm.tiers.complex = "scripted/big".into();

    let store = Arc::new(MemoryStore::new());
    let mut registry = ProviderRegistry::new();
    registry.insert_provider("scripted", provider);
    registry.set_embedder(Arc::new(FlatEmbedder));

    let state = build_state_with(Arc::new(config), store.clone(), registry);
    (state, store)
}

fn request(message: &str, session_id: Option<Uuid>) -> ChatRequest {
    ChatRequest {
        message: message.into(),
        session_id,
        company_id: None,
        dataset_id: None,
        dataset_table_name: None,
        context: None,
        conversation_history: None,
    }
}

async fn collect(state: AppState, input: TurnInput) -> Vec<WireEvent> {
    let mut rx = run_turn(state, input);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Assert the §6.1 stream rules: exactly one leading `connected`, exactly
/// one terminal, every step start paired with one completion before it.
fn assert_stream_shape(events: &[WireEvent]) {
    assert!(
        matches!(events.first(), Some(WireEvent::Connected {})),
        "stream must start with connected"
    );
    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1, "exactly one terminal event");
    assert!(events.last().unwrap().is_terminal(), "terminal must be last");

    let starts: Vec<Uuid> = events
        .iter()
        .filter_map(|e| match e {
            WireEvent::AgentStepStart { step_id, .. } => Some(*step_id),
            _ => None,
        })
        .collect();
    for id in &starts {
        let completes = events
            .iter()
            .filter(|e| {
                matches!(e, WireEvent::AgentStepComplete { step_id, .. } if step_id == id)
            })
            .count();
        assert_eq!(completes, 1, "step {id} must complete exactly once");
    }
}

fn routed_complexity(events: &[WireEvent]) -> Complexity {
    events
        .iter()
        .find_map(|e| match e {
            WireEvent::WorkflowRouted { complexity, .. } => Some(*complexity),
            _ => None,
        })
        .expect("workflow_routed present")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: simple greeting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_greeting_end_to_end() {
    let provider = ScriptedLlm::new(
        r#"{"complexity": "simple", "reasoning": "greeting"}"#,
        vec![("Hi there! How can I help?", vec![])],
    );
    let (state, store) = app_state(provider);

    let events = collect(
        state,
        TurnInput {
            user_id: "u1".into(),
            request: request("Hello, how are you?", None),
        },
    )
    .await;

    assert_stream_shape(&events);
    assert_eq!(routed_complexity(&events), Complexity::Simple);

    // No agent steps on the bypass tier; at least one content delta.
    assert!(!events
        .iter()
        .any(|e| matches!(e, WireEvent::AgentStepStart { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WireEvent::Content { .. })));

    let (message_id, session_id) = match events.last().unwrap() {
        WireEvent::Complete {
            message_id,
            session_id,
            ..
        } => (*message_id, *session_id),
        other => panic!("expected complete, got {other:?}"),
    };

    // Persisted: one user + one assistant message, causally chained.
    let messages = store.recent_messages(session_id, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].id, message_id);
    assert_eq!(messages[1].parent_message_id, Some(messages[0].id));
    assert!(messages[1].content.contains("Hi there"));

    // No steps, empty analytical snapshot.
    assert!(store.steps_for_message(message_id).await.unwrap().is_empty());
    let session = store.get_session(session_id).await.unwrap().unwrap();
    let snapshot = session.snapshot.unwrap();
    assert!(snapshot["dataset_data"].as_object().unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: complex turn persists steps and snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        call_id: Uuid::new_v4().to_string(),
        tool_name: name.into(),
        arguments: args,
    }
}

#[tokio::test]
async fn complex_turn_persists_step_log_and_context() {
    let provider = ScriptedLlm::new(
        r#"{"complexity": "complex", "reasoning": "needs dataset access"}"#,
        vec![
            (
                "",
                vec![call(
                    "delegate_to_data_discovery",
                    json!({"task": "load reviews"}),
                )],
            ),
            (
                "",
                vec![call(
                    "get_dataset_data_from_sql",
                    json!({"query": "SELECT * FROM __user_u1_reviews"}),
                )],
            ),
            ("Loaded 2 reviews.", vec![]),
            ("You have two reviews; both mention shipping.", vec![]),
        ],
    );
    let (state, store) = app_state(provider);
    store.register_user_table(
        "u1",
        "reviews",
        dq_context::TableArtifact::new(
            vec!["id".into(), "text".into()],
            vec![
                vec![dq_context::Cell::Int(1), dq_context::Cell::Str("shipping slow".into())],
                vec![dq_context::Cell::Int(2), dq_context::Cell::Str("shipping fast".into())],
            ],
        ),
    );

    let events = collect(
        state,
        TurnInput {
            user_id: "u1".into(),
            request: request("What do my reviews say?", None),
        },
    )
    .await;

    assert_stream_shape(&events);
    assert_eq!(routed_complexity(&events), Complexity::Complex);

    // The final content arrives only after every step completed.
    let last_step_complete = events
        .iter()
        .rposition(|e| matches!(e, WireEvent::AgentStepComplete { .. }))
        .unwrap();
    let first_content = events
        .iter()
        .position(|e| matches!(e, WireEvent::Content { .. }))
        .unwrap();
    assert!(first_content > last_step_complete);

    let message_id = match events.last().unwrap() {
        WireEvent::Complete { message_id, .. } => *message_id,
        other => panic!("expected complete, got {other:?}"),
    };

    // Dense, well-formed persisted step log with both agents present.
    let steps = store.steps_for_message(message_id).await.unwrap();
    assert!(steps.len() >= 3);
    for (i, step) in steps.iter().enumerate() {
        assert_eq!(step.step_order, i as u32);
        assert!(step.is_well_formed());
    }
    assert!(steps.iter().any(|s| s.agent_name == "data_discovery"));
    assert!(steps
        .iter()
        .any(|s| s.tool_call.as_ref().is_some_and(|c| c.tool_name == "get_dataset_data_from_sql")));

    // The snapshot carries the loaded dataset for the next turn.
    let session_id = events
        .iter()
        .find_map(|e| match e {
            WireEvent::WorkflowRouted { session_id, .. } => Some(*session_id),
            _ => None,
        })
        .unwrap();
    let session = store.get_session(session_id).await.unwrap().unwrap();
    let snapshot = session.snapshot.unwrap();
    assert_eq!(snapshot["dataset_data"]["reviews"]["kind"], "table");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: follow-up turn chains onto the previous assistant message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn follow_up_chains_parent_and_restores_context() {
    let provider = ScriptedLlm::new(
        r#"{"complexity": "simple", "reasoning": "greeting"}"#,
        vec![
            ("First answer.", vec![]),
            ("Second answer.", vec![]),
        ],
    );
    let (state, store) = app_state(provider);

    let events = collect(
        state.clone(),
        TurnInput {
            user_id: "u1".into(),
            request: request("hello", None),
        },
    )
    .await;
    let (first_assistant, session_id) = match events.last().unwrap() {
        WireEvent::Complete {
            message_id,
            session_id,
            ..
        } => (*message_id, *session_id),
        other => panic!("expected complete, got {other:?}"),
    };

    let events = collect(
        state,
        TurnInput {
            user_id: "u1".into(),
            request: request("and again?", Some(session_id)),
        },
    )
    .await;
    assert_stream_shape(&events);

    let messages = store.recent_messages(session_id, 10).await.unwrap();
    assert_eq!(messages.len(), 4);
    // The follow-up user message points at the previous assistant message.
    assert_eq!(messages[2].role, MessageRole::User);
    assert_eq!(messages[2].parent_message_id, Some(first_assistant));
    assert_eq!(messages[3].parent_message_id, Some(messages[2].id));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: second concurrent turn is rejected with SessionBusy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_turn_on_same_session_is_busy() {
    let provider = ScriptedLlm::new(
        r#"{"complexity": "simple", "reasoning": "greeting"}"#,
        vec![("unused", vec![])],
    );
    let (state, store) = app_state(provider);
    let session = store.create_session("u1").await.unwrap();

    // Hold the session lock as a running turn would.
    let _held = state.session_locks.acquire(session.id).unwrap();

    let events = collect(
        state.clone(),
        TurnInput {
            user_id: "u1".into(),
            request: request("while busy", Some(session.id)),
        },
    )
    .await;

    assert!(matches!(events.first(), Some(WireEvent::Connected {})));
    match events.last().unwrap() {
        WireEvent::Error { error } => assert!(error.contains("busy")),
        other => panic!("expected error, got {other:?}"),
    }
    // The busy turn wrote nothing.
    assert!(store.recent_messages(session.id, 10).await.unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: cancellation mid-stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancellation_persists_partial_turn_with_note() {
    let provider = ScriptedLlm::slow(
        r#"{"complexity": "simple", "reasoning": "greeting"}"#,
        vec![(
            "a long answer with many words that keeps streaming for a while",
            vec![],
        )],
        Duration::from_millis(15),
    );
    let (state, store) = app_state(provider);
    let session = store.create_session("u1").await.unwrap();

    // Cancel shortly after the turn starts.
    {
        let cancel_map = state.cancel_map.clone();
        let session_id = session.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            cancel_map.cancel(session_id);
        });
    }

    let events = collect(
        state,
        TurnInput {
            user_id: "u1".into(),
            request: request("tell me everything", Some(session.id)),
        },
    )
    .await;

    assert_stream_shape(&events);
    match events.last().unwrap() {
        WireEvent::Error { error } => assert!(error.contains("cancel")),
        other => panic!("expected error terminal, got {other:?}"),
    }

    // The assistant message exists and records the cancellation.
    let messages = store.recent_messages(session.id, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert!(messages[1].content.contains("cancelled"));
    assert_eq!(
        messages[1].metadata.get("outcome").and_then(|v| v.as_str()),
        Some("cancelled")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: cross-user SQL is refused, turn still completes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cross_user_sql_is_unauthorized_but_turn_completes() {
    let provider = ScriptedLlm::new(
        r#"{"complexity": "complex", "reasoning": "dataset access"}"#,
        vec![
            (
                "",
                vec![call(
                    "delegate_to_data_discovery",
                    json!({"task": "read the other table"}),
                )],
            ),
            (
                "",
                vec![call(
                    "get_dataset_data_from_sql",
                    json!({"query": "SELECT * FROM __user_other_table_x"}),
                )],
            ),
            ("That table is not accessible.", vec![]),
            ("I could not read that table; it does not belong to you.", vec![]),
        ],
    );
    let (state, store) = app_state(provider);
    store.register_user_table(
        "other",
        "table_x",
        dq_context::TableArtifact::new(
            vec!["secret".into()],
            vec![vec![dq_context::Cell::Str("hidden".into())]],
        ),
    );

    let events = collect(
        state,
        TurnInput {
            user_id: "u1".into(),
            request: request("read __user_other_table_x", None),
        },
    )
    .await;

    assert_stream_shape(&events);
    // Terminal is complete — the unauthorized tool result did not kill the turn.
    assert!(matches!(events.last().unwrap(), WireEvent::Complete { .. }));

    // The tool result event carries the unauthorized error.
    let unauthorized = events.iter().any(|e| match e {
        WireEvent::ToolResult {
            is_error, raw_output, ..
        } => *is_error && raw_output.as_ref().is_some_and(|r| r["kind"] == "unauthorized"),
        _ => false,
    });
    assert!(unauthorized, "expected an unauthorized tool_result event");

    // No foreign rows in the snapshot.
    let session_id = events
        .iter()
        .find_map(|e| match e {
            WireEvent::WorkflowRouted { session_id, .. } => Some(*session_id),
            _ => None,
        })
        .unwrap();
    let snapshot = store
        .get_session(session_id)
        .await
        .unwrap()
        .unwrap()
        .snapshot
        .unwrap();
    assert!(snapshot["dataset_data"].as_object().unwrap().is_empty());
}
