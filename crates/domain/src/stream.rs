use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::chat::ToolCall;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming.
///
/// The variant set mirrors the OpenAI-compatible streaming contract the
/// adapter speaks: text deltas, the tool-call fragment triple, a terminal
/// `Done`, and transport errors. Fragments are combined by
/// [`ToolCallAssembler`]; consumers never stitch arguments themselves.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool call has started.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles the tool-call fragments of one streamed completion into
/// complete [`ToolCall`]s.
///
/// Providers differ in how much of the started/delta/finished triple they
/// emit: some send only started+delta and never a finished event. Feed
/// every event through [`observe`](Self::observe) and call
/// [`finish`](Self::finish) when the stream closes; calls are returned in
/// the order the model issued them.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    complete: Vec<ToolCall>,
    open: Vec<OpenCall>,
}

#[derive(Debug)]
struct OpenCall {
    call_id: String,
    tool_name: String,
    args: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream event. Non-tool events are ignored, so the whole
    /// stream can be piped through without filtering.
    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                self.open.push(OpenCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    args: String::new(),
                });
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some(open) = self.open.iter_mut().find(|o| o.call_id == *call_id) {
                    open.args.push_str(delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                // Finished carries the authoritative arguments; any
                // fragments buffered for the same call are superseded.
                self.open.retain(|o| o.call_id != *call_id);
                self.complete.push(ToolCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                });
            }
            _ => {}
        }
    }

    /// Close the stream: calls that never saw a finished event are
    /// completed from their buffered argument fragments. Returns the calls
    /// in arrival order plus the ids whose buffered arguments were not
    /// valid JSON (those default to an empty object; the caller decides
    /// how loudly to log them).
    pub fn finish(mut self) -> (Vec<ToolCall>, Vec<String>) {
        let mut malformed = Vec::new();
        for open in self.open.drain(..) {
            let arguments = if open.args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                match serde_json::from_str(&open.args) {
                    Ok(v) => v,
                    Err(_) => {
                        malformed.push(open.call_id.clone());
                        serde_json::Value::Object(Default::default())
                    }
                }
            };
            self.complete.push(ToolCall {
                call_id: open.call_id,
                tool_name: open.tool_name,
                arguments,
            });
        }
        (self.complete, malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_event_yields_the_call_directly() {
        let mut assembler = ToolCallAssembler::new();
        assembler.observe(&StreamEvent::ToolCallFinished {
            call_id: "c1".into(),
            tool_name: "semantic_search".into(),
            arguments: serde_json::json!({"query": "shipping"}),
        });
        let (calls, malformed) = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "semantic_search");
        assert_eq!(calls[0].arguments["query"], "shipping");
        assert!(malformed.is_empty());
    }

    #[test]
    fn deltas_accumulate_until_the_stream_closes() {
        let mut assembler = ToolCallAssembler::new();
        assembler.observe(&StreamEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "cluster_dataset".into(),
        });
        for delta in ["{\"dataset", "_name\":", "\"reviews\"}"] {
            assembler.observe(&StreamEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: delta.into(),
            });
        }
        let (calls, malformed) = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["dataset_name"], "reviews");
        assert!(malformed.is_empty());
    }

    #[test]
    fn interleaved_deltas_route_by_call_id() {
        let mut assembler = ToolCallAssembler::new();
        for id in ["a", "b"] {
            assembler.observe(&StreamEvent::ToolCallStarted {
                call_id: id.into(),
                tool_name: "build_visualization".into(),
            });
        }
        assembler.observe(&StreamEvent::ToolCallDelta {
            call_id: "b".into(),
            delta: "{\"title\":\"B\"}".into(),
        });
        assembler.observe(&StreamEvent::ToolCallDelta {
            call_id: "a".into(),
            delta: "{\"title\":\"A\"}".into(),
        });
        let (calls, _) = assembler.finish();
        // Arrival order, not delta order.
        assert_eq!(calls[0].call_id, "a");
        assert_eq!(calls[0].arguments["title"], "A");
        assert_eq!(calls[1].arguments["title"], "B");
    }

    #[test]
    fn malformed_leftover_args_default_to_empty_object() {
        let mut assembler = ToolCallAssembler::new();
        assembler.observe(&StreamEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "format_citations".into(),
        });
        assembler.observe(&StreamEvent::ToolCallDelta {
            call_id: "c1".into(),
            delta: "{\"sources\": [".into(),
        });
        let (calls, malformed) = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.as_object().unwrap().is_empty());
        assert_eq!(malformed, vec!["c1"]);
    }

    #[test]
    fn empty_args_are_not_reported_malformed() {
        let mut assembler = ToolCallAssembler::new();
        assembler.observe(&StreamEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "list_user_datasets".into(),
        });
        let (calls, malformed) = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.as_object().unwrap().is_empty());
        assert!(malformed.is_empty());
    }

    #[test]
    fn finished_supersedes_buffered_fragments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.observe(&StreamEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "semantic_search".into(),
        });
        assembler.observe(&StreamEvent::ToolCallDelta {
            call_id: "c1".into(),
            delta: "{\"que".into(),
        });
        assembler.observe(&StreamEvent::ToolCallFinished {
            call_id: "c1".into(),
            tool_name: "semantic_search".into(),
            arguments: serde_json::json!({"query": "full"}),
        });
        let (calls, malformed) = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["query"], "full");
        assert!(malformed.is_empty());
    }

    #[test]
    fn non_tool_events_are_ignored() {
        let mut assembler = ToolCallAssembler::new();
        assembler.observe(&StreamEvent::Token { text: "hi".into() });
        assembler.observe(&StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        });
        let (calls, malformed) = assembler.finish();
        assert!(calls.is_empty());
        assert!(malformed.is_empty());
    }
}
