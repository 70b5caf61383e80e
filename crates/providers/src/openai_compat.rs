//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, Together, and any other endpoint that
//! follows the OpenAI chat completions contract. This is the runtime's only
//! HTTP adapter, so the SSE framing for streamed completions lives here
//! too ([`stream_chat_events`]) rather than in a shared layer.

use crate::traits::{
    ChatRequest, ChatResponse, Embedder, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
use crate::util::from_reqwest;
use dq_domain::chat::{ContentPart, Message, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};
use dq_domain::config::ProviderConfig;
use dq_domain::error::{Error, Result};
use dq_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for any OpenAI-compatible API endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized provider config.
    /// The API key environment variable is read eagerly here.
    pub fn from_config(cfg: &ProviderConfig, timeout_ms: u64) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set for provider '{}'",
                cfg.api_key_env, cfg.id
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".into()),
            client,
        })
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
            match &req.tool_choice {
                ToolChoice::Auto => {}
                ToolChoice::None => body["tool_choice"] = Value::String("none".into()),
                ToolChoice::Required(name) => {
                    body["tool_choice"] = serde_json::json!({
                        "type": "function",
                        "function": { "name": name },
                    });
                }
            }
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => {
            let text = msg.content.extract_all_text();
            serde_json::json!({
                "role": role_to_str(msg.role),
                "content": text,
            })
        }
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => {
            text_parts.push(t.clone());
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Parts(parts) => {
            for part in parts {
                if let ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = part
                {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            serde_json::json!({"role": "tool", "tool_call_id": "", "content": ""})
        }
        MessageContent::Text(t) => serde_json::json!({
            "role": "tool",
            "tool_call_id": "",
            "content": t,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider_id: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider_id.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider_id.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tool_calls = parse_openai_tool_calls(message);
    let usage = body.get("usage").and_then(parse_openai_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        finish_reason,
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Frame the response body as SSE and parse every `data:` payload into
/// stream events.
///
/// The body arrives in arbitrary chunk boundaries; complete `\n\n`-delimited
/// blocks are drained as they form and a partial tail stays buffered. The
/// `[DONE]` sentinel, a usage-bearing final chunk, or a dropped connection
/// all end the stream — and consumers always see exactly one `Done`, even
/// when the server closes without a sentinel.
fn stream_chat_events(response: reqwest::Response) -> BoxStream<'static, Result<StreamEvent>> {
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buf = String::new();
        let mut saw_done = false;

        loop {
            let bytes = match response.chunk().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(end) = buf.find("\n\n") {
                let block: String = buf.drain(..end + 2).collect();
                for payload in data_payloads(&block) {
                    if let Some(event) = parse_stream_chunk(payload) {
                        saw_done |= matches!(&event, Ok(StreamEvent::Done { .. }));
                        yield event;
                    }
                }
            }
        }

        // The server may close mid-block; whatever buffered is still a
        // parseable payload more often than not.
        if !saw_done {
            for payload in data_payloads(&buf) {
                if let Some(event) = parse_stream_chunk(payload) {
                    saw_done |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }
        if !saw_done {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    })
}

/// The `data:` payloads of one SSE block. `event:`/`id:`/`retry:` lines
/// and empty payloads are skipped.
fn data_payloads(block: &str) -> impl Iterator<Item = &str> {
    block.lines().filter_map(|line| {
        let payload = line.trim().strip_prefix("data:")?.trim();
        (!payload.is_empty()).then_some(payload)
    })
}

/// Parse one `data:` payload. `None` means the chunk carries nothing the
/// runtime cares about (keep-alives, empty deltas).
fn parse_stream_chunk(payload: &str) -> Option<Result<StreamEvent>> {
    if payload == "[DONE]" {
        return Some(Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        }));
    }

    let v: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    if choice.is_none() {
        if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
            return Some(Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            }));
        }
        return None;
    }

    let choice = choice?;
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    // Finish reason.
    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_openai_usage);
        return Some(Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(fr.to_string()),
        }));
    }

    // Tool call deltas.
    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let idx_str = tc
                .get("index")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                .to_string();

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                return Some(Ok(StreamEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                return Some(Ok(StreamEvent::ToolCallDelta {
                    call_id: idx_str,
                    delta: args.to_string(),
                }));
            }
        }
    }

    // Text content delta.
    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return Some(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if status.as_u16() == 429 {
            return Err(Error::CapacityExceeded(format!(
                "provider {} rate limited",
                self.id
            )));
        }
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::CapacityExceeded(format!(
                "provider {} rate limited",
                self.id
            )));
        }
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(stream_chat_events(resp))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

impl OpenAiCompatProvider {
    /// Generate embeddings through the `/embeddings` endpoint.
    pub async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let model = req
            .model
            .unwrap_or_else(|| "text-embedding-3-small".into());
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": req.input });

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if status.as_u16() == 429 {
            return Err(Error::CapacityExceeded(format!(
                "provider {} rate limited",
                self.id
            )));
        }
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let v: Value = serde_json::from_str(&resp_text)?;
        let embeddings = v
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "no data in embeddings response".into(),
            })?
            .iter()
            .map(|item| {
                item.get("embedding")
                    .and_then(|e| e.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|x| x.as_f64())
                            .map(|x| x as f32)
                            .collect::<Vec<f32>>()
                    })
                    .ok_or_else(|| Error::Provider {
                        provider: self.id.clone(),
                        message: "malformed embedding vector".into(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EmbeddingsResponse { embeddings })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedder wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// [`Embedder`] over a provider's embeddings endpoint with a fixed model
/// and dimension. A response of any other width is a provider error, not a
/// silent truncation.
pub struct ProviderEmbedder {
    provider: Arc<OpenAiCompatProvider>,
    model: String,
    dim: usize,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<OpenAiCompatProvider>, model: String, dim: usize) -> Self {
        Self {
            provider,
            model,
            dim,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .provider
            .embeddings(EmbeddingsRequest {
                input: texts.to_vec(),
                model: Some(self.model.clone()),
            })
            .await?;

        for v in &resp.embeddings {
            if v.len() != self.dim {
                return Err(Error::Provider {
                    provider: self.provider.provider_id().to_string(),
                    message: format!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.dim,
                        v.len()
                    ),
                });
            }
        }
        Ok(resp.embeddings)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chat_response_with_tool_calls() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "cluster_dataset",
                            "arguments": "{\"dataset_name\":\"reviews\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120 }
        });
        let resp = parse_chat_response("openai", &body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "cluster_dataset");
        assert_eq!(resp.tool_calls[0].arguments["dataset_name"], "reviews");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.as_ref().unwrap().total_tokens, 120);
    }

    #[test]
    fn parse_chat_response_no_choices_is_error() {
        let body = serde_json::json!({ "choices": [] });
        assert!(parse_chat_response("openai", &body).is_err());
    }

    #[test]
    fn done_sentinel_parses_as_terminal_done() {
        match parse_stream_chunk("[DONE]") {
            Some(Ok(StreamEvent::Done { usage: None, .. })) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn token_delta_chunk() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        match parse_stream_chunk(payload) {
            Some(Ok(StreamEvent::Token { text })) => assert_eq!(text, "Hel"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tool_call_chunks_map_to_started_then_delta() {
        let start = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"semantic_search"}}]}}]}"#;
        match parse_stream_chunk(start) {
            Some(Ok(StreamEvent::ToolCallStarted { call_id, tool_name })) => {
                assert_eq!(call_id, "call_9");
                assert_eq!(tool_name, "semantic_search");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let delta = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query"}}]}}]}"#;
        assert!(matches!(
            parse_stream_chunk(delta),
            Some(Ok(StreamEvent::ToolCallDelta { .. }))
        ));
    }

    #[test]
    fn usage_only_chunk_yields_done() {
        let payload = r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#;
        match parse_stream_chunk(payload) {
            Some(Ok(StreamEvent::Done { usage: Some(u), .. })) => assert_eq!(u.total_tokens, 7),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn data_payloads_skip_metadata_and_blank_lines() {
        let block = "event: message\nid: 42\nretry: 5000\ndata: {\"a\":1}\ndata:\n\n";
        let got: Vec<&str> = data_payloads(block).collect();
        assert_eq!(got, vec![r#"{"a":1}"#]);
    }

    #[test]
    fn data_payloads_trim_whitespace() {
        let got: Vec<&str> = data_payloads("data:   [DONE]  \n").collect();
        assert_eq!(got, vec!["[DONE]"]);
    }

    #[test]
    fn keep_alive_chunks_parse_to_nothing() {
        // An empty delta carries no event the runtime cares about.
        let payload = r#"{"choices":[{"delta":{}}]}"#;
        assert!(parse_stream_chunk(payload).is_none());
    }

    #[test]
    fn tool_choice_required_serializes() {
        let cfg = ProviderConfig {
            id: "t".into(),
            base_url: "http://localhost".into(),
            api_key_env: "DQ_TEST_KEY_OPENAI".into(),
            default_model: None,
        };
        std::env::set_var("DQ_TEST_KEY_OPENAI", "k");
        let provider = OpenAiCompatProvider::from_config(&cfg, 1000).unwrap();
        std::env::remove_var("DQ_TEST_KEY_OPENAI");

        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "build_visualization".into(),
                description: "chart".into(),
                parameters: serde_json::json!({"type":"object"}),
            }],
            tool_choice: ToolChoice::Required("build_visualization".into()),
            ..Default::default()
        };
        let body = provider.build_chat_body(&req, false);
        assert_eq!(body["tool_choice"]["function"]["name"], "build_visualization");
    }
}
