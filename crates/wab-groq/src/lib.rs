//! Groq completion adapter (OpenAI-compatible chat completions).
//!
//! Implements the core `CompletionClient` port with function calling: the
//! model may request the `search` tool any number of times up to the step
//! cap, and every generated turn (tool calls, tool results, final answer) is
//! returned in order so the caller can persist them verbatim.
//!
//! Core history turns only carry text and image parts, so tool calls and
//! tool results round-trip through a small tagged JSON envelope inside a
//! text part. Only this crate interprets the envelope.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use wab_core::{
    completion::{CompletionCapabilities, CompletionClient, CompletionOutput, CompletionRequest},
    errors::Error,
    state::{ContentPart, ConversationTurn, Role},
    Result,
};
use wab_tavily::{TavilyClient, TavilySearchOptions};

const SEARCH_TOOL_DESCRIPTION: &str = "Web search for accurate, up-to-date information. \
Use it for current events, fact checking, or anything outside your training data. \
Prefer clear, concise queries; use the topic and domain filters for precision.";

/// Cap on tool-result bytes fed back to the model per call.
const TOOL_RESULT_MAX_CHARS: usize = 8_000;

#[derive(Clone, Debug)]
pub struct GroqConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl GroqConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct GroqClient {
    cfg: GroqConfig,
    http: reqwest::Client,
    search: Option<Arc<TavilyClient>>,
}

impl GroqClient {
    pub fn new(cfg: GroqConfig, search: Option<Arc<TavilyClient>>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::External(format!("groq http client build: {e}")))?;
        Ok(Self { cfg, http, search })
    }

    fn tool_definitions(&self) -> Vec<Value> {
        vec![json!({
            "type": "function",
            "function": {
                "name": "search",
                "description": SEARCH_TOOL_DESCRIPTION,
                "parameters": wab_tavily::search_tool_schema(),
            }
        })]
    }

    async fn execute_tool(&self, call: &WireToolCall) -> Result<String> {
        if call.function.name != "search" {
            return Err(Error::Provider(format!(
                "model requested unknown tool `{}`",
                call.function.name
            )));
        }
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| Error::Provider("search tool is not configured".to_string()))?;

        let args: SearchArguments = serde_json::from_str(&call.function.arguments)
            .map_err(|e| Error::Provider(format!("bad search arguments: {e}")))?;

        let response = search
            .search(&args.query, &args.options.unwrap_or_default())
            .await?;

        let encoded = serde_json::to_string(&SearchToolResult::from(response))?;
        if encoded.chars().count() > TOOL_RESULT_MAX_CHARS {
            return Ok(encoded.chars().take(TOOL_RESULT_MAX_CHARS).collect());
        }
        Ok(encoded)
    }

    async fn chat(&self, messages: &[Value], tools: Option<&[Value]>, max_retries: u32) -> Result<ChatResponse> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_chat(messages, tools).await {
                Ok(resp) => return Ok(resp),
                Err(CallError::Retryable(msg)) if attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %msg, "groq call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(CallError::Retryable(msg)) | Err(CallError::Fatal(msg)) => {
                    return Err(Error::Provider(msg));
                }
            }
        }
    }

    async fn try_chat(
        &self,
        messages: &[Value],
        tools: Option<&[Value]>,
    ) -> std::result::Result<ChatResponse, CallError> {
        let mut body = json!({
            "model": self.cfg.model,
            "messages": messages,
        });
        if let Some(tools) = tools {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Retryable(format!("groq request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!(
                "groq chat failed: {status} {}",
                body.chars().take(200).collect::<String>()
            );
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(CallError::Retryable(msg));
            }
            return Err(CallError::Fatal(msg));
        }

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| CallError::Fatal(format!("groq json error: {e}")))
    }
}

#[async_trait]
impl CompletionClient for GroqClient {
    fn capabilities(&self) -> CompletionCapabilities {
        CompletionCapabilities {
            supports_tools: true,
            supports_vision: true,
        }
    }

    async fn generate(&self, req: CompletionRequest) -> Result<CompletionOutput> {
        let mut wire = build_wire_messages(req.system.as_deref(), &req.messages);
        let tools = (req.enable_tools && self.search.is_some()).then(|| self.tool_definitions());

        let mut generated: Vec<ConversationTurn> = Vec::new();

        for step in 0..req.max_steps.max(1) {
            let response = self.chat(&wire, tools.as_deref(), req.max_retries).await?;
            let message = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| Error::Provider("groq returned no choices".to_string()))?
                .message;

            let calls = message.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                let text = message.content.unwrap_or_default();
                generated.push(ConversationTurn::text(Role::Assistant, text.clone()));
                return Ok(CompletionOutput {
                    text,
                    messages: generated,
                });
            }

            debug!(step, count = calls.len(), "model requested tool calls");
            wire.push(json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": &calls,
            }));
            generated.push(encode_tool_call_turn(&calls)?);

            for call in &calls {
                info!(tool = %call.function.name, "executing tool call");
                let result = self.execute_tool(call).await?;
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result,
                }));
                generated.push(encode_tool_result_turn(call, &result)?);
            }
        }

        Err(Error::Provider(format!(
            "model did not produce a final answer within {} steps",
            req.max_steps
        )))
    }
}

enum CallError {
    Retryable(String),
    Fatal(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: WireFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// JSON-encoded argument object, as the API ships it.
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    query: String,
    #[serde(default)]
    options: Option<TavilySearchOptions>,
}

/// Compact projection of a search response fed back to the model.
#[derive(Debug, Serialize)]
struct SearchToolResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    results: Vec<SearchToolResultItem>,
}

#[derive(Debug, Serialize)]
struct SearchToolResultItem {
    title: String,
    url: String,
    content: String,
    score: f64,
}

impl From<wab_tavily::TavilySearchResponse> for SearchToolResult {
    fn from(resp: wab_tavily::TavilySearchResponse) -> Self {
        Self {
            answer: resp.answer,
            results: resp
                .results
                .into_iter()
                .map(|r| SearchToolResultItem {
                    title: r.title,
                    url: r.url,
                    content: r.content,
                    score: r.score,
                })
                .collect(),
        }
    }
}

// ---- persisted tool-turn envelope ----

#[derive(Debug, Serialize, Deserialize)]
struct ToolCallEnvelope {
    tool_calls: Vec<PersistedCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolResultEnvelope {
    tool_result: PersistedResult,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedResult {
    id: String,
    name: String,
    content: String,
}

fn encode_tool_call_turn(calls: &[WireToolCall]) -> Result<ConversationTurn> {
    let envelope = ToolCallEnvelope {
        tool_calls: calls
            .iter()
            .map(|c| PersistedCall {
                id: c.id.clone(),
                name: c.function.name.clone(),
                arguments: c.function.arguments.clone(),
            })
            .collect(),
    };
    Ok(ConversationTurn::text(
        Role::Assistant,
        serde_json::to_string(&envelope)?,
    ))
}

fn encode_tool_result_turn(call: &WireToolCall, content: &str) -> Result<ConversationTurn> {
    let envelope = ToolResultEnvelope {
        tool_result: PersistedResult {
            id: call.id.clone(),
            name: call.function.name.clone(),
            content: content.to_string(),
        },
    };
    Ok(ConversationTurn::text(
        Role::Tool,
        serde_json::to_string(&envelope)?,
    ))
}

/// Map history turns to OpenAI-compatible wire messages.
fn build_wire_messages(system: Option<&str>, turns: &[ConversationTurn]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system {
        wire.push(json!({ "role": "system", "content": system }));
    }

    for turn in turns {
        wire.push(match turn.role {
            Role::User => user_message(turn),
            Role::Assistant => assistant_message(turn),
            Role::Tool => tool_message(turn),
        });
    }
    wire
}

fn user_message(turn: &ConversationTurn) -> Value {
    let has_image = turn
        .content
        .iter()
        .any(|p| matches!(p, ContentPart::Image { .. }));

    if !has_image {
        return json!({ "role": "user", "content": turn.joined_text() });
    }

    let parts: Vec<Value> = turn
        .content
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { data, mime } => {
                let mime = mime.as_deref().unwrap_or("image/jpeg");
                json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime};base64,{data}") }
                })
            }
        })
        .collect();
    json!({ "role": "user", "content": parts })
}

fn assistant_message(turn: &ConversationTurn) -> Value {
    let text = turn.joined_text();
    if let Ok(envelope) = serde_json::from_str::<ToolCallEnvelope>(&text) {
        let calls: Vec<Value> = envelope
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments }
                })
            })
            .collect();
        return json!({ "role": "assistant", "content": Value::Null, "tool_calls": calls });
    }
    json!({ "role": "assistant", "content": text })
}

fn tool_message(turn: &ConversationTurn) -> Value {
    let text = turn.joined_text();
    if let Ok(envelope) = serde_json::from_str::<ToolResultEnvelope>(&text) {
        return json!({
            "role": "tool",
            "tool_call_id": envelope.tool_result.id,
            "content": envelope.tool_result.content,
        });
    }
    // A tool turn that predates the envelope format; ship it as-is.
    json!({ "role": "tool", "tool_call_id": "unknown", "content": text })
}
