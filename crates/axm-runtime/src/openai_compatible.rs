//! OpenAI-Compatible Provider
//!
//! Speaks the chat-completions wire format used by OpenAI and by most
//! hosted and self-hosted model gateways.

use std::time::Duration;

use async_trait::async_trait;
use axm_core::error::{AgentError, Result};
use axm_core::message::{Message, Role};
use axm_core::provider::{GenerationOptions, LlmProvider, TextStream};
use axm_core::structured::strip_markdown_fence;
use axm_core::tool::{ToolCall, ToolSchema};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{Credentials, DEFAULT_OPENAI_BASE_URL, DEFAULT_TIMEOUT};
use crate::http;
use crate::sse;

const NAME: &str = "openai_compatible";

/// Provider for any `/chat/completions` endpoint
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Provider for api.openai.com with the default timeout
    pub fn openai(api_key: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_OPENAI_BASE_URL, Some(api_key.into()), DEFAULT_TIMEOUT)
    }

    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let base_url = credentials
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        Self::new(base_url, credentials.api_key.clone(), credentials.timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
        stream: bool,
    ) -> ChatRequest {
        let wants_json = options
            .response_format
            .as_ref()
            .is_some_and(|schema| schema.expects_object());

        ChatRequest {
            model: options.model.clone(),
            messages: messages.iter().map(convert_message).collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools: tools.iter().map(convert_tool).collect(),
            response_format: wants_json.then(|| json!({"type": "json_object"})),
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| http::request_error(NAME, &e))?;
        http::check_status(NAME, response).await
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Message> {
        let request = Self::build_request(messages, tools, options, false);
        tracing::debug!(model = %options.model, messages = messages.len(), tools = tools.len(), "Sending chat completion");

        let response = self.send(&request).await?;
        let body: ChatResponse = http::decode_json(NAME, response).await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ProviderResponse(format!("{NAME}: response has no choices")))?;

        let mut content = choice.message.content.unwrap_or_default();
        if options.response_format.is_some() {
            content = strip_markdown_fence(&content).to_string();
        }

        let calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(if calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_tool_calls(content, calls)
        })
    }

    async fn stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<TextStream> {
        let request = Self::build_request(messages, &[], options, true);
        let response = self.send(&request).await?;

        let fragments = sse::events(response.bytes_stream())
            .take_while(|event| {
                let more = !matches!(event, Ok(e) if e.data.trim() == "[DONE]");
                futures::future::ready(more)
            })
            .filter_map(|event| {
                futures::future::ready(match event {
                    Ok(event) => stream_delta(&event.data).map(Ok),
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(fragments))
    }
}

/// Text carried by one streamed chunk, if any
fn stream_delta(data: &str) -> Option<String> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable stream chunk");
            return None;
        }
    };
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty())
}

fn convert_message(message: &Message) -> ChatMessage {
    let tool_calls = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: "function".into(),
                function: WireFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    });

    let content = if message.content.is_empty() && tool_calls.is_some() {
        None
    } else {
        Some(message.content.clone())
    };

    ChatMessage {
        role: match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        },
        content,
        name: message.name.clone(),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn convert_tool(tool: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters_json_schema(),
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
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
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
