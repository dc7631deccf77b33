//! Anthropic Messages API Provider
//!
//! The system prompt travels outside the message list, tool calls are
//! `tool_use` content blocks and tool results go back as `tool_result`
//! blocks inside a user turn.

use std::time::Duration;

use async_trait::async_trait;
use axm_core::error::{AgentError, Result};
use axm_core::message::{Message, Role};
use axm_core::provider::{GenerationOptions, LlmProvider, TextStream};
use axm_core::structured::strip_markdown_fence;
use axm_core::tool::{ToolCall, ToolSchema};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::{Credentials, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_TIMEOUT};
use crate::http;
use crate::sse;

const NAME: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Provider for the Anthropic Messages API
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Provider for api.anthropic.com with the default timeout
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_ANTHROPIC_BASE_URL, api_key, DEFAULT_TIMEOUT)
    }

    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let api_key = credentials
            .api_key
            .clone()
            .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;
        let base_url = credentials
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string());
        Self::new(base_url, api_key, credentials.timeout)
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
        stream: bool,
    ) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature,
            "messages": convert_messages(messages),
        });
        let Some(obj) = body.as_object_mut() else {
            return body;
        };
        if !system.is_empty() {
            obj.insert("system".into(), Value::String(system.join("\n\n")));
        }
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters_json_schema(),
                    })
                })
                .collect();
            obj.insert("tools".into(), Value::Array(tools));
        }
        if stream {
            obj.insert("stream".into(), Value::Bool(true));
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| http::request_error(NAME, &e))?;
        http::check_status(NAME, response).await
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Message> {
        let body = Self::build_request(messages, tools, options, false);
        tracing::debug!(model = %options.model, messages = messages.len(), tools = tools.len(), "Sending messages request");

        let response = self.send(&body).await?;
        let reply: MessagesResponse = http::decode_json(NAME, response).await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        for block in reply.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => {
                    calls.push(ToolCall::new(id, name, input.to_string()));
                }
                ContentBlock::Other => {}
            }
        }
        if options.response_format.is_some() {
            text = strip_markdown_fence(&text).to_string();
        }

        Ok(if calls.is_empty() {
            Message::assistant(text)
        } else {
            Message::assistant_tool_calls(text, calls)
        })
    }

    async fn stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<TextStream> {
        let body = Self::build_request(messages, &[], options, true);
        let response = self.send(&body).await?;

        let fragments = sse::events(response.bytes_stream())
            .take_while(|event| {
                let more = !matches!(event, Ok(e) if e.event.as_deref() == Some("message_stop"));
                futures::future::ready(more)
            })
            .filter_map(|event| {
                futures::future::ready(match event {
                    Ok(event) => match event.event.as_deref() {
                        Some("content_block_delta") => text_delta(&event.data).map(Ok),
                        Some("error") => Some(Err(AgentError::ProviderResponse(format!(
                            "{NAME}: stream error: {}",
                            event.data
                        )))),
                        _ => None,
                    },
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(fragments))
    }
}

fn text_delta(data: &str) -> Option<String> {
    let event: DeltaEvent = serde_json::from_str(data).ok()?;
    match event.delta {
        Delta::TextDelta { text } if !text.is_empty() => Some(text),
        _ => None,
    }
}

/// Convert the conversation, merging consecutive tool results into one user turn
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for message in messages {
        match message.role {
            Role::System => {}
            Role::Tool => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                });
                if message.content.starts_with("Error: ") {
                    block["is_error"] = Value::Bool(true);
                }
                pending_results.push(block);
            }
            Role::User => {
                flush(&mut out, &mut pending_results);
                out.push(json!({"role": "user", "content": message.content}));
            }
            Role::Assistant => {
                flush(&mut out, &mut pending_results);
                if message.has_tool_calls() {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for call in message.calls() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": tool_input(&call.arguments),
                        }));
                    }
                    out.push(json!({"role": "assistant", "content": blocks}));
                } else {
                    out.push(json!({"role": "assistant", "content": message.content}));
                }
            }
        }
    }
    flush(&mut out, &mut pending_results);
    out
}

/// `tool_use.input` must be an object; unparseable argument text becomes `{}`
fn tool_input(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaEvent {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}
