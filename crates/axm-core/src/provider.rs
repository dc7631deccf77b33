//! LLM Provider Strategy Pattern
//!
//! Defines the interface every model backend implements. The agent loop,
//! planner and collaboration protocol only ever talk to this trait.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use axm_core::provider::{GenerationOptions, LlmProvider};
//!
//! let reply = provider.generate(&messages, &tools, &options).await?;
//! ```

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::message::Message;
use crate::structured::OutputSchema;
use crate::tool::ToolSchema;

/// Configuration for a single generation request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4", "claude-3-5-sonnet", "deepseek-v3")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate (provider default when unset)
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Requested reply shape, if any
    #[serde(default)]
    pub response_format: Option<OutputSchema>,
}

pub(crate) fn default_temperature() -> f32 {
    0.7
}

impl GenerationOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4".into(),
            temperature: default_temperature(),
            max_tokens: None,
            response_format: None,
        }
    }
}

/// Lazy, finite sequence of text fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// Implementations report connectivity failures, timeouts and non-2xx
/// statuses as distinct error kinds and never retry on their own.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Generate one assistant message. Tool calls, if any, carry their id,
    /// name and raw argument text.
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Message>;

    /// Stream the reply text. Not used by the tool-calling loop.
    async fn stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<TextStream>;
}

/// Blocking variant of [`LlmProvider::generate`].
///
/// Must not be called from within an async runtime.
pub fn generate_blocking(
    provider: &dyn LlmProvider,
    messages: &[Message],
    tools: &[ToolSchema],
    options: &GenerationOptions,
) -> Result<Message> {
    crate::blocking::block_on(provider.generate(messages, tools, options))
}

/// Blocking variant of [`LlmProvider::stream`]; collects every fragment in order.
pub fn stream_blocking(
    provider: &dyn LlmProvider,
    messages: &[Message],
    options: &GenerationOptions,
) -> Result<Vec<String>> {
    crate::blocking::block_on(async {
        let mut stream = provider.stream(messages, options).await?;
        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment?);
        }
        Ok(fragments)
    })
}

/// Closed set of provider backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// api.openai.com
    OpenAi,
    /// api.anthropic.com
    Anthropic,
    /// Any endpoint speaking the OpenAI chat-completions format
    OpenAiCompatible,
}

impl ProviderKind {
    /// Pick a backend from a model identifier.
    ///
    /// `OpenAiCompatible` is the fallback for anything unrecognised.
    pub fn for_model(model: &str) -> Self {
        let model = model.trim().to_ascii_lowercase();
        if model.starts_with("claude") {
            ProviderKind::Anthropic
        } else if ["gpt", "o1", "o3", "o4", "chatgpt"]
            .iter()
            .any(|prefix| model.starts_with(prefix))
        {
            ProviderKind::OpenAi
        } else {
            ProviderKind::OpenAiCompatible
        }
    }

    /// Like [`ProviderKind::for_model`], but an explicit base URL routes
    /// OpenAI models to the compatible backend.
    pub fn resolve(model: &str, custom_base_url: bool) -> Self {
        match Self::for_model(model) {
            ProviderKind::OpenAi if custom_base_url => ProviderKind::OpenAiCompatible,
            kind => kind,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenAiCompatible => write!(f, "openai_compatible"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.temperature, 0.7);
        assert_eq!(opts.max_tokens, None);
        assert!(opts.response_format.is_none());
    }

    #[test]
    fn test_provider_kind_selection() {
        assert_eq!(ProviderKind::for_model("gpt-4"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::for_model("claude-3-5-sonnet-20241022"), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::for_model("custom-model-123"), ProviderKind::OpenAiCompatible);
        assert_eq!(ProviderKind::resolve("gpt-4o", true), ProviderKind::OpenAiCompatible);
        assert_eq!(ProviderKind::resolve("claude-3-opus", true), ProviderKind::Anthropic);
    }

    #[test]
    fn test_blocking_entry_points() {
        let provider = ScriptedProvider::new(vec![
            Message::assistant("hello world"),
            Message::assistant("hello world"),
        ]);
        let options = GenerationOptions::default();

        let reply = generate_blocking(&provider, &[Message::user("hi")], &[], &options).unwrap();
        assert_eq!(reply.content, "hello world");

        let fragments = stream_blocking(&provider, &[Message::user("hi")], &options).unwrap();
        assert_eq!(fragments.concat(), "hello world");
    }
}
