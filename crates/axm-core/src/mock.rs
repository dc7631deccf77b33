//! Scripted Provider
//!
//! For testing and demo purposes. Replays pre-configured replies and records
//! every request it receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{GenerationOptions, LlmProvider, TextStream};
use crate::tool::ToolSchema;

/// One request as seen by the provider
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub options: GenerationOptions,
}

/// Provider that returns queued replies in order
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Message>>>,
    fallback: Option<Message>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// Create a provider with a sequence of replies
    pub fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    /// A provider that answers every request with the same reply
    pub fn repeating(reply: Message) -> Self {
        Self {
            fallback: Some(reply),
            ..Default::default()
        }
    }

    /// Reply used once the queue is exhausted
    pub fn with_fallback(mut self, reply: Message) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Queue an error instead of a reply
    pub fn push_error(&self, error: AgentError) {
        self.lock_replies().push_back(Err(error));
    }

    /// Queue another reply
    pub fn push_reply(&self, reply: Message) {
        self.lock_replies().push_back(Ok(reply));
    }

    /// Everything the provider has been asked so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Message>>> {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_reply(&self) -> Result<Message> {
        match self.lock_replies().pop_front() {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::Other("scripted provider has no replies left".into())),
        }
    }

    fn record(&self, messages: &[Message], tools: &[ToolSchema], options: &GenerationOptions) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedCall {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
                options: options.clone(),
            });
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Message> {
        self.record(messages, tools, options);
        self.next_reply()
    }

    async fn stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<TextStream> {
        self.record(messages, &[], options);
        let reply = self.next_reply()?;
        let fragments: Vec<Result<String>> = reply
            .content
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}
