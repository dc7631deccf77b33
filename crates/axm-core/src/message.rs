//! Conversation Messages
//!
//! Standard message format used across the agent system.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result answering a specific tool call
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content (may be empty when `tool_calls` is present)
    #[serde(default)]
    pub content: String,

    /// Optional name (agent role in collaborations, tool name on tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls requested by an assistant turn, in issue order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// The call this tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant turn that requests tool calls
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = Some(calls);
        msg
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Add a name to the message
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Tool calls carried by this message (empty slice if none)
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Whether this is an assistant turn asking for tools
    pub fn has_tool_calls(&self) -> bool {
        !self.calls().is_empty()
    }
}

/// Append-only conversation history owned by a single agent run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.push(Message::system(prompt));
        conv
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages with the given role
    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.role == role)
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Check the tool-call pairing invariant.
    ///
    /// Every tool message must answer exactly one call of the immediately
    /// preceding assistant turn, and a turn's calls must all be answered
    /// before any other message follows. Unanswered calls at the very end
    /// of the conversation are allowed.
    pub fn verify_tool_pairing(&self) -> Result<()> {
        let mut pending: HashSet<&str> = HashSet::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for (idx, msg) in self.messages.iter().enumerate() {
            if msg.role == Role::Tool {
                let id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    AgentError::Protocol(format!("tool message #{idx} has no tool_call_id"))
                })?;
                if !pending.remove(id) {
                    let reason = if answered.contains(id) {
                        "answers the same call twice"
                    } else {
                        "does not answer a call of the preceding assistant turn"
                    };
                    return Err(AgentError::Protocol(format!(
                        "tool message #{idx} ({id}) {reason}"
                    )));
                }
                answered.insert(id);
                continue;
            }

            if !pending.is_empty() {
                let mut missing: Vec<_> = pending.iter().copied().collect();
                missing.sort_unstable();
                return Err(AgentError::Protocol(format!(
                    "message #{idx} follows unanswered tool calls: {}",
                    missing.join(", ")
                )));
            }

            answered.clear();
            if msg.role == Role::Assistant {
                for call in msg.calls() {
                    if !pending.insert(call.id.as_str()) {
                        return Err(AgentError::Protocol(format!(
                            "assistant message #{idx} repeats tool call id {}",
                            call.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
