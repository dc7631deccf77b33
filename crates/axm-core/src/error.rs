//! Error Types

use thiserror::Error;

use crate::planning::Plan;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Could not reach the provider endpoint
    #[error("Provider connection failed: {0}")]
    ProviderConnection(String),

    /// Provider call exceeded its deadline
    #[error("Provider request timed out: {0}")]
    ProviderTimeout(String),

    /// Provider answered with a non-2xx status
    #[error("Provider returned HTTP {status}: {body}")]
    ProviderHttp { status: u16, body: String },

    /// Provider answered 2xx but the body could not be understood
    #[error("Unexpected provider response: {0}")]
    ProviderResponse(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments missing, malformed or ill-typed
    #[error("Invalid tool arguments: {0}")]
    ArgumentParse(String),

    /// Tool raised an error while running
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Tool schema cannot be expressed as JSON schema
    #[error("Tool registration error: {0}")]
    Registration(String),

    /// Maximum iterations reached in the tool-calling loop
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// A plan step failed in a way that stops the plan
    #[error("Plan halted at step {step}: {source}")]
    PlanHalted {
        step: usize,
        plan: Box<Plan>,
        #[source]
        source: Box<AgentError>,
    },

    /// Model reply does not match the requested schema
    #[error("Structured output error: {reason}")]
    StructuredOutput { raw: String, reason: String },

    /// Conversation violates the tool-call pairing protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Whether a caller may reasonably retry the whole operation.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::ProviderConnection(_) | AgentError::ProviderTimeout(_) => true,
            AgentError::ProviderHttp { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this error is a tool-level failure that the loop feeds back to the model
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::ArgumentParse(_)
                | AgentError::ToolExecution(_)
        )
    }

    /// Raw model text attached to a structured output failure
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            AgentError::StructuredOutput { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::ProviderConnection(_) => {
                "Could not reach the AI service. Check the base URL and your network.".into()
            }
            AgentError::ProviderTimeout(_) => "The AI service did not answer in time.".into(),
            AgentError::ProviderHttp { status, .. } => {
                format!("The AI service rejected the request (HTTP {status}).")
            }
            AgentError::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            AgentError::ArgumentParse(msg) => format!("Invalid tool input: {msg}"),
            AgentError::ToolExecution(msg) => format!("Tool error: {msg}"),
            AgentError::MaxIterations(_) => {
                "The request took too long to process. Please try a simpler query.".into()
            }
            AgentError::PlanHalted { step, .. } => {
                format!("The plan stopped at step {step}; partial results are available.")
            }
            AgentError::StructuredOutput { .. } => {
                "The AI reply did not match the expected format.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::ProviderConnection("refused".into()).is_retryable());
        assert!(AgentError::ProviderTimeout("60s".into()).is_retryable());
        assert!(AgentError::ProviderHttp { status: 503, body: String::new() }.is_retryable());
        assert!(!AgentError::ProviderHttp { status: 401, body: String::new() }.is_retryable());
        assert!(!AgentError::MaxIterations(3).is_retryable());
    }

    #[test]
    fn test_structured_output_keeps_raw_text() {
        let err = AgentError::StructuredOutput {
            raw: "{\"year\": \"soon\"}".into(),
            reason: "year: expected integer".into(),
        };
        assert_eq!(err.raw_output(), Some("{\"year\": \"soon\"}"));
        assert!(!err.is_tool_failure());
        assert!(AgentError::ToolNotFound("x".into()).is_tool_failure());
    }
}
