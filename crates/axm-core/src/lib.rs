//! # axm-core
//!
//! Provider-agnostic agent execution: a tool-calling loop, structured
//! output coercion, plan-then-execute and multi-agent collaboration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │        MultiAgent (orchestrator)        PlanningAgent         │
//! │                 │                             │               │
//! │                 └──────────────┬──────────────┘               │
//! │                                ▼                              │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌─────────────────┐    │
//! │  │    Agent    │  │  ToolRegistry   │  │   LlmProvider   │    │
//! │  │    Loop     │──│                 │──│   (Strategy)    │    │
//! │  └─────────────┘  └─────────────────┘  └─────────────────┘    │
//! │         │                                                     │
//! │         ▼                                                     │
//! │  StructuredOutputParser                                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets OpenAI, Anthropic or any OpenAI-compatible
//! endpoint be swapped in without changing agent logic. Concrete HTTP
//! providers live in `axm-runtime`.

mod blocking;

pub mod collaboration;
pub mod error;
pub mod message;
pub mod mock;
pub mod planning;
pub mod provider;
pub mod reasoning;
pub mod schema;
pub mod structured;
pub mod tool;

pub use collaboration::{CollaborationConfig, CollaborationState, MultiAgent, OrchestratorSpec};
pub use error::{AgentError, Result};
pub use message::{Conversation, Message, Role};
pub use planning::{Plan, PlanReport, PlanningAgent, PlanningConfig, Step, StepStatus};
pub use provider::{GenerationOptions, LlmProvider, ProviderKind, TextStream};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, AgentRun, RunOptions};
pub use schema::{Field, JsonType};
pub use structured::{OutputSchema, StructuredOutput, StructuredOutputParser};
pub use tool::{FunctionTool, ParameterSchema, Tool, ToolCall, ToolRegistry, ToolSchema};
