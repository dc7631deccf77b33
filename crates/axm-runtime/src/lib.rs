//! # axm-runtime
//!
//! HTTP providers and agent constructors for axm.
//!
//! ## Providers
//!
//! - **OpenAI-compatible**: `/chat/completions` on OpenAI or any compatible gateway
//! - **Anthropic**: the Messages API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use axm_runtime::{Credentials, factory};
//!
//! let provider = factory::create_provider("gpt-4o", &Credentials::new())?;
//! let agent = AgentBuilder::new()
//!     .provider(provider)
//!     .model("gpt-4o")
//!     .build()?;
//! ```

pub mod anthropic;
pub mod config;
pub mod factory;
mod http;
pub mod openai_compatible;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use config::Credentials;
pub use factory::create_provider;
pub use openai_compatible::OpenAiCompatibleProvider;

// Re-export core types for convenience
pub use axm_core::{
    Agent, AgentBuilder, AgentError, LlmProvider, Message, MultiAgent, PlanningAgent, ProviderKind,
    Result, Role, Tool, ToolRegistry,
};
