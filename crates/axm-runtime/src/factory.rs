//! Provider Factory
//!
//! Picks a provider from a model identifier and builds ready-to-run agents.
//!
//! ```rust,ignore
//! use axm_runtime::{Credentials, factory};
//!
//! let agent = factory::agent("deepseek-v3", &Credentials::new()
//!         .base_url("https://api.example.com/v1")
//!         .api_key("sk-..."))?
//!     .role("researcher")
//!     .build()?;
//! ```

use std::sync::Arc;

use axm_core::error::{AgentError, Result};
use axm_core::{
    Agent, AgentBuilder, LlmProvider, MultiAgent, OrchestratorSpec, PlanningAgent, PlanningConfig,
    ProviderKind,
};

use crate::anthropic::AnthropicProvider;
use crate::config::Credentials;
use crate::openai_compatible::OpenAiCompatibleProvider;

/// Provider kind for `model`, honouring an explicit base URL
pub fn provider_kind(model: &str, credentials: &Credentials) -> ProviderKind {
    ProviderKind::resolve(model, credentials.base_url.is_some())
}

/// Create the provider serving `model`.
///
/// Explicit credentials override the environment.
pub fn create_provider(model: &str, credentials: &Credentials) -> Result<Arc<dyn LlmProvider>> {
    let kind = provider_kind(model, credentials);
    let credentials = credentials.clone().with_env_defaults(kind);
    tracing::debug!(model, provider = %kind, base_url = ?credentials.base_url, "Creating provider");

    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_credentials(&credentials)?),
        ProviderKind::OpenAi => {
            if credentials.api_key.is_none() {
                return Err(AgentError::Config("OPENAI_API_KEY is not set".into()));
            }
            Arc::new(OpenAiCompatibleProvider::from_credentials(&credentials)?)
        }
        ProviderKind::OpenAiCompatible => Arc::new(OpenAiCompatibleProvider::from_credentials(&credentials)?),
    };
    Ok(provider)
}

/// Builder for an agent talking to `model`
pub fn agent(model: &str, credentials: &Credentials) -> Result<AgentBuilder> {
    Ok(Agent::builder()
        .provider(create_provider(model, credentials)?)
        .model(model))
}

pub fn planning_agent(model: &str, credentials: &Credentials, config: PlanningConfig) -> Result<PlanningAgent> {
    Ok(PlanningAgent::with_config(agent(model, credentials)?.build()?, config))
}

/// Team whose orchestrator runs on `orchestrator_model` with `credentials`
pub fn multi_agent(
    participants: Vec<Agent>,
    orchestrator_model: &str,
    credentials: &Credentials,
) -> Result<MultiAgent> {
    let provider = create_provider(orchestrator_model, credentials)?;
    MultiAgent::new(participants, OrchestratorSpec::new(provider, orchestrator_model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axm_core::RunOptions;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_provider_kind_follows_model_and_base_url() {
        let plain = Credentials::new();
        let custom = Credentials::new().base_url("https://gateway.example/v1/");

        assert_eq!(provider_kind("gpt-4o", &plain), ProviderKind::OpenAi);
        assert_eq!(provider_kind("gpt-4o", &custom), ProviderKind::OpenAiCompatible);
        assert_eq!(provider_kind("claude-3-opus", &custom), ProviderKind::Anthropic);
        assert_eq!(provider_kind("deepseek-v3", &plain), ProviderKind::OpenAiCompatible);
        assert_eq!(custom.base_url.as_deref(), Some("https://gateway.example/v1"));
    }

    #[test]
    fn test_create_provider_names() {
        let creds = Credentials::new().api_key("sk-test").base_url("http://localhost:9");
        assert_eq!(create_provider("qwen-max", &creds).unwrap().name(), "openai_compatible");
        assert_eq!(create_provider("claude-3-haiku", &creds).unwrap().name(), "anthropic");
    }

    #[tokio::test]
    async fn test_constructed_agents_reach_custom_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "pong"}}]
            })))
            .mount(&server)
            .await;

        let creds = Credentials::new()
            .api_key("sk-test")
            .base_url(format!("{}/v1", server.uri()));

        let agent = agent("deepseek-v3", &creds).unwrap().build().unwrap();
        assert_eq!(agent.config().model, "deepseek-v3");
        assert_eq!(agent.run("ping", RunOptions::default()).await.unwrap(), "pong");

        let team = multi_agent(vec![agent], "deepseek-v3", &creds).unwrap();
        assert_eq!(team.orchestrator().provider().name(), "openai_compatible");
        assert_eq!(team.orchestrator().role(), Some("orchestrator"));

        let planner = planning_agent("deepseek-v3", &creds, PlanningConfig::default()).unwrap();
        assert_eq!(planner.config().max_steps, 10);
    }
}
