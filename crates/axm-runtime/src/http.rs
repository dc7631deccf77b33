//! Shared HTTP plumbing for the providers

use std::time::Duration;

use axm_core::error::{AgentError, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}

/// Map a transport failure onto the provider error kinds
pub(crate) fn request_error(provider: &str, error: &reqwest::Error) -> AgentError {
    if error.is_timeout() {
        AgentError::ProviderTimeout(format!("{provider}: {error}"))
    } else if error.is_decode() || error.is_body() {
        AgentError::ProviderResponse(format!("{provider}: {error}"))
    } else {
        AgentError::ProviderConnection(format!("{provider}: {error}"))
    }
}

/// Reject non-2xx responses, keeping the body for the caller
pub(crate) async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, status = status.as_u16(), "Provider returned an error status");
    Err(AgentError::ProviderHttp {
        status: status.as_u16(),
        body,
    })
}

/// Read and decode a successful JSON body
pub(crate) async fn decode_json<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T> {
    let text = response
        .text()
        .await
        .map_err(|e| request_error(provider, &e))?;
    serde_json::from_str(&text).map_err(|e| {
        AgentError::ProviderResponse(format!("{provider}: could not decode response ({e}): {text}"))
    })
}
