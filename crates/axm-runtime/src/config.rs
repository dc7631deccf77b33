//! Provider Credentials
//!
//! Explicit values always win over the environment.
//!
//! | Provider           | API key                                          | Base URL                                           |
//! |--------------------|--------------------------------------------------|----------------------------------------------------|
//! | OpenAI             | `OPENAI_API_KEY`                                 | `OPENAI_BASE_URL`                                  |
//! | OpenAI-compatible  | `OPENAI_COMPATIBLE_API_KEY`, `OPENAI_API_KEY`    | `OPENAI_COMPATIBLE_BASE_URL`, `OPENAI_BASE_URL`    |
//! | Anthropic          | `ANTHROPIC_API_KEY`                              | `ANTHROPIC_BASE_URL`                               |

use std::time::Duration;

use axm_core::ProviderKind;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// API key, endpoint and timeout for one provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(trim_url(url.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Credentials for `kind` taken from the process environment
    pub fn from_env(kind: ProviderKind) -> Self {
        Self::from_lookup(kind, |name| std::env::var(name).ok())
    }

    /// Fill unset fields from the environment
    pub fn with_env_defaults(self, kind: ProviderKind) -> Self {
        self.merged_with(Self::from_env(kind))
    }

    pub(crate) fn merged_with(self, fallback: Self) -> Self {
        Self {
            api_key: self.api_key.or(fallback.api_key),
            base_url: self.base_url.or(fallback.base_url),
            timeout: self.timeout,
        }
    }

    pub(crate) fn from_lookup(kind: ProviderKind, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (keys, urls): (&[&str], &[&str]) = match kind {
            ProviderKind::OpenAi => (&["OPENAI_API_KEY"], &["OPENAI_BASE_URL"]),
            ProviderKind::OpenAiCompatible => (
                &["OPENAI_COMPATIBLE_API_KEY", "OPENAI_API_KEY"],
                &["OPENAI_COMPATIBLE_BASE_URL", "OPENAI_BASE_URL"],
            ),
            ProviderKind::Anthropic => (&["ANTHROPIC_API_KEY"], &["ANTHROPIC_BASE_URL"]),
        };
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|value| !value.trim().is_empty())
        };

        Self {
            api_key: first(keys),
            base_url: first(urls).map(trim_url),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Base URL, or the provider's public endpoint when unset
    pub fn base_url_or_default(&self, kind: ProviderKind) -> String {
        self.base_url.clone().unwrap_or_else(|| match kind {
            ProviderKind::Anthropic => DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => DEFAULT_OPENAI_BASE_URL.to_string(),
        })
    }
}

fn trim_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_compatible_variables_take_priority() {
        let vars = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("OPENAI_BASE_URL", "https://openai.example/v1"),
            ("OPENAI_COMPATIBLE_API_KEY", "sk-compat"),
            ("OPENAI_COMPATIBLE_BASE_URL", "https://compat.example/v1/"),
        ];
        let lookup = env(&vars);
        let creds = Credentials::from_lookup(ProviderKind::OpenAiCompatible, &lookup);
        assert_eq!(creds.api_key.as_deref(), Some("sk-compat"));
        assert_eq!(creds.base_url.as_deref(), Some("https://compat.example/v1"));

        let openai = Credentials::from_lookup(ProviderKind::OpenAi, &lookup);
        assert_eq!(openai.api_key.as_deref(), Some("sk-openai"));
    }

    #[test]
    fn test_compatible_falls_back_to_openai_variables() {
        let creds = Credentials::from_lookup(
            ProviderKind::OpenAiCompatible,
            env(&[("OPENAI_API_KEY", "sk-openai"), ("OPENAI_COMPATIBLE_API_KEY", "  ")]),
        );
        assert_eq!(creds.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(creds.base_url, None);
        assert_eq!(creds.base_url_or_default(ProviderKind::OpenAiCompatible), DEFAULT_OPENAI_BASE_URL);
    }

    #[test]
    fn test_explicit_values_win() {
        let env_creds = Credentials::from_lookup(
            ProviderKind::Anthropic,
            env(&[("ANTHROPIC_API_KEY", "env-key"), ("ANTHROPIC_BASE_URL", "https://proxy")]),
        );
        let creds = Credentials::new().api_key("explicit").merged_with(env_creds);
        assert_eq!(creds.api_key.as_deref(), Some("explicit"));
        assert_eq!(creds.base_url.as_deref(), Some("https://proxy"));
        assert_eq!(creds.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_debug_hides_key() {
        let text = format!("{:?}", Credentials::new().api_key("sk-secret"));
        assert!(!text.contains("sk-secret"));
    }
}
