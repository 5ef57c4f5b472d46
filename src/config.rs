//! Runtime configuration, read from the environment (and `.env` via dotenv in
//! the binary). CLI flags override individual fields after loading.

use crate::error::{DashboardError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_PATH: &str = "Adidas.csv";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" | "open-ai" => Ok(LlmProvider::OpenAi),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            other => Err(DashboardError::Config(format!(
                "Unsupported LLM provider '{}', expected 'openai' or 'gemini'",
                other
            ))),
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Gemini => "gemini-1.5-flash",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub data_path: PathBuf,
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_provider(None)
    }

    /// Like [`from_env`](Self::from_env), with `provider` taking the place of
    /// `LLM_PROVIDER`.
    pub fn from_env_with_provider(provider: Option<LlmProvider>) -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok(), provider)
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(lookup, None)
    }

    /// An explicit `provider` overrides `LLM_PROVIDER`. Key, model and
    /// endpoint are then read for that provider, so `LLM_MODEL` and
    /// `LLM_BASE_URL` still apply.
    pub fn resolve<F>(lookup: F, provider: Option<LlmProvider>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match (provider, lookup("LLM_PROVIDER")) {
            (Some(provider), _) => provider,
            (None, Some(value)) => LlmProvider::parse(&value)?,
            (None, None) => LlmProvider::OpenAi,
        };

        let timeout_secs = match lookup("LLM_TIMEOUT_SECS") {
            Some(value) => value.trim().parse::<u64>().map_err(|e| {
                DashboardError::Config(format!("LLM_TIMEOUT_SECS '{}' is not a number: {}", value, e))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(DashboardError::Config("LLM_TIMEOUT_SECS must be greater than zero".to_string()));
        }

        Ok(Self {
            data_path: lookup("SALES_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH)),
            provider,
            api_key: lookup(provider.api_key_var()).filter(|k| !k.trim().is_empty()),
            model: lookup("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            base_url: lookup("LLM_BASE_URL").unwrap_or_else(|| provider.default_base_url().to_string()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            DashboardError::Config(format!(
                "No API key configured; set {} or pass --api-key",
                self.provider.api_key_var()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AssistantConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.provider, LlmProvider::OpenAi);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.data_path, PathBuf::from("Adidas.csv"));
        assert!(config.api_key.is_none());
        assert!(matches!(config.require_api_key(), Err(DashboardError::Config(_))));
    }

    #[test]
    fn test_gemini_provider_reads_its_own_key() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("LLM_PROVIDER", "gemini"),
            ("GEMINI_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "o-key"),
            ("LLM_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert_eq!(config.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.model, "gemini-1.5-flash");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_provider_override_keeps_explicit_settings() {
        let config = AssistantConfig::resolve(
            lookup_from(&[
                ("LLM_PROVIDER", "openai"),
                ("LLM_MODEL", "gemini-2.0-flash"),
                ("GEMINI_API_KEY", "g-key"),
                ("OPENAI_API_KEY", "o-key"),
            ]),
            Some(LlmProvider::Gemini),
        )
        .unwrap();
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.base_url, LlmProvider::Gemini.default_base_url());

        let config = AssistantConfig::resolve(
            lookup_from(&[("LLM_PROVIDER", "cohere"), ("LLM_BASE_URL", "http://localhost:8080/v1")]),
            Some(LlmProvider::OpenAi),
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AssistantConfig::from_lookup(lookup_from(&[("LLM_PROVIDER", "cohere")])).is_err());
        assert!(AssistantConfig::from_lookup(lookup_from(&[("LLM_TIMEOUT_SECS", "soon")])).is_err());
        assert!(AssistantConfig::from_lookup(lookup_from(&[("LLM_TIMEOUT_SECS", "0")])).is_err());
    }
}
