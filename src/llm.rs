use crate::config::{AssistantConfig, LlmProvider};
use crate::error::{DashboardError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The one operation the assistant needs from a hosted model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    provider: LlmProvider,
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(
        provider: LlmProvider,
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DashboardError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http,
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        Self::new(
            config.provider,
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str) -> reqwest::RequestBuilder {
        match self.provider {
            LlmProvider::OpenAi => {
                let body = serde_json::json!({
                    "model": self.model,
                    "messages": [
                        {"role": "user", "content": prompt}
                    ],
                    "temperature": 0.1,
                });
                self.http
                    .post(format!("{}/chat/completions", self.base_url))
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
            }
            LlmProvider::Gemini => {
                let body = serde_json::json!({
                    "contents": [
                        {"parts": [{"text": prompt}]}
                    ],
                    "generationConfig": {"temperature": 0.1},
                });
                self.http
                    .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
                    .query(&[("key", self.api_key.as_str())])
                    .header("Content-Type", "application/json")
                    .json(&body)
            }
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        info!("Calling {:?} model {} ({} prompt chars)", self.provider, self.model, prompt.len());

        let response = self
            .request(prompt)
            .send()
            .await
            .map_err(|e| DashboardError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DashboardError::Generation(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DashboardError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        let content = extract_content(self.provider, &response_json)?;
        debug!("LLM returned {} chars", content.len());
        Ok(content)
    }
}

/// Pulls the generated text out of a provider response body.
pub fn extract_content(provider: LlmProvider, response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(DashboardError::Generation(format!("LLM API error: {}", error)));
    }

    let content = match provider {
        LlmProvider::OpenAi => {
            let choice = response_json
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .ok_or_else(|| DashboardError::Generation("No choices in LLM response".to_string()))?;

            match choice.get("finish_reason").and_then(|r| r.as_str()) {
                Some("content_filter") => {
                    return Err(DashboardError::Generation(
                        "LLM response was filtered by content policy".to_string(),
                    ))
                }
                Some("length") => warn!("LLM response was truncated due to length limit"),
                _ => {}
            }

            choice["message"]["content"].as_str().map(|s| s.to_string())
        }
        LlmProvider::Gemini => {
            let candidate = response_json
                .get("candidates")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .ok_or_else(|| {
                    let reason = response_json["promptFeedback"]["blockReason"]
                        .as_str()
                        .map(|r| format!(" (prompt blocked: {})", r))
                        .unwrap_or_default();
                    DashboardError::Generation(format!("No candidates in LLM response{}", reason))
                })?;

            if candidate["finishReason"].as_str() == Some("SAFETY") {
                return Err(DashboardError::Generation(
                    "LLM response was blocked by safety filters".to_string(),
                ));
            }

            candidate["content"]["parts"].as_array().map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
        }
    };

    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(DashboardError::Generation("Empty content in LLM response".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_openai_content() {
        let body = json!({
            "choices": [{"message": {"content": "fig = px.bar(filtered_df, x='Region', y='TotalSales')"}, "finish_reason": "stop"}]
        });
        let text = extract_content(LlmProvider::OpenAi, &body).unwrap();
        assert!(text.starts_with("fig = px.bar"));
    }

    #[test]
    fn test_extract_gemini_content_joins_parts() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "fig = px."}, {"text": "line(filtered_df)"}]}, "finishReason": "STOP"}]
        });
        assert_eq!(
            extract_content(LlmProvider::Gemini, &body).unwrap(),
            "fig = px.line(filtered_df)"
        );
    }

    #[test]
    fn test_extract_errors() {
        let api_error = json!({"error": {"message": "quota exceeded"}});
        assert!(matches!(
            extract_content(LlmProvider::OpenAi, &api_error),
            Err(DashboardError::Generation(_))
        ));

        let filtered = json!({"choices": [{"message": {"content": null}, "finish_reason": "content_filter"}]});
        assert!(extract_content(LlmProvider::OpenAi, &filtered).is_err());

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = extract_content(LlmProvider::Gemini, &blocked).unwrap_err();
        assert!(err.to_string().contains("prompt blocked: SAFETY"));

        let empty = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(extract_content(LlmProvider::OpenAi, &empty).is_err());
    }
}
