use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::AiConfig;
use crate::throttle::RetryableError;

#[derive(Debug, Error, Clone)]
pub enum ClassifyError {
    #[error("AI request failed: {0}")]
    Http(String),

    #[error("AI service rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("AI response unusable: {0}")]
    BadResponse(String),
}

impl RetryableError for ClassifyError {
    fn is_rate_limit(&self) -> bool {
        matches!(self, ClassifyError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ClassifyError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClassifyError {
    fn from(err: reqwest::Error) -> Self {
        ClassifyError::Http(err.to_string())
    }
}

/// Seam to the external generative text service. One call, one completion
/// string back; retry and throttling live above this trait.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifyError>;
}

/// Chat-completions provider for OpenAI-compatible endpoints.
pub struct OpenAiProvider {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
}

impl OpenAiProvider {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassifyError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": self.max_tokens,
            "temperature": 0,
        });

        debug!("AI request: model={}", self.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifyError::RateLimited {
                message,
                retry_after,
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Http(format!(
                "AI API error {}: {}",
                status, error_text
            )));
        }

        let raw: Value = response.json().await?;
        raw["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ClassifyError::BadResponse("No content in AI response".to_string()))
    }
}
