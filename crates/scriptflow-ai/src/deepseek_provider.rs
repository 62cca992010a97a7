use crate::llm_provider::*;
use crate::pacing::RequestPacer;
use crate::{AiError, LlmResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scriptflow_core::AiConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the DeepSeek chat completions API (OpenAI-compatible)
#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    /// Base URL for the API (e.g., "https://api.deepseek.com/v1")
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
    /// Total attempts for retryable failures
    pub max_retries: u32,
    /// First backoff step; doubles on every retry
    pub retry_base_delay: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Minimum gap between outgoing requests
    pub min_request_interval: Duration,
}

impl DeepSeekConfig {
    pub fn from_settings(settings: &AiConfig) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            retry_base_delay: Duration::from_secs(1),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            min_request_interval: Duration::from_millis(settings.min_request_interval_ms),
        }
    }

    /// Generation defaults derived from this configuration.
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            json_response: true,
        }
    }
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self::from_settings(&AiConfig::default())
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

pub struct DeepSeekProvider {
    config: DeepSeekConfig,
    client: Client,
    pacer: RequestPacer,
}

impl DeepSeekProvider {
    pub fn new(config: DeepSeekConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Client(e.to_string()))?;
        let pacer = RequestPacer::new(config.min_request_interval, config.timeout);
        Ok(Self {
            config,
            client,
            pacer,
        })
    }

    pub fn config(&self) -> &DeepSeekConfig {
        &self.config
    }

    pub fn pacer(&self) -> &RequestPacer {
        &self.pacer
    }

    /// Send a request, retrying upstream throttling and 5xx with exponential backoff.
    /// An upstream `Retry-After` replaces the backoff but never exceeds the request timeout.
    async fn send_request(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LlmResult<ChatCompletionsResponse> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match self.try_request(messages, config).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let backoff = self.config.retry_base_delay * 2u32.pow(attempt);
                    let delay = match &e {
                        AiError::RateLimited {
                            retry_after: Some(retry_after),
                        } => (*retry_after).min(self.config.timeout),
                        _ => backoff,
                    };
                    warn!(
                        "DeepSeek request failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_request(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LlmResult<ChatCompletionsResponse> {
        let api_key = self.config.api_key.as_ref().ok_or(AiError::MissingApiKey)?;
        let request = ChatCompletionsRequest {
            model: &self.config.model,
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            response_format: config.json_response.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        self.pacer.wait().await;
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::from_reqwest(e, self.config.timeout))?;
        self.pacer.observe(response.headers());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AiError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        "API request failed".to_string()
                    } else {
                        text
                    }
                });
            return Err(AiError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<ChatCompletionsResponse>()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for DeepSeekProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LlmResult<LlmResponse> {
        let response = self.send_request(messages, config).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::InvalidResponse("No choices in response".to_string()))?;
        let content = choice
            .message
            .content
            .ok_or_else(|| AiError::InvalidResponse("Empty completion".to_string()))?;
        debug!(
            tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "DeepSeek completion received"
        );

        Ok(LlmResponse {
            content,
            total_tokens: response.usage.as_ref().map(|u| u.total_tokens),
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
            finish_reason: choice.finish_reason,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    async fn is_available(&self) -> bool {
        let Some(api_key) = self.config.api_key.as_ref() else {
            return false;
        };
        self.client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(api_key.expose_secret())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_name(&self) -> &str {
        "deepseek"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
