//! Client for the script conversion service (`/api/v1/convert/script`, `/health`).

use reqwest::Client;
use scriptflow_core::ConverterConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::{AiError, LlmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub file_id: String,
    pub raw_content: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionFailure {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub line_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub success: bool,
    pub file_id: String,
    pub json_content: Option<serde_json::Value>,
    pub error: Option<ConversionFailure>,
    pub processing_time_ms: f64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterHealth {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ConversionClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ConversionClient {
    pub fn new(config: &ConverterConfig) -> LlmResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> LlmResult<ConverterHealth> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| AiError::from_reqwest(e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AiError::Upstream {
                status: status.as_u16(),
                message: "Health check failed".to_string(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))
    }

    /// Convert one script. A 200 response that reports `success: false` is an error.
    pub async fn convert_script(&self, request: &ConversionRequest) -> LlmResult<ConversionResponse> {
        let response = self.post_with_retry("/api/v1/convert/script", request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AiError::Upstream {
                status: status.as_u16(),
                message: format!("Script conversion failed: {}", status),
            });
        }
        let result: ConversionResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        match (&result.success, &result.error) {
            (false, Some(failure)) => Err(AiError::Conversion {
                code: failure.code.clone(),
                message: failure.message.clone(),
            }),
            _ => Ok(result),
        }
    }

    /// Retries network failures and 5xx responses with a linearly growing delay.
    async fn post_with_retry<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> LlmResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.client.post(&url).json(body).send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_error = Some(AiError::Upstream {
                        status: response.status().as_u16(),
                        message: format!("Server error: {}", response.status()),
                    });
                    if attempt == self.max_retries {
                        return Ok(response);
                    }
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(AiError::from_reqwest(e, self.timeout));
                    if attempt == self.max_retries {
                        break;
                    }
                }
            }
            warn!("Conversion request attempt {} failed, retrying", attempt);
            tokio::time::sleep(self.retry_delay * attempt).await;
        }

        Err(last_error.unwrap_or_else(|| AiError::Network("conversion request failed".into())))
    }
}
