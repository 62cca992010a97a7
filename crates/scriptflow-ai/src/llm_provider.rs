use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AiError, LlmResult};

/// Configuration for generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object instead of free text.
    pub json_response: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: Some(4096),
            json_response: true,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Response from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub total_tokens: Option<u32>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    /// Finish reason (e.g., "stop", "length")
    pub finish_reason: Option<String>,
    pub model: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LlmResult<LlmResponse>;

    /// Run a system + user exchange and parse the reply as JSON.
    async fn generate_json(
        &self,
        system: &str,
        user: &str,
        config: &GenerationConfig,
    ) -> LlmResult<serde_json::Value> {
        let messages = [Message::system(system), Message::user(user)];
        let response = self.generate_chat(&messages, config).await?;
        parse_json_content(&response.content)
    }

    async fn is_available(&self) -> bool;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Parse model output that may be wrapped in a markdown code fence.
pub fn parse_json_content(content: &str) -> LlmResult<serde_json::Value> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| {
        AiError::InvalidResponse(format!("model output is not valid JSON: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_fenced_json() {
        assert_eq!(
            parse_json_content(r#"{"errors": []}"#).unwrap(),
            json!({"errors": []})
        );
        assert_eq!(
            parse_json_content("```json\n{\"a\": 1}\n```\n").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(parse_json_content("```\n[1,2]\n```").unwrap(), json!([1, 2]));
    }

    #[test]
    fn rejects_prose() {
        let err = parse_json_content("Sure! Here is the analysis").unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse(_)));
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = Message::system("be terse");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "system", "content": "be terse"})
        );
    }
}
