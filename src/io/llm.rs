//! LLM client abstraction.
//!
//! The [`LlmClient`] trait decouples agent logic from the vendor transport.
//! Tests use scripted clients that return predetermined replies without any
//! network traffic; the production implementation speaks the OpenAI
//! chat-completions protocol over blocking HTTP.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::error::EngineError;

pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_VAR: &str = "OPENAI_BASE_URL";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Parameters for one LLM call.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(900),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Agents emitting whole file sets need more room than the default.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Abstraction over LLM backends.
///
/// Implementations return the raw textual reply, trimmed. They must not
/// touch shared memory or the filesystem.
pub trait LlmClient {
    fn complete(&self, request: &LlmRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for the OpenAI chat-completions endpoint.
pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    /// Build a client for `model`, reading credentials from the process
    /// environment. A missing key fails here, before any agent is invoked.
    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = std::env::var(OPENAI_API_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EngineError::LlmAuth(format!("{OPENAI_API_KEY_VAR} is not set")))?;
        let base_url =
            std::env::var(OPENAI_BASE_URL_VAR).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            http: reqwest::blocking::Client::new(),
            base_url,
            api_key,
            model: model.to_string(),
        })
    }
}

impl LlmClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &LlmRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .map_err(|err| classify_transport(err, request.timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::LlmAuth(format!("api rejected credentials ({status})")).into());
        }
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(EngineError::LlmTransport(format!(
                "api returned {status}: {}",
                detail.chars().take(300).collect::<String>()
            ))
            .into());
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| EngineError::LlmTransport(format!("decode response: {err}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| EngineError::LlmTransport("response had no choices".to_string()))?;

        debug!(chars = content.len(), "llm reply received");
        Ok(content.trim().to_string())
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> EngineError {
    if err.is_timeout() {
        EngineError::LlmTimeout {
            timeout_secs: timeout.as_secs(),
        }
    } else {
        EngineError::LlmTransport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_match_contract() {
        let request = LlmRequest::new("system", "user");
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(request.timeout, Duration::from_secs(900));
    }

    #[test]
    fn request_builders_override_defaults() {
        let request = LlmRequest::new("s", "u")
            .with_timeout(Duration::from_secs(30))
            .with_max_tokens(16_000);
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert_eq!(request.max_tokens, 16_000);
    }

    #[test]
    fn chat_request_serializes_expected_wire_shape() {
        let body = ChatRequest {
            model: "gpt-4",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatMessage {
                    role: "user",
                    content: "hello",
                },
            ],
            max_tokens: 4000,
        };
        let encoded = serde_json::to_value(&body).expect("serialize");
        assert_eq!(encoded["model"], "gpt-4");
        assert_eq!(encoded["messages"][0]["role"], "system");
        assert_eq!(encoded["messages"][1]["content"], "hello");
        assert_eq!(encoded["max_tokens"], 4000);
    }

    #[test]
    fn chat_response_parses_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": " hi "}}]}"#,
        )
        .expect("parse");
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some(" hi "));
    }
}
