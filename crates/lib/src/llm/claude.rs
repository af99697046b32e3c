//! Claude Messages API client (https://api.anthropic.com by default).
//! Non-streaming chat completion over an ordered transcript.

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Client for the Anthropic Messages API.
#[derive(Clone)]
pub struct ClaudeClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ClaudeError {
    #[error("claude request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("claude api error: {0}")]
    Api(String),
}

/// One message in the transcript sent to the API.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    typ: String,
    #[serde(default)]
    text: String,
}

impl MessagesResponse {
    /// Concatenated text of all text content blocks.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.typ == "text")
            .map(|b| b.text.as_str())
            .collect()
    }
}

impl ClaudeClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// POST /v1/messages — send the system instruction and transcript, return
    /// the assistant's reply text.
    pub async fn chat(
        &self,
        model: &str,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<String, ClaudeError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages,
        };
        let res = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ClaudeError::Api(format!("{} {}", status, body)));
        }
        let data: MessagesResponse = res.json().await?;
        let text = data.text();
        if text.is_empty() {
            return Err(ClaudeError::Api("response contained no text content".to_string()));
        }
        Ok(text)
    }
}
