//! OpenAI-compatible chat-completions backend.

use super::{AdvisoryBackend, CompletionFuture, CompletionRequest};
use crate::error::{AppError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .user_agent("Omen/1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Text of the first choice in a chat-completions response.
    pub fn extract_content(body: &Value) -> Result<String> {
        let content = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AppError::AdvisoryMalformed("empty completion".to_string()));
        }
        Ok(content.to_string())
    }

    async fn send(&self, request: &CompletionRequest) -> Result<String> {
        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Advisory request to {} ({:?})", url, request.source);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimited("advisory service".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "advisory HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let value: Value = response.json().await?;
        Self::extract_content(&value)
    }
}

impl AdvisoryBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(self.send(request))
    }
}
