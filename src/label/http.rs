//! OpenAI-compatible chat-completions label service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LabelError, LabelService};
use crate::config::LabelingConfig;

const SYSTEM_PROMPT: &str =
    "You name clusters of personal notes. Answer with a short topic label only.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

pub struct HttpLabelService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    timeout_ms: u64,
}

impl HttpLabelService {
    /// Build from config, reading the API key from the configured env var.
    /// A missing key is not an error here; calls then report `Unavailable`.
    pub fn from_config(config: &LabelingConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::debug!(env = %config.api_key_env, "no label service API key set");
        }
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            timeout_ms: config.timeout_ms,
        }
    }

    async fn send(&self, api_key: &str, prompt: &str) -> Result<String, LabelError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: 16,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LabelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LabelError::Http(status.as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LabelError::Transport(format!("invalid response body: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LabelError::Rejected(String::new()))
    }
}

#[async_trait]
impl LabelService for HttpLabelService {
    async fn generate_label(&self, prompt: &str) -> Result<String, LabelError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LabelError::Unavailable("no API key configured".into()))?;

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            self.send(api_key, prompt),
        )
        .await
        .map_err(|_| LabelError::Timeout(self.timeout_ms))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "label service call finished"
        );
        result
    }
}
