use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parley_agent::llm::{GenerationRequest, TextGenerator};
use parley_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const TEMPERATURE: f32 = 0.4;

/// Chat-completions client for OpenAI and anything that speaks its wire
/// format (Ollama exposes the same endpoint under `/v1`).
pub struct OpenAiCompatibleGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatibleGenerator {
    /// `None` when the provider is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        let base_url = match config.provider {
            LlmProvider::Disabled => return Ok(None),
            LlmProvider::OpenAi => config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            LlmProvider::Ollama => config
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow!("llm.base_url is required for the ollama provider"))?,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build llm http client")?;

        Ok(Some(Self {
            client,
            endpoint: completions_endpoint(base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        }))
    }

    async fn complete_once(&self, request: &GenerationRequest) -> Result<String> {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.prompt },
            ],
            max_tokens: request.max_tokens,
            temperature: TEMPERATURE,
        };

        let mut builder = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.context("llm request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("llm endpoint returned {status}: {}", truncate(&body, 200));
        }

        let completion: ChatCompletionResponse =
            response.json().await.context("failed to decode llm response")?;
        completion
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("llm response contained no text"))
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.complete_once(&request).await {
                Ok(text) => {
                    debug!(event_name = "llm.completion.ok", model = %self.model, attempt, "completion received");
                    return Ok(text);
                }
                Err(error) if attempt < self.max_retries => {
                    warn!(
                        event_name = "llm.completion.retry",
                        model = %self.model,
                        attempt,
                        error = %error,
                        "completion failed, retrying"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
