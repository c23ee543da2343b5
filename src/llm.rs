//! OpenAI-compatible chat completion client.
//!
//! Both supported providers speak the `/v1/chat/completions` protocol:
//! OpenAI directly, Ollama through its compatibility endpoint. The client
//! sends a single user message and returns `choices[0].message.content`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use webtrail_core::completion::CompletionProvider;

use crate::config::LlmConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434/v1";

/// Create the configured completer, or `None` when `llm.provider = "disabled"`.
pub fn create_completer(config: &LlmConfig) -> Result<Option<Arc<dyn CompletionProvider>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    Ok(Some(Arc::new(ChatClient::new(config)?)))
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required when llm.provider is set"))?;
        let base_url = match (&config.url, config.provider.as_str()) {
            (Some(url), _) => url.clone(),
            (None, "ollama") => OLLAMA_DEFAULT_URL.to_string(),
            (None, _) => OPENAI_DEFAULT_URL.to_string(),
        };
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if config.provider == "openai" && api_key.is_none() && config.url.is_none() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[async_trait]
impl CompletionProvider for ChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = [Message {
            role: "user",
            content: prompt,
        }];
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            bail!("LLM error {}: {}", status, text);
        }
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("LLM response has no choices[0].message.content"))
}
