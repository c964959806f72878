use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::providers::llm::{LLMProvider, Message};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini via the `generateContent` REST endpoint.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    generation_config: Option<Value>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            generation_config: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Credential parameters, passed through as `generationConfig`.
    pub fn with_generation_config(mut self, config: Value) -> Self {
        if config.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            self.generation_config = Some(config);
        }
        self
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n") }] });
        }
        if let Some(config) = &self.generation_config {
            body["generationConfig"] = config.clone();
        }
        body
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", GEMINI_BASE_URL, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(&messages))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("Gemini API error {}: {}", status, body);
        }

        let body: Value = response.json().await?;
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| anyhow!("No candidates in Gemini response"))?;
        let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
