use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-style completion backend. One call per queued LLM request.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;

    fn name(&self) -> &str;
}

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Fields the request builder owns; credential parameters cannot replace them.
const RESERVED_FIELDS: &[&str] = &["model", "messages", "system"];

/// Copies generation parameters onto a request body, skipping reserved fields.
fn merge_parameters(body: &mut Value, parameters: &Map<String, Value>) {
    if let Some(fields) = body.as_object_mut() {
        for (name, value) in parameters {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                log::warn!("Ignoring credential parameter '{}'", name);
                continue;
            }
            fields.insert(name.clone(), value.clone());
        }
    }
}

fn parameter_map(parameters: Value) -> Map<String, Value> {
    match parameters {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Anthropic Messages API. System turns travel in the top-level `system` field.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    parameters: Map<String, Value>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            parameters: Map::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Credential parameters such as `temperature` or `max_tokens`.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameter_map(parameters);
        self
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": DEFAULT_MAX_TOKENS,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        merge_parameters(&mut body, &self.parameters);
        body
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.request_body(&messages))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("Anthropic API error {}: {}", status, body);
        }

        let result: AnthropicResponse = response.json().await?;
        let text: String = result.content.into_iter().filter_map(|c| c.text).collect();
        if text.is_empty() {
            anyhow::bail!("Anthropic response had no text content");
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// OpenAI chat completions.
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    api_key: String,
    model: String,
    parameters: Map<String, Value>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            parameters: Map::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Credential parameters such as `temperature` or `max_tokens`.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameter_map(parameters);
        self
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": DEFAULT_MAX_TOKENS,
        });
        merge_parameters(&mut body, &self.parameters);
        body
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&messages))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("OpenAI API error {}: {}", status, body);
        }

        let result: OpenAIResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("OpenAI response had no message content"))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Canned provider for tests and offline runs.
pub struct MockLLMProvider {
    response: String,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLLMProvider {
    pub fn new() -> Self {
        Self::with_response("[command|look]".to_string())
    }

    pub fn with_response(response: String) -> Self {
        Self {
            response,
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call returns this error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    /// Sleeps before answering, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => anyhow::bail!("{}", message),
            None => Ok(self.response.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
