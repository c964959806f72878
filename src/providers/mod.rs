pub mod gemini;
pub mod llm;
pub mod ollama;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::DungeonError;
use crate::types::ApiCredential;

pub use gemini::GeminiProvider;
pub use llm::{AnthropicProvider, LLMProvider, Message, MockLLMProvider, OpenAIProvider};
pub use ollama::OllamaProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAI,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(DungeonError::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// Builds a provider bound to the credential acquired for one request.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, credential: &ApiCredential) -> Result<Arc<dyn LLMProvider>>;
}

/// Factory for the provider named in the configuration.
pub struct ConfiguredProviderFactory {
    kind: ProviderKind,
    model: Option<String>,
    ollama_url: Option<String>,
}

impl ConfiguredProviderFactory {
    pub fn new(kind: ProviderKind, model: Option<String>, ollama_url: Option<String>) -> Self {
        Self {
            kind,
            model,
            ollama_url,
        }
    }
}

impl ProviderFactory for ConfiguredProviderFactory {
    fn create(&self, credential: &ApiCredential) -> Result<Arc<dyn LLMProvider>> {
        let key = credential.key.clone();
        let provider: Arc<dyn LLMProvider> = match self.kind {
            ProviderKind::Gemini => {
                let mut provider =
                    GeminiProvider::new(key).with_generation_config(credential.parameters.clone());
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.clone());
                }
                Arc::new(provider)
            }
            ProviderKind::OpenAI => {
                let mut provider =
                    OpenAIProvider::new(key).with_parameters(credential.parameters.clone());
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.clone());
                }
                Arc::new(provider)
            }
            ProviderKind::Anthropic => {
                let mut provider =
                    AnthropicProvider::new(key).with_parameters(credential.parameters.clone());
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.clone());
                }
                Arc::new(provider)
            }
            ProviderKind::Ollama => {
                Arc::new(OllamaProvider::new(self.ollama_url.clone(), self.model.clone()))
            }
        };
        Ok(provider)
    }
}

/// Hands out the same provider for every credential.
pub struct StaticProviderFactory {
    provider: Arc<dyn LLMProvider>,
}

impl StaticProviderFactory {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

impl ProviderFactory for StaticProviderFactory {
    fn create(&self, _credential: &ApiCredential) -> Result<Arc<dyn LLMProvider>> {
        Ok(self.provider.clone())
    }
}
