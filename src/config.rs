use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::DungeonError;
use crate::providers::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub world_path: PathBuf,
    pub prompts_dir: PathBuf,
    pub database_url: Option<String>,
    pub api_port: u16,
    pub agent_tick_secs: u64,
    pub command_poll_millis: u64,
    pub activity_window_secs: i64,
    pub perception_limit: usize,
    pub llm_timeout_secs: u64,
    pub llm_provider: ProviderKind,
    pub llm_model: Option<String>,
    pub ollama_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world_path: PathBuf::from("data/world.json"),
            prompts_dir: PathBuf::from("prompts"),
            database_url: None,
            api_port: 8000,
            agent_tick_secs: 5,
            command_poll_millis: 1000,
            activity_window_secs: 300,
            perception_limit: 5000,
            llm_timeout_secs: 120,
            llm_provider: ProviderKind::Gemini,
            llm_model: None,
            ollama_url: None,
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| DungeonError::Config(format!("{}: {}", name, e)).into()),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults, then the TOML file (when given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DungeonError::Config(e.to_string()).into())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<PathBuf>("MAD_WORLD_PATH")? {
            self.world_path = v;
        }
        if let Some(v) = env_parse::<PathBuf>("MAD_PROMPTS_DIR")? {
            self.prompts_dir = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = env_parse("MAD_API_PORT")? {
            self.api_port = v;
        }
        if let Some(v) = env_parse("MAD_AGENT_TICK_SECS")? {
            self.agent_tick_secs = v;
        }
        if let Some(v) = env_parse("MAD_COMMAND_POLL_MILLIS")? {
            self.command_poll_millis = v;
        }
        if let Some(v) = env_parse("MAD_ACTIVITY_WINDOW_SECS")? {
            self.activity_window_secs = v;
        }
        if let Some(v) = env_parse("MAD_PERCEPTION_LIMIT")? {
            self.perception_limit = v;
        }
        if let Some(v) = env_parse("MAD_LLM_TIMEOUT_SECS")? {
            self.llm_timeout_secs = v;
        }
        if let Some(v) = env_parse("MAD_LLM_PROVIDER")? {
            self.llm_provider = v;
        }
        if let Ok(v) = std::env::var("MAD_LLM_MODEL") {
            self.llm_model = Some(v);
        }
        if let Ok(v) = std::env::var("OLLAMA_URL") {
            self.ollama_url = Some(v);
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(v);
        }
        Ok(())
    }

    /// The key for the configured provider, seeded into the credential store.
    pub fn provider_api_key(&self) -> Option<&str> {
        match self.llm_provider {
            ProviderKind::Gemini => self.gemini_api_key.as_deref(),
            ProviderKind::OpenAI => self.openai_api_key.as_deref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
            ProviderKind::Ollama => Some("ollama-local"),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            activity_window: chrono::Duration::seconds(self.activity_window_secs),
            perception_limit: self.perception_limit,
            llm_timeout: std::time::Duration::from_secs(self.llm_timeout_secs),
        }
    }
}

/// Tunables injected into the dispatcher, the agent loop and the orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub activity_window: chrono::Duration,
    pub perception_limit: usize,
    pub llm_timeout: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent_tick_secs, 5);
        assert_eq!(config.perception_limit, 5000);
        let settings = config.engine_settings();
        assert_eq!(settings.activity_window, chrono::Duration::minutes(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            api_port = 9100
            llm_provider = "ollama"
            world_path = "worlds/keep.yaml"
            "#,
        )
        .unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.llm_provider, ProviderKind::Ollama);
        assert_eq!(config.world_path, PathBuf::from("worlds/keep.yaml"));
        assert_eq!(config.command_poll_millis, 1000);
        assert_eq!(config.provider_api_key(), Some("ollama-local"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "perception_limit = 1200\nactivity_window_secs = 60").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.perception_limit, 1200);
        assert_eq!(config.engine_settings().activity_window, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("api_port = \"not a number\"").unwrap_err();
        assert!(err.downcast_ref::<DungeonError>().is_some());
    }
}
