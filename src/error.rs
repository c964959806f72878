use thiserror::Error;
use uuid::Uuid;

/// Domain errors callers are expected to match on. Everything else travels as
/// `anyhow::Error`.
#[derive(Debug, Error)]
pub enum DungeonError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent id not found: {0}")]
    AgentIdNotFound(Uuid),

    #[error("Agent already exists: {0}")]
    AgentExists(String),

    #[error("LLM request not found: {0}")]
    LlmRequestNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("World model error: {0}")]
    World(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}
