pub mod agent;
pub mod command;
pub mod llm;
pub mod memory;
pub mod perception;

pub use agent::{Agent, AgentFlags, AgentPatch, FlagKind};
pub use command::CommandEntry;
pub use llm::{ApiCredential, LlmRequest};
pub use memory::Memory;
pub use perception::PerceptionEntry;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DungeonError;

pub type AgentId = Uuid;
pub type CommandId = Uuid;
pub type PerceptionId = Uuid;
pub type LlmRequestId = Uuid;
pub type MemoryId = Uuid;
pub type CredentialId = Uuid;
pub type RoomId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    #[default]
    Idle,     // Nothing outstanding
    Thinking, // Waiting on an LLM request
    Acting,   // Response delivered, extracted commands in flight
}

impl AgentPhase {
    pub fn as_str(&self) -> &str {
        match self {
            AgentPhase::Idle => "idle",
            AgentPhase::Thinking => "thinking",
            AgentPhase::Acting => "acting",
        }
    }
}

impl FromStr for AgentPhase {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentPhase::Idle),
            "thinking" => Ok(AgentPhase::Thinking),
            "acting" => Ok(AgentPhase::Acting),
            other => Err(DungeonError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Processing => "processing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

impl FromStr for CommandStatus {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "processing" => Ok(CommandStatus::Processing),
            "completed" => Ok(CommandStatus::Completed),
            "failed" => Ok(CommandStatus::Failed),
            other => Err(DungeonError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerceptionKind {
    CommandResult,
    Environmental,
}

impl PerceptionKind {
    pub fn as_str(&self) -> &str {
        match self {
            PerceptionKind::CommandResult => "command-result",
            PerceptionKind::Environmental => "environmental",
        }
    }
}

impl FromStr for PerceptionKind {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command-result" => Ok(PerceptionKind::CommandResult),
            "environmental" => Ok(PerceptionKind::Environmental),
            other => Err(DungeonError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmStatus {
    #[default]
    Pending,
    Thinking,
    Completed,
    Failed,
    Delivered,
}

impl LlmStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LlmStatus::Pending => "pending",
            LlmStatus::Thinking => "thinking",
            LlmStatus::Completed => "completed",
            LlmStatus::Failed => "failed",
            LlmStatus::Delivered => "delivered",
        }
    }

    /// Pending and thinking requests count against the single-flight limit.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, LlmStatus::Pending | LlmStatus::Thinking)
    }
}

impl FromStr for LlmStatus {
    type Err = DungeonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LlmStatus::Pending),
            "thinking" => Ok(LlmStatus::Thinking),
            "completed" => Ok(LlmStatus::Completed),
            "failed" => Ok(LlmStatus::Failed),
            "delivered" => Ok(LlmStatus::Delivered),
            other => Err(DungeonError::InvalidStatus(other.to_string())),
        }
    }
}
