use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, CommandId, CommandStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEntry {
    pub id: CommandId,
    pub agent_id: AgentId,
    pub command: String,
    pub status: CommandStatus,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

impl CommandEntry {
    pub fn new(agent_id: AgentId, command: impl Into<String>) -> Self {
        Self {
            id: CommandId::new_v4(),
            agent_id,
            command: command.into(),
            status: CommandStatus::Pending,
            output: String::new(),
            created_at: Utc::now(),
        }
    }

    /// First whitespace-delimited token of the command text.
    pub fn verb(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    pub fn complete(&mut self, output: impl Into<String>) {
        self.status = CommandStatus::Completed;
        self.output = output.into();
    }

    pub fn fail(&mut self, output: impl Into<String>) {
        self.status = CommandStatus::Failed;
        self.output = output.into();
    }
}
