use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, CommandId, PerceptionId, PerceptionKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionEntry {
    pub id: PerceptionId,
    pub agent_id: AgentId,
    pub source_agent_id: Option<AgentId>,
    pub kind: PerceptionKind,
    pub command_id: Option<CommandId>,
    pub text: String,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

impl PerceptionEntry {
    pub fn environmental(
        agent_id: AgentId,
        source: Option<AgentId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: PerceptionId::new_v4(),
            agent_id,
            source_agent_id: source,
            kind: PerceptionKind::Environmental,
            command_id: None,
            text: text.into(),
            delivered: false,
            created_at: Utc::now(),
        }
    }

    pub fn command_result(
        agent_id: AgentId,
        command_id: CommandId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: PerceptionId::new_v4(),
            agent_id,
            source_agent_id: Some(agent_id),
            kind: PerceptionKind::CommandResult,
            command_id: Some(command_id),
            text: text.into(),
            delivered: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_command(mut self, command_id: CommandId) -> Self {
        self.command_id = Some(command_id);
        self
    }
}
