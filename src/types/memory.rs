use serde::{Deserialize, Serialize};

use super::{AgentId, MemoryId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub agent_id: AgentId,
    pub key: String,
    pub value: String,
}

impl Memory {
    pub fn new(agent_id: AgentId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: MemoryId::new_v4(),
            agent_id,
            key: key.into(),
            value: value.into(),
        }
    }
}
