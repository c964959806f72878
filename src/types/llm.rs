use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AgentId, CredentialId, LlmRequestId, LlmStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub id: LlmRequestId,
    pub agent_id: AgentId,
    pub prompt: String,
    pub status: LlmStatus,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LlmRequest {
    pub fn new(agent_id: AgentId, prompt: impl Into<String>) -> Self {
        Self {
            id: LlmRequestId::new_v4(),
            agent_id,
            prompt: prompt.into(),
            status: LlmStatus::Pending,
            response: None,
            created_at: Utc::now(),
        }
    }
}

/// An API key for the external LLM vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredential {
    pub id: CredentialId,
    pub key: String,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub description: Option<String>,
    /// Generation parameters forwarded to the provider (temperature etc).
    pub parameters: Value,
}

impl ApiCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            id: CredentialId::new_v4(),
            key: key.into(),
            is_active: true,
            usage_count: 0,
            last_used: None,
            description: None,
            parameters: Value::Object(Default::default()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Key prefix safe to print in logs.
    pub fn masked(&self) -> String {
        let prefix: String = self.key.chars().take(5).collect();
        format!("{}...", prefix)
    }
}
