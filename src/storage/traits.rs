use anyhow::Result;
use async_trait::async_trait;

use crate::protocol::DirectiveKey;
use crate::types::{
    Agent, AgentId, AgentPatch, ApiCredential, CommandEntry, CommandId, CommandStatus, LlmRequest,
    LlmRequestId, LlmStatus, Memory, MemoryId, PerceptionEntry, PerceptionId,
};

/// Durable state shared by the command worker, the agent loop and the API.
///
/// Every method touches a single record or a single filtered range; the
/// compare-and-set methods (`claim_command`, `mark_perception_delivered`,
/// `transition_llm_request`) are the only coordination primitives.
#[async_trait]
pub trait Storage: Send + Sync {
    // Agent operations
    async fn create_agent(&self, agent: &Agent) -> Result<()>;
    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>>;
    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn agents_in_room(&self, room_id: &str) -> Result<Vec<Agent>>;
    async fn update_agent(&self, agent: &Agent) -> Result<()>;
    /// Applies only the fields set in the patch. Returns false if the agent is gone.
    async fn patch_agent(&self, id: AgentId, patch: &AgentPatch) -> Result<bool>;

    // Command queue
    async fn create_command(&self, entry: &CommandEntry) -> Result<()>;
    async fn get_command(&self, id: CommandId) -> Result<Option<CommandEntry>>;
    async fn update_command(&self, entry: &CommandEntry) -> Result<()>;
    /// Oldest first.
    async fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<CommandEntry>>;
    /// Moves the entry from pending to processing and returns it. None if it
    /// was no longer pending.
    async fn claim_command(&self, id: CommandId) -> Result<Option<CommandEntry>>;
    /// Newest first.
    async fn recent_commands(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CommandEntry>>;
    async fn delete_agent_commands(&self, agent_id: AgentId) -> Result<u64>;

    // Perception channel
    async fn create_perception(&self, entry: &PerceptionEntry) -> Result<()>;
    /// Oldest first.
    async fn undelivered_perceptions(&self, agent_id: AgentId) -> Result<Vec<PerceptionEntry>>;
    /// Flips `delivered` to true and stores the (possibly rewritten) text.
    /// Returns false if the entry was already delivered.
    async fn mark_perception_delivered(&self, id: PerceptionId, text: &str) -> Result<bool>;
    /// Newest first, across all agents when `agent_id` is None.
    async fn recent_perceptions(
        &self,
        agent_id: Option<AgentId>,
        limit: usize,
    ) -> Result<Vec<PerceptionEntry>>;
    async fn delete_agent_perceptions(&self, agent_id: AgentId) -> Result<u64>;

    // LLM queue
    async fn create_llm_request(&self, request: &LlmRequest) -> Result<()>;
    async fn get_llm_request(&self, id: LlmRequestId) -> Result<Option<LlmRequest>>;
    async fn update_llm_request(&self, request: &LlmRequest) -> Result<()>;
    /// Sets `to` (and the response, when given) only if the request is still in `from`.
    async fn transition_llm_request(
        &self,
        id: LlmRequestId,
        from: LlmStatus,
        to: LlmStatus,
        response: Option<&str>,
    ) -> Result<bool>;
    /// Oldest first.
    async fn llm_requests_with_status(&self, status: LlmStatus) -> Result<Vec<LlmRequest>>;
    /// Newest first.
    async fn recent_llm_requests(&self, agent_id: AgentId, limit: usize) -> Result<Vec<LlmRequest>>;
    async fn delete_agent_llm_requests(&self, agent_id: AgentId) -> Result<u64>;

    // Memories
    async fn create_memory(&self, memory: &Memory) -> Result<()>;
    async fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>>;
    async fn get_memory_by_key(&self, agent_id: AgentId, key: &str) -> Result<Option<Memory>>;
    async fn update_memory(&self, memory: &Memory) -> Result<()>;
    async fn delete_memory(&self, id: MemoryId) -> Result<()>;
    /// Ordered by key.
    async fn list_memories(&self, agent_id: AgentId) -> Result<Vec<Memory>>;

    // Credentials
    async fn add_credential(&self, credential: &ApiCredential) -> Result<()>;
    /// Picks the active credential used least recently and records the use.
    async fn acquire_credential(&self) -> Result<Option<ApiCredential>>;

    // Directive ledger
    /// Records a directive occurrence. Returns false if it was already recorded.
    async fn record_directive(&self, key: &DirectiveKey) -> Result<bool>;
}
