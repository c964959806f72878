//! Store wrapper that fails chosen operations, for exercising error paths.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::protocol::DirectiveKey;
use crate::storage::{InMemoryStore, Storage};
use crate::types::{
    Agent, AgentId, AgentPatch, ApiCredential, CommandEntry, CommandId, CommandStatus, LlmRequest,
    LlmRequestId, LlmStatus, Memory, MemoryId, PerceptionEntry, PerceptionId,
};

pub struct FlakyStore {
    pub inner: Arc<InMemoryStore>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(op) {
            bail!("{} unavailable", op);
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStore {
    async fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.check("create_agent")?;
        self.inner.create_agent(agent).await
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>> {
        self.check("get_agent")?;
        self.inner.get_agent(id).await
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>> {
        self.check("get_agent_by_name")?;
        self.inner.get_agent_by_name(name).await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.check("list_agents")?;
        self.inner.list_agents().await
    }

    async fn agents_in_room(&self, room_id: &str) -> Result<Vec<Agent>> {
        self.check("agents_in_room")?;
        self.inner.agents_in_room(room_id).await
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        self.check("update_agent")?;
        self.inner.update_agent(agent).await
    }

    async fn patch_agent(&self, id: AgentId, patch: &AgentPatch) -> Result<bool> {
        self.check("patch_agent")?;
        self.inner.patch_agent(id, patch).await
    }

    async fn create_command(&self, entry: &CommandEntry) -> Result<()> {
        self.check("create_command")?;
        self.inner.create_command(entry).await
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<CommandEntry>> {
        self.check("get_command")?;
        self.inner.get_command(id).await
    }

    async fn update_command(&self, entry: &CommandEntry) -> Result<()> {
        self.check("update_command")?;
        self.inner.update_command(entry).await
    }

    async fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<CommandEntry>> {
        self.check("commands_with_status")?;
        self.inner.commands_with_status(status).await
    }

    async fn claim_command(&self, id: CommandId) -> Result<Option<CommandEntry>> {
        self.check("claim_command")?;
        self.inner.claim_command(id).await
    }

    async fn recent_commands(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CommandEntry>> {
        self.check("recent_commands")?;
        self.inner.recent_commands(agent_id, limit).await
    }

    async fn delete_agent_commands(&self, agent_id: AgentId) -> Result<u64> {
        self.check("delete_agent_commands")?;
        self.inner.delete_agent_commands(agent_id).await
    }

    async fn create_perception(&self, entry: &PerceptionEntry) -> Result<()> {
        self.check("create_perception")?;
        self.inner.create_perception(entry).await
    }

    async fn undelivered_perceptions(&self, agent_id: AgentId) -> Result<Vec<PerceptionEntry>> {
        self.check("undelivered_perceptions")?;
        self.inner.undelivered_perceptions(agent_id).await
    }

    async fn mark_perception_delivered(&self, id: PerceptionId, text: &str) -> Result<bool> {
        self.check("mark_perception_delivered")?;
        self.inner.mark_perception_delivered(id, text).await
    }

    async fn recent_perceptions(
        &self,
        agent_id: Option<AgentId>,
        limit: usize,
    ) -> Result<Vec<PerceptionEntry>> {
        self.check("recent_perceptions")?;
        self.inner.recent_perceptions(agent_id, limit).await
    }

    async fn delete_agent_perceptions(&self, agent_id: AgentId) -> Result<u64> {
        self.check("delete_agent_perceptions")?;
        self.inner.delete_agent_perceptions(agent_id).await
    }

    async fn create_llm_request(&self, request: &LlmRequest) -> Result<()> {
        self.check("create_llm_request")?;
        self.inner.create_llm_request(request).await
    }

    async fn get_llm_request(&self, id: LlmRequestId) -> Result<Option<LlmRequest>> {
        self.check("get_llm_request")?;
        self.inner.get_llm_request(id).await
    }

    async fn update_llm_request(&self, request: &LlmRequest) -> Result<()> {
        self.check("update_llm_request")?;
        self.inner.update_llm_request(request).await
    }

    async fn transition_llm_request(
        &self,
        id: LlmRequestId,
        from: LlmStatus,
        to: LlmStatus,
        response: Option<&str>,
    ) -> Result<bool> {
        self.check("transition_llm_request")?;
        self.inner.transition_llm_request(id, from, to, response).await
    }

    async fn llm_requests_with_status(&self, status: LlmStatus) -> Result<Vec<LlmRequest>> {
        self.check("llm_requests_with_status")?;
        self.inner.llm_requests_with_status(status).await
    }

    async fn recent_llm_requests(
        &self,
        agent_id: AgentId,
        limit: usize,
    ) -> Result<Vec<LlmRequest>> {
        self.check("recent_llm_requests")?;
        self.inner.recent_llm_requests(agent_id, limit).await
    }

    async fn delete_agent_llm_requests(&self, agent_id: AgentId) -> Result<u64> {
        self.check("delete_agent_llm_requests")?;
        self.inner.delete_agent_llm_requests(agent_id).await
    }

    async fn create_memory(&self, memory: &Memory) -> Result<()> {
        self.check("create_memory")?;
        self.inner.create_memory(memory).await
    }

    async fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>> {
        self.check("get_memory")?;
        self.inner.get_memory(id).await
    }

    async fn get_memory_by_key(&self, agent_id: AgentId, key: &str) -> Result<Option<Memory>> {
        self.check("get_memory_by_key")?;
        self.inner.get_memory_by_key(agent_id, key).await
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        self.check("update_memory")?;
        self.inner.update_memory(memory).await
    }

    async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        self.check("delete_memory")?;
        self.inner.delete_memory(id).await
    }

    async fn list_memories(&self, agent_id: AgentId) -> Result<Vec<Memory>> {
        self.check("list_memories")?;
        self.inner.list_memories(agent_id).await
    }

    async fn add_credential(&self, credential: &ApiCredential) -> Result<()> {
        self.check("add_credential")?;
        self.inner.add_credential(credential).await
    }

    async fn acquire_credential(&self) -> Result<Option<ApiCredential>> {
        self.check("acquire_credential")?;
        self.inner.acquire_credential().await
    }

    async fn record_directive(&self, key: &DirectiveKey) -> Result<bool> {
        self.check("record_directive")?;
        self.inner.record_directive(key).await
    }
}
