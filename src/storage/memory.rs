use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::DungeonError;
use crate::protocol::DirectiveKey;
use crate::storage::traits::Storage;
use crate::types::{
    Agent, AgentId, AgentPatch, ApiCredential, CommandEntry, CommandId, CommandStatus,
    CredentialId, LlmRequest, LlmRequestId, LlmStatus, Memory, MemoryId, PerceptionEntry,
    PerceptionId,
};

/// Process-local store. Queues keep insertion order; reads sort by creation time.
#[derive(Clone)]
pub struct InMemoryStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
    commands: Arc<RwLock<Vec<CommandEntry>>>,
    perceptions: Arc<RwLock<Vec<PerceptionEntry>>>,
    llm_requests: Arc<RwLock<Vec<LlmRequest>>>,
    memories: Arc<RwLock<HashMap<MemoryId, Memory>>>,
    credentials: Arc<RwLock<HashMap<CredentialId, ApiCredential>>>,
    directives: Arc<RwLock<HashSet<DirectiveKey>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            commands: Arc::new(RwLock::new(Vec::new())),
            perceptions: Arc::new(RwLock::new(Vec::new())),
            llm_requests: Arc::new(RwLock::new(Vec::new())),
            memories: Arc::new(RwLock::new(HashMap::new())),
            credentials: Arc::new(RwLock::new(HashMap::new())),
            directives: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// All commands for an agent, oldest first. Test and debugging helper.
    pub fn commands_for(&self, agent_id: AgentId) -> Result<Vec<CommandEntry>> {
        let commands = read(&self.commands)?;
        Ok(oldest_first(
            commands.iter().filter(|c| c.agent_id == agent_id).cloned().collect(),
            |c| c.created_at,
        ))
    }

    /// All perceptions for an agent, oldest first. Test and debugging helper.
    pub fn perceptions_for(&self, agent_id: AgentId) -> Result<Vec<PerceptionEntry>> {
        let perceptions = read(&self.perceptions)?;
        Ok(oldest_first(
            perceptions.iter().filter(|p| p.agent_id == agent_id).cloned().collect(),
            |p| p.created_at,
        ))
    }

    /// All LLM requests for an agent, oldest first. Test and debugging helper.
    pub fn llm_requests_for(&self, agent_id: AgentId) -> Result<Vec<LlmRequest>> {
        let requests = read(&self.llm_requests)?;
        Ok(oldest_first(
            requests.iter().filter(|r| r.agent_id == agent_id).cloned().collect(),
            |r| r.created_at,
        ))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| DungeonError::LockPoisoned.into())
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| DungeonError::LockPoisoned.into())
}

fn oldest_first<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

fn newest_first<T, K: Ord>(items: Vec<T>, key: impl Fn(&T) -> K, limit: usize) -> Vec<T> {
    let mut items = oldest_first(items, key);
    items.reverse();
    items.truncate(limit);
    items
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn create_agent(&self, agent: &Agent) -> Result<()> {
        let mut agents = write(&self.agents)?;
        if agents.values().any(|a| a.name == agent.name) {
            return Err(DungeonError::AgentExists(agent.name.clone()).into());
        }
        agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>> {
        Ok(read(&self.agents)?.get(&id).cloned())
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>> {
        Ok(read(&self.agents)?.values().find(|a| a.name == name).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let agents = read(&self.agents)?;
        let mut list: Vec<Agent> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn agents_in_room(&self, room_id: &str) -> Result<Vec<Agent>> {
        let agents = read(&self.agents)?;
        let mut list: Vec<Agent> = agents
            .values()
            .filter(|a| a.location == room_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        write(&self.agents)?.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn patch_agent(&self, id: AgentId, patch: &AgentPatch) -> Result<bool> {
        let mut agents = write(&self.agents)?;
        match agents.get_mut(&id) {
            Some(agent) => {
                patch.apply(agent);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_command(&self, entry: &CommandEntry) -> Result<()> {
        write(&self.commands)?.push(entry.clone());
        Ok(())
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<CommandEntry>> {
        Ok(read(&self.commands)?.iter().find(|c| c.id == id).cloned())
    }

    async fn update_command(&self, entry: &CommandEntry) -> Result<()> {
        let mut commands = write(&self.commands)?;
        if let Some(existing) = commands.iter_mut().find(|c| c.id == entry.id) {
            *existing = entry.clone();
        }
        Ok(())
    }

    async fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<CommandEntry>> {
        let commands = read(&self.commands)?;
        Ok(oldest_first(
            commands.iter().filter(|c| c.status == status).cloned().collect(),
            |c| c.created_at,
        ))
    }

    async fn claim_command(&self, id: CommandId) -> Result<Option<CommandEntry>> {
        let mut commands = write(&self.commands)?;
        Ok(commands
            .iter_mut()
            .find(|c| c.id == id && c.status == CommandStatus::Pending)
            .map(|entry| {
                entry.status = CommandStatus::Processing;
                entry.clone()
            }))
    }

    async fn recent_commands(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CommandEntry>> {
        let commands = read(&self.commands)?;
        Ok(newest_first(
            commands.iter().filter(|c| c.agent_id == agent_id).cloned().collect(),
            |c| c.created_at,
            limit,
        ))
    }

    async fn delete_agent_commands(&self, agent_id: AgentId) -> Result<u64> {
        let mut commands = write(&self.commands)?;
        let before = commands.len();
        commands.retain(|c| c.agent_id != agent_id);
        Ok((before - commands.len()) as u64)
    }

    async fn create_perception(&self, entry: &PerceptionEntry) -> Result<()> {
        write(&self.perceptions)?.push(entry.clone());
        Ok(())
    }

    async fn undelivered_perceptions(&self, agent_id: AgentId) -> Result<Vec<PerceptionEntry>> {
        let perceptions = read(&self.perceptions)?;
        Ok(oldest_first(
            perceptions
                .iter()
                .filter(|p| p.agent_id == agent_id && !p.delivered)
                .cloned()
                .collect(),
            |p| p.created_at,
        ))
    }

    async fn mark_perception_delivered(&self, id: PerceptionId, text: &str) -> Result<bool> {
        let mut perceptions = write(&self.perceptions)?;
        match perceptions.iter_mut().find(|p| p.id == id && !p.delivered) {
            Some(entry) => {
                entry.delivered = true;
                entry.text = text.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_perceptions(
        &self,
        agent_id: Option<AgentId>,
        limit: usize,
    ) -> Result<Vec<PerceptionEntry>> {
        let perceptions = read(&self.perceptions)?;
        Ok(newest_first(
            perceptions
                .iter()
                .filter(|p| agent_id.map_or(true, |id| p.agent_id == id))
                .cloned()
                .collect(),
            |p| p.created_at,
            limit,
        ))
    }

    async fn delete_agent_perceptions(&self, agent_id: AgentId) -> Result<u64> {
        let mut perceptions = write(&self.perceptions)?;
        let before = perceptions.len();
        perceptions.retain(|p| p.agent_id != agent_id);
        Ok((before - perceptions.len()) as u64)
    }

    async fn create_llm_request(&self, request: &LlmRequest) -> Result<()> {
        write(&self.llm_requests)?.push(request.clone());
        Ok(())
    }

    async fn get_llm_request(&self, id: LlmRequestId) -> Result<Option<LlmRequest>> {
        Ok(read(&self.llm_requests)?.iter().find(|r| r.id == id).cloned())
    }

    async fn update_llm_request(&self, request: &LlmRequest) -> Result<()> {
        let mut requests = write(&self.llm_requests)?;
        if let Some(existing) = requests.iter_mut().find(|r| r.id == request.id) {
            *existing = request.clone();
        }
        Ok(())
    }

    async fn transition_llm_request(
        &self,
        id: LlmRequestId,
        from: LlmStatus,
        to: LlmStatus,
        response: Option<&str>,
    ) -> Result<bool> {
        let mut requests = write(&self.llm_requests)?;
        match requests.iter_mut().find(|r| r.id == id && r.status == from) {
            Some(request) => {
                request.status = to;
                if let Some(text) = response {
                    request.response = Some(text.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn llm_requests_with_status(&self, status: LlmStatus) -> Result<Vec<LlmRequest>> {
        let requests = read(&self.llm_requests)?;
        Ok(oldest_first(
            requests.iter().filter(|r| r.status == status).cloned().collect(),
            |r| r.created_at,
        ))
    }

    async fn recent_llm_requests(
        &self,
        agent_id: AgentId,
        limit: usize,
    ) -> Result<Vec<LlmRequest>> {
        let requests = read(&self.llm_requests)?;
        Ok(newest_first(
            requests.iter().filter(|r| r.agent_id == agent_id).cloned().collect(),
            |r| r.created_at,
            limit,
        ))
    }

    async fn delete_agent_llm_requests(&self, agent_id: AgentId) -> Result<u64> {
        let mut requests = write(&self.llm_requests)?;
        let before = requests.len();
        requests.retain(|r| r.agent_id != agent_id);
        Ok((before - requests.len()) as u64)
    }

    async fn create_memory(&self, memory: &Memory) -> Result<()> {
        let mut memories = write(&self.memories)?;
        if memories
            .values()
            .any(|m| m.agent_id == memory.agent_id && m.key == memory.key)
        {
            anyhow::bail!("memory key '{}' already exists for this agent", memory.key);
        }
        memories.insert(memory.id, memory.clone());
        Ok(())
    }

    async fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>> {
        Ok(read(&self.memories)?.get(&id).cloned())
    }

    async fn get_memory_by_key(&self, agent_id: AgentId, key: &str) -> Result<Option<Memory>> {
        Ok(read(&self.memories)?
            .values()
            .find(|m| m.agent_id == agent_id && m.key == key)
            .cloned())
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        write(&self.memories)?.insert(memory.id, memory.clone());
        Ok(())
    }

    async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        write(&self.memories)?.remove(&id);
        Ok(())
    }

    async fn list_memories(&self, agent_id: AgentId) -> Result<Vec<Memory>> {
        let memories = read(&self.memories)?;
        let mut list: Vec<Memory> = memories
            .values()
            .filter(|m| m.agent_id == agent_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(list)
    }

    async fn add_credential(&self, credential: &ApiCredential) -> Result<()> {
        let mut credentials = write(&self.credentials)?;
        if credentials.values().any(|c| c.key == credential.key) {
            return Ok(());
        }
        credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn acquire_credential(&self) -> Result<Option<ApiCredential>> {
        let mut credentials = write(&self.credentials)?;
        // None sorts before Some, so never-used keys go first.
        let chosen = credentials
            .values_mut()
            .filter(|c| c.is_active)
            .min_by_key(|c| c.last_used);
        Ok(chosen.map(|credential| {
            credential.usage_count += 1;
            credential.last_used = Some(Utc::now());
            credential.clone()
        }))
    }

    async fn record_directive(&self, key: &DirectiveKey) -> Result<bool> {
        Ok(write(&self.directives)?.insert(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DirectiveSource;
    use crate::types::agent::DEFAULT_START_ROOM;
    use chrono::Duration;

    fn create_test_agent(name: &str) -> Agent {
        Agent::new(name, DEFAULT_START_ROOM)
    }

    #[tokio::test]
    async fn test_agent_operations() {
        let store = InMemoryStore::new();
        let agent = create_test_agent("Alice");

        store.create_agent(&agent).await.unwrap();

        let retrieved = store.get_agent(agent.id).await.unwrap();
        assert_eq!(retrieved.unwrap().name, "Alice");

        let by_name = store.get_agent_by_name("Alice").await.unwrap();
        assert_eq!(by_name.unwrap().id, agent.id);
    }

    #[tokio::test]
    async fn test_agent_names_unique() {
        let store = InMemoryStore::new();
        store.create_agent(&create_test_agent("Twin")).await.unwrap();
        assert!(store.create_agent(&create_test_agent("Twin")).await.is_err());
    }

    #[tokio::test]
    async fn test_patch_agent_keeps_other_fields() {
        let store = InMemoryStore::new();
        let agent = create_test_agent("Bob");
        store.create_agent(&agent).await.unwrap();

        let patch = AgentPatch {
            perception: Some("MAD: hello".to_string()),
            ..Default::default()
        };
        assert!(store.patch_agent(agent.id, &patch).await.unwrap());

        let updated = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(updated.perception, "MAD: hello");
        assert_eq!(updated.location, DEFAULT_START_ROOM);
        assert!(!store.patch_agent(AgentId::new_v4(), &patch).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_command_compare_and_set() {
        let store = InMemoryStore::new();
        let agent = create_test_agent("Carol");
        let mut older = CommandEntry::new(agent.id, "look");
        older.created_at = Utc::now() - Duration::seconds(10);
        let newer = CommandEntry::new(agent.id, "ping");

        store.create_command(&newer).await.unwrap();
        store.create_command(&older).await.unwrap();

        let pending = store.commands_with_status(CommandStatus::Pending).await.unwrap();
        assert_eq!(pending.iter().map(|c| c.id).collect::<Vec<_>>(), vec![older.id, newer.id]);

        let claimed = store.claim_command(older.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, CommandStatus::Processing);
        assert!(store.claim_command(older.id).await.unwrap().is_none());

        let processing = store.commands_with_status(CommandStatus::Processing).await.unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, older.id);
    }

    #[tokio::test]
    async fn test_perception_delivered_once() {
        let store = InMemoryStore::new();
        let agent = create_test_agent("Dave");
        let perception = PerceptionEntry::environmental(agent.id, None, "A bell rings.");
        store.create_perception(&perception).await.unwrap();

        assert_eq!(store.undelivered_perceptions(agent.id).await.unwrap().len(), 1);
        assert!(store
            .mark_perception_delivered(perception.id, "A bell rings.")
            .await
            .unwrap());
        assert!(!store
            .mark_perception_delivered(perception.id, "A bell rings.")
            .await
            .unwrap());
        assert!(store.undelivered_perceptions(agent.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_llm_request_compare_and_set() {
        let store = InMemoryStore::new();
        let agent = create_test_agent("Eve");
        let request = LlmRequest::new(agent.id, "prompt");
        store.create_llm_request(&request).await.unwrap();

        assert!(!store
            .transition_llm_request(
                request.id,
                LlmStatus::Thinking,
                LlmStatus::Completed,
                Some("x"),
            )
            .await
            .unwrap());
        assert!(store
            .transition_llm_request(request.id, LlmStatus::Pending, LlmStatus::Thinking, None)
            .await
            .unwrap());
        assert!(store
            .transition_llm_request(
                request.id,
                LlmStatus::Thinking,
                LlmStatus::Completed,
                Some("done"),
            )
            .await
            .unwrap());

        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Completed);
        assert_eq!(stored.response.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_memory_keys_unique_per_agent() {
        let store = InMemoryStore::new();
        let alice = create_test_agent("Alice");
        let bob = create_test_agent("Bob");

        store.create_memory(&Memory::new(alice.id, "home", "hall")).await.unwrap();
        store.create_memory(&Memory::new(bob.id, "home", "tower")).await.unwrap();
        assert!(store.create_memory(&Memory::new(alice.id, "home", "cellar")).await.is_err());

        let found = store.get_memory_by_key(bob.id, "home").await.unwrap().unwrap();
        assert_eq!(found.value, "tower");
    }

    #[tokio::test]
    async fn test_acquire_credential_round_robin() {
        let store = InMemoryStore::new();
        assert!(store.acquire_credential().await.unwrap().is_none());

        let first = ApiCredential::new("key-one");
        let second = ApiCredential::new("key-two");
        let mut inactive = ApiCredential::new("key-off");
        inactive.is_active = false;
        store.add_credential(&first).await.unwrap();
        store.add_credential(&second).await.unwrap();
        store.add_credential(&inactive).await.unwrap();

        let a = store.acquire_credential().await.unwrap().unwrap();
        let b = store.acquire_credential().await.unwrap().unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.key, "key-off");
        assert_ne!(b.key, "key-off");
        assert_eq!(a.usage_count, 1);
    }

    #[tokio::test]
    async fn test_record_directive_once() {
        let store = InMemoryStore::new();
        let key = DirectiveKey::new(DirectiveSource::Perception, uuid::Uuid::new_v4(), 0);
        assert!(store.record_directive(&key).await.unwrap());
        assert!(!store.record_directive(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_deletes_only_that_agent() {
        let store = InMemoryStore::new();
        let alice = create_test_agent("Alice");
        let bob = create_test_agent("Bob");
        store.create_command(&CommandEntry::new(alice.id, "look")).await.unwrap();
        store.create_command(&CommandEntry::new(bob.id, "look")).await.unwrap();

        assert_eq!(store.delete_agent_commands(alice.id).await.unwrap(), 1);
        assert_eq!(store.recent_commands(bob.id, 5).await.unwrap().len(), 1);
    }
}
