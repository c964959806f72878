//! Operations offered to a presentation layer (HTTP API, CLI, tests).

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::DungeonError;
use crate::storage::Storage;
use crate::types::agent::DEFAULT_START_ROOM;
use crate::types::{
    Agent, AgentId, AgentPatch, AgentPhase, CommandEntry, CommandId, LlmRequest, LlmRequestId,
    LlmStatus, PerceptionEntry,
};
use crate::world::WorldModel;

const SNAPSHOT_HISTORY: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct LoadedMemory {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub agent: Agent,
    pub room_title: String,
    pub loaded_memories: Vec<LoadedMemory>,
    pub recent_commands: Vec<CommandEntry>,
    pub recent_perceptions: Vec<PerceptionEntry>,
    pub recent_llm_requests: Vec<LlmRequest>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetSummary {
    pub commands: u64,
    pub perceptions: u64,
    pub llm_requests: u64,
}

pub struct DungeonService {
    storage: Arc<dyn Storage>,
    world: Arc<WorldModel>,
    prompts_dir: Option<PathBuf>,
}

impl DungeonService {
    pub fn new(storage: Arc<dyn Storage>, world: Arc<WorldModel>) -> Self {
        Self {
            storage,
            world,
            prompts_dir: None,
        }
    }

    /// Persona prompts are kept in `<dir>/<agent name>.md`.
    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = Some(dir.into());
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    async fn agent(&self, name: &str) -> Result<Agent> {
        self.storage
            .get_agent_by_name(name)
            .await?
            .ok_or_else(|| DungeonError::AgentNotFound(name.to_string()).into())
    }

    pub async fn register_agent(&self, name: &str, location: Option<&str>) -> Result<Agent> {
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DungeonError::InvalidInput(format!("invalid agent name '{}'", name)).into());
        }
        if self.storage.get_agent_by_name(name).await?.is_some() {
            return Err(DungeonError::AgentExists(name.to_string()).into());
        }

        let location = location.unwrap_or(DEFAULT_START_ROOM);
        if self.world.room(location).is_none() {
            return Err(DungeonError::World(format!("unknown room '{}'", location)).into());
        }

        let mut agent = Agent::new(name, location);
        if let Some(prompt) = self.read_or_create_prompt(&agent).await? {
            agent.prompt = prompt;
        }
        self.storage.create_agent(&agent).await?;
        log::info!("Registered agent {} in {}", agent.name, agent.location);
        Ok(agent)
    }

    /// Loads every agent's persona from its prompt file, creating missing
    /// files from the stored prompt. Returns how many prompts changed.
    pub async fn load_prompts(&self) -> Result<usize> {
        let mut changed = 0;
        for agent in self.storage.list_agents().await? {
            if let Some(prompt) = self.read_or_create_prompt(&agent).await? {
                if prompt != agent.prompt {
                    let patch = AgentPatch {
                        prompt: Some(prompt),
                        ..Default::default()
                    };
                    self.storage.patch_agent(agent.id, &patch).await?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn read_or_create_prompt(&self, agent: &Agent) -> Result<Option<String>> {
        let dir = match &self.prompts_dir {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let path = dir.join(format!("{}.md", agent.name));
        if tokio::fs::try_exists(&path).await? {
            return Ok(Some(tokio::fs::read_to_string(&path).await?));
        }
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, &agent.prompt).await?;
        log::info!("Created prompt file {}", path.display());
        Ok(Some(agent.prompt.clone()))
    }

    pub async fn enqueue_command(&self, name: &str, text: &str) -> Result<CommandId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DungeonError::InvalidInput("empty command".to_string()).into());
        }
        let agent = self.agent(name).await?;
        let entry = CommandEntry::new(agent.id, text);
        self.storage.create_command(&entry).await?;
        log::debug!("Queued '{}' for {}", text, agent.name);
        Ok(entry.id)
    }

    pub async fn get_agent_snapshot(&self, name: &str) -> Result<AgentSnapshot> {
        let agent = self.agent(name).await?;

        let mut loaded_memories = Vec::new();
        for id in &agent.memories_loaded {
            if let Some(memory) = self.storage.get_memory(*id).await? {
                loaded_memories.push(LoadedMemory {
                    key: memory.key,
                    value: memory.value,
                });
            }
        }

        let room_title = self.world.view(&agent.location).title;
        Ok(AgentSnapshot {
            room_title,
            loaded_memories,
            recent_commands: self.storage.recent_commands(agent.id, SNAPSHOT_HISTORY).await?,
            recent_perceptions: self
                .storage
                .recent_perceptions(Some(agent.id), SNAPSHOT_HISTORY)
                .await?,
            recent_llm_requests: self
                .storage
                .recent_llm_requests(agent.id, SNAPSHOT_HISTORY)
                .await?,
            agent,
        })
    }

    pub async fn set_running(&self, name: &str, running: bool) -> Result<Agent> {
        let mut agent = self.agent(name).await?;
        let patch = AgentPatch {
            is_running: Some(running),
            ..Default::default()
        };
        self.storage.patch_agent(agent.id, &patch).await?;
        patch.apply(&mut agent);
        log::info!("{} {}", agent.name, if running { "started" } else { "stopped" });
        Ok(agent)
    }

    /// Clears the agent's three queues and its perception buffer and returns
    /// it to `idle`.
    pub async fn reset(&self, name: &str) -> Result<ResetSummary> {
        let agent = self.agent(name).await?;
        let summary = ResetSummary {
            commands: self.storage.delete_agent_commands(agent.id).await?,
            perceptions: self.storage.delete_agent_perceptions(agent.id).await?,
            llm_requests: self.storage.delete_agent_llm_requests(agent.id).await?,
        };
        let patch = AgentPatch {
            perception: Some(String::new()),
            phase: Some(AgentPhase::Idle),
            ..Default::default()
        };
        self.storage.patch_agent(agent.id, &patch).await?;
        log::info!("Reset {}: {:?}", agent.name, summary);
        Ok(summary)
    }

    pub async fn update_prompt(
        &self,
        name: &str,
        prompt: Option<String>,
        perception: Option<String>,
    ) -> Result<Agent> {
        let mut agent = self.agent(name).await?;
        if let (Some(dir), Some(text)) = (&self.prompts_dir, &prompt) {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(format!("{}.md", agent.name)), text).await?;
        }
        let patch = AgentPatch {
            prompt,
            perception,
            ..Default::default()
        };
        self.storage.patch_agent(agent.id, &patch).await?;
        patch.apply(&mut agent);
        Ok(agent)
    }

    /// Manual override: records `text` as a completed response, picked up by
    /// the agent loop like any other.
    pub async fn submit_llm_response(&self, name: &str, text: &str) -> Result<LlmRequestId> {
        let agent = self.agent(name).await?;
        let mut request = LlmRequest::new(agent.id, "manual response");
        request.status = LlmStatus::Completed;
        request.response = Some(text.to_string());
        self.storage.create_llm_request(&request).await?;
        log::info!("Manual LLM response {} submitted for {}", request.id, agent.name);
        Ok(request.id)
    }

    pub async fn update_llm_request(
        &self,
        id: LlmRequestId,
        status: Option<LlmStatus>,
        response: Option<String>,
    ) -> Result<LlmRequest> {
        let mut request = self
            .storage
            .get_llm_request(id)
            .await?
            .ok_or(DungeonError::LlmRequestNotFound(id))?;
        if let Some(status) = status {
            if status.is_outstanding() && !request.status.is_outstanding() {
                self.ensure_nothing_outstanding(request.agent_id, id).await?;
            }
            request.status = status;
        }
        if response.is_some() {
            request.response = response;
        }
        self.storage.update_llm_request(&request).await?;
        log::info!("LLM request {} set to {}", id, request.status.as_str());
        Ok(request)
    }

    /// An agent may have at most one pending or thinking request.
    async fn ensure_nothing_outstanding(
        &self,
        agent_id: AgentId,
        except: LlmRequestId,
    ) -> Result<()> {
        for status in [LlmStatus::Pending, LlmStatus::Thinking] {
            let busy = self
                .storage
                .llm_requests_with_status(status)
                .await?
                .into_iter()
                .find(|r| r.agent_id == agent_id && r.id != except);
            if let Some(other) = busy {
                return Err(DungeonError::InvalidStatus(format!(
                    "request {} is already {} for this agent",
                    other.id,
                    other.status.as_str()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Most recent perceptions, newest first, for one agent or all of them.
    pub async fn perception_log(
        &self,
        name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PerceptionEntry>> {
        let agent_id = match name {
            Some(name) => Some(self.agent(name).await?.id),
            None => None,
        };
        self.storage.recent_perceptions(agent_id, limit).await
    }
}
