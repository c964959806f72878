//! Agent Loop: one pass over every agent per tick.
//!
//! For a running, ungated agent a tick drains its perception channel into the
//! bounded buffer, then advances the LLM phase by exactly one step. The loop
//! writes only the fields it changed, so it never clobbers what the command
//! worker wrote in between.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::engine::buffer::{self, LLM_PREFIX, PERCEPTION_PREFIX};
use crate::engine::lifecycle::{AgentStateMachine, Gate, LlmStep};
use crate::engine::orchestrator::LlmOrchestrator;
use crate::engine::prompt;
use crate::engine::scheduler::Tick;
use crate::protocol::{DirectiveProcessor, DirectiveSource};
use crate::storage::Storage;
use crate::types::{Agent, AgentId, AgentPatch, LlmRequest, LlmRequestId, LlmStatus};

/// How many of an agent's newest requests are considered each tick.
const REQUEST_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Missing,
    Skipped(Gate),
    Delivered(LlmRequestId),
    Awaiting(LlmRequestId),
    Blocked(LlmRequestId),
    Submitted(LlmRequestId),
}

pub struct AgentLoop {
    storage: Arc<dyn Storage>,
    processor: DirectiveProcessor,
    orchestrator: Arc<LlmOrchestrator>,
    settings: EngineSettings,
}

impl AgentLoop {
    pub fn new(
        storage: Arc<dyn Storage>,
        orchestrator: Arc<LlmOrchestrator>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            processor: DirectiveProcessor::new(storage.clone()),
            storage,
            orchestrator,
            settings,
        }
    }

    /// Starts calls for pending requests, then ticks every agent. One
    /// agent's failure is logged and does not stop the pass.
    pub async fn run_once(&self) -> Result<()> {
        if let Err(e) = self.orchestrator.dispatch_pending().await {
            log::error!("LLM dispatch failed: {:#}", e);
        }

        for agent in self.storage.list_agents().await? {
            if let Err(e) = self.tick_agent(agent.id).await {
                log::error!("Tick for agent {} failed: {:#}", agent.name, e);
            }
        }
        Ok(())
    }

    pub async fn tick_agent(&self, agent_id: AgentId) -> Result<TickOutcome> {
        let mut before = match self.storage.get_agent(agent_id).await? {
            Some(agent) => agent,
            None => return Ok(TickOutcome::Missing),
        };
        let mut agent = before.clone();
        let now = Utc::now();

        if agent.is_running {
            for kind in agent.flags.clear_expired(now) {
                log::info!("{} is no longer {}", agent.name, kind.as_str());
            }
        }
        if let Some(gate) = AgentStateMachine::gate(&agent, now) {
            self.save(&before, &agent).await?;
            return Ok(TickOutcome::Skipped(gate));
        }

        self.drain_perceptions(&mut before, &mut agent, now).await?;

        let requests = self
            .storage
            .recent_llm_requests(agent.id, REQUEST_WINDOW)
            .await?;
        let step = AgentStateMachine::llm_step(&requests);
        let outcome = match step {
            LlmStep::Deliver(id) => {
                if let Some(request) = requests.iter().find(|r| r.id == id) {
                    self.deliver(&mut before, &mut agent, request).await?;
                }
                TickOutcome::Delivered(id)
            }
            LlmStep::Await(id) => TickOutcome::Awaiting(id),
            LlmStep::Blocked(id) => {
                log::debug!("{} is blocked on failed LLM request {}", agent.name, id);
                TickOutcome::Blocked(id)
            }
            LlmStep::Submit => {
                let text = prompt::assemble(self.storage.as_ref(), &agent).await?;
                let request = LlmRequest::new(agent.id, text);
                self.storage.create_llm_request(&request).await?;
                log::info!("Created LLM request {} for {}", request.id, agent.name);
                TickOutcome::Submitted(request.id)
            }
        };
        agent.phase = step.phase();

        self.save(&before, &agent).await?;
        Ok(outcome)
    }

    /// Each delivered perception is written to the buffer before the next
    /// one is touched, so a failure part way leaves nothing delivered but
    /// unbuffered.
    async fn drain_perceptions(
        &self,
        before: &mut Agent,
        agent: &mut Agent,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let pending = self.storage.undelivered_perceptions(agent.id).await?;
        if pending.is_empty() {
            return Ok(());
        }

        for perception in pending {
            let processed = self
                .processor
                .process(agent.id, DirectiveSource::Perception, perception.id, &perception.text)
                .await?;
            if !self
                .storage
                .mark_perception_delivered(perception.id, &processed.text)
                .await?
            {
                continue;
            }
            buffer::append(
                &mut agent.perception,
                PERCEPTION_PREFIX,
                &processed.text,
                self.settings.perception_limit,
            );
            agent.last_retrieved = Some(now);
            self.persist_buffer(before, agent).await?;
        }
        log::debug!("Drained perceptions for {}", agent.name);
        Ok(())
    }

    async fn deliver(
        &self,
        before: &mut Agent,
        agent: &mut Agent,
        request: &LlmRequest,
    ) -> Result<()> {
        let response = request.response.clone().unwrap_or_default();
        let processed = self
            .processor
            .process(agent.id, DirectiveSource::LlmResponse, request.id, &response)
            .await?;

        if !self
            .storage
            .transition_llm_request(
                request.id,
                LlmStatus::Completed,
                LlmStatus::Delivered,
                Some(&processed.text),
            )
            .await?
        {
            return Ok(());
        }

        let mut updated = agent.clone();
        buffer::append(
            &mut updated.perception,
            LLM_PREFIX,
            &processed.text,
            self.settings.perception_limit,
        );
        if let Err(e) = self.persist_buffer(before, &updated).await {
            // Leave the response completed so the next tick delivers it again.
            self.storage
                .transition_llm_request(
                    request.id,
                    LlmStatus::Delivered,
                    LlmStatus::Completed,
                    None,
                )
                .await?;
            return Err(e);
        }
        agent.perception = updated.perception;

        log::info!(
            "Delivered LLM response {} to {} ({} commands queued)",
            request.id,
            agent.name,
            processed.enqueued.len()
        );
        Ok(())
    }

    /// Writes the perception buffer now and records it as saved.
    async fn persist_buffer(&self, before: &mut Agent, agent: &Agent) -> Result<()> {
        let patch = AgentPatch {
            perception: Some(agent.perception.clone()),
            last_retrieved: Some(agent.last_retrieved),
            ..Default::default()
        };
        self.storage.patch_agent(agent.id, &patch).await?;
        before.perception = agent.perception.clone();
        before.last_retrieved = agent.last_retrieved;
        Ok(())
    }

    async fn save(&self, before: &Agent, after: &Agent) -> Result<()> {
        let patch = AgentPatch::diff(before, after);
        if !patch.is_empty() {
            self.storage.patch_agent(after.id, &patch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Tick for AgentLoop {
    fn name(&self) -> &str {
        "agent loop"
    }

    async fn tick(&self) -> Result<()> {
        self.run_once().await
    }
}
