use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::commands::{CommandDispatcher, ShoutHandler};
use crate::config::EngineSettings;
use crate::engine::scheduler::Tick;
use crate::storage::Storage;
use crate::types::{AgentId, AgentPatch, CommandEntry, CommandStatus, PerceptionEntry};

/// Single consumer of the command queue. Entries are handled strictly one at
/// a time, oldest first.
pub struct CommandWorker {
    storage: Arc<dyn Storage>,
    dispatcher: Arc<CommandDispatcher>,
    settings: EngineSettings,
}

impl CommandWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        dispatcher: Arc<CommandDispatcher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            settings,
        }
    }

    /// Claims and runs the oldest pending entry whose agent is not waiting.
    /// Returns it in its terminal state, or None when nothing is runnable.
    ///
    /// A waiting agent's entries stay pending and keep their order; entries
    /// of other agents queued behind them still run.
    pub async fn process_next(&self) -> Result<Option<CommandEntry>> {
        let now = Utc::now();
        let mut deferred: HashSet<AgentId> = HashSet::new();

        for candidate in self.storage.commands_with_status(CommandStatus::Pending).await? {
            if deferred.contains(&candidate.agent_id) {
                continue;
            }
            if let Some(agent) = self.storage.get_agent(candidate.agent_id).await? {
                if let Some(until) = agent.flags.waiting.filter(|until| *until > now) {
                    log::debug!(
                        "Deferring commands for {} until {}",
                        agent.name,
                        until.to_rfc3339()
                    );
                    deferred.insert(agent.id);
                    continue;
                }
            }

            if let Some(entry) = self.storage.claim_command(candidate.id).await? {
                return self.run(entry).await.map(Some);
            }
        }
        Ok(None)
    }

    async fn run(&self, mut entry: CommandEntry) -> Result<CommandEntry> {
        let stamp = AgentPatch {
            last_command_sent: Some(Some(Utc::now())),
            ..Default::default()
        };
        let agent_exists = match self.storage.patch_agent(entry.agent_id, &stamp).await {
            Ok(exists) => exists,
            Err(e) => {
                // Hand the entry back so the next pass retries it.
                entry.status = CommandStatus::Pending;
                self.storage.update_command(&entry).await?;
                return Err(e);
            }
        };

        if let Err(e) = self.dispatcher.dispatch(&mut entry).await {
            log::error!("Command {} could not be dispatched: {:#}", entry.id, e);
            entry.fail(format!("An error occurred: {}", e));
            self.storage.update_command(&entry).await?;
        }

        log::info!(
            "Command '{}' for agent {} -> {}",
            entry.command,
            entry.agent_id,
            entry.status.as_str()
        );

        if agent_exists {
            self.storage
                .create_perception(&PerceptionEntry::command_result(
                    entry.agent_id,
                    entry.id,
                    format!("> {}\n{}", entry.command, entry.output),
                ))
                .await?;

            if entry.verb() == "shout" && entry.status == CommandStatus::Completed {
                self.broadcast_shout(&entry).await?;
            }
        }

        Ok(entry)
    }

    /// Drains the queue. Returns the number of entries handled.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.process_next().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    async fn broadcast_shout(&self, entry: &CommandEntry) -> Result<()> {
        let (shouter, message) = match (
            self.storage.get_agent(entry.agent_id).await?,
            ShoutHandler::message(entry),
        ) {
            (Some(shouter), Some(message)) => (shouter, message),
            _ => return Ok(()),
        };

        let now = Utc::now();
        let text = ShoutHandler::heard_as(&shouter.name, &message);
        for listener in self.storage.agents_in_room(&shouter.location).await? {
            let active = listener.is_active(now, self.settings.activity_window);
            if listener.id == shouter.id || !active {
                continue;
            }
            self.storage
                .create_perception(
                    &PerceptionEntry::environmental(listener.id, Some(shouter.id), text.clone())
                        .with_command(entry.id),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Tick for CommandWorker {
    fn name(&self) -> &str {
        "command worker"
    }

    async fn tick(&self) -> Result<()> {
        let handled = self.drain().await?;
        if handled > 0 {
            log::debug!("Command worker handled {} entries", handled);
        }
        Ok(())
    }
}
