//! Command dispatch engine.
//!
//! Maps the first token of a command to a handler. Handlers read and mutate
//! the issuing agent, consult the world model and emit perceptions; the
//! dispatcher persists whatever they changed.

pub mod memory;
pub mod movement;
pub mod profile;
pub mod query;
pub mod social;
pub mod timed;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::storage::Storage;
use crate::types::{Agent, AgentId, AgentPatch, CommandEntry, PerceptionEntry};
use crate::world::WorldModel;

pub use memory::{MemoryHandler, MemoryOp};
pub use movement::GoHandler;
pub use profile::EditProfileHandler;
pub use query::{
    ExamineHandler, HelpHandler, InventoryHandler, LookHandler, PingHandler, ScoreHandler,
    UseHandler, WhereHandler,
};
pub use social::{SayHandler, ShoutHandler};
pub use timed::TimedGateHandler;

/// Everything a handler may touch besides the entry and its agent.
pub struct CommandContext<'a> {
    pub storage: &'a dyn Storage,
    pub world: &'a WorldModel,
    pub settings: &'a EngineSettings,
    pub verbs: &'a [String],
    pub now: DateTime<Utc>,
}

impl CommandContext<'_> {
    pub fn is_active(&self, agent: &Agent) -> bool {
        agent.is_active(self.now, self.settings.activity_window)
    }

    /// Active agents in a room, excluding `except`.
    pub async fn active_others_in_room(
        &self,
        room_id: &str,
        except: AgentId,
    ) -> Result<Vec<Agent>> {
        Ok(self
            .storage
            .agents_in_room(room_id)
            .await?
            .into_iter()
            .filter(|a| a.id != except && self.is_active(a))
            .collect())
    }

    pub async fn perceive(&self, perception: PerceptionEntry) -> Result<()> {
        self.storage.create_perception(&perception).await
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Sets the entry's output and terminal status. Changes made to `agent`
    /// are persisted by the dispatcher.
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()>;
}

/// Splits like a shell-less `split(maxsplit)`: at most `max_splits` cuts on
/// whitespace, the final part keeps its inner spacing.
pub fn split_args(text: &str, max_splits: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        if parts.len() == max_splits {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(&rest[..i]);
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

pub struct CommandDispatcher {
    storage: Arc<dyn Storage>,
    world: Arc<WorldModel>,
    settings: EngineSettings,
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
    verbs: Vec<String>,
}

impl CommandDispatcher {
    /// A dispatcher with the full built-in verb table.
    pub fn new(
        storage: Arc<dyn Storage>,
        world: Arc<WorldModel>,
        settings: EngineSettings,
    ) -> Self {
        let mut dispatcher = Self {
            storage,
            world,
            settings,
            handlers: BTreeMap::new(),
            verbs: Vec::new(),
        };
        dispatcher.register_builtins();
        dispatcher
    }

    fn register_builtins(&mut self) {
        self.register("ping", Arc::new(PingHandler));
        self.register("look", Arc::new(LookHandler));
        self.register("l", Arc::new(LookHandler));
        self.register("go", Arc::new(GoHandler::free()));
        for (verb, alias, direction) in [
            ("north", "n", "north"),
            ("south", "s", "south"),
            ("east", "e", "east"),
            ("west", "w", "west"),
            ("up", "u", "up"),
            ("down", "d", "down"),
        ] {
            let handler: Arc<dyn CommandHandler> = Arc::new(GoHandler::fixed(direction));
            self.register(verb, handler.clone());
            self.register(alias, handler);
        }
        self.register("inventory", Arc::new(InventoryHandler));
        self.register("examine", Arc::new(ExamineHandler));
        self.register("where", Arc::new(WhereHandler));
        self.register("say", Arc::new(SayHandler));
        self.register("shout", Arc::new(ShoutHandler));
        self.register("use", Arc::new(UseHandler));
        self.register("help", Arc::new(HelpHandler));
        self.register("commands", Arc::new(HelpHandler));
        self.register("meditate", Arc::new(TimedGateHandler::meditate()));
        self.register("wait", Arc::new(TimedGateHandler::wait()));
        self.register("score", Arc::new(ScoreHandler));
        for op in MemoryOp::ALL {
            self.register(op.verb(), Arc::new(MemoryHandler::new(op)));
        }
        self.register("edit", Arc::new(EditProfileHandler));
    }

    pub fn register(&mut self, verb: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(verb.to_string(), handler);
        self.verbs = self.handlers.keys().cloned().collect();
    }

    /// Registered verbs, sorted.
    pub fn verbs(&self) -> &[String] {
        &self.verbs
    }

    /// Runs one entry to a terminal status and persists the entry and any
    /// agent changes. Handler failures end up in the entry, never in the
    /// returned error; only storage failures are returned.
    pub async fn dispatch(&self, entry: &mut CommandEntry) -> Result<()> {
        let agent = match self.storage.get_agent(entry.agent_id).await? {
            Some(agent) => agent,
            None => {
                entry.fail(format!(
                    "An error occurred: agent {} not found",
                    entry.agent_id
                ));
                self.storage.update_command(entry).await?;
                return Ok(());
            }
        };

        match self.handlers.get(entry.verb()) {
            Some(handler) => self.run_handler(handler.as_ref(), entry, agent).await?,
            None => entry.fail(format!("Unknown command: {}", entry.command)),
        }

        self.storage.update_command(entry).await
    }

    async fn run_handler(
        &self,
        handler: &dyn CommandHandler,
        entry: &mut CommandEntry,
        before: Agent,
    ) -> Result<()> {
        let ctx = CommandContext {
            storage: self.storage.as_ref(),
            world: self.world.as_ref(),
            settings: &self.settings,
            verbs: &self.verbs,
            now: Utc::now(),
        };
        let mut agent = before.clone();

        match handler.handle(&ctx, entry, &mut agent).await {
            Ok(()) => {
                let patch = AgentPatch::diff(&before, &agent);
                if !patch.is_empty() {
                    self.storage.patch_agent(agent.id, &patch).await?;
                }
                if !entry.status.is_terminal() {
                    entry.fail("An error occurred: handler produced no result");
                }
            }
            Err(e) => {
                log::error!("Handler for '{}' failed: {:#}", entry.command, e);
                entry.fail(format!("An error occurred: {}", e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::agent::DEFAULT_START_ROOM;
    use crate::world::fixtures;

    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub dispatcher: CommandDispatcher,
    }

    impl Harness {
        pub fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let dispatcher = CommandDispatcher::new(
                store.clone(),
                Arc::new(fixtures::world()),
                EngineSettings::default(),
            );
            Self { store, dispatcher }
        }

        /// Creates an agent in a room; active agents have a recent command.
        pub async fn agent(&self, name: &str, room: &str, active: bool) -> Agent {
            let mut agent = Agent::new(name, room);
            if active {
                agent.last_command_sent = Some(Utc::now());
            }
            self.store.create_agent(&agent).await.unwrap();
            agent
        }

        pub async fn start_agent(&self, name: &str) -> Agent {
            self.agent(name, DEFAULT_START_ROOM, true).await
        }

        pub async fn run(&self, agent: &Agent, command: &str) -> CommandEntry {
            let mut entry = CommandEntry::new(agent.id, command);
            self.store.create_command(&entry).await.unwrap();
            self.dispatcher.dispatch(&mut entry).await.unwrap();
            self.store.get_command(entry.id).await.unwrap().unwrap()
        }

        pub async fn reload(&self, agent: &Agent) -> Agent {
            self.store.get_agent(agent.id).await.unwrap().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use crate::types::CommandStatus;

    struct ExplodingHandler;

    #[async_trait]
    impl CommandHandler for ExplodingHandler {
        async fn handle(
            &self,
            _ctx: &CommandContext<'_>,
            _entry: &mut CommandEntry,
            agent: &mut Agent,
        ) -> Result<()> {
            agent.location = "should_not_persist".to_string();
            anyhow::bail!("the floor gives way")
        }
    }

    struct SilentHandler;

    #[async_trait]
    impl CommandHandler for SilentHandler {
        async fn handle(
            &self,
            _ctx: &CommandContext<'_>,
            _entry: &mut CommandEntry,
            _agent: &mut Agent,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("say  hello   world ", 1), vec!["say", "hello   world"]);
        assert_eq!(
            split_args("edit profile look a tall figure", 3),
            vec!["edit", "profile", "look", "a tall figure"]
        );
        assert_eq!(split_args("look", 1), vec!["look"]);
        assert!(split_args("   ", 2).is_empty());
    }

    #[tokio::test]
    async fn test_ping() {
        let h = Harness::new();
        let agent = h.start_agent("Pinger").await;
        let entry = h.run(&agent, "ping").await;
        assert_eq!(entry.status, CommandStatus::Completed);
        assert_eq!(entry.output, "pong");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = Harness::new();
        let agent = h.start_agent("Confused").await;
        let entry = h.run(&agent, "dance wildly").await;
        assert_eq!(entry.status, CommandStatus::Failed);
        assert!(entry.output.starts_with("Unknown command:"));
        assert_eq!(entry.output, "Unknown command: dance wildly");
    }

    #[tokio::test]
    async fn test_verbs_are_case_sensitive() {
        let h = Harness::new();
        let agent = h.start_agent("Shouty").await;
        let entry = h.run(&agent, "PING").await;
        assert_eq!(entry.status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let mut h = Harness::new();
        h.dispatcher.register("explode", Arc::new(ExplodingHandler));
        let agent = h.start_agent("Unlucky").await;

        let entry = h.run(&agent, "explode").await;
        assert_eq!(entry.status, CommandStatus::Failed);
        assert_eq!(entry.output, "An error occurred: the floor gives way");
        assert_eq!(h.reload(&agent).await.location, agent.location);

        let next = h.run(&agent, "ping").await;
        assert_eq!(next.status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_handler_without_result_fails() {
        let mut h = Harness::new();
        h.dispatcher.register("noop", Arc::new(SilentHandler));
        let agent = h.start_agent("Quiet").await;
        let entry = h.run(&agent, "noop").await;
        assert_eq!(entry.status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_agent_fails_entry() {
        let h = Harness::new();
        let mut entry = CommandEntry::new(AgentId::new_v4(), "ping");
        h.store.create_command(&entry).await.unwrap();
        h.dispatcher.dispatch(&mut entry).await.unwrap();
        assert_eq!(entry.status, CommandStatus::Failed);
        assert!(entry.output.starts_with("An error occurred:"));
    }

    #[tokio::test]
    async fn test_help_lists_sorted_verbs() {
        let h = Harness::new();
        let agent = h.start_agent("Curious").await;
        let entry = h.run(&agent, "help").await;
        assert!(entry.output.starts_with("Available commands: "));
        assert!(entry.output.contains("memory-load"));
        let listed: Vec<&str> = entry
            .output
            .trim_start_matches("Available commands: ")
            .split(", ")
            .collect();
        let mut sorted = listed.clone();
        sorted.sort();
        assert_eq!(listed, sorted);
    }
}
