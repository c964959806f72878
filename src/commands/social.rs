use anyhow::Result;
use async_trait::async_trait;

use super::{split_args, CommandContext, CommandHandler};
use crate::types::{Agent, CommandEntry, PerceptionEntry};

fn message_of(entry: &CommandEntry) -> Option<String> {
    split_args(&entry.command, 1).get(1).map(|m| m.to_string())
}

/// `say <message>`: heard by every active agent in the speaker's room.
pub struct SayHandler;

#[async_trait]
impl CommandHandler for SayHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let message = match message_of(entry) {
            Some(message) => message,
            None => {
                entry.fail("Say what?");
                return Ok(());
            }
        };

        for listener in ctx.active_others_in_room(&agent.location, agent.id).await? {
            ctx.perceive(
                PerceptionEntry::environmental(
                    listener.id,
                    Some(agent.id),
                    format!("{} says: \"{}\"", agent.name, message),
                )
                .with_command(entry.id),
            )
            .await?;
        }

        entry.complete(format!("You say: \"{}\"", message));
        Ok(())
    }
}

/// `shout <message>`. The command worker decides who hears it.
pub struct ShoutHandler;

impl ShoutHandler {
    /// Text delivered to each listener.
    pub fn heard_as(speaker: &str, message: &str) -> String {
        format!("{} shouted \"{}\"", speaker, message)
    }

    pub fn message(entry: &CommandEntry) -> Option<String> {
        message_of(entry)
    }
}

#[async_trait]
impl CommandHandler for ShoutHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        _agent: &mut Agent,
    ) -> Result<()> {
        match message_of(entry) {
            Some(message) => entry.complete(format!("You shout: \"{}\"", message)),
            None => entry.fail("Shout what?"),
        }
        Ok(())
    }
}
