use anyhow::Result;
use async_trait::async_trait;

use super::{split_args, CommandContext, CommandHandler};
use crate::types::{Agent, CommandEntry, PerceptionEntry};
use crate::world::opposite_direction;

/// `go <direction>`, or a bare direction alias such as `north` / `n`.
pub struct GoHandler {
    fixed: Option<&'static str>,
}

impl GoHandler {
    pub fn free() -> Self {
        Self { fixed: None }
    }

    pub fn fixed(direction: &'static str) -> Self {
        Self {
            fixed: Some(direction),
        }
    }
}

#[async_trait]
impl CommandHandler for GoHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let direction = match self.fixed {
            Some(direction) => direction.to_string(),
            None => match split_args(&entry.command, 1).get(1) {
                Some(direction) => direction.to_lowercase(),
                None => {
                    entry.fail("Go where? (e.g., go north)");
                    return Ok(());
                }
            },
        };

        let old_room = agent.location.clone();
        let target = match ctx.world.exit(&old_room, &direction) {
            Some(target) => target.to_string(),
            None => {
                let here = ctx.world.view(&old_room);
                entry.complete(format!(
                    "You can't go {} from here.\nAvailable exits: {}",
                    direction,
                    here.exit_list()
                ));
                return Ok(());
            }
        };

        for other in ctx.active_others_in_room(&old_room, agent.id).await? {
            ctx.perceive(
                PerceptionEntry::environmental(
                    other.id,
                    Some(agent.id),
                    format!("{} leaves to the {}.", agent.name, direction),
                )
                .with_command(entry.id),
            )
            .await?;
        }

        agent.location = target.clone();

        let from = opposite_direction(&direction);
        for other in ctx.active_others_in_room(&target, agent.id).await? {
            ctx.perceive(
                PerceptionEntry::environmental(
                    other.id,
                    Some(agent.id),
                    format!("{} arrives from the {}.", agent.name, from),
                )
                .with_command(entry.id),
            )
            .await?;
        }

        log::debug!("{} moved {} from {} to {}", agent.name, direction, old_room, target);
        entry.complete(ctx.world.view(&target).render());
        Ok(())
    }
}
