use anyhow::Result;
use async_trait::async_trait;

use super::{split_args, CommandContext, CommandHandler};
use crate::types::{Agent, CommandEntry};

pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        _agent: &mut Agent,
    ) -> Result<()> {
        entry.complete("pong");
        Ok(())
    }
}

pub struct LookHandler;

#[async_trait]
impl CommandHandler for LookHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let view = ctx.world.view(&agent.location);
        let mut lines = vec![
            view.title.clone(),
            view.description.clone(),
            format!("Exits: {}", view.exit_list()),
        ];

        let others: Vec<String> = ctx
            .active_others_in_room(&agent.location, agent.id)
            .await?
            .into_iter()
            .map(|a| a.name)
            .collect();
        if !others.is_empty() {
            lines.push(format!("Other agents here: {}", others.join(", ")));
        }

        let objects: Vec<&str> = ctx
            .world
            .objects_in(&agent.location)
            .into_iter()
            .map(|(id, def)| if def.name.is_empty() { id } else { def.name.as_str() })
            .collect();
        if !objects.is_empty() {
            lines.push(format!("Objects here: {}", objects.join(", ")));
        }

        entry.complete(lines.join("\n"));
        Ok(())
    }
}

pub struct WhereHandler;

#[async_trait]
impl CommandHandler for WhereHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let view = ctx.world.view(&agent.location);
        let mut lines = vec![format!("You are in: {} ({})", view.title, agent.location)];

        let active: Vec<Agent> = ctx
            .storage
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.id != agent.id && ctx.is_active(a))
            .collect();
        if !active.is_empty() {
            lines.push("Active agents in the world:".to_string());
            lines.extend(active.iter().map(|a| format!("- {} ({})", a.name, a.location)));
        }

        entry.complete(lines.join("\n"));
        Ok(())
    }
}

pub struct InventoryHandler;

#[async_trait]
impl CommandHandler for InventoryHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        if agent.inventory.is_empty() {
            entry.complete("Your inventory is empty.");
        } else {
            let items: Vec<String> = agent.inventory.iter().map(|i| format!("- {}", i)).collect();
            entry.complete(format!("Your inventory:\n{}", items.join("\n")));
        }
        Ok(())
    }
}

pub struct ScoreHandler;

#[async_trait]
impl CommandHandler for ScoreHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        entry.complete(format!(
            "Name: {}\nLevel: {}\nTokens: {}\nLocation: {}",
            agent.name, agent.level, agent.tokens, agent.location
        ));
        Ok(())
    }
}

pub struct ExamineHandler;

#[async_trait]
impl CommandHandler for ExamineHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let target = match split_args(&entry.command, 1).get(1) {
            Some(target) => target.to_lowercase(),
            None => {
                entry.fail("Examine what?");
                return Ok(());
            }
        };

        match ctx.world.find_in_room(&agent.location, &target) {
            Some(item) if !item.description.is_empty() => entry.complete(item.description.clone()),
            Some(_) => entry.complete("You see nothing special."),
            None => entry.complete(format!("You don't see any '{}' here.", target)),
        }
        Ok(())
    }
}

pub struct UseHandler;

#[async_trait]
impl CommandHandler for UseHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let target = match split_args(&entry.command, 1).get(1) {
            Some(target) => target.to_lowercase(),
            None => {
                entry.fail("Use what?");
                return Ok(());
            }
        };

        let object = match ctx.world.find_object_by_name(&agent.location, &target) {
            Some(object) => object,
            None => {
                entry.complete(format!("You don't see a {} here.", target));
                return Ok(());
            }
        };

        match object.triggers.get("use") {
            Some(trigger) if trigger.kind == "response" => entry.complete(trigger.value.clone()),
            _ => entry.complete("Nothing happens."),
        }
        Ok(())
    }
}

pub struct HelpHandler;

#[async_trait]
impl CommandHandler for HelpHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        _agent: &mut Agent,
    ) -> Result<()> {
        entry.complete(format!("Available commands: {}", ctx.verbs.join(", ")));
        Ok(())
    }
}
