//! Per-agent key/value memories and the loaded set injected into prompts.

use anyhow::Result;
use async_trait::async_trait;

use super::{split_args, CommandContext, CommandHandler};
use crate::types::{Agent, CommandEntry, Memory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    Create,
    Update,
    Append,
    Remove,
    List,
    Load,
    Unload,
}

impl MemoryOp {
    pub const ALL: [MemoryOp; 7] = [
        MemoryOp::Create,
        MemoryOp::Update,
        MemoryOp::Append,
        MemoryOp::Remove,
        MemoryOp::List,
        MemoryOp::Load,
        MemoryOp::Unload,
    ];

    pub fn verb(&self) -> &'static str {
        match self {
            MemoryOp::Create => "memory-create",
            MemoryOp::Update => "memory-update",
            MemoryOp::Append => "memory-append",
            MemoryOp::Remove => "memory-remove",
            MemoryOp::List => "memory-list",
            MemoryOp::Load => "memory-load",
            MemoryOp::Unload => "memory-unload",
        }
    }

    fn takes_value(&self) -> bool {
        matches!(self, MemoryOp::Create | MemoryOp::Update | MemoryOp::Append)
    }

    fn usage(&self) -> &'static str {
        match self {
            MemoryOp::Create => "Usage: memory-create <key> <value>",
            MemoryOp::Update => "Usage: memory-update <key> <new_value>",
            MemoryOp::Append => "Usage: memory-append <key> <text_to_append>",
            MemoryOp::Remove => "Usage: memory-remove <key>",
            MemoryOp::List => "Usage: memory-list",
            MemoryOp::Load => "Usage: memory-load <key>",
            MemoryOp::Unload => "Usage: memory-unload <key>",
        }
    }
}

pub struct MemoryHandler {
    op: MemoryOp,
}

impl MemoryHandler {
    pub fn new(op: MemoryOp) -> Self {
        Self { op }
    }

    async fn list(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &Agent,
    ) -> Result<()> {
        let memories = ctx.storage.list_memories(agent.id).await?;
        if memories.is_empty() {
            entry.complete("You have no memories.");
        } else {
            let lines: Vec<String> = memories
                .iter()
                .map(|m| format!("  - {}: {}", m.key, m.value))
                .collect();
            entry.complete(format!("Your memories:\n{}", lines.join("\n")));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for MemoryHandler {
    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        if self.op == MemoryOp::List {
            return self.list(ctx, entry, agent).await;
        }

        let parts: Vec<String> = split_args(&entry.command, 2)
            .into_iter()
            .map(str::to_string)
            .collect();
        let wanted = if self.op.takes_value() { 3 } else { 2 };
        if parts.len() < wanted {
            entry.fail(self.op.usage());
            return Ok(());
        }
        let key = parts[1].as_str();
        let value = parts.get(2).map(String::as_str).unwrap_or_default();

        let existing = ctx.storage.get_memory_by_key(agent.id, key).await?;

        if self.op == MemoryOp::Create {
            if existing.is_some() {
                entry.fail(format!("Memory '{}' already exists.", key));
            } else {
                ctx.storage
                    .create_memory(&Memory::new(agent.id, key, value))
                    .await?;
                entry.complete(format!("Memory '{}' created successfully.", key));
            }
            return Ok(());
        }

        let mut memory = match existing {
            Some(memory) => memory,
            None => {
                entry.fail(format!("Memory '{}' not found for this agent.", key));
                return Ok(());
            }
        };

        match self.op {
            MemoryOp::Update => {
                memory.value = value.to_string();
                ctx.storage.update_memory(&memory).await?;
                entry.complete(format!("Memory '{}' updated successfully.", key));
            }
            MemoryOp::Append => {
                memory.value = if memory.value.is_empty() {
                    value.to_string()
                } else {
                    format!("{} {}", memory.value, value)
                };
                ctx.storage.update_memory(&memory).await?;
                entry.complete(format!("Memory '{}' appended successfully.", key));
            }
            MemoryOp::Remove => {
                agent.memories_loaded.retain(|id| *id != memory.id);
                ctx.storage.delete_memory(memory.id).await?;
                entry.complete(format!("Memory '{}' removed successfully.", key));
            }
            MemoryOp::Load => {
                if agent.memories_loaded.contains(&memory.id) {
                    entry.complete(format!("Memory '{}' is already loaded.", key));
                } else {
                    agent.memories_loaded.push(memory.id);
                    entry.complete(format!("Memory '{}' loaded successfully.", key));
                }
            }
            MemoryOp::Unload => {
                if agent.memories_loaded.contains(&memory.id) {
                    agent.memories_loaded.retain(|id| *id != memory.id);
                    entry.complete(format!("Memory '{}' unloaded successfully.", key));
                } else {
                    entry.complete(format!("Memory '{}' is not currently loaded.", key));
                }
            }
            MemoryOp::Create | MemoryOp::List => entry.fail(self.op.usage()),
        }
        Ok(())
    }
}
