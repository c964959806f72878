use anyhow::Result;
use async_trait::async_trait;

use super::{split_args, CommandContext, CommandHandler};
use crate::types::{Agent, CommandEntry};

const USAGE: &str =
    "Usage: edit profile <field> <new_value> (e.g., edit profile look a tall, dark figure)";

/// `edit profile <look|description> <value>`
pub struct EditProfileHandler;

#[async_trait]
impl CommandHandler for EditProfileHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext<'_>,
        entry: &mut CommandEntry,
        agent: &mut Agent,
    ) -> Result<()> {
        let parts = split_args(&entry.command, 3);
        if parts.len() < 4 || parts[1].to_lowercase() != "profile" {
            entry.fail(USAGE);
            return Ok(());
        }
        let value = parts[3].to_string();

        match parts[2].to_lowercase().as_str() {
            "look" => {
                agent.look = value;
                entry.complete(format!("Your look has been updated to: {}", agent.look));
            }
            "description" => {
                agent.description = value;
                entry.complete(format!(
                    "Your description has been updated to: {}",
                    agent.description
                ));
            }
            _ => entry.fail("Invalid field. You can only edit 'look' or 'description'."),
        }
        Ok(())
    }
}
