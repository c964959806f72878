//! Embedded-command protocol.
//!
//! Agents (and the LLM speaking for them) issue actions by writing bracketed
//! directives into otherwise free text. Consuming a directive enqueues one
//! command and rewrites the occurrence into an inert marker. Each occurrence is
//! also recorded in a ledger keyed by where it was found, so replaying the
//! original text never enqueues it twice.

pub mod parser;

pub use parser::{rewrite, scan, Directive, DirectiveMatch};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::Storage;
use crate::types::{AgentId, CommandEntry, CommandId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveSource {
    Perception,
    LlmResponse,
}

impl DirectiveSource {
    pub fn as_str(&self) -> &str {
        match self {
            DirectiveSource::Perception => "perception",
            DirectiveSource::LlmResponse => "llm_response",
        }
    }
}

/// Identity of one directive occurrence: the entity whose text carried it and
/// its position among the directives in that text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectiveKey {
    pub source: DirectiveSource,
    pub source_id: Uuid,
    pub index: usize,
}

impl DirectiveKey {
    pub fn new(source: DirectiveSource, source_id: Uuid, index: usize) -> Self {
        Self {
            source,
            source_id,
            index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedText {
    pub text: String,
    pub enqueued: Vec<CommandId>,
}

pub struct DirectiveProcessor {
    storage: Arc<dyn Storage>,
}

impl DirectiveProcessor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Extracts directives from `text` into the command queue on behalf of
    /// `agent_id` and returns the rewritten text.
    pub async fn process(
        &self,
        agent_id: AgentId,
        source: DirectiveSource,
        source_id: Uuid,
        text: &str,
    ) -> Result<ProcessedText> {
        let (rewritten, directives) = rewrite(text);
        let mut enqueued = Vec::new();

        for (index, directive) in directives.iter().enumerate() {
            let key = DirectiveKey::new(source, source_id, index);
            if !self.storage.record_directive(&key).await? {
                log::debug!(
                    "Directive {} from {} {} already consumed",
                    index,
                    source.as_str(),
                    source_id
                );
                continue;
            }

            let entry = CommandEntry::new(agent_id, directive.command_text());
            self.storage.create_command(&entry).await?;
            log::info!(
                "Directive from {} {} queued command '{}'",
                source.as_str(),
                source_id,
                entry.command
            );
            enqueued.push(entry.id);
        }

        Ok(ProcessedText {
            text: rewritten,
            enqueued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    #[tokio::test]
    async fn test_process_enqueues_each_directive() {
        let store = Arc::new(InMemoryStore::new());
        let processor = DirectiveProcessor::new(store.clone());
        let agent_id = AgentId::new_v4();

        let processed = processor
            .process(
                agent_id,
                DirectiveSource::LlmResponse,
                Uuid::new_v4(),
                "Let me look. [command|look] [memory|load|map]",
            )
            .await
            .unwrap();

        assert_eq!(processed.enqueued.len(), 2);
        let commands: Vec<String> = store
            .commands_for(agent_id)
            .unwrap()
            .into_iter()
            .map(|c| c.command)
            .collect();
        assert!(commands.contains(&"look".to_string()));
        assert!(commands.contains(&"memory-load map".to_string()));
    }

    #[tokio::test]
    async fn test_reprocessing_rewritten_text_enqueues_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let processor = DirectiveProcessor::new(store.clone());
        let agent_id = AgentId::new_v4();
        let source_id = Uuid::new_v4();

        let first = processor
            .process(agent_id, DirectiveSource::Perception, source_id, "[command|ping]")
            .await
            .unwrap();
        let second = processor
            .process(agent_id, DirectiveSource::Perception, source_id, &first.text)
            .await
            .unwrap();

        assert_eq!(first.enqueued.len(), 1);
        assert!(second.enqueued.is_empty());
        assert_eq!(store.commands_for(agent_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replaying_original_text_is_deduplicated_by_ledger() {
        let store = Arc::new(InMemoryStore::new());
        let processor = DirectiveProcessor::new(store.clone());
        let agent_id = AgentId::new_v4();
        let source_id = Uuid::new_v4();

        for _ in 0..3 {
            processor
                .process(agent_id, DirectiveSource::LlmResponse, source_id, "[command|go|north]")
                .await
                .unwrap();
        }
        assert_eq!(store.commands_for(agent_id).unwrap().len(), 1);
    }
}
