//! Startup pass over work a previous process left half done.

use anyhow::Result;

use crate::storage::Storage;
use crate::types::{CommandStatus, LlmStatus};

pub const RESTARTED: &str = "LLM call interrupted by a restart.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub requeued_commands: usize,
    pub failed_requests: u64,
}

/// Puts claimed commands back to `pending` and fails LLM requests stuck in
/// `thinking`. Run before the workers start.
pub async fn recover_interrupted(storage: &dyn Storage) -> Result<RecoverySummary> {
    let mut summary = RecoverySummary::default();

    for mut entry in storage.commands_with_status(CommandStatus::Processing).await? {
        entry.status = CommandStatus::Pending;
        storage.update_command(&entry).await?;
        log::warn!("Requeued interrupted command '{}' ({})", entry.command, entry.id);
        summary.requeued_commands += 1;
    }

    summary.failed_requests = fail_thinking_requests(storage, RESTARTED).await?;
    Ok(summary)
}

/// Fails every `thinking` request with `diagnostic`. Returns how many changed.
pub async fn fail_thinking_requests(storage: &dyn Storage, diagnostic: &str) -> Result<u64> {
    let mut failed = 0;
    for request in storage.llm_requests_with_status(LlmStatus::Thinking).await? {
        if storage
            .transition_llm_request(
                request.id,
                LlmStatus::Thinking,
                LlmStatus::Failed,
                Some(diagnostic),
            )
            .await?
        {
            log::warn!("LLM request {} failed: {}", request.id, diagnostic);
            failed += 1;
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::{AgentId, CommandEntry, LlmRequest};

    #[tokio::test]
    async fn test_recovers_interrupted_work() {
        let store = InMemoryStore::new();
        let agent_id = AgentId::new_v4();

        let claimed = CommandEntry::new(agent_id, "look");
        store.create_command(&claimed).await.unwrap();
        store.claim_command(claimed.id).await.unwrap();
        let mut finished = CommandEntry::new(agent_id, "ping");
        finished.complete("pong");
        store.create_command(&finished).await.unwrap();

        let stuck = LlmRequest::new(agent_id, "prompt");
        store.create_llm_request(&stuck).await.unwrap();
        store
            .transition_llm_request(stuck.id, LlmStatus::Pending, LlmStatus::Thinking, None)
            .await
            .unwrap();
        let waiting = LlmRequest::new(agent_id, "later prompt");
        store.create_llm_request(&waiting).await.unwrap();

        let summary = recover_interrupted(&store).await.unwrap();
        assert_eq!(
            summary,
            RecoverySummary {
                requeued_commands: 1,
                failed_requests: 1,
            }
        );

        let claimed = store.get_command(claimed.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, CommandStatus::Pending);
        let finished = store.get_command(finished.id).await.unwrap().unwrap();
        assert_eq!(finished.status, CommandStatus::Completed);

        let stuck = store.get_llm_request(stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, LlmStatus::Failed);
        assert_eq!(stuck.response.as_deref(), Some(RESTARTED));
        let waiting = store.get_llm_request(waiting.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, LlmStatus::Pending);
    }

    #[tokio::test]
    async fn test_nothing_to_recover() {
        let store = InMemoryStore::new();
        assert_eq!(recover_interrupted(&store).await.unwrap(), RecoverySummary::default());
    }
}
