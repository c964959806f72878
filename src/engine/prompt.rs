use anyhow::Result;

use crate::storage::Storage;
use crate::types::Agent;

/// Persona text, then the loaded memories in load order, then the
/// perception buffer. Empty sections are left out.
pub async fn assemble(storage: &dyn Storage, agent: &Agent) -> Result<String> {
    let mut sections = vec![agent.prompt.clone()];

    let mut values = Vec::new();
    for id in &agent.memories_loaded {
        match storage.get_memory(*id).await? {
            Some(memory) => values.push(memory.value),
            None => log::warn!(
                "Agent {} has loaded memory {} which no longer exists; skipping",
                agent.name,
                id
            ),
        }
    }
    if !values.is_empty() {
        sections.push(format!("---\nLoaded Memories:\n{}", values.join("\n")));
    }

    if !agent.perception.is_empty() {
        sections.push(format!("---\nAgent Perception History:\n{}", agent.perception));
    }

    Ok(sections.join("\n"))
}
