//! Bounded perception buffer kept on the agent record.

/// Provenance of text drained from the perception channel.
pub const PERCEPTION_PREFIX: &str = "MAD: ";
/// Provenance of a delivered LLM response.
pub const LLM_PREFIX: &str = "LLM: ";

/// Appends `prefix` + `text` on a new line and keeps only the trailing
/// `limit` characters.
pub fn append(buffer: &mut String, prefix: &str, text: &str, limit: usize) {
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(prefix);
    buffer.push_str(text);
    truncate_front(buffer, limit);
}

/// Drops leading characters until at most `limit` remain.
pub fn truncate_front(buffer: &mut String, limit: usize) {
    let excess = buffer.chars().count().saturating_sub(limit);
    if excess == 0 {
        return;
    }
    let cut = buffer
        .char_indices()
        .nth(excess)
        .map(|(i, _)| i)
        .unwrap_or(buffer.len());
    buffer.drain(..cut);
}
