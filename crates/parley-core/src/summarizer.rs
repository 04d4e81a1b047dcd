use async_trait::async_trait;

use crate::errors::SummarizationError;
use crate::messages::Message;

/// Reduces a run of messages to a short text summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Empty input yields an empty summary without calling out.
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizationError>;
}

/// Render messages as a role-labelled transcript (`User: ...`, `AI: ...`),
/// one entry per message separated by blank lines.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.speaker(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
