//! The owning business record (for example a conversation turn) that a
//! stream's final text lands in. Its storage lives outside this crate.

use dashmap::DashMap;

use crate::model::ContextId;

/// Failure reported by a record sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record sink error ({context_id}): {message}")]
pub struct RecordError {
    pub context_id: ContextId,
    pub message: String,
}

impl RecordError {
    pub fn new(context_id: ContextId, message: impl Into<String>) -> Self {
        Self {
            context_id,
            message: message.into(),
        }
    }
}

/// Collaborator that owns the final content of a generation.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Replaces the record's content with the final text.
    async fn set_final_content(&self, context_id: &ContextId, text: &str) -> Result<(), RecordError>;

    /// Best-effort follow-up work on the final text (search indexing and the
    /// like). Failures never affect the generation outcome.
    async fn schedule_enrichment(&self, context_id: &ContextId, text: &str) -> Result<(), RecordError>;
}

/// In-process record sink keeping the latest content per context.
#[derive(Default)]
pub struct MemoryRecords {
    content: DashMap<ContextId, String>,
    enriched: DashMap<ContextId, String>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final content stored for a context, if any.
    pub fn content(&self, context_id: &ContextId) -> Option<String> {
        self.content.get(context_id).map(|c| c.clone())
    }

    /// Text last handed to enrichment for a context, if any.
    pub fn enriched(&self, context_id: &ContextId) -> Option<String> {
        self.enriched.get(context_id).map(|c| c.clone())
    }
}

#[async_trait::async_trait]
impl RecordSink for MemoryRecords {
    async fn set_final_content(&self, context_id: &ContextId, text: &str) -> Result<(), RecordError> {
        self.content.insert(context_id.clone(), text.to_owned());
        Ok(())
    }

    async fn schedule_enrichment(&self, context_id: &ContextId, text: &str) -> Result<(), RecordError> {
        self.enriched.insert(context_id.clone(), text.to_owned());
        Ok(())
    }
}
