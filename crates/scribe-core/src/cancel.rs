use tracing::info;

use crate::errors::StreamError;
use crate::model::{ContextId, StreamId, StreamStatus};
use crate::records::RecordSink;
use crate::store::StreamStore;

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CancelOutcome {
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<StreamId>,
}

impl CancelOutcome {
    pub fn nothing_to_cancel() -> Self {
        Self {
            cancelled: false,
            stream_id: None,
        }
    }
}

/// Cancels the active generation of a context.
///
/// Marks the stream `error`, then reads the text persisted so far, saves it
/// plus `annotation` to the owning record and deletes the association. Once
/// the status is terminal no further chunk can land, so the saved text is the
/// whole log. The `signal` callback runs right after the read so a live
/// driver in this process stops at its next check.
///
/// A stream that already reached `done` is left untouched and reported as
/// not cancelled.
pub async fn cancel_generation(
    store: &dyn StreamStore,
    records: &dyn RecordSink,
    context_id: &ContextId,
    annotation: &str,
    signal: impl FnOnce(StreamId),
) -> Result<CancelOutcome, StreamError> {
    let Some(association) = store.find_association(context_id).await? else {
        info!(context_id = %context_id, "cancel requested but no active stream");
        return Ok(CancelOutcome::nothing_to_cancel());
    };
    let stream_id = association.stream_id;

    store.set_status(stream_id, StreamStatus::Error).await?;
    let snapshot = store.get_text(stream_id).await?;
    if snapshot.status == StreamStatus::Done {
        // Completion won the race; its driver owns the record and the association.
        info!(stream_id = %stream_id, context_id = %context_id, "cancel requested after completion, leaving record");
        return Ok(CancelOutcome {
            cancelled: false,
            stream_id: Some(stream_id),
        });
    }
    signal(stream_id);

    let content = format!("{}{}", snapshot.text, annotation);
    records
        .set_final_content(context_id, &content)
        .await
        .map_err(|e| StreamError::PersistenceFailure(e.to_string()))?;
    store.delete_association(stream_id).await?;

    info!(stream_id = %stream_id, context_id = %context_id, chars = snapshot.text.len(), "generation cancelled");
    Ok(CancelOutcome {
        cancelled: true,
        stream_id: Some(stream_id),
    })
}
