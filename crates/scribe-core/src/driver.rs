use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::StreamError;
use crate::markers::{self, ReasoningTracker};
use crate::model::Association;
use crate::records::RecordSink;
use crate::source::{GenerationEvent, GenerationSource};
use crate::store::StreamStore;
use crate::writer::StreamWriter;

/// How a driven generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Upstream finished and the stream is `done`.
    Completed,
    /// Cancellation was observed; nothing durable was overwritten.
    Cancelled,
    /// Upstream or persistence failed; the stream is `error`.
    Failed(StreamError),
}

/// Everything a driver task needs besides the writer.
pub(crate) struct Driver {
    pub store: Arc<dyn StreamStore>,
    pub source: Arc<dyn GenerationSource>,
    pub records: Arc<dyn RecordSink>,
    pub config: Arc<EngineConfig>,
    pub association: Association,
    pub abort_rx: watch::Receiver<bool>,
}

enum Step {
    Event(GenerationEvent),
    Finished,
    Aborted,
    Failed(StreamError),
}

impl Driver {
    /// Consumes upstream events into the writer until completion, failure or
    /// cancellation.
    pub async fn run(mut self, mut writer: StreamWriter) -> DriveOutcome {
        let stream_id = writer.stream_id();
        let context_id = self.association.context_id.clone();
        let source_id = self.source.id();
        info!(stream_id = %stream_id, context_id = %context_id, source = %source_id, "generation started");

        if self.cancel_requested().await {
            writer.abandon();
            return DriveOutcome::Cancelled;
        }

        let mut events = match self.source.start(&self.association.parameters).await {
            Ok(events) => events,
            Err(err) => return self.fail(&mut writer, err.into()).await,
        };

        let mut tracker = ReasoningTracker::new();
        loop {
            if self.cancel_requested().await {
                info!(stream_id = %stream_id, "cancellation observed, stopping generation");
                writer.abandon();
                return DriveOutcome::Cancelled;
            }

            let step = tokio::select! {
                biased;
                _ = aborted(&mut self.abort_rx) => Step::Aborted,
                next = events.next() => match next {
                    Some(Ok(event)) => Step::Event(event),
                    Some(Err(err)) => Step::Failed(err.into()),
                    None => Step::Finished,
                },
            };

            let applied = match step {
                Step::Event(event) => apply_event(&mut writer, &mut tracker, event).await,
                Step::Finished => break,
                Step::Aborted => {
                    info!(stream_id = %stream_id, "cancellation signalled, stopping generation");
                    writer.abandon();
                    return DriveOutcome::Cancelled;
                }
                Step::Failed(err) => {
                    warn!(stream_id = %stream_id, error = %err, "upstream generation failed");
                    return self.fail(&mut writer, err).await;
                }
            };
            if let Err(err) = applied {
                return self.on_write_error(&mut writer, err).await;
            }
        }

        if let Some(end) = tracker.close(Utc::now().timestamp_millis())
            && let Err(err) = writer.append(&end).await
        {
            return self.on_write_error(&mut writer, err).await;
        }
        if self.cancel_requested().await {
            writer.abandon();
            return DriveOutcome::Cancelled;
        }
        if let Err(err) = writer.finish().await {
            return self.on_write_error(&mut writer, err).await;
        }

        self.complete(&writer).await;
        DriveOutcome::Completed
    }

    async fn complete(&self, writer: &StreamWriter) {
        let stream_id = writer.stream_id();
        let context_id = &self.association.context_id;
        let text = writer.text().to_owned();

        if let Err(err) = self.records.set_final_content(context_id, &text).await {
            warn!(stream_id = %stream_id, context_id = %context_id, error = %err, "failed to persist final content");
        }

        let answer = markers::strip(&text);
        if answer.chars().count() > self.config.enrichment_min_chars {
            let records = self.records.clone();
            let context_id = context_id.clone();
            tokio::spawn(async move {
                if let Err(err) = records.schedule_enrichment(&context_id, &answer).await {
                    warn!(context_id = %context_id, error = %err, "enrichment failed");
                }
            });
        } else {
            debug!(stream_id = %stream_id, chars = answer.chars().count(), "answer below enrichment threshold");
        }

        if let Err(err) = self.store.delete_association(stream_id).await {
            warn!(stream_id = %stream_id, error = %err, "failed to delete association after completion");
        }
        info!(stream_id = %stream_id, context_id = %context_id, chunks = writer.chunks_written(), "generation completed");
    }

    /// A write error either means someone else closed the stream (cancel or
    /// sweeper) or the store failed.
    async fn on_write_error(&self, writer: &mut StreamWriter, err: StreamError) -> DriveOutcome {
        match err {
            StreamError::StreamNotAcceptingWrites { id, status } => {
                info!(stream_id = %id, %status, "stream closed externally, stopping generation");
                writer.abandon();
                DriveOutcome::Cancelled
            }
            err => {
                warn!(stream_id = %writer.stream_id(), error = %err, "durable write failed");
                self.fail(writer, err).await
            }
        }
    }

    async fn fail(&self, writer: &mut StreamWriter, err: StreamError) -> DriveOutcome {
        let stream_id = writer.stream_id();
        let context_id = &self.association.context_id;
        if self.cancel_requested().await {
            debug!(stream_id = %stream_id, error = %err, "failure after cancellation, keeping cancelled content");
            writer.abandon();
            return DriveOutcome::Cancelled;
        }
        writer.fail().await;

        let annotated = format!("{}{}", writer.text(), self.config.failed_annotation);
        if let Err(record_err) = self.records.set_final_content(context_id, &annotated).await {
            warn!(stream_id = %stream_id, context_id = %context_id, error = %record_err, "failed to persist partial content");
        }
        if let Err(store_err) = self.store.delete_association(stream_id).await {
            warn!(stream_id = %stream_id, error = %store_err, "failed to delete association after failure");
        }
        DriveOutcome::Failed(err)
    }

    async fn cancel_requested(&self) -> bool {
        if *self.abort_rx.borrow() {
            return true;
        }
        if !self.config.poll_association {
            return false;
        }
        match self
            .store
            .association_exists(self.association.stream_id)
            .await
        {
            Ok(exists) => !exists,
            Err(err) => {
                warn!(stream_id = %self.association.stream_id, error = %err, "association check failed, continuing");
                false
            }
        }
    }
}

async fn apply_event(
    writer: &mut StreamWriter,
    tracker: &mut ReasoningTracker,
    event: GenerationEvent,
) -> Result<(), StreamError> {
    let now_ms = Utc::now().timestamp_millis();
    match event {
        GenerationEvent::TextDelta(text) => {
            if let Some(end) = tracker.close(now_ms) {
                writer.append(&end).await?;
            }
            writer.append(&text).await
        }
        GenerationEvent::ReasoningStart => writer.append(&tracker.open(now_ms)).await,
        GenerationEvent::ReasoningDelta(text) => {
            if !tracker.is_open() {
                writer.append(&tracker.open(now_ms)).await?;
            }
            writer.append(&text).await
        }
        GenerationEvent::ReasoningEnd => match tracker.close(now_ms) {
            Some(end) => writer.append(&end).await,
            None => Ok(()),
        },
    }
}

/// Resolves once the abort flag is set. Never resolves if the sender is gone.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
