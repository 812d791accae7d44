use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::StreamError;
use crate::model::{StreamId, StreamStatus};
use crate::store::StreamStore;

/// Characters that trigger a durable flush of the pending buffer.
pub const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Live outbound byte channel. Unbounded so a slow reader never backs up the
/// durable path.
pub type LiveSender = mpsc::UnboundedSender<Bytes>;

/// Single writer for one stream, fanning appended text out to the live channel
/// (best-effort) and to the store (durable, batched per sentence).
pub struct StreamWriter {
    store: Arc<dyn StreamStore>,
    stream_id: StreamId,
    live: Option<LiveSender>,
    buffer: String,
    accumulated: String,
    chunks_written: u64,
}

impl StreamWriter {
    /// Opens the writer after checking the stream is still `pending`.
    pub async fn open(
        store: Arc<dyn StreamStore>,
        stream_id: StreamId,
        live: Option<LiveSender>,
    ) -> Result<Self, StreamError> {
        let status = store.get_status(stream_id).await?;
        if status != StreamStatus::Pending {
            debug!(stream_id = %stream_id, %status, "writer refused, stream already started");
            return Err(StreamError::AlreadyStarted(stream_id));
        }
        Ok(Self {
            store,
            stream_id,
            live,
            buffer: String::new(),
            accumulated: String::new(),
            chunks_written: 0,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Everything appended so far, flushed or not.
    pub fn text(&self) -> &str {
        &self.accumulated
    }

    /// Whether the live channel is still attached.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Number of durable chunks written by this writer.
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Appends text: live write first, then buffer, then flush if the buffer
    /// now holds a sentence terminator.
    ///
    /// Live failures are swallowed; only durable failures are returned.
    pub async fn append(&mut self, text: &str) -> Result<(), StreamError> {
        if text.is_empty() {
            return Ok(());
        }
        self.accumulated.push_str(text);
        if let Err(err) = self.write_live(text) {
            debug!(stream_id = %self.stream_id, error = %err, "live channel closed, continuing durably");
        }
        self.buffer.push_str(text);
        if self.buffer.contains(SENTENCE_TERMINATORS) {
            self.flush(false).await?;
        }
        Ok(())
    }

    /// Final flush with `last = true` (the store marks the stream done), then
    /// closes the live channel.
    pub async fn finish(&mut self) -> Result<(), StreamError> {
        let result = self.flush(true).await;
        self.close_live();
        result
    }

    /// Failure path: one best-effort flush, status `error`, live channel closed.
    pub async fn fail(&mut self) {
        if let Err(err) = self.flush(false).await {
            warn!(stream_id = %self.stream_id, error = %err, "final flush before failure did not persist");
        }
        if let Err(err) = self.store.set_status(self.stream_id, StreamStatus::Error).await {
            warn!(stream_id = %self.stream_id, error = %err, "could not mark stream as error");
        }
        self.close_live();
    }

    /// Cancellation path: closes the live channel and drops unflushed text
    /// without touching the store.
    pub fn abandon(&mut self) {
        if !self.buffer.is_empty() {
            debug!(stream_id = %self.stream_id, dropped = self.buffer.len(), "dropping unflushed text on cancellation");
        }
        self.buffer.clear();
        self.close_live();
    }

    fn write_live(&mut self, text: &str) -> Result<(), StreamError> {
        let Some(live) = self.live.as_ref() else {
            return Ok(());
        };
        if live.send(Bytes::copy_from_slice(text.as_bytes())).is_err() {
            self.live = None;
            return Err(StreamError::TransportWriteFailure(
                "live receiver dropped".into(),
            ));
        }
        Ok(())
    }

    fn close_live(&mut self) {
        self.live = None;
    }

    async fn flush(&mut self, last: bool) -> Result<(), StreamError> {
        if self.buffer.is_empty() && !last {
            return Ok(());
        }
        let text = std::mem::take(&mut self.buffer);
        match self.store.append_chunk(self.stream_id, &text, last).await {
            Ok(()) => {
                if !text.is_empty() {
                    debug!(stream_id = %self.stream_id, seq = self.chunks_written, len = text.len(), last, "chunk persisted");
                    self.chunks_written += 1;
                }
                Ok(())
            }
            Err(err) => {
                self.buffer = text;
                Err(err.into())
            }
        }
    }
}
