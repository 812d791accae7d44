use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, info};

use crate::cancel::{self, CancelOutcome};
use crate::config::EngineConfig;
use crate::driver::{DriveOutcome, Driver};
use crate::errors::StreamError;
use crate::observability::stream_span;
use crate::model::{Association, ContextId, GenerationParams, StreamId, StreamSnapshot, StreamStatus};
use crate::records::RecordSink;
use crate::source::GenerationSource;
use crate::store::StreamStore;
use crate::sweeper::ExpirySweeper;
use crate::writer::StreamWriter;

/// Handle used to request cancellation of a running generation.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Requests cancellation. The driver stops at its next check.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

pub(crate) struct EngineInner {
    store: Arc<dyn StreamStore>,
    source: Arc<dyn GenerationSource>,
    records: Arc<dyn RecordSink>,
    config: Arc<EngineConfig>,
    writers: DashMap<StreamId, AbortHandle>,
}

/// Entry point for creating, driving, reading and cancelling streams.
#[derive(Clone)]
pub struct StreamEngine {
    inner: Arc<EngineInner>,
}

impl StreamEngine {
    pub fn builder() -> StreamEngineBuilder {
        StreamEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn StreamStore> {
        self.inner.store.clone()
    }

    /// Creates a `pending` stream and links it to `context_id`.
    pub async fn create_stream(
        &self,
        context_id: ContextId,
        parameters: GenerationParams,
    ) -> Result<StreamId, StreamError> {
        let stream_id = self.inner.store.create_stream().await?;
        self.inner
            .store
            .insert_association(Association {
                stream_id,
                context_id: context_id.clone(),
                parameters,
                created_at: chrono::Utc::now(),
            })
            .await?;
        info!(stream_id = %stream_id, context_id = %context_id, "stream created");
        Ok(stream_id)
    }

    /// Starts generation for a `pending` stream and returns its live byte feed.
    ///
    /// A second start for the same stream fails with `AlreadyStarted`, whether
    /// it races the first one in this process or arrives after the stream left
    /// `pending`.
    pub async fn start(&self, stream_id: StreamId) -> Result<LiveStream, StreamError> {
        let (abort, abort_rx) = AbortHandle::new();
        let slot = self.claim(stream_id, abort)?;

        let (live_tx, live_rx) = mpsc::unbounded_channel();
        let writer = StreamWriter::open(self.inner.store.clone(), stream_id, Some(live_tx)).await?;
        let association = self
            .inner
            .store
            .association_for_stream(stream_id)
            .await?
            .ok_or(StreamError::AssociationNotFound(stream_id))?;

        let span = stream_span(stream_id, &association.context_id);
        let driver = Driver {
            store: self.inner.store.clone(),
            source: self.inner.source.clone(),
            records: self.inner.records.clone(),
            config: self.inner.config.clone(),
            association,
            abort_rx,
        };
        let task = tokio::spawn(
            async move {
                let outcome = driver.run(writer).await;
                drop(slot);
                outcome
            }
            .instrument(span),
        );

        Ok(LiveStream {
            stream_id,
            rx: live_rx,
            task,
        })
    }

    /// Current text and status; works mid-stream and after completion.
    pub async fn read(&self, stream_id: StreamId) -> Result<StreamSnapshot, StreamError> {
        Ok(self.inner.store.get_text(stream_id).await?)
    }

    pub async fn status(&self, stream_id: StreamId) -> Result<StreamStatus, StreamError> {
        Ok(self.inner.store.get_status(stream_id).await?)
    }

    /// Cancels the active generation for `context_id`, if there is one.
    pub async fn cancel(&self, context_id: &ContextId) -> Result<CancelOutcome, StreamError> {
        cancel::cancel_generation(
            self.inner.store.as_ref(),
            self.inner.records.as_ref(),
            context_id,
            &self.inner.config.interrupted_annotation,
            |stream_id| {
                if let Some(handle) = self.inner.writers.get(&stream_id) {
                    handle.abort();
                }
            },
        )
        .await
    }

    /// Stream currently associated with `context_id`, used by clients that
    /// reconnect and need to resume polling.
    pub async fn active_stream(&self, context_id: &ContextId) -> Result<Option<StreamId>, StreamError> {
        Ok(self
            .inner
            .store
            .find_association(context_id)
            .await?
            .map(|a| a.stream_id))
    }

    /// Whether a writer for `stream_id` is running in this process.
    pub fn is_writing(&self, stream_id: StreamId) -> bool {
        self.inner.writers.contains_key(&stream_id)
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.inner.store.clone(),
            self.inner.config.sweep_interval,
            self.inner.config.expiry_window,
            self.inner.config.sweep_page_size,
        )
    }

    fn claim(&self, stream_id: StreamId, abort: AbortHandle) -> Result<WriterSlot, StreamError> {
        match self.inner.writers.entry(stream_id) {
            Entry::Occupied(_) => {
                debug!(stream_id = %stream_id, "writer already registered");
                Err(StreamError::AlreadyStarted(stream_id))
            }
            Entry::Vacant(entry) => {
                entry.insert(abort);
                Ok(WriterSlot {
                    inner: self.inner.clone(),
                    stream_id,
                })
            }
        }
    }
}

/// Registry entry for a live writer; removed when dropped.
struct WriterSlot {
    inner: Arc<EngineInner>,
    stream_id: StreamId,
}

impl Drop for WriterSlot {
    fn drop(&mut self) {
        self.inner.writers.remove(&self.stream_id);
    }
}

/// Live bytes of a started generation.
///
/// Dropping it detaches the reader only; the generation keeps running and
/// persisting, and clients resume through `StreamEngine::read`.
pub struct LiveStream {
    stream_id: StreamId,
    rx: mpsc::UnboundedReceiver<Bytes>,
    task: JoinHandle<DriveOutcome>,
}

impl LiveStream {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Next live piece of text, `None` once the writer closed the channel.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Drains the live channel and waits for the driver's outcome.
    pub async fn finish(mut self) -> (String, DriveOutcome) {
        let mut text = Vec::new();
        while let Some(bytes) = self.rx.recv().await {
            text.extend_from_slice(&bytes);
        }
        let outcome = match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => DriveOutcome::Failed(StreamError::GenerationFailure(format!(
                "driver task ended abnormally: {err}"
            ))),
        };
        (String::from_utf8_lossy(&text).into_owned(), outcome)
    }
}

impl futures::Stream for LiveStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Builder that wires the collaborators of a `StreamEngine`.
#[derive(Default)]
pub struct StreamEngineBuilder {
    store: Option<Arc<dyn StreamStore>>,
    source: Option<Arc<dyn GenerationSource>>,
    records: Option<Arc<dyn RecordSink>>,
    config: EngineConfig,
}

impl StreamEngineBuilder {
    pub fn store(mut self, store: Arc<dyn StreamStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(mut self, source: Arc<dyn GenerationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine, rejecting missing collaborators and invalid config.
    pub fn build(self) -> Result<StreamEngine, StreamError> {
        let store = self
            .store
            .ok_or_else(|| StreamError::Config("stream store is required".into()))?;
        let source = self
            .source
            .ok_or_else(|| StreamError::Config("generation source is required".into()))?;
        let records = self
            .records
            .ok_or_else(|| StreamError::Config("record sink is required".into()))?;
        self.config.validate().map_err(StreamError::Config)?;

        Ok(StreamEngine {
            inner: Arc::new(EngineInner {
                store,
                source,
                records,
                config: Arc::new(self.config),
                writers: DashMap::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationError;
    use crate::records::MemoryRecords;
    use crate::source::{EventStream, GenerationEvent, SourceId};
    use crate::store::MemoryStreamStore;
    use futures::stream;

    struct NeverSource;

    #[async_trait::async_trait]
    impl GenerationSource for NeverSource {
        fn id(&self) -> SourceId {
            SourceId::new("never")
        }

        async fn start(&self, _params: &GenerationParams) -> Result<EventStream, GenerationError> {
            Ok(Box::pin(stream::pending::<Result<GenerationEvent, GenerationError>>()))
        }
    }

    fn engine() -> StreamEngine {
        StreamEngine::builder()
            .store(Arc::new(MemoryStreamStore::new()))
            .source(Arc::new(NeverSource))
            .records(Arc::new(MemoryRecords::new()))
            .build()
            .expect("engine")
    }

    #[test]
    fn build_requires_every_collaborator() {
        let result = StreamEngine::builder()
            .store(Arc::new(MemoryStreamStore::new()))
            .records(Arc::new(MemoryRecords::new()))
            .build();
        assert!(matches!(result, Err(StreamError::Config(message)) if message.contains("source")));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = StreamEngine::builder()
            .store(Arc::new(MemoryStreamStore::new()))
            .source(Arc::new(NeverSource))
            .records(Arc::new(MemoryRecords::new()))
            .config(EngineConfig::default().sweep_page_size(0))
            .build();
        assert!(matches!(result, Err(StreamError::Config(_))));
    }

    #[tokio::test]
    async fn concurrent_start_is_refused_while_writer_is_registered() {
        let engine = engine();
        let id = engine
            .create_stream(ContextId::new("turn"), GenerationParams::default())
            .await
            .expect("create");

        let first = engine.start(id).await.expect("first start");
        assert!(engine.is_writing(id));
        let second = engine.start(id).await.err().expect("second start refused");
        assert_eq!(second, StreamError::AlreadyStarted(id));

        engine.cancel(&ContextId::new("turn")).await.expect("cancel");
        let (_, outcome) = first.finish().await;
        assert_eq!(outcome, DriveOutcome::Cancelled);
        assert!(!engine.is_writing(id));
    }

    #[tokio::test]
    async fn start_without_association_is_reported() {
        let engine = engine();
        let id = engine.store().create_stream().await.expect("create");
        let err = engine.start(id).await.err().expect("no association");
        assert_eq!(err, StreamError::AssociationNotFound(id));
        assert!(!engine.is_writing(id));
    }

    #[tokio::test]
    async fn start_of_unknown_stream_is_not_found() {
        let engine = engine();
        let id = StreamId::new();
        let err = engine.start(id).await.err().expect("unknown");
        assert_eq!(err, StreamError::StreamNotFound(id));
    }
}
