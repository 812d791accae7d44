//! Persistent, resumable text streaming for long-running generations.
//!
//! A generation writes into a durable stream (status plus ordered chunks) while
//! also feeding a live byte channel. Clients that disconnect resume by polling
//! `StreamEngine::read`; the text they get back is the same text the live
//! channel carried, reasoning markers included.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scribe_core::prelude::*;
//! use scribe_core::vendors::openai::OpenAiSource;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let engine = StreamEngine::builder()
//!     .store(Arc::new(MemoryStreamStore::new()))
//!     .source(Arc::new(OpenAiSource::from_env()?))
//!     .records(Arc::new(MemoryRecords::new()))
//!     .build()?;
//!
//! let stream_id = engine
//!     .create_stream(ContextId::new("turn-1"), GenerationParams::new("gpt-5-nano", "Say hello"))
//!     .await?;
//! let (text, _outcome) = engine.start(stream_id).await?.finish().await;
//! assert_eq!(engine.read(stream_id).await?.text, text);
//! # Ok(())
//! # }
//! ```

/// Cancellation of an active generation by context id.
pub mod cancel;
/// Engine tunables.
pub mod config;
/// Generation driver: upstream events into the stream writer.
pub mod driver;
/// Engine facade, builder and live stream handle.
pub mod engine;
/// Error taxonomy.
pub mod errors;
/// Reasoning marker encoding and decoding.
pub mod markers;
/// Identifiers, statuses and stream records.
pub mod model;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Owning business record collaborator.
pub mod records;
/// Upstream generation source contract.
pub mod source;
/// Durable stream storage.
pub mod store;
/// Periodic timeout of abandoned streams.
pub mod sweeper;
/// Vendor-specific generation sources.
pub mod vendors;
/// Dual-path stream writer.
pub mod writer;

pub use cancel::CancelOutcome;
pub use config::EngineConfig;
pub use driver::DriveOutcome;
pub use engine::{AbortHandle, LiveStream, StreamEngine, StreamEngineBuilder};
pub use errors::{GenerationError, StoreError, StreamError};
pub use model::{
    Association, Chunk, ContextId, GenerationParams, StreamId, StreamRecord, StreamSnapshot,
    StreamStatus,
};
pub use records::{MemoryRecords, RecordError, RecordSink};
pub use source::{EventStream, GenerationEvent, GenerationSource, SourceId};
pub use store::{MemoryStreamStore, SqliteStreamStore, StreamStore};
pub use sweeper::ExpirySweeper;
pub use writer::StreamWriter;
