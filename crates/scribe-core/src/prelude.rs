//! Common imports for typical engine usage.
pub use crate::{
    CancelOutcome, ContextId, DriveOutcome, EngineConfig, GenerationEvent, GenerationParams,
    GenerationSource, LiveStream, MemoryRecords, MemoryStreamStore, RecordSink, SqliteStreamStore,
    StreamEngine, StreamError, StreamId, StreamSnapshot, StreamStatus, StreamStore,
};
