use crate::model::{StreamId, StreamStatus};
use crate::source::SourceId;

/// Errors returned by a `StreamStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No stream record exists for the id.
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),
    /// Append attempted on a stream whose status is terminal.
    #[error("stream {id} is not accepting writes (status {status})")]
    StreamNotAcceptingWrites { id: StreamId, status: StreamStatus },
    /// The storage backend itself failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Errors raised by a generation source, before they are normalized for the
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Source returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({source_id}): {message}")]
    Provider {
        source_id: SourceId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({source_id}): {message}")]
    Transport { source_id: SourceId, message: String },
    /// Response shape or event sequencing was invalid.
    #[error("protocol error ({source_id}): {message}")]
    Protocol { source_id: SourceId, message: String },
}

impl GenerationError {
    /// Creates a provider-level error.
    pub fn provider(
        source_id: impl Into<SourceId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            source_id: source_id.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(source_id: impl Into<SourceId>, message: impl Into<String>) -> Self {
        Self::Transport {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(source_id: impl Into<SourceId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Top-level error type for the public engine API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),
    #[error("stream {id} is not accepting writes (status {status})")]
    StreamNotAcceptingWrites { id: StreamId, status: StreamStatus },
    /// Writer guard triggered: the stream is no longer pending or already has a
    /// live writer.
    #[error("stream already started: {0}")]
    AlreadyStarted(StreamId),
    /// No association links this stream to a business record.
    #[error("no association for stream {0}")]
    AssociationNotFound(StreamId),
    /// The upstream event source raised.
    #[error("generation failed: {0}")]
    GenerationFailure(String),
    /// The live channel is gone. Never fatal to the durable path.
    #[error("live transport write failed: {0}")]
    TransportWriteFailure(String),
    /// A durable write failed. Fatal to the stream.
    #[error("persistence failed: {0}")]
    PersistenceFailure(String),
    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl From<StoreError> for StreamError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::StreamNotFound(id) => Self::StreamNotFound(id),
            StoreError::StreamNotAcceptingWrites { id, status } => {
                Self::StreamNotAcceptingWrites { id, status }
            }
            StoreError::Backend(message) => Self::PersistenceFailure(message),
        }
    }
}

impl From<GenerationError> for StreamError {
    fn from(value: GenerationError) -> Self {
        Self::GenerationFailure(value.to_string())
    }
}
