use std::fmt;
use std::pin::Pin;

use crate::errors::GenerationError;
use crate::model::GenerationParams;

/// Stable identifier for a generation source implementation (for example `openai`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Typed upstream events. The end of the event stream means the generation
/// completed normally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    /// Incremental answer text.
    TextDelta(String),
    /// A reasoning segment opens.
    ReasoningStart,
    /// Incremental reasoning text.
    ReasoningDelta(String),
    /// The open reasoning segment closes.
    ReasoningEnd,
}

/// Boxed upstream event sequence.
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<GenerationEvent, GenerationError>> + Send + 'static>>;

/// Contract implemented by upstream text generators.
#[async_trait::async_trait]
pub trait GenerationSource: Send + Sync {
    /// Identifier used in logs and errors.
    fn id(&self) -> SourceId;

    /// Starts a generation and returns its event stream.
    async fn start(&self, params: &GenerationParams) -> Result<EventStream, GenerationError>;
}
