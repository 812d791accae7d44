use std::fmt;

use chrono::{DateTime, Utc};

/// Stable identifier for one generation attempt's stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub uuid::Uuid);

impl StreamId {
    /// Creates a fresh random stream id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parses a stream id from its hyphenated string form.
    pub fn parse(value: &str) -> Option<Self> {
        uuid::Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<uuid::Uuid> for StreamId {
    fn from(value: uuid::Uuid) -> Self {
        Self(value)
    }
}

/// Identifier of the business record a stream belongs to (for example a
/// conversation turn).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub String);

impl ContextId {
    /// Creates a context id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the context id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContextId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a stream.
///
/// Transitions only move forward: `pending -> streaming -> {done, error, timeout}`,
/// and `pending` may jump straight to any terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Created, no writer has appended yet.
    Pending,
    /// A writer has appended at least one chunk.
    Streaming,
    /// Finished normally.
    Done,
    /// Failed or cancelled.
    Error,
    /// Abandoned and reconciled by the expiry sweeper.
    Timeout,
}

impl StreamStatus {
    /// Returns true for `done`, `error` and `timeout`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Timeout)
    }

    /// Returns true when chunks may still be appended.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }

    /// Returns true when moving to `next` goes strictly forward.
    pub fn can_transition_to(self, next: StreamStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Streaming => 1,
            Self::Done | Self::Error | Self::Timeout => 2,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Parses the lowercase wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "streaming" => Some(Self::Streaming),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable stream entity.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamRecord {
    pub id: StreamId,
    pub status: StreamStatus,
    pub last_activity_at: DateTime<Utc>,
}

/// One durably persisted fragment of a stream's text.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Chunk {
    pub stream_id: StreamId,
    /// Insertion index within the stream, starting at 0.
    pub seq: u64,
    pub text: String,
}

/// Parameters needed to (re)run generation for a stream.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationParams {
    /// Provider-specific model name.
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub prompt: String,
    /// Free-form provider options.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt = Some(text.into());
        self
    }
}

/// Links a stream to the business record it belongs to.
///
/// Its existence is what marks a generation as active; deleting it requests
/// cancellation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Association {
    pub stream_id: StreamId,
    pub context_id: ContextId,
    pub parameters: GenerationParams,
    pub created_at: DateTime<Utc>,
}

/// Result of a read: accumulated text and current status.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamSnapshot {
    pub text: String,
    pub status: StreamStatus,
}
