use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::StreamStore;
use crate::errors::StoreError;
use crate::model::{Association, Chunk, ContextId, StreamId, StreamRecord, StreamSnapshot, StreamStatus};

struct StreamEntry {
    record: StreamRecord,
    chunks: Vec<String>,
}

/// In-process store backed by `DashMap`.
///
/// Each stream's record and chunk log share one map entry, so the writable
/// check and the append happen under the same shard lock.
#[derive(Default)]
pub struct MemoryStreamStore {
    streams: DashMap<StreamId, StreamEntry>,
    associations: DashMap<StreamId, Association>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the chunk log for a stream, in insertion order.
    pub fn chunks(&self, id: StreamId) -> Option<Vec<Chunk>> {
        self.streams.get(&id).map(|entry| {
            entry
                .chunks
                .iter()
                .enumerate()
                .map(|(seq, text)| Chunk {
                    stream_id: id,
                    seq: seq as u64,
                    text: text.clone(),
                })
                .collect()
        })
    }

    /// Overrides the activity timestamp; used to simulate idle streams.
    pub fn set_last_activity(&self, id: StreamId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entry = self
            .streams
            .get_mut(&id)
            .ok_or(StoreError::StreamNotFound(id))?;
        entry.record.last_activity_at = at;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StreamStore for MemoryStreamStore {
    async fn create_stream(&self) -> Result<StreamId, StoreError> {
        let id = StreamId::new();
        self.streams.insert(
            id,
            StreamEntry {
                record: StreamRecord {
                    id,
                    status: StreamStatus::Pending,
                    last_activity_at: Utc::now(),
                },
                chunks: Vec::new(),
            },
        );
        debug!(stream_id = %id, "stream created");
        Ok(id)
    }

    async fn append_chunk(&self, id: StreamId, text: &str, last: bool) -> Result<(), StoreError> {
        let mut entry = self
            .streams
            .get_mut(&id)
            .ok_or(StoreError::StreamNotFound(id))?;
        let status = entry.record.status;
        if !status.is_writable() {
            return Err(StoreError::StreamNotAcceptingWrites { id, status });
        }
        if !text.is_empty() {
            entry.chunks.push(text.to_owned());
        }
        entry.record.status = if last {
            StreamStatus::Done
        } else {
            StreamStatus::Streaming
        };
        entry.record.last_activity_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, id: StreamId, status: StreamStatus) -> Result<bool, StoreError> {
        let mut entry = self
            .streams
            .get_mut(&id)
            .ok_or(StoreError::StreamNotFound(id))?;
        let current = entry.record.status;
        if !current.can_transition_to(status) {
            debug!(stream_id = %id, %current, requested = %status, "status change not forward, ignoring");
            return Ok(false);
        }
        entry.record.status = status;
        Ok(true)
    }

    async fn get_status(&self, id: StreamId) -> Result<StreamStatus, StoreError> {
        self.streams
            .get(&id)
            .map(|entry| entry.record.status)
            .ok_or(StoreError::StreamNotFound(id))
    }

    async fn get_text(&self, id: StreamId) -> Result<StreamSnapshot, StoreError> {
        let entry = self
            .streams
            .get(&id)
            .ok_or(StoreError::StreamNotFound(id))?;
        let status = entry.record.status;
        let text = if status == StreamStatus::Pending {
            String::new()
        } else {
            entry.chunks.concat()
        };
        Ok(StreamSnapshot { text, status })
    }

    async fn list_active(
        &self,
        after: Option<StreamId>,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        let mut page: Vec<StreamRecord> = self
            .streams
            .iter()
            .filter(|entry| entry.record.status.is_writable())
            .filter(|entry| after.is_none_or(|cursor| entry.record.id > cursor))
            .map(|entry| entry.record.clone())
            .collect();
        page.sort_by_key(|record| record.id);
        page.truncate(limit);
        Ok(page)
    }

    async fn expire_if_idle(&self, id: StreamId, cutoff: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut entry = self
            .streams
            .get_mut(&id)
            .ok_or(StoreError::StreamNotFound(id))?;
        if !entry.record.status.is_writable() || entry.record.last_activity_at >= cutoff {
            return Ok(false);
        }
        entry.record.status = StreamStatus::Timeout;
        Ok(true)
    }

    async fn insert_association(&self, association: Association) -> Result<(), StoreError> {
        if !self.streams.contains_key(&association.stream_id) {
            return Err(StoreError::StreamNotFound(association.stream_id));
        }
        self.associations.insert(association.stream_id, association);
        Ok(())
    }

    async fn find_association(&self, context_id: &ContextId) -> Result<Option<Association>, StoreError> {
        // Newest wins; an older association resurfaces once the newer one is deleted.
        Ok(self
            .associations
            .iter()
            .filter(|entry| entry.context_id == *context_id)
            .max_by_key(|entry| entry.created_at)
            .map(|entry| entry.value().clone()))
    }

    async fn association_for_stream(&self, id: StreamId) -> Result<Option<Association>, StoreError> {
        Ok(self.associations.get(&id).map(|a| a.clone()))
    }

    async fn association_exists(&self, id: StreamId) -> Result<bool, StoreError> {
        Ok(self.associations.contains_key(&id))
    }

    async fn delete_association(&self, id: StreamId) -> Result<bool, StoreError> {
        Ok(self.associations.remove(&id).is_some())
    }
}
