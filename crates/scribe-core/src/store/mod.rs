//! Durable stream persistence.
//!
//! A `StreamStore` is the single source of truth for stream status, the
//! ordered chunk log, and the association records linking streams to their
//! business context.

mod memory;
mod sqlite;

pub use memory::MemoryStreamStore;
pub use sqlite::SqliteStreamStore;

use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::model::{Association, ContextId, StreamId, StreamRecord, StreamSnapshot, StreamStatus};

/// Persistence contract used by the writer, driver, reader and sweeper.
///
/// Every mutation is a single-record operation. Implementations must make the
/// writable check inside `append_chunk` atomic with respect to concurrent
/// `set_status` / `expire_if_idle` calls on the same stream.
#[async_trait::async_trait]
pub trait StreamStore: Send + Sync {
    /// Inserts a new stream with status `pending` and returns its id.
    async fn create_stream(&self) -> Result<StreamId, StoreError>;

    /// Appends one chunk.
    ///
    /// The first append moves `pending` to `streaming`; `last` finalizes the
    /// stream as `done`. Empty text inserts no chunk but still refreshes
    /// activity and honours `last`.
    async fn append_chunk(&self, id: StreamId, text: &str, last: bool) -> Result<(), StoreError>;

    /// Sets the status when the change moves forward (see
    /// [`StreamStatus::can_transition_to`]). Returns whether the status changed.
    async fn set_status(&self, id: StreamId, status: StreamStatus) -> Result<bool, StoreError>;

    /// Returns the current status, or `StreamNotFound`.
    async fn get_status(&self, id: StreamId) -> Result<StreamStatus, StoreError>;

    /// Returns the concatenated text in insertion order plus the status.
    async fn get_text(&self, id: StreamId) -> Result<StreamSnapshot, StoreError>;

    /// Returns one page of `pending`/`streaming` streams with ids greater than
    /// `after`, ordered by id.
    async fn list_active(
        &self,
        after: Option<StreamId>,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StoreError>;

    /// Moves the stream to `timeout` if it is still writable and its last
    /// activity is older than `cutoff`.
    async fn expire_if_idle(&self, id: StreamId, cutoff: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn insert_association(&self, association: Association) -> Result<(), StoreError>;

    async fn find_association(&self, context_id: &ContextId) -> Result<Option<Association>, StoreError>;

    async fn association_for_stream(&self, id: StreamId) -> Result<Option<Association>, StoreError>;

    /// Cheap existence check used by the driver's cooperative cancellation.
    async fn association_exists(&self, id: StreamId) -> Result<bool, StoreError> {
        Ok(self.association_for_stream(id).await?.is_some())
    }

    /// Deletes the association for a stream. Returns whether one existed.
    async fn delete_association(&self, id: StreamId) -> Result<bool, StoreError>;
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour shared by every backend.

    use super::*;

    pub async fn append_concatenates_in_call_order(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        for part in ["Hello", ", ", "world", "."] {
            store.append_chunk(id, part, false).await.expect("append");
        }
        let snapshot = store.get_text(id).await.expect("text");
        assert_eq!(snapshot.text, "Hello, world.");
        assert_eq!(snapshot.status, StreamStatus::Streaming);
    }

    pub async fn pending_reads_empty(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        let snapshot = store.get_text(id).await.expect("text");
        assert_eq!(snapshot.text, "");
        assert_eq!(snapshot.status, StreamStatus::Pending);
    }

    pub async fn final_append_marks_done_and_rejects_more(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        store.append_chunk(id, "all", true).await.expect("append");
        assert_eq!(store.get_status(id).await.expect("status"), StreamStatus::Done);
        let err = store.append_chunk(id, "more", false).await.expect_err("closed");
        assert_eq!(
            err,
            StoreError::StreamNotAcceptingWrites {
                id,
                status: StreamStatus::Done
            }
        );
        assert_eq!(store.get_text(id).await.expect("text").text, "all");
    }

    pub async fn terminal_status_is_sticky(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        assert!(store.set_status(id, StreamStatus::Error).await.expect("set"));
        for status in [StreamStatus::Done, StreamStatus::Streaming, StreamStatus::Timeout] {
            assert!(!store.set_status(id, status).await.expect("set"));
        }
        assert_eq!(store.get_status(id).await.expect("status"), StreamStatus::Error);
    }

    pub async fn status_never_moves_backward(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        store.append_chunk(id, "a", false).await.expect("append");
        assert!(!store.set_status(id, StreamStatus::Pending).await.expect("set"));
        assert!(!store.set_status(id, StreamStatus::Streaming).await.expect("set"));
        assert_eq!(store.get_status(id).await.expect("status"), StreamStatus::Streaming);
        assert!(store.set_status(id, StreamStatus::Done).await.expect("set"));
    }

    pub async fn unknown_stream_is_reported(store: &dyn StreamStore) {
        let id = StreamId::new();
        assert_eq!(
            store.get_status(id).await,
            Err(StoreError::StreamNotFound(id))
        );
        assert_eq!(
            store.append_chunk(id, "x", false).await,
            Err(StoreError::StreamNotFound(id))
        );
        assert!(matches!(
            store.get_text(id).await,
            Err(StoreError::StreamNotFound(_))
        ));
    }

    pub async fn empty_final_append_finalizes_without_chunk(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        store.append_chunk(id, "body", false).await.expect("append");
        store.append_chunk(id, "", true).await.expect("final");
        let snapshot = store.get_text(id).await.expect("text");
        assert_eq!(snapshot.text, "body");
        assert_eq!(snapshot.status, StreamStatus::Done);
    }

    pub async fn list_active_pages_by_id(store: &dyn StreamStore) {
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.create_stream().await.expect("create"));
        }
        store
            .set_status(ids[2], StreamStatus::Done)
            .await
            .expect("set");
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.list_active(cursor, 2).await.expect("page");
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 2);
            cursor = page.last().map(|r| r.id);
            seen.extend(page.into_iter().map(|r| r.id));
        }
        let mut expected: Vec<StreamId> = ids
            .iter()
            .copied()
            .filter(|id| *id != ids[2])
            .collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    pub async fn expire_if_idle_respects_cutoff(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(!store.expire_if_idle(id, past).await.expect("expire"));
        assert_eq!(store.get_status(id).await.expect("status"), StreamStatus::Pending);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(store.expire_if_idle(id, future).await.expect("expire"));
        assert_eq!(store.get_status(id).await.expect("status"), StreamStatus::Timeout);
        assert!(!store.expire_if_idle(id, future).await.expect("expire again"));
    }

    pub async fn associations_round_trip(store: &dyn StreamStore) {
        let id = store.create_stream().await.expect("create");
        let association = Association {
            stream_id: id,
            context_id: ContextId::new("turn-1"),
            parameters: crate::model::GenerationParams::new("m", "p"),
            created_at: Utc::now(),
        };
        store
            .insert_association(association.clone())
            .await
            .expect("insert");
        assert!(store.association_exists(id).await.expect("exists"));
        let found = store
            .find_association(&ContextId::new("turn-1"))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.stream_id, id);
        assert_eq!(found.parameters, association.parameters);
        assert!(store.delete_association(id).await.expect("delete"));
        assert!(!store.delete_association(id).await.expect("delete twice"));
        assert!(!store.association_exists(id).await.expect("exists"));
        assert!(
            store
                .find_association(&ContextId::new("turn-1"))
                .await
                .expect("find")
                .is_none()
        );
    }

    pub async fn newest_association_delete_falls_back_to_older(store: &dyn StreamStore) {
        let context = ContextId::new("turn");
        let older = store.create_stream().await.expect("create");
        let newer = store.create_stream().await.expect("create");
        let now = Utc::now();
        for (id, created_at) in [(older, now - chrono::Duration::seconds(10)), (newer, now)] {
            store
                .insert_association(Association {
                    stream_id: id,
                    context_id: context.clone(),
                    parameters: crate::model::GenerationParams::default(),
                    created_at,
                })
                .await
                .expect("insert");
        }

        let found = store.find_association(&context).await.expect("find");
        assert_eq!(found.map(|a| a.stream_id), Some(newer));

        assert!(store.delete_association(newer).await.expect("delete"));
        let found = store.find_association(&context).await.expect("find");
        assert_eq!(found.map(|a| a.stream_id), Some(older));

        assert!(store.delete_association(older).await.expect("delete"));
        assert!(store.find_association(&context).await.expect("find").is_none());
    }
}
