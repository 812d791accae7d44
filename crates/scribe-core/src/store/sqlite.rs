use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::StreamStore;
use crate::errors::StoreError;
use crate::model::{
    Association, ContextId, GenerationParams, StreamId, StreamRecord, StreamSnapshot,
    StreamStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    last_activity_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_streams_status ON streams(status, id);

CREATE TABLE IF NOT EXISTS chunks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    stream_id TEXT NOT NULL,
    text TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_stream ON chunks(stream_id, seq);

CREATE TABLE IF NOT EXISTS associations (
    stream_id TEXT PRIMARY KEY,
    context_id TEXT NOT NULL,
    parameters TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_associations_context ON associations(context_id, created_at);
"#;

/// Durable store on a single SQLite database.
///
/// Calls run on the blocking pool; the connection mutex serializes writers,
/// and each read-check-write sequence runs inside one transaction.
#[derive(Clone)]
pub struct SqliteStreamStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStreamStore {
    /// Opens (or creates) a database file and applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(StoreError::backend)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .map_err(StoreError::backend)?;
            conn.execute_batch(SCHEMA).map_err(StoreError::backend)?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(StoreError::backend)??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(StoreError::backend)?
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp {ms}")))
}

fn parse_status(raw: &str) -> Result<StreamStatus, StoreError> {
    StreamStatus::parse(raw).ok_or_else(|| StoreError::Backend(format!("unknown status {raw:?}")))
}

fn parse_id(raw: &str) -> Result<StreamId, StoreError> {
    StreamId::parse(raw).ok_or_else(|| StoreError::Backend(format!("invalid stream id {raw:?}")))
}

fn read_status(conn: &Connection, id: StreamId) -> Result<StreamStatus, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM streams WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::backend)?;
    match raw {
        Some(raw) => parse_status(&raw),
        None => Err(StoreError::StreamNotFound(id)),
    }
}

type AssociationRow = (String, String, String, i64);

fn association_from_row(row: AssociationRow) -> Result<Association, StoreError> {
    let (stream_id, context_id, parameters, created_at) = row;
    let parameters: GenerationParams =
        serde_json::from_str(&parameters).map_err(StoreError::backend)?;
    Ok(Association {
        stream_id: parse_id(&stream_id)?,
        context_id: ContextId::new(context_id),
        parameters,
        created_at: from_millis(created_at)?,
    })
}

#[async_trait::async_trait]
impl StreamStore for SqliteStreamStore {
    async fn create_stream(&self) -> Result<StreamId, StoreError> {
        let id = StreamId::new();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO streams (id, status, last_activity_at) VALUES (?1, ?2, ?3)",
                params![
                    id.to_string(),
                    StreamStatus::Pending.as_str(),
                    to_millis(Utc::now())
                ],
            )
            .map_err(StoreError::backend)?;
            Ok(())
        })
        .await?;
        debug!(stream_id = %id, "stream created");
        Ok(id)
    }

    async fn append_chunk(&self, id: StreamId, text: &str, last: bool) -> Result<(), StoreError> {
        let text = text.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(StoreError::backend)?;
            let status = read_status(&tx, id)?;
            if !status.is_writable() {
                return Err(StoreError::StreamNotAcceptingWrites { id, status });
            }
            if !text.is_empty() {
                tx.execute(
                    "INSERT INTO chunks (stream_id, text) VALUES (?1, ?2)",
                    params![id.to_string(), text],
                )
                .map_err(StoreError::backend)?;
            }
            let next = if last {
                StreamStatus::Done
            } else {
                StreamStatus::Streaming
            };
            tx.execute(
                "UPDATE streams SET status = ?1, last_activity_at = ?2 WHERE id = ?3",
                params![next.as_str(), to_millis(Utc::now()), id.to_string()],
            )
            .map_err(StoreError::backend)?;
            tx.commit().map_err(StoreError::backend)
        })
        .await
    }

    async fn set_status(&self, id: StreamId, status: StreamStatus) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(StoreError::backend)?;
            let current = read_status(&tx, id)?;
            if !current.can_transition_to(status) {
                debug!(stream_id = %id, %current, requested = %status, "status change not forward, ignoring");
                return Ok(false);
            }
            tx.execute(
                "UPDATE streams SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )
            .map_err(StoreError::backend)?;
            tx.commit().map_err(StoreError::backend)?;
            Ok(true)
        })
        .await
    }

    async fn get_status(&self, id: StreamId) -> Result<StreamStatus, StoreError> {
        self.with_conn(move |conn| read_status(conn, id)).await
    }

    async fn get_text(&self, id: StreamId) -> Result<StreamSnapshot, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(StoreError::backend)?;
            let status = read_status(&tx, id)?;
            if status == StreamStatus::Pending {
                return Ok(StreamSnapshot {
                    text: String::new(),
                    status,
                });
            }
            let mut text = String::new();
            {
                let mut stmt = tx
                    .prepare("SELECT text FROM chunks WHERE stream_id = ?1 ORDER BY seq ASC")
                    .map_err(StoreError::backend)?;
                let rows = stmt
                    .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
                    .map_err(StoreError::backend)?;
                for row in rows {
                    text.push_str(&row.map_err(StoreError::backend)?);
                }
            }
            Ok(StreamSnapshot { text, status })
        })
        .await
    }

    async fn list_active(
        &self,
        after: Option<StreamId>,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        let cursor = after.map(|id| id.to_string()).unwrap_or_default();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, status, last_activity_at FROM streams \
                     WHERE status IN ('pending', 'streaming') AND id > ?1 \
                     ORDER BY id ASC LIMIT ?2",
                )
                .map_err(StoreError::backend)?;
            let rows = stmt
                .query_map(params![cursor, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(StoreError::backend)?;
            let mut page = Vec::new();
            for row in rows {
                let (id, status, last_activity_at) = row.map_err(StoreError::backend)?;
                page.push(StreamRecord {
                    id: parse_id(&id)?,
                    status: parse_status(&status)?,
                    last_activity_at: from_millis(last_activity_at)?,
                });
            }
            Ok(page)
        })
        .await
    }

    async fn expire_if_idle(&self, id: StreamId, cutoff: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE streams SET status = 'timeout' \
                     WHERE id = ?1 AND status IN ('pending', 'streaming') AND last_activity_at < ?2",
                    params![id.to_string(), to_millis(cutoff)],
                )
                .map_err(StoreError::backend)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_association(&self, association: Association) -> Result<(), StoreError> {
        let parameters =
            serde_json::to_string(&association.parameters).map_err(StoreError::backend)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(StoreError::backend)?;
            read_status(&tx, association.stream_id)?;
            tx.execute(
                "INSERT OR REPLACE INTO associations (stream_id, context_id, parameters, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    association.stream_id.to_string(),
                    association.context_id.as_str(),
                    parameters,
                    to_millis(association.created_at)
                ],
            )
            .map_err(StoreError::backend)?;
            tx.commit().map_err(StoreError::backend)
        })
        .await
    }

    async fn find_association(&self, context_id: &ContextId) -> Result<Option<Association>, StoreError> {
        let context_id = context_id.as_str().to_owned();
        self.with_conn(move |conn| {
            let row: Option<AssociationRow> = conn
                .query_row(
                    "SELECT stream_id, context_id, parameters, created_at FROM associations \
                     WHERE context_id = ?1 ORDER BY created_at DESC LIMIT 1",
                    params![context_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(StoreError::backend)?;
            row.map(association_from_row).transpose()
        })
        .await
    }

    async fn association_for_stream(&self, id: StreamId) -> Result<Option<Association>, StoreError> {
        self.with_conn(move |conn| {
            let row: Option<AssociationRow> = conn
                .query_row(
                    "SELECT stream_id, context_id, parameters, created_at FROM associations \
                     WHERE stream_id = ?1",
                    params![id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(StoreError::backend)?;
            row.map(association_from_row).transpose()
        })
        .await
    }

    async fn association_exists(&self, id: StreamId) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM associations WHERE stream_id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::backend)?;
            Ok(found.is_some())
        })
        .await
    }

    async fn delete_association(&self, id: StreamId) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM associations WHERE stream_id = ?1",
                    params![id.to_string()],
                )
                .map_err(StoreError::backend)?;
            Ok(deleted > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    fn store() -> SqliteStreamStore {
        SqliteStreamStore::open_in_memory().expect("open sqlite")
    }

    #[tokio::test]
    async fn append_concatenates_in_call_order() {
        conformance::append_concatenates_in_call_order(&store()).await;
    }

    #[tokio::test]
    async fn pending_reads_empty() {
        conformance::pending_reads_empty(&store()).await;
    }

    #[tokio::test]
    async fn final_append_marks_done_and_rejects_more() {
        conformance::final_append_marks_done_and_rejects_more(&store()).await;
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        conformance::terminal_status_is_sticky(&store()).await;
    }

    #[tokio::test]
    async fn unknown_stream_is_reported() {
        conformance::unknown_stream_is_reported(&store()).await;
    }

    #[tokio::test]
    async fn empty_final_append_finalizes_without_chunk() {
        conformance::empty_final_append_finalizes_without_chunk(&store()).await;
    }

    #[tokio::test]
    async fn list_active_pages_by_id() {
        conformance::list_active_pages_by_id(&store()).await;
    }

    #[tokio::test]
    async fn expire_if_idle_respects_cutoff() {
        conformance::expire_if_idle_respects_cutoff(&store()).await;
    }

    #[tokio::test]
    async fn status_never_moves_backward() {
        conformance::status_never_moves_backward(&store()).await;
    }

    #[tokio::test]
    async fn newest_association_delete_falls_back_to_older() {
        conformance::newest_association_delete_falls_back_to_older(&store()).await;
    }

    #[tokio::test]
    async fn associations_round_trip() {
        conformance::associations_round_trip(&store()).await;
    }

    #[tokio::test]
    async fn text_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("streams.db");

        let id = {
            let store = SqliteStreamStore::open(&path).await.expect("open");
            let id = store.create_stream().await.expect("create");
            store.append_chunk(id, "durable ", false).await.expect("append");
            store.append_chunk(id, "text", true).await.expect("append");
            id
        };

        let reopened = SqliteStreamStore::open(&path).await.expect("reopen");
        let snapshot = reopened.get_text(id).await.expect("text");
        assert_eq!(snapshot.text, "durable text");
        assert_eq!(snapshot.status, StreamStatus::Done);
    }
}
