use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::HookError;
use crate::payload::Payload;

/// A pending build request
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
}

// Helper struct to map DB row to QueueEntry
#[derive(FromRow)]
struct QueueRow {
    id: String,
    payload: String,
    enqueued_at: i64,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = HookError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id).map_err(|e| {
            HookError::DatabaseError(format!("Invalid queue id '{}': {}", row.id, e))
        })?;

        let value: serde_json::Value = serde_json::from_str(&row.payload).map_err(|e| {
            HookError::DatabaseError(format!("Corrupt payload for queue entry {}: {}", id, e))
        })?;
        let payload = Payload::from_value(value).map_err(|e| {
            HookError::DatabaseError(format!("Corrupt payload for queue entry {}: {}", id, e))
        })?;

        let enqueued_at = DateTime::from_timestamp_micros(row.enqueued_at).ok_or_else(|| {
            HookError::DatabaseError(format!(
                "Invalid enqueue time {} for queue entry {}",
                row.enqueued_at, id
            ))
        })?;

        Ok(QueueEntry {
            id,
            payload,
            enqueued_at,
        })
    }
}

/// Durable FIFO of build requests backed by SQLite
#[derive(Clone)]
pub struct Queue {
    pool: SqlitePool,
    added: Arc<Notify>,
}

impl Queue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            added: Arc::new(Notify::new()),
        }
    }

    /// Persist a build request. The row is committed before this returns.
    pub async fn add(&self, payload: &Payload) -> Result<Uuid, HookError> {
        let id = Uuid::now_v7();
        let serialized = serde_json::to_string(payload.as_map())
            .map_err(|e| HookError::DatabaseError(format!("Failed to serialize payload: {}", e)))?;

        // enqueued_at must stay strictly increasing across present entries,
        // otherwise two adds within one clock tick would be ordered by id alone
        sqlx::query(
            r#"
            INSERT INTO queue (id, payload, enqueued_at)
            SELECT ?, ?, MAX(?, COALESCE((SELECT MAX(enqueued_at) FROM queue), 0) + 1)
            "#,
        )
        .bind(id.to_string())
        .bind(serialized)
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| HookError::DatabaseError(format!("Failed to add queue entry: {}", e)))?;

        self.added.notify_one();
        Ok(id)
    }

    /// Remove and return the oldest entry, or None when the queue is empty.
    /// Selection and deletion happen in one statement, so no two callers can
    /// receive the same entry.
    pub async fn pop(&self) -> Result<Option<QueueEntry>, HookError> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            DELETE FROM queue
            WHERE id = (
                SELECT id FROM queue
                ORDER BY enqueued_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, payload, enqueued_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HookError::DatabaseError(format!("Failed to pop queue entry: {}", e)))?;

        row.map(QueueEntry::try_from).transpose()
    }

    /// Count pending entries
    pub async fn len(&self) -> Result<i64, HookError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HookError::DatabaseError(format!("Failed to count queue entries: {}", e)))?;

        Ok(count.0)
    }

    pub async fn is_empty(&self) -> Result<bool, HookError> {
        Ok(self.len().await? == 0)
    }

    /// Resolves after the next `add` made through any clone of this queue
    pub async fn notified(&self) {
        self.added.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;
    use std::collections::HashSet;

    async fn temp_queue() -> (Queue, tempfile::TempDir) {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let pool = init_db(tempdir.path().join("queue.db"))
            .await
            .expect("db init");
        (Queue::new(pool), tempdir)
    }

    fn payload(n: u64) -> Payload {
        Payload::from_value(json!({"test": n})).expect("object payload")
    }

    #[tokio::test]
    async fn pop_on_empty_queue_returns_none() {
        let (queue, _dir) = temp_queue().await;
        assert!(queue.pop().await.expect("pop").is_none());
        assert!(queue.is_empty().await.expect("is_empty"));
    }

    #[tokio::test]
    async fn add_then_pop_returns_same_payload() {
        let (queue, _dir) = temp_queue().await;
        let id = queue.add(&payload(123)).await.expect("add");
        assert_eq!(queue.len().await.expect("len"), 1);

        let entry = queue.pop().await.expect("pop").expect("entry");
        assert_eq!(entry.id, id);
        assert_eq!(entry.payload, payload(123));
        assert!(queue.pop().await.expect("pop").is_none());
    }

    #[tokio::test]
    async fn pops_in_fifo_order_exactly_once() {
        let (queue, _dir) = temp_queue().await;
        for n in 0..20 {
            queue.add(&payload(n)).await.expect("add");
        }

        let mut seen = HashSet::new();
        let mut last_enqueued = None;
        for n in 0..20 {
            let entry = queue.pop().await.expect("pop").expect("entry");
            assert_eq!(entry.payload, payload(n));
            assert!(seen.insert(entry.id), "entry {} popped twice", entry.id);
            if let Some(prev) = last_enqueued {
                assert!(entry.enqueued_at > prev);
            }
            last_enqueued = Some(entry.enqueued_at);
        }
        assert!(queue.pop().await.expect("pop").is_none());
    }

    #[tokio::test]
    async fn concurrent_pops_never_share_an_entry() {
        let (queue, _dir) = temp_queue().await;
        for n in 0..30 {
            queue.add(&payload(n)).await.expect("add");
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(entry) = queue.pop().await.expect("pop") {
                    ids.push(entry.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.expect("join"));
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 30);
        assert_eq!(unique.len(), 30);
    }

    #[tokio::test]
    async fn entries_survive_reopening_the_database() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let db_path = tempdir.path().join("queue.db");

        {
            let pool = init_db(&db_path).await.expect("db init");
            Queue::new(pool.clone()).add(&payload(7)).await.expect("add");
            pool.close().await;
        }

        let pool = init_db(&db_path).await.expect("db reopen");
        let entry = Queue::new(pool).pop().await.expect("pop").expect("entry");
        assert_eq!(entry.payload, payload(7));
    }

    #[tokio::test]
    async fn add_wakes_a_waiting_consumer() {
        let (queue, _dir) = temp_queue().await;
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;
        queue.add(&payload(1)).await.expect("add");
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("woken")
            .expect("join");
    }
}
