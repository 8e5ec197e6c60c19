//! Import queue storage and persistence.
//!
//! Provides the repository contract the scheduler depends on and its
//! SQLite-backed implementation. Every status transition is a single
//! conditional UPDATE, so "rows affected" tells the caller whether it won.

use super::models::*;
use super::schema::IMPORT_QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Trait for import queue storage operations.
pub trait QueueStore: Send + Sync {
    // === Queue Management ===

    /// Insert a new pending item. The store assigns id and timestamps.
    fn insert_item(&self, item: &NewQueueItem) -> Result<QueueItem>;

    /// Get a queue item by ID.
    fn get_item(&self, id: i64) -> Result<Option<QueueItem>>;

    /// List queue items with filter, pagination and sort.
    fn list_items(&self, query: &QueueQuery) -> Result<Vec<QueueItem>>;

    /// Most recent item created for a source NZB path (any status).
    fn find_latest_by_source(&self, source_path: &str) -> Result<Option<QueueItem>>;

    // === State Transitions (atomic) ===

    /// Claim the next eligible pending item (priority desc, insertion order),
    /// transitioning it to PROCESSING. Returns None if nothing is eligible.
    fn claim_next_item(&self) -> Result<Option<QueueItem>>;

    /// Atomically claim a specific item (PENDING → PROCESSING).
    /// Returns true if claimed, false if already claimed or not pending.
    fn claim_item(&self, id: i64) -> Result<bool>;

    /// Set an item's status. Returns false if the item does not exist.
    fn update_status(
        &self,
        id: i64,
        status: QueueStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// PROCESSING → COMPLETED with the materialized file.
    fn mark_completed(&self, id: i64, storage_path: &str, file_size: i64) -> Result<bool>;

    /// PROCESSING → PENDING after a failed attempt, claimable again at
    /// `next_attempt_at`.
    fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: i64,
        error_message: &str,
    ) -> Result<bool>;

    /// PROCESSING → FAILED.
    fn mark_failed(&self, id: i64, retry_count: i32, error_message: &str) -> Result<bool>;

    /// PROCESSING → PENDING without touching retry_count (cancellation,
    /// shutdown, stale-claim recovery).
    fn release_claim(&self, id: i64) -> Result<bool>;

    /// FAILED | COMPLETED | PENDING → RETRYING.
    fn begin_retry(&self, id: i64) -> Result<bool>;

    /// RETRYING → PENDING, clearing the previous outcome.
    fn finish_retry(&self, id: i64) -> Result<bool>;

    /// PENDING → PAUSED when `paused`, PAUSED → PENDING otherwise.
    fn set_paused(&self, id: i64, paused: bool) -> Result<bool>;

    /// Raise an item's priority. Never lowers it.
    fn raise_priority(&self, id: i64, priority: QueuePriority) -> Result<bool>;

    /// Delete an item unless it is PROCESSING.
    fn delete_item(&self, id: i64) -> Result<ItemDeletion>;

    // === Recovery & Maintenance ===

    /// Requeue PROCESSING items claimed before `claimed_before` and RETRYING
    /// items left by an interrupted retry, skipping `active_ids`.
    fn requeue_stale(&self, claimed_before: i64, active_ids: &[i64]) -> Result<Vec<i64>>;

    /// Delete COMPLETED items finished before `completed_before`.
    fn delete_completed_before(&self, completed_before: i64) -> Result<usize>;

    /// Get the number of items per status.
    fn get_stats(&self) -> Result<QueueStats>;
}

/// SQLite-backed import queue store.
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path, IMPORT_QUEUE_VERSIONED_SCHEMAS, "import queue")?;
        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        IMPORT_QUEUE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_queue_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
        let status: String = row.get("status")?;
        let priority: i32 = row.get("priority")?;
        Ok(QueueItem {
            id: row.get("id")?,
            source_path: row.get("source_path")?,
            category: row.get("category")?,
            batch_id: row.get("batch_id")?,
            priority: QueuePriority::from_rank(priority).unwrap_or_default(),
            status: QueueStatus::from_db_str(&status).unwrap_or(QueueStatus::Pending),
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            next_attempt_at: row.get("next_attempt_at")?,
            error_message: row.get("error_message")?,
            storage_path: row.get("storage_path")?,
            file_size: row.get("file_size")?,
        })
    }

    fn get_with_conn(conn: &Connection, id: i64) -> Result<Option<QueueItem>> {
        let item = conn
            .query_row(
                "SELECT * FROM import_queue WHERE id = ?1",
                [id],
                Self::row_to_queue_item,
            )
            .optional()?;
        Ok(item)
    }

    fn claim_with_conn(conn: &Connection, id: i64, now: i64) -> Result<bool> {
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'processing',
                   started_at = ?2,
                   updated_at = ?2
               WHERE id = ?1 AND status = 'pending'"#,
            params![id, now],
        )?;
        Ok(rows == 1)
    }

    /// Get current timestamp in seconds.
    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl QueueStore for SqliteQueueStore {
    fn insert_item(&self, item: &NewQueueItem) -> Result<QueueItem> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        conn.execute(
            r#"INSERT INTO import_queue (
                source_path, category, batch_id, priority, status,
                retry_count, max_retries, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)"#,
            params![
                item.source_path,
                item.category,
                item.batch_id,
                item.priority.rank(),
                item.max_retries,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::get_with_conn(&conn, id)?
            .with_context(|| format!("Inserted queue item {} not found", id))
    }

    fn get_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        Self::get_with_conn(&conn, id)
    }

    fn list_items(&self, query: &QueueQuery) -> Result<Vec<QueueItem>> {
        let conn = self.conn.lock().unwrap();

        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = query.status {
            conditions.push("status = ?");
            values.push(Box::new(status.as_db_str()));
        }
        if let Some(category) = &query.category {
            conditions.push("category = ?");
            values.push(Box::new(category.clone()));
        }
        if let Some(batch_id) = &query.batch_id {
            conditions.push("batch_id = ?");
            values.push(Box::new(batch_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM import_queue {} ORDER BY {} LIMIT ? OFFSET ?",
            where_clause,
            query.sort.order_by()
        );
        values.push(Box::new(query.limit as i64));
        values.push(Box::new(query.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let items = stmt
            .query_map(params_refs.as_slice(), Self::row_to_queue_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn find_latest_by_source(&self, source_path: &str) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let item = conn
            .query_row(
                "SELECT * FROM import_queue WHERE source_path = ?1 ORDER BY id DESC LIMIT 1",
                [source_path],
                Self::row_to_queue_item,
            )
            .optional()?;
        Ok(item)
    }

    fn claim_next_item(&self) -> Result<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        loop {
            let candidate: Option<i64> = conn
                .query_row(
                    r#"SELECT id FROM import_queue
                       WHERE status = 'pending'
                       AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                       ORDER BY priority DESC, created_at ASC, id ASC
                       LIMIT 1"#,
                    [now],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            // Zero rows means another claimant got there first; try the next one
            if Self::claim_with_conn(&conn, id, now)? {
                return Self::get_with_conn(&conn, id);
            }
        }
    }

    fn claim_item(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        Self::claim_with_conn(&conn, id, Self::now())
    }

    fn update_status(
        &self,
        id: i64,
        status: QueueStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = ?2,
                   error_message = COALESCE(?3, error_message),
                   updated_at = ?4,
                   started_at = CASE WHEN ?2 = 'processing' THEN ?4 ELSE started_at END,
                   completed_at = CASE WHEN ?2 = 'completed' THEN ?4 ELSE completed_at END
               WHERE id = ?1"#,
            params![id, status.as_db_str(), error_message, now],
        )?;
        Ok(rows == 1)
    }

    fn mark_completed(&self, id: i64, storage_path: &str, file_size: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'completed',
                   storage_path = ?2,
                   file_size = ?3,
                   completed_at = ?4,
                   updated_at = ?4,
                   error_message = NULL,
                   next_attempt_at = NULL
               WHERE id = ?1 AND status = 'processing'"#,
            params![id, storage_path, file_size, now],
        )?;
        Ok(rows == 1)
    }

    fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: i64,
        error_message: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'pending',
                   retry_count = ?2,
                   next_attempt_at = ?3,
                   error_message = ?4,
                   updated_at = ?5
               WHERE id = ?1 AND status = 'processing'"#,
            params![id, retry_count, next_attempt_at, error_message, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn mark_failed(&self, id: i64, retry_count: i32, error_message: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'failed',
                   retry_count = ?2,
                   error_message = ?3,
                   next_attempt_at = NULL,
                   updated_at = ?4
               WHERE id = ?1 AND status = 'processing'"#,
            params![id, retry_count, error_message, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn release_claim(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'pending', next_attempt_at = NULL, updated_at = ?2
               WHERE id = ?1 AND status = 'processing'"#,
            params![id, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn begin_retry(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'retrying', updated_at = ?2
               WHERE id = ?1 AND status IN ('failed', 'completed', 'pending')"#,
            params![id, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn finish_retry(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE import_queue
               SET status = 'pending',
                   error_message = NULL,
                   completed_at = NULL,
                   next_attempt_at = NULL,
                   updated_at = ?2
               WHERE id = ?1 AND status = 'retrying'"#,
            params![id, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn set_paused(&self, id: i64, paused: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let (from, to) = if paused {
            (QueueStatus::Pending, QueueStatus::Paused)
        } else {
            (QueueStatus::Paused, QueueStatus::Pending)
        };
        let rows = conn.execute(
            "UPDATE import_queue SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![id, from.as_db_str(), to.as_db_str(), Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn raise_priority(&self, id: i64, priority: QueuePriority) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE import_queue SET priority = ?2, updated_at = ?3 WHERE id = ?1 AND priority < ?2",
            params![id, priority.rank(), Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn delete_item(&self, id: i64) -> Result<ItemDeletion> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM import_queue WHERE id = ?1 AND status != 'processing'",
            [id],
        )?;
        if rows == 1 {
            return Ok(ItemDeletion::Deleted);
        }

        let status: Option<String> = conn
            .query_row("SELECT status FROM import_queue WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(match status.as_deref().and_then(QueueStatus::from_db_str) {
            Some(status) => ItemDeletion::Rejected(status),
            None => ItemDeletion::NotFound,
        })
    }

    fn requeue_stale(&self, claimed_before: i64, active_ids: &[i64]) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let candidates: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"SELECT id FROM import_queue
                   WHERE (status = 'processing' AND started_at < ?1)
                   OR status = 'retrying'
                   ORDER BY id"#,
            )?;
            let ids = stmt
                .query_map([claimed_before], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            ids
        };

        let now = Self::now();
        let mut requeued = Vec::new();
        for id in candidates.into_iter().filter(|id| !active_ids.contains(id)) {
            let rows = tx.execute(
                r#"UPDATE import_queue
                   SET status = 'pending', next_attempt_at = NULL, updated_at = ?2
                   WHERE id = ?1 AND status IN ('processing', 'retrying')"#,
                params![id, now],
            )?;
            if rows == 1 {
                requeued.push(id);
            }
        }
        tx.commit()?;

        Ok(requeued)
    }

    fn delete_completed_before(&self, completed_before: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM import_queue WHERE status = 'completed' AND completed_at < ?1",
            [completed_before],
        )?;
        Ok(rows)
    }

    fn get_stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM import_queue GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            if let Some(status) = QueueStatus::from_db_str(&status) {
                stats.add(status, count);
            }
        }
        Ok(stats)
    }
}
