//! Health record storage.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::*;
use super::schema::HEALTH_VERSIONED_SCHEMAS;
use crate::import_queue::QueuePriority;
use crate::sqlite_persistence::open_versioned_db;

/// Trait for health record storage operations.
///
/// Resolution methods (`mark_*`, `schedule_recheck`) only apply to records
/// in the expected status and return false otherwise, so a verdict computed
/// for a record that was reset in the meantime is discarded.
pub trait HealthStore: Send + Sync {
    /// Insert or reset a record to `pending`, due now. Keeps the repair
    /// counter of an existing record.
    fn add_file_to_health_check(&self, check: &NewHealthCheck) -> Result<HealthRecord>;

    fn get_record(&self, file_path: &str) -> Result<Option<HealthRecord>>;

    fn list_records(
        &self,
        status: Option<HealthStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HealthRecord>>;

    /// Claim the most urgent due record (`pending`, or `healthy` and due for
    /// its periodic re-check), moving it to `checking`.
    fn claim_next_record(&self) -> Result<Option<HealthRecord>>;

    /// Claim up to `limit` due records.
    fn claim_batch(&self, limit: usize) -> Result<Vec<HealthRecord>>;

    /// Set a record's status unconditionally. Returns false if not found.
    fn update_record(
        &self,
        file_path: &str,
        status: HealthStatus,
        error_details: Option<&str>,
    ) -> Result<bool>;

    /// CHECKING → HEALTHY, retry counter cleared, next check at `next_check_at`.
    fn mark_healthy(&self, file_path: &str, next_check_at: i64) -> Result<bool>;

    /// CHECKING → PENDING with an incremented verification retry counter.
    fn schedule_recheck(
        &self,
        file_path: &str,
        retry_count: i32,
        next_check_at: i64,
        error_details: &str,
    ) -> Result<bool>;

    /// CHECKING → CORRUPTED.
    fn mark_corrupted(&self, file_path: &str, error_details: &str) -> Result<bool>;

    /// CORRUPTED → REPAIR_TRIGGERED, recording the repair attempt.
    fn mark_repair_triggered(&self, file_path: &str, repair_retry_count: i32) -> Result<bool>;

    /// Manual retry: CORRUPTED | REPAIR_TRIGGERED | HEALTHY → PENDING, due
    /// now. `reset_retries` also clears both retry counters.
    fn reset_for_recheck(&self, file_path: &str, reset_retries: bool) -> Result<bool>;

    /// Records waiting on a repair of `source_nzb_path` go back to PENDING.
    /// Returns their paths.
    fn reset_repaired_by_source(&self, source_nzb_path: &str) -> Result<Vec<String>>;

    /// The repair import of `source_nzb_path` failed: records waiting on it
    /// go back to PENDING, keeping their retry counters. Returns their paths.
    fn requeue_failed_repairs(
        &self,
        source_nzb_path: &str,
        error_details: &str,
    ) -> Result<Vec<String>>;

    /// REPAIR_TRIGGERED → PENDING at `next_check_at`, restoring
    /// `repair_retry_count`. Used when the repair could not be requested.
    fn cancel_repair(
        &self,
        file_path: &str,
        repair_retry_count: i32,
        next_check_at: i64,
        error_details: &str,
    ) -> Result<bool>;

    /// CHECKING records claimed before `claimed_before` go back to PENDING.
    fn recover_stale_checking(&self, claimed_before: i64) -> Result<Vec<String>>;

    fn delete_record(&self, file_path: &str) -> Result<bool>;

    /// Delete records in `status` not updated since `updated_before`.
    fn delete_stale(&self, status: HealthStatus, updated_before: i64) -> Result<usize>;

    fn get_stats(&self) -> Result<HealthStats>;
}

/// SQLite-backed health store.
pub struct SqliteHealthStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHealthStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path, HEALTH_VERSIONED_SCHEMAS, "health")?;
        Ok(SqliteHealthStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        HEALTH_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(SqliteHealthStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HealthRecord> {
        let status: String = row.get("status")?;
        let priority: i32 = row.get("priority")?;
        Ok(HealthRecord {
            file_path: row.get("file_path")?,
            library_path: row.get("library_path")?,
            source_nzb_path: row.get("source_nzb_path")?,
            status: HealthStatus::from_db_str(&status).unwrap_or(HealthStatus::Pending),
            priority: QueuePriority::from_rank(priority).unwrap_or_default(),
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            repair_retry_count: row.get("repair_retry_count")?,
            max_repair_retries: row.get("max_repair_retries")?,
            scheduled_check_at: row.get("scheduled_check_at")?,
            last_checked_at: row.get("last_checked_at")?,
            error_details: row.get("error_details")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn get_with_conn(conn: &Connection, file_path: &str) -> Result<Option<HealthRecord>> {
        Ok(conn
            .query_row(
                "SELECT * FROM health_records WHERE file_path = ?1",
                [file_path],
                Self::row_to_record,
            )
            .optional()?)
    }

    fn claim_next_with_conn(conn: &Connection, now: i64) -> Result<Option<HealthRecord>> {
        loop {
            let candidate: Option<String> = conn
                .query_row(
                    r#"SELECT file_path FROM health_records
                       WHERE status IN ('pending', 'healthy') AND scheduled_check_at <= ?1
                       ORDER BY priority DESC, scheduled_check_at ASC, file_path ASC
                       LIMIT 1"#,
                    [now],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(file_path) = candidate else {
                return Ok(None);
            };

            let rows = conn.execute(
                r#"UPDATE health_records SET status = 'checking', updated_at = ?2
                   WHERE file_path = ?1 AND status IN ('pending', 'healthy')"#,
                params![file_path, now],
            )?;
            if rows == 1 {
                return Self::get_with_conn(conn, &file_path);
            }
        }
    }

    fn paths_where(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let paths = stmt
            .query_map(params, |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// REPAIR_TRIGGERED → PENDING, due now, for every record of `source`.
    /// A completed repair (`failure` is None) also clears the verification
    /// retry counter and the error details.
    fn reopen_repair_triggered(&self, source: &str, failure: Option<&str>) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let paths = Self::paths_where(
            &tx,
            r#"SELECT file_path FROM health_records
               WHERE source_nzb_path = ?1 AND status = 'repair_triggered'
               ORDER BY file_path"#,
            [source],
        )?;
        let now = Self::now();
        tx.execute(
            r#"UPDATE health_records
               SET status = 'pending',
                   retry_count = CASE WHEN ?3 IS NULL THEN 0 ELSE retry_count END,
                   scheduled_check_at = ?2,
                   error_details = ?3,
                   updated_at = ?2
               WHERE source_nzb_path = ?1 AND status = 'repair_triggered'"#,
            params![source, now, failure],
        )?;
        tx.commit()?;
        Ok(paths)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl HealthStore for SqliteHealthStore {
    fn add_file_to_health_check(&self, check: &NewHealthCheck) -> Result<HealthRecord> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        conn.execute(
            r#"INSERT INTO health_records (
                file_path, library_path, source_nzb_path, status, priority,
                retry_count, max_retries, repair_retry_count, max_repair_retries,
                scheduled_check_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5, 0, ?6, ?7, ?7, ?7)
            ON CONFLICT(file_path) DO UPDATE SET
                library_path = COALESCE(excluded.library_path, library_path),
                source_nzb_path = COALESCE(excluded.source_nzb_path, source_nzb_path),
                status = 'pending',
                priority = excluded.priority,
                retry_count = 0,
                max_retries = excluded.max_retries,
                max_repair_retries = excluded.max_repair_retries,
                scheduled_check_at = excluded.scheduled_check_at,
                error_details = NULL,
                updated_at = excluded.updated_at"#,
            params![
                check.file_path,
                check.library_path,
                check.source_nzb_path,
                check.priority.rank(),
                check.max_retries,
                check.max_repair_retries,
                now,
            ],
        )?;
        Self::get_with_conn(&conn, &check.file_path)?
            .with_context(|| format!("Health record {} not found after insert", check.file_path))
    }

    fn get_record(&self, file_path: &str) -> Result<Option<HealthRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::get_with_conn(&conn, file_path)
    }

    fn list_records(
        &self,
        status: Option<HealthStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HealthRecord>> {
        let conn = self.conn.lock().unwrap();
        let records = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    r#"SELECT * FROM health_records WHERE status = ?1
                       ORDER BY priority DESC, scheduled_check_at ASC, file_path ASC
                       LIMIT ?2 OFFSET ?3"#,
                )?;
                let records = stmt
                    .query_map(
                        params![status.as_db_str(), limit as i64, offset as i64],
                        Self::row_to_record,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                records
            }
            None => {
                let mut stmt = conn.prepare(
                    r#"SELECT * FROM health_records
                       ORDER BY priority DESC, scheduled_check_at ASC, file_path ASC
                       LIMIT ?1 OFFSET ?2"#,
                )?;
                let records = stmt
                    .query_map(params![limit as i64, offset as i64], Self::row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                records
            }
        };
        Ok(records)
    }

    fn claim_next_record(&self) -> Result<Option<HealthRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::claim_next_with_conn(&conn, Self::now())
    }

    fn claim_batch(&self, limit: usize) -> Result<Vec<HealthRecord>> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let mut records = Vec::with_capacity(limit);
        while records.len() < limit {
            match Self::claim_next_with_conn(&conn, now)? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        Ok(records)
    }

    fn update_record(
        &self,
        file_path: &str,
        status: HealthStatus,
        error_details: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = ?2, error_details = ?3, updated_at = ?4
               WHERE file_path = ?1"#,
            params![file_path, status.as_db_str(), error_details, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn mark_healthy(&self, file_path: &str, next_check_at: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = 'healthy',
                   retry_count = 0,
                   scheduled_check_at = ?2,
                   last_checked_at = ?3,
                   error_details = NULL,
                   updated_at = ?3
               WHERE file_path = ?1 AND status = 'checking'"#,
            params![file_path, next_check_at, now],
        )?;
        Ok(rows == 1)
    }

    fn schedule_recheck(
        &self,
        file_path: &str,
        retry_count: i32,
        next_check_at: i64,
        error_details: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = 'pending',
                   retry_count = ?2,
                   scheduled_check_at = ?3,
                   last_checked_at = ?5,
                   error_details = ?4,
                   updated_at = ?5
               WHERE file_path = ?1 AND status = 'checking'"#,
            params![file_path, retry_count, next_check_at, error_details, now],
        )?;
        Ok(rows == 1)
    }

    fn mark_corrupted(&self, file_path: &str, error_details: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = 'corrupted',
                   last_checked_at = ?3,
                   error_details = ?2,
                   updated_at = ?3
               WHERE file_path = ?1 AND status = 'checking'"#,
            params![file_path, error_details, now],
        )?;
        Ok(rows == 1)
    }

    fn mark_repair_triggered(&self, file_path: &str, repair_retry_count: i32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = 'repair_triggered', repair_retry_count = ?2, updated_at = ?3
               WHERE file_path = ?1 AND status = 'corrupted'"#,
            params![file_path, repair_retry_count, Self::now()],
        )?;
        Ok(rows == 1)
    }

    fn reset_for_recheck(&self, file_path: &str, reset_retries: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = 'pending',
                   scheduled_check_at = ?2,
                   retry_count = CASE WHEN ?3 THEN 0 ELSE retry_count END,
                   repair_retry_count = CASE WHEN ?3 THEN 0 ELSE repair_retry_count END,
                   updated_at = ?2
               WHERE file_path = ?1
               AND status IN ('corrupted', 'repair_triggered', 'healthy')"#,
            params![file_path, now, reset_retries],
        )?;
        Ok(rows == 1)
    }

    fn reset_repaired_by_source(&self, source_nzb_path: &str) -> Result<Vec<String>> {
        self.reopen_repair_triggered(source_nzb_path, None)
    }

    fn requeue_failed_repairs(
        &self,
        source_nzb_path: &str,
        error_details: &str,
    ) -> Result<Vec<String>> {
        self.reopen_repair_triggered(source_nzb_path, Some(error_details))
    }

    fn cancel_repair(
        &self,
        file_path: &str,
        repair_retry_count: i32,
        next_check_at: i64,
        error_details: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"UPDATE health_records
               SET status = 'pending',
                   repair_retry_count = ?2,
                   scheduled_check_at = ?3,
                   error_details = ?4,
                   updated_at = ?5
               WHERE file_path = ?1 AND status = 'repair_triggered'"#,
            params![
                file_path,
                repair_retry_count,
                next_check_at,
                error_details,
                Self::now()
            ],
        )?;
        Ok(rows == 1)
    }

    fn recover_stale_checking(&self, claimed_before: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let paths = Self::paths_where(
            &tx,
            r#"SELECT file_path FROM health_records
               WHERE status = 'checking' AND updated_at < ?1
               ORDER BY file_path"#,
            [claimed_before],
        )?;
        let now = Self::now();
        tx.execute(
            r#"UPDATE health_records
               SET status = 'pending', scheduled_check_at = ?2, updated_at = ?2
               WHERE status = 'checking' AND updated_at < ?1"#,
            params![claimed_before, now],
        )?;
        tx.commit()?;
        Ok(paths)
    }

    fn delete_record(&self, file_path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM health_records WHERE file_path = ?1",
            [file_path],
        )?;
        Ok(rows == 1)
    }

    fn delete_stale(&self, status: HealthStatus, updated_before: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM health_records WHERE status = ?1 AND updated_at < ?2",
            params![status.as_db_str(), updated_before],
        )?;
        Ok(rows)
    }

    fn get_stats(&self) -> Result<HealthStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM health_records GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = HealthStats::default();
        for (status, count) in rows {
            if let Some(status) = HealthStatus::from_db_str(&status) {
                stats.add(status, count);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn check(path: &str, priority: QueuePriority) -> NewHealthCheck {
        NewHealthCheck::new(path, priority, 2, 3).with_source(format!("{}.nzb", path))
    }

    fn set_scheduled(store: &SqliteHealthStore, path: &str, at: i64) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "UPDATE health_records SET scheduled_check_at = ?2 WHERE file_path = ?1",
            params![path, at],
        )
        .unwrap();
    }

    fn set_updated(store: &SqliteHealthStore, path: &str, at: i64) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "UPDATE health_records SET updated_at = ?2 WHERE file_path = ?1",
            params![path, at],
        )
        .unwrap();
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("health.db");
        {
            let store = SqliteHealthStore::new(&db_path).unwrap();
            store
                .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
                .unwrap();
        }
        let store = SqliteHealthStore::new(&db_path).unwrap();
        assert!(store.get_record("/lib/a.mkv").unwrap().is_some());
    }

    #[test]
    fn test_add_file_creates_pending_record() {
        let store = SqliteHealthStore::in_memory().unwrap();
        let record = store
            .add_file_to_health_check(
                &check("/lib/a.mkv", QueuePriority::High).with_library_path("/library/a.mkv"),
            )
            .unwrap();

        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.priority, QueuePriority::High);
        assert_eq!(record.source_nzb_path.as_deref(), Some("/lib/a.mkv.nzb"));
        assert_eq!(record.library_path.as_deref(), Some("/library/a.mkv"));
        assert_eq!(record.max_retries, 2);
        assert_eq!(record.max_repair_retries, 3);
        assert!(record.scheduled_check_at <= chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_add_file_resets_but_keeps_repair_count() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
            .unwrap();
        store.claim_next_record().unwrap().unwrap();
        store.mark_corrupted("/lib/a.mkv", "missing").unwrap();
        store.mark_repair_triggered("/lib/a.mkv", 1).unwrap();

        let record = store
            .add_file_to_health_check(&NewHealthCheck::new(
                "/lib/a.mkv",
                QueuePriority::Low,
                2,
                3,
            ))
            .unwrap();
        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.repair_retry_count, 1);
        assert!(record.error_details.is_none());
        // Existing source is kept when the new request has none
        assert_eq!(record.source_nzb_path.as_deref(), Some("/lib/a.mkv.nzb"));
    }

    #[test]
    fn test_claim_order_and_due_time() {
        let store = SqliteHealthStore::in_memory().unwrap();
        let now = chrono::Utc::now().timestamp();
        store
            .add_file_to_health_check(&check("/lib/low.mkv", QueuePriority::Low))
            .unwrap();
        store
            .add_file_to_health_check(&check("/lib/high.mkv", QueuePriority::High))
            .unwrap();
        store
            .add_file_to_health_check(&check("/lib/future.mkv", QueuePriority::High))
            .unwrap();
        set_scheduled(&store, "/lib/future.mkv", now + 3600);

        let first = store.claim_next_record().unwrap().unwrap();
        assert_eq!(first.file_path, "/lib/high.mkv");
        assert_eq!(first.status, HealthStatus::Checking);
        let second = store.claim_next_record().unwrap().unwrap();
        assert_eq!(second.file_path, "/lib/low.mkv");
        assert!(store.claim_next_record().unwrap().is_none());
    }

    #[test]
    fn test_claim_batch_respects_limit() {
        let store = SqliteHealthStore::in_memory().unwrap();
        for i in 0..5 {
            store
                .add_file_to_health_check(&check(&format!("/lib/{}.mkv", i), QueuePriority::Normal))
                .unwrap();
        }

        assert_eq!(store.claim_batch(3).unwrap().len(), 3);
        assert_eq!(store.claim_batch(3).unwrap().len(), 2);
        assert!(store.claim_batch(3).unwrap().is_empty());
        assert_eq!(store.get_stats().unwrap().checking, 5);
    }

    #[test]
    fn test_healthy_record_due_again() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
            .unwrap();
        store.claim_next_record().unwrap().unwrap();
        let now = chrono::Utc::now().timestamp();
        assert!(store.mark_healthy("/lib/a.mkv", now + 3600).unwrap());
        assert!(store.claim_next_record().unwrap().is_none());

        set_scheduled(&store, "/lib/a.mkv", now - 1);
        let record = store.claim_next_record().unwrap().unwrap();
        assert_eq!(record.file_path, "/lib/a.mkv");
    }

    #[test]
    fn test_resolution_requires_checking() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
            .unwrap();

        assert!(!store.mark_healthy("/lib/a.mkv", 0).unwrap());
        assert!(!store.mark_corrupted("/lib/a.mkv", "x").unwrap());
        assert!(!store.schedule_recheck("/lib/a.mkv", 1, 0, "x").unwrap());
        assert!(!store.mark_repair_triggered("/lib/a.mkv", 1).unwrap());
    }

    #[test]
    fn test_schedule_recheck_increments() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
            .unwrap();
        store.claim_next_record().unwrap();
        let later = chrono::Utc::now().timestamp() + 300;

        assert!(store
            .schedule_recheck("/lib/a.mkv", 1, later, "timeout")
            .unwrap());
        let record = store.get_record("/lib/a.mkv").unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.scheduled_check_at, later);
        assert_eq!(record.error_details.as_deref(), Some("timeout"));
        assert!(record.last_checked_at.is_some());
    }

    #[test]
    fn test_reset_for_recheck() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
            .unwrap();
        store.claim_next_record().unwrap();
        store.schedule_recheck("/lib/a.mkv", 1, 0, "x").unwrap();
        store.claim_next_record().unwrap();
        store.mark_corrupted("/lib/a.mkv", "gone").unwrap();
        store.mark_repair_triggered("/lib/a.mkv", 3).unwrap();

        assert!(store.reset_for_recheck("/lib/a.mkv", false).unwrap());
        let record = store.get_record("/lib/a.mkv").unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.repair_retry_count, 3);

        // Pending records are not eligible
        assert!(!store.reset_for_recheck("/lib/a.mkv", true).unwrap());
        store.update_record("/lib/a.mkv", HealthStatus::Corrupted, Some("again")).unwrap();
        assert!(store.reset_for_recheck("/lib/a.mkv", true).unwrap());
        let record = store.get_record("/lib/a.mkv").unwrap().unwrap();
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.repair_retry_count, 0);
    }

    #[test]
    fn test_reset_repaired_by_source() {
        let store = SqliteHealthStore::in_memory().unwrap();
        for path in ["/lib/a.mkv", "/lib/b.mkv"] {
            store
                .add_file_to_health_check(
                    &NewHealthCheck::new(path, QueuePriority::Normal, 2, 3).with_source("/nzb/x.nzb"),
                )
                .unwrap();
        }
        store.claim_batch(2).unwrap();
        store.mark_corrupted("/lib/a.mkv", "gone").unwrap();
        store.mark_repair_triggered("/lib/a.mkv", 1).unwrap();
        store.mark_healthy("/lib/b.mkv", 0).unwrap();

        let reset = store.reset_repaired_by_source("/nzb/x.nzb").unwrap();
        assert_eq!(reset, vec!["/lib/a.mkv".to_string()]);
        assert_eq!(
            store.get_record("/lib/a.mkv").unwrap().unwrap().status,
            HealthStatus::Pending
        );
        assert_eq!(
            store.get_record("/lib/b.mkv").unwrap().unwrap().status,
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_failed_repair_keeps_retry_count() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(
                &NewHealthCheck::new("/lib/a.mkv", QueuePriority::Normal, 2, 3)
                    .with_source("/nzb/x.nzb"),
            )
            .unwrap();
        store.claim_next_record().unwrap();
        store
            .schedule_recheck("/lib/a.mkv", 2, 0, "unreachable")
            .unwrap();
        store.claim_next_record().unwrap();
        store.mark_corrupted("/lib/a.mkv", "unreachable").unwrap();
        store.mark_repair_triggered("/lib/a.mkv", 1).unwrap();

        let requeued = store
            .requeue_failed_repairs("/nzb/x.nzb", "repair import failed: gone")
            .unwrap();
        assert_eq!(requeued, vec!["/lib/a.mkv".to_string()]);

        let record = store.get_record("/lib/a.mkv").unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.repair_retry_count, 1);
        assert_eq!(
            record.error_details.as_deref(),
            Some("repair import failed: gone")
        );
        assert!(record.scheduled_check_at <= chrono::Utc::now().timestamp());

        // Nothing is waiting any more
        assert!(store
            .requeue_failed_repairs("/nzb/x.nzb", "again")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cancel_repair_restores_budget() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/a.mkv", QueuePriority::Normal))
            .unwrap();
        store.claim_next_record().unwrap();
        store.mark_corrupted("/lib/a.mkv", "gone").unwrap();

        // Only repair_triggered records can be cancelled
        assert!(!store.cancel_repair("/lib/a.mkv", 0, 0, "x").unwrap());

        store.mark_repair_triggered("/lib/a.mkv", 1).unwrap();
        let next = chrono::Utc::now().timestamp() + 60;
        assert!(store
            .cancel_repair("/lib/a.mkv", 0, next, "repair request failed")
            .unwrap());

        let record = store.get_record("/lib/a.mkv").unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.repair_retry_count, 0);
        assert_eq!(record.scheduled_check_at, next);
    }

    #[test]
    fn test_recover_stale_checking() {
        let store = SqliteHealthStore::in_memory().unwrap();
        store
            .add_file_to_health_check(&check("/lib/stale.mkv", QueuePriority::Normal))
            .unwrap();
        store
            .add_file_to_health_check(&check("/lib/fresh.mkv", QueuePriority::Normal))
            .unwrap();
        store.claim_batch(2).unwrap();
        let now = chrono::Utc::now().timestamp();
        set_updated(&store, "/lib/stale.mkv", now - 7200);

        let recovered = store.recover_stale_checking(now - 3600).unwrap();
        assert_eq!(recovered, vec!["/lib/stale.mkv".to_string()]);
        assert_eq!(
            store.get_record("/lib/fresh.mkv").unwrap().unwrap().status,
            HealthStatus::Checking
        );
    }

    #[test]
    fn test_list_delete_and_stats() {
        let store = SqliteHealthStore::in_memory().unwrap();
        for i in 0..3 {
            store
                .add_file_to_health_check(&check(&format!("/lib/{}.mkv", i), QueuePriority::Normal))
                .unwrap();
        }
        store.claim_next_record().unwrap();

        assert_eq!(store.list_records(None, 10, 0).unwrap().len(), 3);
        assert_eq!(
            store
                .list_records(Some(HealthStatus::Pending), 10, 0)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.list_records(None, 2, 2).unwrap().len(), 1);

        assert!(store.delete_record("/lib/2.mkv").unwrap());
        assert!(!store.delete_record("/lib/2.mkv").unwrap());

        let now = chrono::Utc::now().timestamp();
        assert_eq!(store.delete_stale(HealthStatus::Pending, now + 10).unwrap(), 1);

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.checking, 1);
        assert_eq!(stats.total(), 1);
    }
}
