//! Durable job ledger.
//!
//! One `encode` row per attempted entry, plus the singleton `encode_config`
//! row. Both live in the SQLite database shared with the host application and
//! are reached through its connection pool. The host-owned `show_entry` table
//! is read here but never created or migrated by this subsystem.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;

/// One encode attempt for a media entry.
///
/// `ended_at` and `final_size` are only ever written together; a row with
/// `ended_at IS NULL` is an attempt that has not finished (or did not survive
/// a restart and will be resumed).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EncodeJob {
    pub entry_id: i64,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub initial_size: Option<i64>,
    pub final_size: Option<i64>,
}

/// Host-owned media entry, read-only from this subsystem.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MediaEntry {
    pub file_path: Option<String>,
    pub current_state: String,
}

/// Completion state a media entry must be in before it can be encoded.
pub const STATE_COMPLETED: &str = "completed";

/// Handle to the encode ledger tables.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the encode-side tables if they do not exist yet.
    ///
    /// `show_entry` belongs to the host application and is deliberately not
    /// touched here.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS encode_config (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                enabled INTEGER NOT NULL DEFAULT 0,
                quality_preset TEXT NOT NULL DEFAULT 'moderate',
                speed_preset TEXT NOT NULL DEFAULT 'medium',
                maximum_encodes INTEGER NOT NULL DEFAULT 2,
                retry_on_fail INTEGER NOT NULL DEFAULT 0,
                timed_encoding INTEGER NOT NULL DEFAULT 0,
                hour_start INTEGER NOT NULL DEFAULT 3,
                hour_end INTEGER NOT NULL DEFAULT 6
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS encode (
                entry_id INTEGER PRIMARY KEY,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                ended_at TEXT,
                initial_size INTEGER,
                final_size INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create the job row for an entry; a no-op if one already exists.
    pub async fn create_job(&self, entry_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO encode (entry_id) VALUES (?)")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the source file size once the encoder process is running.
    pub async fn set_initial_size(&self, entry_id: i64, size: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE encode SET initial_size = ? WHERE entry_id = ?")
            .bind(size)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark the job finished, setting `ended_at` and `final_size` together.
    pub async fn finish_job(&self, entry_id: i64, final_size: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE encode SET ended_at = CURRENT_TIMESTAMP, final_size = ? WHERE entry_id = ?",
        )
        .bind(final_size)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete the job row so the entry can be attempted again later.
    pub async fn delete_job(&self, entry_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM encode WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn job(&self, entry_id: i64) -> Result<Option<EncodeJob>, sqlx::Error> {
        sqlx::query_as(
            "SELECT entry_id, started_at, ended_at, initial_size, final_size \
             FROM encode WHERE entry_id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Entry ids of jobs interrupted before finishing, oldest first.
    ///
    /// The startup resume pass replays these through the normal submission
    /// path.
    pub async fn unfinished(&self) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT entry_id FROM encode WHERE ended_at IS NULL ORDER BY started_at ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// All finished jobs, for the stats aggregator.
    pub async fn finished(&self) -> Result<Vec<EncodeJob>, sqlx::Error> {
        sqlx::query_as(
            "SELECT entry_id, started_at, ended_at, initial_size, final_size \
             FROM encode WHERE ended_at IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Look up the host-owned media entry for an id.
    pub async fn media_entry(&self, entry_id: i64) -> Result<Option<MediaEntry>, sqlx::Error> {
        sqlx::query_as("SELECT file_path, current_state FROM show_entry WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_create_job_is_idempotent() {
        let ledger = memory_ledger().await;

        ledger.create_job(7).await.unwrap();
        ledger.create_job(7).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM encode WHERE entry_id = 7")
            .fetch_one(ledger.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_original_row() {
        let ledger = memory_ledger().await;

        ledger.create_job(3).await.unwrap();
        ledger.set_initial_size(3, 1000).await.unwrap();
        ledger.create_job(3).await.unwrap();

        let job = ledger.job(3).await.unwrap().unwrap();
        assert_eq!(job.initial_size, Some(1000));
    }

    #[tokio::test]
    async fn test_finish_job_sets_ended_and_size_together() {
        let ledger = memory_ledger().await;
        ledger.create_job(1).await.unwrap();

        let open = ledger.job(1).await.unwrap().unwrap();
        assert!(open.ended_at.is_none());
        assert!(open.final_size.is_none());

        ledger.finish_job(1, 512).await.unwrap();

        let done = ledger.job(1).await.unwrap().unwrap();
        assert!(done.ended_at.is_some());
        assert_eq!(done.final_size, Some(512));
    }

    #[tokio::test]
    async fn test_delete_job_clears_state() {
        let ledger = memory_ledger().await;
        ledger.create_job(9).await.unwrap();
        ledger.delete_job(9).await.unwrap();

        assert!(ledger.job(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unfinished_ordered_by_start_time() {
        let ledger = memory_ledger().await;

        // explicit timestamps so the ordering is deterministic
        for (id, started) in [(5, "2024-01-02 00:00:00"), (2, "2024-01-01 00:00:00")] {
            sqlx::query("INSERT INTO encode (entry_id, started_at) VALUES (?, ?)")
                .bind(id)
                .bind(started)
                .execute(ledger.pool())
                .await
                .unwrap();
        }
        ledger.create_job(8).await.unwrap();
        ledger.finish_job(8, 100).await.unwrap();

        assert_eq!(ledger.unfinished().await.unwrap(), vec![2, 5]);
    }

    #[tokio::test]
    async fn test_media_entry_lookup() {
        let ledger = memory_ledger().await;
        create_show_entry_table(&ledger).await;
        insert_show_entry(&ledger, 4, Some("/media/show.mkv"), STATE_COMPLETED).await;

        let entry = ledger.media_entry(4).await.unwrap().unwrap();
        assert_eq!(entry.file_path.as_deref(), Some("/media/show.mkv"));
        assert_eq!(entry.current_state, STATE_COMPLETED);

        assert!(ledger.media_entry(99).await.unwrap().is_none());
    }
}
