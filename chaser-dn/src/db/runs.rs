//! Run log persistence
//!
//! One row per top-level invocation. A run is created `running` and
//! always finalized to a terminal status, so the history never contains
//! silent losses.

use chaser_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

/// Aggregate per-category counters for one run
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunCounters {
    pub processed: u64,
    pub scheduled: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunCounters {
    pub fn merge(&mut self, other: &RunCounters) {
        self.processed += other.processed;
        self.scheduled += other.scheduled;
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// One run log row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DunningRun {
    pub id: i64,
    pub trigger_source: String,
    pub status: String,
    pub is_test: bool,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub processed: i64,
    pub scheduled: i64,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
    pub error: Option<String>,
}

const SELECT_COLUMNS: &str = "id, trigger_source, status, is_test, started_at, finished_at, \
                              processed, scheduled, sent, failed, skipped, error";

/// Create a new `running` row and return its id
pub async fn create_running(
    pool: &SqlitePool,
    trigger_source: &str,
    is_test: bool,
    started_at: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO dunning_runs (trigger_source, status, is_test, started_at)
        VALUES (?, 'running', ?, ?)
        "#,
    )
    .bind(trigger_source)
    .bind(is_test)
    .bind(started_at)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Finalize a run with its terminal status and aggregate counters
pub async fn finalize(
    pool: &SqlitePool,
    id: i64,
    status: &str,
    counters: &RunCounters,
    error: Option<&str>,
    finished_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE dunning_runs
        SET status = ?, finished_at = ?,
            processed = ?, scheduled = ?, sent = ?, failed = ?, skipped = ?,
            error = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(finished_at)
    .bind(counters.processed as i64)
    .bind(counters.scheduled as i64)
    .bind(counters.sent as i64)
    .bind(counters.failed as i64)
    .bind(counters.skipped as i64)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Whether a run is currently executing (single-active-run enforcement)
pub async fn has_running_run(pool: &SqlitePool) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM dunning_runs WHERE status = 'running'")
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Load one run
pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<DunningRun>> {
    let run = sqlx::query_as::<_, DunningRun>(&format!(
        "SELECT {SELECT_COLUMNS} FROM dunning_runs WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(run)
}

/// Most recent runs, newest first
pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<DunningRun>> {
    let runs = sqlx::query_as::<_, DunningRun>(&format!(
        "SELECT {SELECT_COLUMNS} FROM dunning_runs ORDER BY id DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(runs)
}

/// Failed runs among the most recent `window` runs, for the pre-flight
/// failure-streak warning.
pub async fn recent_failure_count(pool: &SqlitePool, window: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM (
            SELECT status FROM dunning_runs ORDER BY id DESC LIMIT ?
        ) WHERE status = 'failed'
        "#,
    )
    .bind(window)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_common::db::init_memory_pool;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let pool = init_memory_pool().await.unwrap();

        let id = create_running(&pool, "manual", false, "2026-08-08T10:00:00+00:00")
            .await
            .unwrap();
        assert!(has_running_run(&pool).await.unwrap());

        let counters = RunCounters {
            processed: 10,
            scheduled: 4,
            sent: 3,
            failed: 1,
            skipped: 2,
        };
        finalize(
            &pool,
            id,
            "completed",
            &counters,
            None,
            "2026-08-08T10:05:00+00:00",
        )
        .await
        .unwrap();

        assert!(!has_running_run(&pool).await.unwrap());
        let run = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.sent, 3);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_recent_failure_count_windows() {
        let pool = init_memory_pool().await.unwrap();

        for n in 0..5 {
            let id = create_running(&pool, "clock", false, "2026-08-08T10:00:00+00:00")
                .await
                .unwrap();
            let status = if n < 2 { "failed" } else { "completed" };
            finalize(
                &pool,
                id,
                status,
                &RunCounters::default(),
                None,
                "2026-08-08T10:01:00+00:00",
            )
            .await
            .unwrap();
        }

        // The two failures are the oldest rows; a window of 3 sees none
        assert_eq!(recent_failure_count(&pool, 3).await.unwrap(), 0);
        assert_eq!(recent_failure_count(&pool, 5).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_counters_merge() {
        let mut a = RunCounters {
            processed: 1,
            scheduled: 2,
            sent: 3,
            failed: 0,
            skipped: 1,
        };
        let b = RunCounters {
            processed: 4,
            scheduled: 0,
            sent: 1,
            failed: 2,
            skipped: 0,
        };
        a.merge(&b);
        assert_eq!(a.processed, 5);
        assert_eq!(a.sent, 4);
        assert_eq!(a.failed, 2);
    }
}
