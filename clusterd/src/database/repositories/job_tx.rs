//! Transactional operations for jobs.
//!
//! These run inside a caller-owned `BEGIN IMMEDIATE` transaction and do NOT
//! commit. Lease acquisition and archival are built from them so task
//! deletion can archive through exactly the same statements.

use sqlx::SqliteConnection;

use crate::database::models::JobDbModel;
use crate::{Error, Result};

pub struct JobTxOps;

impl JobTxOps {
    /// Oldest-created active job that is unleased and due.
    pub async fn next_eligible(tx: &mut SqliteConnection, now_ms: i64) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM jobs
            WHERE start_time IS NULL
              AND (schedule_time IS NULL OR schedule_time <= ?)
            ORDER BY create_time, id
            LIMIT 1
            "#,
        )
        .bind(now_ms)
        .fetch_optional(tx)
        .await?;
        Ok(job)
    }

    /// Grant the lease. Returns the number of rows changed, 0 if the job was
    /// already leased or no longer active.
    pub async fn mark_leased(
        tx: &mut SqliteConnection,
        id: i64,
        runner: &str,
        now_ms: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET runner = ?, start_time = ?, last_seen_time = ?
            WHERE id = ? AND start_time IS NULL
            "#,
        )
        .bind(runner)
        .bind(now_ms)
        .bind(now_ms)
        .bind(id)
        .execute(tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_active_by_ref(
        tx: &mut SqliteConnection,
        ref_id: &str,
    ) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM jobs WHERE ref_id = ? ORDER BY create_time, id LIMIT 1",
        )
        .bind(ref_id)
        .fetch_optional(tx)
        .await?;
        Ok(job)
    }

    /// Copy an active job into `job_archives` and delete it from `jobs`.
    ///
    /// Fails with `NotFound` when the job is not active; the caller's
    /// transaction must then be rolled back.
    pub async fn archive(
        tx: &mut SqliteConnection,
        id: i64,
        exit_code: Option<i32>,
        now_ms: i64,
    ) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_archives (
                id, ref_id, category, metadata, runner, exit_code,
                create_time, schedule_time, start_time, end_time, last_seen_time
            )
            SELECT id, ref_id, category, metadata, runner, ?,
                   create_time, schedule_time, start_time, ?, last_seen_time
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(exit_code)
        .bind(now_ms)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(Error::not_found("Job", id));
        }

        let deleted = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted != 1 {
            return Err(Error::conflict(format!(
                "archiving job {id} deleted {deleted} active rows"
            )));
        }

        Ok(())
    }
}
