//! Job repository: the durable lease queue.

use async_trait::async_trait;
use tracing::debug;

use super::job_tx::JobTxOps;
use crate::database::models::{JobDbModel, NewJob};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, WritePool, begin_immediate};
use crate::{Error, Result};

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: &NewJob, now_ms: i64) -> Result<i64>;

    /// Lease the oldest eligible job to `runner`, atomically.
    async fn acquire_next(&self, runner: &str, now_ms: i64) -> Result<Option<JobDbModel>>;

    async fn get_active(&self, id: i64) -> Result<Option<JobDbModel>>;

    /// Active job first, archived job otherwise.
    async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>>;

    /// Snapshot into the archive and remove the active row, in one transaction.
    async fn archive_and_remove(&self, id: i64, exit_code: Option<i32>, now_ms: i64) -> Result<()>;

    async fn list_active(&self) -> Result<Vec<JobDbModel>>;
    async fn list_active_by_runner(&self, runner: &str) -> Result<Vec<JobDbModel>>;

    /// Heartbeat. Returns false when the job is no longer active.
    async fn touch(&self, id: i64, now_ms: i64) -> Result<bool>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxJobRepository {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert_job(&self, job: &NewJob, now_ms: i64) -> Result<i64> {
        retry_on_sqlite_busy("insert_job", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO jobs (ref_id, category, metadata, create_time, schedule_time)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.ref_id)
            .bind(&job.category)
            .bind(&job.metadata)
            .bind(now_ms)
            .bind(job.schedule_time)
            .execute(&self.write_pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn acquire_next(&self, runner: &str, now_ms: i64) -> Result<Option<JobDbModel>> {
        retry_on_sqlite_busy("acquire_next", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let Some(mut job) = JobTxOps::next_eligible(&mut tx, now_ms).await? else {
                tx.rollback().await?;
                return Ok(None);
            };

            // The write lock is held since BEGIN IMMEDIATE, so the guarded
            // update can only miss if the invariant is already broken.
            let updated = JobTxOps::mark_leased(&mut tx, job.id, runner, now_ms).await?;
            if updated != 1 {
                return Err(Error::conflict(format!(
                    "job {} was leased concurrently",
                    job.id
                )));
            }

            tx.commit().await?;

            job.runner = Some(runner.to_string());
            job.start_time = Some(now_ms);
            job.last_seen_time = Some(now_ms);
            debug!(job_id = job.id, runner, "job leased");
            Ok(Some(job))
        })
        .await
    }

    async fn get_active(&self, id: i64) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>> {
        if let Some(job) = self.get_active(id).await? {
            return Ok(Some(job));
        }
        let archived = sqlx::query_as::<_, JobDbModel>("SELECT * FROM job_archives WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(archived)
    }

    async fn archive_and_remove(&self, id: i64, exit_code: Option<i32>, now_ms: i64) -> Result<()> {
        retry_on_sqlite_busy("archive_and_remove", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;
            JobTxOps::archive(&mut tx, id, exit_code, now_ms).await?;
            tx.commit().await?;
            debug!(job_id = id, ?exit_code, "job archived");
            Ok(())
        })
        .await
    }

    async fn list_active(&self) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs ORDER BY create_time, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn list_active_by_runner(&self, runner: &str) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM jobs WHERE runner = ? ORDER BY create_time, id",
        )
        .bind(runner)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn touch(&self, id: i64, now_ms: i64) -> Result<bool> {
        retry_on_sqlite_busy("touch_job", || async {
            let result = sqlx::query("UPDATE jobs SET last_seen_time = ? WHERE id = ?")
                .bind(now_ms)
                .bind(id)
                .execute(&self.write_pool)
                .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }
}
