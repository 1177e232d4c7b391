//! Record task repository.

use async_trait::async_trait;
use tracing::debug;

use super::job_tx::JobTxOps;
use crate::database::models::{NewJob, NewRecordTask, RecordTaskDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, WritePool, begin_immediate};
use crate::{Error, Result};

/// Outcome of stopping a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoppedTask {
    pub task_id: i64,
    /// The job that was force-archived, if one was still active.
    pub archived_job_id: Option<i64>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task and its job in one transaction. Returns `(task_id, job_id)`.
    ///
    /// The job's `ref_id` is the new task id.
    async fn create_task(&self, task: &NewRecordTask, job: &NewJob, now_ms: i64) -> Result<(i64, i64)>;

    async fn get_task(&self, id: i64) -> Result<Option<RecordTaskDbModel>>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<RecordTaskDbModel>>;

    /// Archive the task's active job with a NULL exit code and delete the
    /// task, in one transaction.
    async fn delete_task(&self, id: i64, now_ms: i64) -> Result<StoppedTask>;
}

pub struct SqlxTaskRepository {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxTaskRepository {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn create_task(&self, task: &NewRecordTask, job: &NewJob, now_ms: i64) -> Result<(i64, i64)> {
        retry_on_sqlite_busy("create_task", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let task_id = sqlx::query(
                r#"
                INSERT INTO record_tasks (domain_name, app_name, stream_name, start_time, end_time, create_time)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task.domain_name)
            .bind(&task.app_name)
            .bind(&task.stream_name)
            .bind(task.start_time)
            .bind(task.end_time)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            let job_id = sqlx::query(
                r#"
                INSERT INTO jobs (ref_id, category, metadata, create_time, schedule_time)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(task_id.to_string())
            .bind(&job.category)
            .bind(&job.metadata)
            .bind(now_ms)
            .bind(job.schedule_time)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            tx.commit().await?;
            debug!(task_id, job_id, "record task created");
            Ok((task_id, job_id))
        })
        .await
    }

    async fn get_task(&self, id: i64) -> Result<Option<RecordTaskDbModel>> {
        let task = sqlx::query_as::<_, RecordTaskDbModel>("SELECT * FROM record_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn list_tasks(&self) -> Result<Vec<RecordTaskDbModel>> {
        let tasks = sqlx::query_as::<_, RecordTaskDbModel>("SELECT * FROM record_tasks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn delete_task(&self, id: i64, now_ms: i64) -> Result<StoppedTask> {
        retry_on_sqlite_busy("delete_task", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let archived_job_id = match JobTxOps::find_active_by_ref(&mut tx, &id.to_string()).await? {
                Some(job) => {
                    JobTxOps::archive(&mut tx, job.id, None, now_ms).await?;
                    Some(job.id)
                }
                None => None,
            };

            let deleted = sqlx::query("DELETE FROM record_tasks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if deleted == 0 {
                return Err(Error::not_found("RecordTask", id));
            }

            tx.commit().await?;
            debug!(task_id = id, ?archived_job_id, "record task deleted");
            Ok(StoppedTask {
                task_id: id,
                archived_job_id,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::database::repositories::{JobRepository, SqlxJobRepository};
    use crate::domain::CaptureParams;

    fn new_task() -> NewRecordTask {
        NewRecordTask {
            domain_name: "live.example.com".to_string(),
            app_name: "live".to_string(),
            stream_name: "s1".to_string(),
            start_time: None,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn delete_task_force_archives_active_job() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("t.db").display());
        let db = Database::connect(&url).await.unwrap();
        let tasks = SqlxTaskRepository::new(db.read.clone(), db.write.clone());
        let jobs = SqlxJobRepository::new(db.read, db.write);

        let job = NewJob::capture("", &CaptureParams::single("rtmp://live/app/s")).unwrap();
        let (task_id, job_id) = tasks.create_task(&new_task(), &job, 100).await.unwrap();

        let active = jobs.get_active(job_id).await.unwrap().unwrap();
        assert_eq!(active.ref_id, task_id.to_string());
        let listed = tasks.list_tasks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].stream_name, "s1");

        let stopped = tasks.delete_task(task_id, 500).await.unwrap();
        assert_eq!(stopped.archived_job_id, Some(job_id));
        assert!(tasks.get_task(task_id).await.unwrap().is_none());
        assert!(tasks.list_tasks().await.unwrap().is_empty());

        let archived = jobs.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(archived.exit_code, None);
        assert_eq!(archived.end_time, Some(500));

        assert!(tasks.delete_task(task_id, 600).await.unwrap_err().is_not_found());
    }
}
