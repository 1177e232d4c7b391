//! Coordinator lease service.
//!
//! Serves leases, applies runner reports to the job store and turns them into
//! downstream notifications. Correctness rests on the job store transactions;
//! nothing here holds in-process locks.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::database::models::{NewJob, NewRecordTask, RecordTaskDbModel};
use crate::database::repositories::{
    CallbackRepository, JobRepository, SqlxCallbackRepository, SqlxJobRepository,
    SqlxTaskRepository, StoppedTask, TaskRepository,
};
use crate::database::time::{datetime_to_ms, now_ms};
use crate::domain::{CallbackEvent, CaptureParams, EventKind, Job, ReportKind, StatusReport};
use crate::media::{self, ConcatPlan, MediaIndex};
use crate::notification::{Notifier, NotifyTargetResolver};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base URL used in download links, e.g. `http://manager:8088`.
    pub public_url: String,
    /// Media root shared with the runners.
    pub media_dir: PathBuf,
    pub default_notify_url: Option<String>,
}

/// A new recording request.
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub params: CaptureParams,
    /// Not leasable before this time.
    pub schedule_time: Option<DateTime<Utc>>,
}

pub struct Coordinator {
    jobs: Arc<dyn JobRepository>,
    tasks: Arc<dyn TaskRepository>,
    callbacks: Arc<dyn CallbackRepository>,
    resolver: NotifyTargetResolver,
    notifier: Notifier,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(db: &Database, notifier: Notifier, config: CoordinatorConfig) -> Self {
        let jobs: Arc<dyn JobRepository> =
            Arc::new(SqlxJobRepository::new(db.read.clone(), db.write.clone()));
        let tasks: Arc<dyn TaskRepository> =
            Arc::new(SqlxTaskRepository::new(db.read.clone(), db.write.clone()));
        let callbacks: Arc<dyn CallbackRepository> =
            Arc::new(SqlxCallbackRepository::new(db.read.clone(), db.write.clone()));
        Self::with_repositories(jobs, tasks, callbacks, notifier, config)
    }

    pub fn with_repositories(
        jobs: Arc<dyn JobRepository>,
        tasks: Arc<dyn TaskRepository>,
        callbacks: Arc<dyn CallbackRepository>,
        notifier: Notifier,
        config: CoordinatorConfig,
    ) -> Self {
        let resolver = NotifyTargetResolver::new(callbacks.clone(), config.default_notify_url.clone());
        Self {
            jobs,
            tasks,
            callbacks,
            resolver,
            notifier,
            config,
        }
    }

    pub fn callbacks(&self) -> &Arc<dyn CallbackRepository> {
        &self.callbacks
    }

    pub async fn lease(&self, runner: &str) -> Result<Option<Job>> {
        let job = self.jobs.acquire_next(runner, now_ms()).await?;
        if let Some(job) = &job {
            info!(job_id = job.id, runner, "lease granted");
        }
        Ok(job.map(Job::from))
    }

    pub async fn get_job(&self, id: i64) -> Result<Job> {
        self.jobs
            .get_job(id)
            .await?
            .map(Job::from)
            .ok_or_else(|| Error::not_found("Job", id))
    }

    pub async fn list_active(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.list_active().await?.into_iter().map(Job::from).collect())
    }

    pub async fn list_by_runner(&self, runner: &str) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .list_active_by_runner(runner)
            .await?
            .into_iter()
            .map(Job::from)
            .collect())
    }

    pub async fn create_task(&self, request: CreateTask) -> Result<(i64, i64)> {
        request.params.validate()?;
        let params = &request.params;
        let task = NewRecordTask {
            domain_name: params.domain_name.clone(),
            app_name: params.app_name.clone(),
            stream_name: params.stream_name.clone(),
            start_time: params.start_time.map(datetime_to_ms),
            end_time: params.end_time.map(datetime_to_ms),
        };
        let job = NewJob::capture("", params)?.with_schedule_time(request.schedule_time.map(datetime_to_ms));

        let (task_id, job_id) = self.tasks.create_task(&task, &job, now_ms()).await?;
        info!(task_id, job_id, stream = %params.stream_name, "record task created");
        Ok((task_id, job_id))
    }

    pub async fn list_tasks(&self) -> Result<Vec<RecordTaskDbModel>> {
        self.tasks.list_tasks().await
    }

    /// Force-archive the task's active job. The runner notices through its
    /// cancellation watcher.
    pub async fn stop_task(&self, task_id: i64) -> Result<StoppedTask> {
        let stopped = self.tasks.delete_task(task_id, now_ms()).await?;
        info!(task_id, job_id = ?stopped.archived_job_id, "record task stopped");
        Ok(stopped)
    }

    pub async fn handle_report(&self, job_id: i64, report: StatusReport) -> Result<()> {
        if report.job_id != job_id {
            return Err(Error::validation(format!(
                "report for job {} posted to job {job_id}",
                report.job_id
            )));
        }

        let now = now_ms();
        let job = self.get_job(job_id).await?;
        // start_time is never cleared on an active job, so this cannot race a lease.
        if !job.is_archived() && !job.is_leased() {
            return Err(Error::conflict(format!("job {job_id} has not been leased")));
        }
        if !job.is_archived() && !self.jobs.touch(job_id, now).await? {
            debug!(job_id, "job archived while handling report");
        }

        debug!(job_id, kind = %report.kind, "status report");

        let event_kind = match report.kind {
            ReportKind::Start => EventKind::RecordStart,
            ReportKind::Artifact => EventKind::RecordFile,
            ReportKind::End | ReportKind::Exception => {
                let exit_code = report.exit_code.or(Some(if report.kind == ReportKind::End { 0 } else { -1 }));
                self.jobs
                    .archive_and_remove(job_id, exit_code, now)
                    .await
                    .map_err(|e| match e {
                        Error::NotFound { .. } => Error::conflict(format!("job {job_id} is no longer active")),
                        other => other,
                    })?;
                info!(job_id, kind = %report.kind, ?exit_code, "job completed");
                if report.kind == ReportKind::End {
                    EventKind::RecordEnd
                } else {
                    EventKind::RecordException
                }
            }
            ReportKind::Cancelled => {
                if self.jobs.get_active(job_id).await?.is_some() {
                    match self.jobs.archive_and_remove(job_id, None, now).await {
                        Ok(()) | Err(Error::NotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                info!(job_id, "job cancelled");
                EventKind::RecordCancelled
            }
        };

        self.notify(&job, event_kind, &report).await;
        Ok(())
    }

    async fn notify(&self, job: &Job, kind: EventKind, report: &StatusReport) {
        let params = match job.capture_params() {
            Ok(params) => params,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "cannot notify for job");
                return;
            }
        };

        let Some(url) = self.resolver.resolve(&params).await else {
            debug!(job_id = job.id, "no notification target");
            return;
        };

        let download_url = match kind {
            EventKind::RecordFile => report
                .filename
                .as_ref()
                .map(|name| self.download_url(job.id, Some(name))),
            EventKind::RecordEnd => Some(self.download_url(job.id, None)),
            _ => None,
        };

        let message = report
            .message
            .clone()
            .or_else(|| (!report.stderr.is_empty()).then(|| report.stderr.clone()));

        let event = CallbackEvent {
            event_type: kind,
            session_id: job.ref_id.clone(),
            job_id: job.id,
            domain_name: params.domain_name,
            app_name: params.app_name,
            stream_name: params.stream_name,
            download_url,
            file_size: report.size,
            duration_ms: report.duration_ms,
            exit_code: report.exit_code,
            message,
            timestamp: Utc::now(),
        };
        self.notifier.dispatch(url, event);
    }

    pub fn download_url(&self, job_id: i64, artifact: Option<&str>) -> String {
        let base = self.config.public_url.trim_end_matches('/');
        match artifact {
            Some(name) => format!("{base}/api/download/{job_id}/{name}"),
            None => format!("{base}/api/download/{job_id}"),
        }
    }

    /// Plan a download of the full recording or of one artifact.
    ///
    /// Returns the plan and the attachment filename.
    pub async fn download_plan(&self, job_id: i64, artifact: Option<&str>) -> Result<(ConcatPlan, String)> {
        let job = self.get_job(job_id).await?;
        let params = job.capture_params()?;
        let root = params.storage_path.as_deref().unwrap_or(&self.config.media_dir);
        let dir = media::job_dir(root, job_id);

        let playlist = media::playlist_for(&dir, artifact)?;
        let index = match MediaIndex::read(&playlist).await {
            Ok(index) => index,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("Recording", playlist.display()));
            }
            Err(e) => return Err(e),
        };
        let plan = ConcatPlan::build(&dir, &index).await?;

        let filename = match artifact {
            Some(name) => format!("{job_id}-{}.mp4", name.trim_end_matches(".mp4")),
            None => format!("{job_id}.mp4"),
        };
        Ok((plan, filename))
    }
}
