//! Runner execution engine.
//!
//! Polls the coordinator for a lease, runs the capture to completion and
//! reports its lifecycle. One job at a time; per job it fans out to the
//! process wait, the cancellation watcher and the artifact loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::artifact::{ArtifactCutter, run_artifact_loop};
use super::client::CoordinatorClient;
use super::command::CaptureCommand;
use super::log_server::RunningJob;
use super::report_queue::ReportQueue;
use super::supervisor::{CancelReason, CaptureProcess, RunOutcome};
use crate::config::RunnerConfig;
use crate::domain::{CaptureParams, Job, ReportKind, StatusReport};
use crate::media::{self, INDEX_PLAYLIST, MediaIndex, MediaTotals, STDERR_LOG, STDOUT_LOG};
use crate::{Error, Result};

pub struct ExecutionEngine {
    client: Arc<dyn CoordinatorClient>,
    reports: ReportQueue,
    config: RunnerConfig,
    running: watch::Sender<Option<RunningJob>>,
    span: Span,
}

impl ExecutionEngine {
    pub fn new(
        client: Arc<dyn CoordinatorClient>,
        reports: ReportQueue,
        config: RunnerConfig,
        span: Span,
    ) -> Self {
        Self {
            client,
            reports,
            config,
            running: watch::Sender::new(None),
            span,
        }
    }

    /// Follows the job currently being executed.
    pub fn running_job(&self) -> watch::Receiver<Option<RunningJob>> {
        self.running.subscribe()
    }

    /// Lease and run jobs until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let runner = self.config.name.as_str();
        let mut idle_polls: u32 = 0;
        info!(parent: &self.span, runner, "runner started");

        while !shutdown.is_cancelled() {
            match self.client.acquire_job(runner).await {
                Ok(Some(job)) => {
                    idle_polls = 0;
                    let span = info_span!(parent: &self.span, "job", job_id = job.id);
                    self.run_job(job, &shutdown).instrument(span).await;
                    continue;
                }
                Ok(None) => {
                    idle_polls = idle_polls.saturating_add(1);
                    if self.config.idle_warn_polls > 0 && idle_polls % self.config.idle_warn_polls == 0 {
                        warn!(parent: &self.span, runner, idle_polls, "no job leased for a while");
                    }
                }
                Err(e) => warn!(parent: &self.span, runner, error = %e, "lease request failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!(parent: &self.span, runner, "runner stopped");
    }

    /// Run one leased job and deliver its terminal report.
    ///
    /// Returns the terminal report.
    pub async fn run_job(&self, job: Job, shutdown: &CancellationToken) -> StatusReport {
        let result = self.execute(&job, shutdown).await;
        self.running.send_replace(None);
        let terminal = match result {
            Ok(report) => report,
            Err(e) => {
                error!(job_id = job.id, error = %e, "job failed before capture could finish");
                StatusReport::failed_setup(job.id, e.to_string())
            }
        };

        info!(job_id = job.id, kind = %terminal.kind, exit_code = ?terminal.exit_code, "job finished");
        if let Err(e) = self.reports.deliver(terminal.clone()).await {
            warn!(job_id = job.id, error = %e, "terminal report not delivered");
        }
        terminal
    }

    async fn execute(&self, job: &Job, shutdown: &CancellationToken) -> Result<StatusReport> {
        let params = job.capture_params()?;
        params.validate()?;

        let root = params.storage_path.as_deref().unwrap_or(&self.config.work_dir);
        let dir = media::job_dir(root, job.id);
        tokio::fs::create_dir_all(&dir).await?;

        let command = CaptureCommand::build(&params, &dir)?;
        if let Some((path, sdp)) = &command.session_description {
            tokio::fs::write(path, sdp).await?;
        }
        let stdout = tokio::fs::File::create(dir.join(STDOUT_LOG)).await?.into_std().await;
        let stderr = tokio::fs::File::create(dir.join(STDERR_LOG)).await?.into_std().await;
        self.running.send_replace(Some(RunningJob {
            id: job.id,
            dir: dir.clone(),
        }));

        self.reports.enqueue(StatusReport::start(job.id));

        let external = CancellationToken::new();
        let run_done = shutdown.child_token();
        let _stop_watcher = run_done.clone().drop_guard();
        let watcher = tokio::spawn(
            watch_for_cancellation(
                self.client.clone(),
                job.id,
                self.config.watch_interval,
                external.clone(),
                run_done.clone(),
            )
            .in_current_span(),
        );

        let Some(effective_start) = self.defer_start(&params, &external, shutdown).await else {
            run_done.cancel();
            if let Err(e) = watcher.await {
                warn!(job_id = job.id, error = %e, "cancellation watcher panicked");
            }
            return Ok(self.early_stop_report(job.id, &external));
        };

        let deadline = match params.end_time {
            Some(end) if end <= effective_start => {
                return Err(Error::validation(format!(
                    "end time {end} is not after start time {effective_start}"
                )));
            }
            Some(end) => {
                let remaining = (end - effective_start).to_std().unwrap_or(Duration::ZERO);
                Some(tokio::time::Instant::now() + remaining)
            }
            None => None,
        };

        let process = CaptureProcess::spawn(
            &self.config.ffmpeg_path,
            &command.args,
            &dir,
            stdout,
            stderr,
            self.config.stop_grace,
        )?;
        info!(job_id = job.id, pid = process.id(), bounded = deadline.is_some(), "capture running");

        let artifacts = self.spawn_artifact_loop(job.id, &params, &dir, &run_done);
        let outcome = process.supervise(deadline, &external, shutdown).await;

        run_done.cancel();
        if let Err(e) = watcher.await {
            warn!(job_id = job.id, error = %e, "cancellation watcher panicked");
        }
        if let Some(handle) = artifacts
            && let Err(e) = handle.await
        {
            warn!(job_id = job.id, error = %e, "artifact loop panicked");
        }

        let outcome = outcome?;
        let totals = measure_recording(&dir).await;
        Ok(self.terminal_report(job.id, outcome, totals, &dir).await)
    }

    /// Sleep until the scheduled start. `None` when stopped while waiting.
    async fn defer_start(
        &self,
        params: &CaptureParams,
        external: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let Some(start) = params.start_time else {
            return Some(now);
        };
        if start <= now {
            match late_start(start, now, self.config.poll_interval) {
                Some(lag) => {
                    warn!(%start, lag_ms = lag.as_millis() as u64, "start time already passed, starting now")
                }
                None => debug!(%start, "starting at scheduled time"),
            }
            return Some(now);
        }

        let wait = (start - now).to_std().unwrap_or(Duration::ZERO);
        info!(%start, wait_secs = wait.as_secs(), "deferring capture until start time");
        tokio::select! {
            _ = tokio::time::sleep(wait) => Some(start),
            _ = external.cancelled() => None,
            _ = shutdown.cancelled() => None,
        }
    }

    fn early_stop_report(&self, job_id: i64, external: &CancellationToken) -> StatusReport {
        if external.is_cancelled() {
            StatusReport {
                message: Some("cancelled before start".to_string()),
                ..StatusReport::new(job_id, ReportKind::Cancelled)
            }
        } else {
            StatusReport {
                exit_code: Some(-1),
                message: Some("runner shutting down".to_string()),
                ..StatusReport::new(job_id, ReportKind::Exception)
            }
        }
    }

    fn spawn_artifact_loop(
        &self,
        job_id: i64,
        params: &CaptureParams,
        dir: &Path,
        run_done: &CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if params.artifact_interval_secs == 0 {
            return None;
        }
        let interval = Duration::from_secs(params.artifact_interval_secs);
        Some(tokio::spawn(
            run_artifact_loop(
                job_id,
                ArtifactCutter::new(dir),
                interval,
                self.reports.clone(),
                run_done.child_token(),
            )
            .in_current_span(),
        ))
    }

    async fn terminal_report(
        &self,
        job_id: i64,
        outcome: RunOutcome,
        totals: MediaTotals,
        dir: &Path,
    ) -> StatusReport {
        let (kind, exit_code, message) = match outcome {
            RunOutcome::DeadlineReached { .. } => (ReportKind::End, Some(0), None),
            RunOutcome::Exited { exit_code: 0 } => (ReportKind::End, Some(0), None),
            RunOutcome::Exited { exit_code } => (
                ReportKind::Exception,
                Some(exit_code),
                Some(format!("capture process exited with code {exit_code}")),
            ),
            RunOutcome::Cancelled {
                reason: CancelReason::External,
                ..
            } => (ReportKind::Cancelled, None, Some("cancelled by coordinator".to_string())),
            RunOutcome::Cancelled {
                reason: CancelReason::Shutdown,
                ..
            } => (ReportKind::Exception, Some(-1), Some("runner shutting down".to_string())),
        };

        let mut report = StatusReport {
            exit_code,
            size: totals.size,
            duration_ms: totals.duration_ms,
            message,
            ..StatusReport::new(job_id, kind)
        };
        if kind != ReportKind::End {
            let limit = self.config.log_tail_bytes;
            report.stdout = read_tail(&dir.join(STDOUT_LOG), limit).await;
            report.stderr = read_tail(&dir.join(STDERR_LOG), limit).await;
        }
        report
    }
}

/// Poll the job until it is archived without an exit code, then fire
/// `external`. Returns without action once `done` fires.
async fn watch_for_cancellation(
    client: Arc<dyn CoordinatorClient>,
    job_id: i64,
    interval: Duration,
    external: CancellationToken,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match client.get_job(job_id).await {
            Ok(Some(job)) if job.is_cancelled() => {
                info!(job_id, "job archived by coordinator, cancelling capture");
                external.cancel();
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => debug!(job_id, "job not found on coordinator"),
            Err(e) => warn!(job_id, error = %e, "cancellation check failed"),
        }
    }
}

/// How far past `start` we are, when that is more than `tolerance`.
///
/// Jobs are scheduled at their start time, so a lag of up to one poll is
/// the normal case.
fn late_start(start: DateTime<Utc>, now: DateTime<Utc>, tolerance: Duration) -> Option<Duration> {
    let lag = (now - start).to_std().unwrap_or(Duration::ZERO);
    (lag > tolerance).then_some(lag)
}

async fn measure_recording(dir: &Path) -> MediaTotals {
    match MediaIndex::read(&dir.join(INDEX_PLAYLIST)).await {
        Ok(index) => index.measure(dir).await,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "recording index unreadable, reporting empty totals");
            MediaTotals::default()
        }
    }
}

/// Last `limit` bytes of a log file, lossily decoded. Empty when unreadable.
pub async fn read_tail(path: &Path, limit: u64) -> String {
    async fn tail(path: &Path, limit: u64) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        file.seek(std::io::SeekFrom::Start(len.saturating_sub(limit))).await?;
        let mut buf = Vec::with_capacity(len.min(limit) as usize);
        file.read_to_end(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    match tail(path, limit).await {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no log tail");
            String::new()
        }
    }
}
