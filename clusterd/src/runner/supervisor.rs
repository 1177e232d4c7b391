//! Capture subprocess supervision.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use process_utils::{StopOutcome, exit_code, stop_gracefully, supervised_command};
use tokio::process::Child;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Who asked the capture to stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The job was archived on the coordinator.
    External,
    /// The runner itself is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process ended on its own.
    Exited { exit_code: i32 },
    /// The scheduled end time was reached and the process was stopped.
    DeadlineReached { exit_code: i32 },
    Cancelled { reason: CancelReason, exit_code: i32 },
}

/// A running capture process.
pub struct CaptureProcess {
    child: Child,
    stop_grace: Duration,
}

impl CaptureProcess {
    /// Spawn `program` with stdout and stderr redirected to the given log
    /// files. Stdin stays piped for the quit request.
    pub fn spawn(
        program: &Path,
        args: &[String],
        working_dir: &Path,
        stdout: std::fs::File,
        stderr: std::fs::File,
        stop_grace: Duration,
    ) -> Result<Self> {
        let child = supervised_command(program)
            .args(args)
            .current_dir(working_dir)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {}: {e}", program.display())))?;

        debug!(pid = child.id(), program = %program.display(), "capture process started");
        Ok(Self { child, stop_grace })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit, stopping it when the deadline passes or
    /// either token fires.
    pub async fn supervise(
        mut self,
        deadline: Option<Instant>,
        external: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<RunOutcome> {
        let deadline_reached = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let stop_reason = tokio::select! {
            status = self.child.wait() => {
                let code = exit_code(&status?);
                debug!(exit_code = code, "capture process exited");
                return Ok(RunOutcome::Exited { exit_code: code });
            }
            _ = deadline_reached => None,
            _ = external.cancelled() => Some(CancelReason::External),
            _ = shutdown.cancelled() => Some(CancelReason::Shutdown),
        };

        let outcome = stop_gracefully(&mut self.child, b"q", self.stop_grace).await?;
        if let StopOutcome::Killed(_) = outcome {
            warn!(reason = ?stop_reason, "capture process had to be killed");
        }
        let code = exit_code(&outcome.status());

        Ok(match stop_reason {
            None => {
                info!(exit_code = code, "capture reached its end time");
                RunOutcome::DeadlineReached { exit_code: code }
            }
            Some(reason) => {
                info!(?reason, exit_code = code, "capture stopped early");
                RunOutcome::Cancelled {
                    reason,
                    exit_code: code,
                }
            }
        })
    }
}
