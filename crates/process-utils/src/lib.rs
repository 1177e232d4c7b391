//! Child-process helpers for supervised capture processes.
//!
//! Commands are created detached from any console window on Windows and are
//! killed when their handle is dropped, so a panicking supervisor never leaves
//! an orphaned capture behind.

use std::ffi::OsStr;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Create a supervised `tokio::process::Command`.
///
/// The child is killed on drop and never opens a console window.
pub fn supervised_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window().kill_on_drop(true);
    cmd
}

/// How a child ended after [`stop_gracefully`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child honoured the quit request within the grace period.
    Exited(ExitStatus),
    /// The grace period elapsed and the child was killed.
    Killed(ExitStatus),
}

impl StopOutcome {
    pub fn status(&self) -> ExitStatus {
        match self {
            StopOutcome::Exited(status) | StopOutcome::Killed(status) => *status,
        }
    }
}

/// Ask a child to quit, then kill it if it is still running after `grace`.
///
/// The quit request is the `quit_input` bytes written to the child's stdin
/// (ffmpeg understands `q`), followed by closing stdin. Children spawned
/// without a piped stdin go straight to the grace wait.
pub async fn stop_gracefully(
    child: &mut Child,
    quit_input: &[u8],
    grace: Duration,
) -> io::Result<StopOutcome> {
    if let Some(status) = child.try_wait()? {
        return Ok(StopOutcome::Exited(status));
    }

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(quit_input).await {
            debug!(error = %e, "failed to write quit request to child stdin");
        }
        let _ = stdin.shutdown().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(StopOutcome::Exited(status?)),
        Err(_) => {
            warn!(
                pid = child.id(),
                grace_ms = grace.as_millis() as u64,
                "child did not exit within grace period, killing"
            );
            child.kill().await?;
            let status = child.wait().await?;
            Ok(StopOutcome::Killed(status))
        }
    }
}

/// Map an exit status to a numeric code.
///
/// Processes terminated by a signal have no code and map to `-1`.
pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
