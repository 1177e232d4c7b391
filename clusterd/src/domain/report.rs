//! Status reports sent by runners.

use serde::{Deserialize, Serialize};

/// Lifecycle event carried by a [`StatusReport`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Start,
    /// An intermediate artifact was cut.
    Artifact,
    /// Normal end, including reaching the scheduled end time.
    End,
    /// Abnormal end: failed process, bad parameters or runner shutdown.
    Exception,
    /// Stopped because the job was archived from outside.
    Cancelled,
}

impl ReportKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Start | Self::Artifact)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: i64,
    pub kind: ReportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Cumulative bytes, init segment included.
    #[serde(default)]
    pub size: u64,
    /// Cumulative duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(job_id: i64, kind: ReportKind) -> Self {
        Self {
            job_id,
            kind,
            exit_code: None,
            size: 0,
            duration_ms: 0,
            filename: None,
            stdout: String::new(),
            stderr: String::new(),
            message: None,
        }
    }

    pub fn start(job_id: i64) -> Self {
        Self::new(job_id, ReportKind::Start)
    }

    pub fn artifact(job_id: i64, filename: impl Into<String>, size: u64, duration_ms: u64) -> Self {
        Self {
            filename: Some(filename.into()),
            size,
            duration_ms,
            ..Self::new(job_id, ReportKind::Artifact)
        }
    }

    /// Abnormal end before the capture could run.
    pub fn failed_setup(job_id: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            exit_code: Some(-1),
            stderr: message.clone(),
            message: Some(message),
            ..Self::new(job_id, ReportKind::Exception)
        }
    }
}
