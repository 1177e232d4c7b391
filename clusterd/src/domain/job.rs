//! Jobs as exchanged between coordinator and runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capture::CaptureParams;
use crate::{Error, Result};

/// Job categories.
///
/// Stored as text in the `category` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    /// Media capture of one stream into an HLS recording.
    Capture,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
        }
    }
}

/// A unit of work, either active or archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Identity of the owning record task.
    pub ref_id: String,
    /// Raw category tag; decoded through [`Job::spec`].
    pub category: String,
    /// JSON-encoded parameters for the category.
    pub metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub create_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_time: Option<DateTime<Utc>>,
}

/// Decoded job payload.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSpec {
    Capture(CaptureParams),
    /// A category this build does not know how to run.
    Unsupported(String),
}

impl Job {
    /// Only archived jobs carry an end time.
    pub fn is_archived(&self) -> bool {
        self.end_time.is_some()
    }

    /// Archived without an exit code: stopped from outside before it finished.
    pub fn is_cancelled(&self) -> bool {
        self.is_archived() && self.exit_code.is_none()
    }

    pub fn is_leased(&self) -> bool {
        self.runner.is_some() && self.exit_code.is_none() && !self.is_archived()
    }

    /// Decode the category tag and metadata blob.
    ///
    /// Unknown categories yield [`JobSpec::Unsupported`]; malformed metadata
    /// for a known category is an error.
    pub fn spec(&self) -> Result<JobSpec> {
        match self.category.parse::<JobCategory>() {
            Ok(JobCategory::Capture) => {
                let params: CaptureParams = serde_json::from_str(&self.metadata)
                    .map_err(|e| Error::validation(format!("invalid capture metadata: {e}")))?;
                Ok(JobSpec::Capture(params))
            }
            Err(_) => Ok(JobSpec::Unsupported(self.category.clone())),
        }
    }

    /// Decode capture parameters, rejecting any other category.
    pub fn capture_params(&self) -> Result<CaptureParams> {
        match self.spec()? {
            JobSpec::Capture(params) => Ok(params),
            JobSpec::Unsupported(category) => Err(Error::UnsupportedCategory(category)),
        }
    }
}
