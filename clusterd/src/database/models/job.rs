//! Job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, opt_ms_to_datetime};
use crate::domain::Job;

/// Row of `jobs` or `job_archives`; both tables share this column set.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: i64,
    pub ref_id: String,
    /// Category tag, e.g. `capture`.
    pub category: String,
    /// JSON blob of category-specific parameters.
    pub metadata: String,
    pub runner: Option<String>,
    pub exit_code: Option<i32>,
    /// Unix epoch milliseconds.
    pub create_time: i64,
    pub schedule_time: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub last_seen_time: Option<i64>,
}

impl From<JobDbModel> for Job {
    fn from(row: JobDbModel) -> Self {
        Job {
            id: row.id,
            ref_id: row.ref_id,
            category: row.category,
            metadata: row.metadata,
            runner: row.runner,
            exit_code: row.exit_code,
            create_time: ms_to_datetime(row.create_time),
            schedule_time: opt_ms_to_datetime(row.schedule_time),
            start_time: opt_ms_to_datetime(row.start_time),
            end_time: opt_ms_to_datetime(row.end_time),
            last_seen_time: opt_ms_to_datetime(row.last_seen_time),
        }
    }
}

/// Values for inserting a new active job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub ref_id: String,
    pub category: String,
    pub metadata: String,
    pub schedule_time: Option<i64>,
}

impl NewJob {
    pub fn capture(ref_id: impl Into<String>, params: &crate::domain::CaptureParams) -> crate::Result<Self> {
        Ok(Self {
            ref_id: ref_id.into(),
            category: crate::domain::JobCategory::Capture.as_str().to_string(),
            metadata: serde_json::to_string(params)?,
            schedule_time: None,
        })
    }

    pub fn with_schedule_time(mut self, schedule_ms: Option<i64>) -> Self {
        self.schedule_time = schedule_ms;
        self
    }
}
