//! Outbound notifications for downstream subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RecordStart,
    RecordFile,
    RecordEnd,
    RecordException,
    RecordCancelled,
}

/// A capture lifecycle transition, posted as JSON to the resolved target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub event_type: EventKind,
    /// Reference id of the job (the record task id).
    pub session_id: String,
    pub job_id: i64,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}
