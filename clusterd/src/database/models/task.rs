//! Record task database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recording request owning one capture job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecordTaskDbModel {
    pub id: i64,
    pub domain_name: String,
    pub app_name: String,
    pub stream_name: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub create_time: i64,
}

#[derive(Debug, Clone)]
pub struct NewRecordTask {
    pub domain_name: String,
    pub app_name: String,
    pub stream_name: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}
