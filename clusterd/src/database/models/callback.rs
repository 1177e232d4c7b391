//! Callback template and rule database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CallbackTemplateDbModel {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Target for record lifecycle notifications.
    pub record_notify_url: Option<String>,
    pub create_time: i64,
}

/// Binds a template to a domain, optionally narrowed to one app.
///
/// An empty `app_name` matches every app of the domain.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CallbackRuleDbModel {
    pub domain_name: String,
    pub app_name: String,
    pub template_id: i64,
    pub create_time: i64,
}
