//! Callback template and rule repository.

use async_trait::async_trait;

use crate::database::models::{CallbackRuleDbModel, CallbackTemplateDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, WritePool};
use crate::Result;

#[async_trait]
pub trait CallbackRepository: Send + Sync {
    async fn create_template(
        &self,
        name: &str,
        description: Option<&str>,
        record_notify_url: Option<&str>,
        now_ms: i64,
    ) -> Result<i64>;

    async fn get_template(&self, id: i64) -> Result<Option<CallbackTemplateDbModel>>;

    /// Bind a template to `(domain, app)`, replacing any existing binding.
    async fn upsert_rule(&self, domain_name: &str, app_name: &str, template_id: i64, now_ms: i64) -> Result<()>;

    async fn list_rules(&self) -> Result<Vec<CallbackRuleDbModel>>;

    /// Record notification target for a stream. An exact app rule wins over
    /// the domain-wide (empty app) rule.
    async fn find_record_notify_url(&self, domain_name: &str, app_name: &str) -> Result<Option<String>>;
}

pub struct SqlxCallbackRepository {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxCallbackRepository {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl CallbackRepository for SqlxCallbackRepository {
    async fn create_template(
        &self,
        name: &str,
        description: Option<&str>,
        record_notify_url: Option<&str>,
        now_ms: i64,
    ) -> Result<i64> {
        retry_on_sqlite_busy("create_callback_template", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO callback_templates (name, description, record_notify_url, create_time)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(description)
            .bind(record_notify_url)
            .bind(now_ms)
            .execute(&self.write_pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn get_template(&self, id: i64) -> Result<Option<CallbackTemplateDbModel>> {
        let template = sqlx::query_as::<_, CallbackTemplateDbModel>(
            "SELECT * FROM callback_templates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }

    async fn upsert_rule(&self, domain_name: &str, app_name: &str, template_id: i64, now_ms: i64) -> Result<()> {
        retry_on_sqlite_busy("upsert_callback_rule", || async {
            sqlx::query(
                r#"
                INSERT INTO callback_rules (domain_name, app_name, template_id, create_time)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (domain_name, app_name) DO UPDATE SET
                    template_id = excluded.template_id,
                    create_time = excluded.create_time
                "#,
            )
            .bind(domain_name)
            .bind(app_name)
            .bind(template_id)
            .bind(now_ms)
            .execute(&self.write_pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_rules(&self) -> Result<Vec<CallbackRuleDbModel>> {
        let rules = sqlx::query_as::<_, CallbackRuleDbModel>(
            "SELECT * FROM callback_rules ORDER BY domain_name, app_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn find_record_notify_url(&self, domain_name: &str, app_name: &str) -> Result<Option<String>> {
        // app_name DESC puts the exact match ahead of ''.
        let url: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT t.record_notify_url
            FROM callback_rules r
            JOIN callback_templates t ON t.id = r.template_id
            WHERE r.domain_name = ? AND (r.app_name = ? OR r.app_name = '')
              AND t.record_notify_url IS NOT NULL AND t.record_notify_url <> ''
            ORDER BY r.app_name DESC
            LIMIT 1
            "#,
        )
        .bind(domain_name)
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(url.map(|(u,)| u))
    }
}
