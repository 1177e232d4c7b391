//! Retry helpers for SQLite lock contention.
//!
//! `busy_timeout` covers most contention inside one process. Between
//! coordinator processes sharing a database file `BEGIN IMMEDIATE` can still
//! surface `SQLITE_BUSY`, so write transactions are wrapped in
//! [`retry_on_sqlite_busy`].

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

/// Exponential backoff with jitter for busy retries.
#[derive(Debug, Clone, Copy)]
pub struct BusyBackoff {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BusyBackoff {
    fn default() -> Self {
        Self {
            max_retries: 12,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl BusyBackoff {
    /// Delay before retry number `attempt` (0-based), jitter included.
    pub fn delay(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let shift = attempt.min(32) as u32;
        let capped_ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
        Duration::from_millis((capped_ms + jitter_ms).min(max_ms))
    }
}

pub(crate) fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        let msg = sqlx_err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Run `op`, retrying while it fails with a busy/locked error.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_on_sqlite_busy_with(op_name, BusyBackoff::default(), op).await
}

pub async fn retry_on_sqlite_busy_with<T, F, Fut>(
    op_name: &'static str,
    backoff: BusyBackoff,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_sqlite_busy_error(&err) && attempt < backoff.max_retries => {
                let delay = backoff.delay(attempt);
                debug!(
                    op = op_name,
                    ?delay,
                    attempt = attempt + 1,
                    max = backoff.max_retries,
                    "SQLite busy, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
