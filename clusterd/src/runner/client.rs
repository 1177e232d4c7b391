//! HTTP client for the coordinator's runner-facing API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::domain::{Job, StatusReport};
use crate::{Error, Result};

/// The coordinator as seen by a runner.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Lease the next eligible job, if any.
    async fn acquire_job(&self, runner: &str) -> Result<Option<Job>>;

    /// Fetch a job, active or archived. `None` when the coordinator has no
    /// record of it.
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>>;

    async fn report(&self, report: &StatusReport) -> Result<()>;
}

pub struct HttpCoordinatorClient {
    client: Client,
    base_url: Url,
}

impl HttpCoordinatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("clusterd-runner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .map_err(|e| Error::config(format!("invalid coordinator URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!("coordinator URL '{base_url}' cannot be a base")));
        }
        Ok(Self { client, base_url })
    }

    /// `<base>/api/<segments...>`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn acquire_job(&self, runner: &str) -> Result<Option<Job>> {
        let resp = self
            .client
            .post(self.url(&["runners", runner, "lease"]))
            .send()
            .await?;

        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let job = resp.error_for_status()?.json::<Job>().await?;
        debug!(job_id = job.id, "leased job");
        Ok(Some(job))
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let resp = self
            .client
            .get(self.url(&["jobs", &job_id.to_string()]))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json::<Job>().await?))
    }

    async fn report(&self, report: &StatusReport) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&["jobs", &report.job_id.to_string(), "report"]))
            .json(report)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        // The job is gone or already finished; retrying cannot help.
        if status == StatusCode::CONFLICT || status == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::conflict(format!(
                "report for job {} rejected ({status}): {body}",
                report.job_id
            )));
        }
        resp.error_for_status()?;
        Ok(())
    }
}
