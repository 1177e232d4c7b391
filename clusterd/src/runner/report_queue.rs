//! Ordered delivery of status reports.
//!
//! All reports of a runner go through one drain task, so the coordinator sees
//! them in the order they were produced. Delivery failures are retried a few
//! times and then dropped; they never stop the capture.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info_span, warn};

use super::client::CoordinatorClient;
use crate::domain::StatusReport;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ReportPolicy {
    /// Total attempts per report, the first one included.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

struct QueuedReport {
    report: StatusReport,
    ack: Option<oneshot::Sender<bool>>,
}

/// Handle to the drain task. Cheap to clone.
#[derive(Clone)]
pub struct ReportQueue {
    tx: mpsc::UnboundedSender<QueuedReport>,
}

impl ReportQueue {
    /// Start the drain task. It exits once every queue handle is dropped or
    /// `cancel` fires.
    pub fn spawn(
        client: Arc<dyn CoordinatorClient>,
        policy: ReportPolicy,
        cancel: CancellationToken,
        span: Span,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = info_span!(parent: &span, "reports");
        let handle = tokio::spawn(drain(rx, client, policy, cancel).instrument(span));
        (Self { tx }, handle)
    }

    /// Queue a report without waiting for it.
    pub fn enqueue(&self, report: StatusReport) {
        if self.tx.send(QueuedReport { report, ack: None }).is_err() {
            warn!("report queue closed, dropping report");
        }
    }

    /// Queue a report and wait until it was delivered or given up on.
    ///
    /// Everything queued before it is delivered first.
    pub async fn deliver(&self, report: StatusReport) -> Result<()> {
        let job_id = report.job_id;
        let kind = report.kind;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(QueuedReport {
                report,
                ack: Some(ack_tx),
            })
            .map_err(|_| Error::Other("report queue closed".to_string()))?;

        match ack_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Other(format!("{kind} report for job {job_id} was not delivered"))),
            Err(_) => Err(Error::Other("report queue stopped before delivery".to_string())),
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<QueuedReport>,
    client: Arc<dyn CoordinatorClient>,
    policy: ReportPolicy,
    cancel: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            _ = cancel.cancelled() => break,
            queued = rx.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        let delivered = send_with_retry(client.as_ref(), &queued.report, &policy, &cancel).await;
        if let Some(ack) = queued.ack {
            let _ = ack.send(delivered);
        }
    }
    debug!("report queue drained");
}

async fn send_with_retry(
    client: &dyn CoordinatorClient,
    report: &StatusReport,
    policy: &ReportPolicy,
    cancel: &CancellationToken,
) -> bool {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match client.report(report).await {
            Ok(()) => {
                debug!(job_id = report.job_id, kind = %report.kind, attempt, "report delivered");
                return true;
            }
            Err(e @ Error::Conflict(_)) => {
                warn!(job_id = report.job_id, kind = %report.kind, error = %e, "report rejected");
                return false;
            }
            Err(e) => {
                warn!(job_id = report.job_id, kind = %report.kind, attempt, error = %e, "report failed");
            }
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(policy.retry_delay) => {}
            }
        }
    }

    warn!(
        job_id = report.job_id,
        kind = %report.kind,
        attempts = max_attempts,
        "giving up on report"
    );
    false
}
