//! Best-effort HTTP delivery of callback events.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::domain::CallbackEvent;
use crate::Result;

/// Retry budget for one notification.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            retry_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Budget spent without a 2xx response; the event is dropped.
    Exhausted { attempts: u32 },
    /// Shutdown interrupted the retry wait.
    Cancelled { attempts: u32 },
}

/// Posts [`CallbackEvent`]s as JSON, retrying on transport errors and non-2xx
/// responses.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    policy: DeliveryPolicy,
    cancel: CancellationToken,
    span: Span,
}

impl Notifier {
    pub fn new(policy: DeliveryPolicy, cancel: CancellationToken, span: Span) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(concat!("clusterd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            policy,
            cancel,
            span,
        })
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Deliver in a detached task; never blocks the caller.
    pub fn dispatch(&self, url: String, event: CallbackEvent) -> JoinHandle<DeliveryOutcome> {
        let notifier = self.clone();
        let span = info_span!(
            parent: &self.span,
            "notify",
            job_id = event.job_id,
            event = %event.event_type
        );
        tokio::spawn(async move { notifier.deliver(&url, &event).await }.instrument(span))
    }

    pub async fn deliver(&self, url: &str, event: &CallbackEvent) -> DeliveryOutcome {
        let body = match serde_json::to_vec(event) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(error = %e, "failed to serialize callback event, dropping");
                return DeliveryOutcome::Exhausted { attempts: 0 };
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let result = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url, attempt, "notification delivered");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Ok(resp) => {
                    warn!(url, attempt, status = %resp.status(), "notification rejected");
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "notification failed");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!(url, attempt, "notification retry interrupted by shutdown");
                        return DeliveryOutcome::Cancelled { attempts: attempt };
                    }
                    _ = tokio::time::sleep(self.policy.retry_delay) => {}
                }
            }
        }

        warn!(
            url,
            attempts = max_attempts,
            payload = %String::from_utf8_lossy(&body),
            "giving up on notification"
        );
        DeliveryOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}
