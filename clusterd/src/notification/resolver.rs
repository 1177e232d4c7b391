//! Choosing where a job's notifications go.

use std::sync::Arc;

use tracing::warn;

use crate::database::repositories::CallbackRepository;
use crate::domain::CaptureParams;

/// Resolves the notification target of a capture.
///
/// Order: per-job override, then the callback rule for the stream's
/// domain/app, then the configured default.
pub struct NotifyTargetResolver {
    callbacks: Arc<dyn CallbackRepository>,
    default_url: Option<String>,
}

impl NotifyTargetResolver {
    pub fn new(callbacks: Arc<dyn CallbackRepository>, default_url: Option<String>) -> Self {
        Self {
            callbacks,
            default_url: default_url.filter(|u| !u.trim().is_empty()),
        }
    }

    pub async fn resolve(&self, params: &CaptureParams) -> Option<String> {
        if let Some(url) = params.notify_url.as_ref().filter(|u| !u.trim().is_empty()) {
            return Some(url.clone());
        }

        if !params.domain_name.is_empty() {
            match self
                .callbacks
                .find_record_notify_url(&params.domain_name, &params.app_name)
                .await
            {
                Ok(Some(url)) => return Some(url),
                Ok(None) => {}
                Err(e) => warn!(
                    domain = %params.domain_name,
                    app = %params.app_name,
                    error = %e,
                    "callback rule lookup failed, using default target"
                ),
            }
        }

        self.default_url.clone()
    }
}
