//! Runner-side capture log endpoint.
//!
//! `GET /api/jobs/{id}/log` streams the capture process's stderr log. While
//! the job is the one this runner is executing the response follows the file
//! as it grows and ends once the job finishes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::ApiPath;
use crate::media::{self, STDERR_LOG};
use crate::{Error, Result};

const READ_CHUNK: usize = 8 * 1024;

/// The job a runner is currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningJob {
    pub id: i64,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// How long to wait for new output before checking the file again.
    pub follow_interval: Duration,
}

impl Default for LogServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8089,
            follow_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct LogState {
    running: watch::Receiver<Option<RunningJob>>,
    work_dir: PathBuf,
    follow_interval: Duration,
}

impl LogState {
    pub fn new(
        running: watch::Receiver<Option<RunningJob>>,
        work_dir: impl Into<PathBuf>,
        follow_interval: Duration,
    ) -> Self {
        Self {
            running,
            work_dir: work_dir.into(),
            follow_interval,
        }
    }

    fn log_path(&self, job_id: i64) -> PathBuf {
        let dir = match &*self.running.borrow() {
            Some(job) if job.id == job_id => job.dir.clone(),
            _ => media::job_dir(&self.work_dir, job_id),
        };
        dir.join(STDERR_LOG)
    }
}

pub fn router(state: LogState) -> Router {
    Router::new()
        .route("/api/jobs/{id}/log", get(job_log))
        .with_state(state)
}

async fn job_log(State(state): State<LogState>, ApiPath(id): ApiPath<i64>) -> ApiResult<Response> {
    let path = state.log_path(id);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("no capture log for job {id}")));
        }
        Err(e) => return Err(Error::from(e).into()),
    };
    debug!(job_id = id, path = %path.display(), "streaming capture log");

    let stream = follow(file, id, state.running.clone(), state.follow_interval);
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        Body::from_stream(stream),
    )
        .into_response())
}

struct Follow {
    file: tokio::fs::File,
    job_id: i64,
    running: watch::Receiver<Option<RunningJob>>,
    interval: Duration,
}

impl Follow {
    fn is_running(&self) -> bool {
        self.running
            .borrow()
            .as_ref()
            .is_some_and(|job| job.id == self.job_id)
    }
}

/// Read `file` to the end, then keep reading while `job_id` is running.
fn follow(
    file: tokio::fs::File,
    job_id: i64,
    running: watch::Receiver<Option<RunningJob>>,
    interval: Duration,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let state = Follow {
        file,
        job_id,
        running,
        interval,
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            // Sampled before the read: once the job is seen as finished its
            // process has exited and the file is complete.
            let running = state.is_running();
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            match state.file.read_buf(&mut buf).await {
                Ok(0) if running => {
                    tokio::select! {
                        changed = state.running.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                        _ = tokio::time::sleep(state.interval) => {}
                    }
                }
                Ok(0) => return None,
                Ok(_) => return Some((Ok(buf.freeze()), Some(state))),
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

pub struct LogServer {
    config: LogServerConfig,
    state: LogState,
    cancel_token: CancellationToken,
}

impl LogServer {
    pub fn new(config: LogServerConfig, state: LogState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let app = router(self.state.clone()).layer(TraceLayer::new_for_http());
        let listener = TcpListener::bind(addr).await?;
        info!("runner log server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("runner log server shutting down...");
            })
            .await?;
        Ok(())
    }
}
