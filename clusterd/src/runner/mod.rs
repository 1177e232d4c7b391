//! Runner side: lease jobs from the coordinator and execute captures.

pub mod artifact;
pub mod client;
pub mod command;
pub mod engine;
pub mod log_server;
pub mod report_queue;
pub mod supervisor;

pub use artifact::{Artifact, ArtifactCutter};
pub use client::{CoordinatorClient, HttpCoordinatorClient};
pub use engine::ExecutionEngine;
pub use log_server::{LogServer, LogServerConfig, LogState, RunningJob};
pub use report_queue::{ReportPolicy, ReportQueue};
pub use supervisor::{CancelReason, CaptureProcess, RunOutcome};
