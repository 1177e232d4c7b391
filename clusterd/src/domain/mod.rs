//! Domain types shared by the coordinator and the runner.

pub mod capture;
pub mod event;
pub mod job;
pub mod report;

pub use capture::{CaptureInput, CaptureParams, CaptureSource};
pub use event::{CallbackEvent, EventKind};
pub use job::{Job, JobCategory, JobSpec};
pub use report::{ReportKind, StatusReport};
