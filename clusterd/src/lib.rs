//! clusterd: a capture-job coordinator and the runners that execute its jobs.
//!
//! The manager role serves the HTTP API over a SQLite job store; the runner
//! role leases capture jobs, records them with ffmpeg into fMP4 HLS and
//! reports back.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod media;
pub mod notification;
pub mod runner;

pub use error::{Error, Result};
