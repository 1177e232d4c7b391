//! REST API for runners and operators.
//!
//! Runners lease jobs and post status reports here; operators create and
//! stop record tasks, manage callback bindings and download recordings.

pub mod error;
pub mod extract;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
