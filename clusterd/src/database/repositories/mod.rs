//! Repository layer for database access.

pub mod callback;
pub mod job;
pub mod job_tx;
pub mod task;

pub use callback::*;
pub use job::*;
pub use job_tx::*;
pub use task::*;
