//! Database models.
//!
//! These map directly to the schema; timestamps are epoch milliseconds.

pub mod callback;
pub mod job;
pub mod task;

pub use callback::*;
pub use job::*;
pub use task::*;
