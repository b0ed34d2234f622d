//! Keep-alive scheduling
//!
//! Driven from the cooperative poll loop; there is no background task.

mod scheduler;

pub use scheduler::{KeepAliveReport, KeepAliveScheduler, SKIP_WARN_THRESHOLD};
