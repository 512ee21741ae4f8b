//! Scheduler layer for the runner
//!
//! This layer decides which runs an invocation processes and drives each of
//! them from claim to recorded result.

pub mod batch;
pub mod selector;

pub use batch::{BatchDriver, BatchSummary};
pub use selector::RunSelector;
