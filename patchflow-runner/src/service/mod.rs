//! Service layer
//!
//! Services contain the per-run business logic of the runner: executing a
//! run's patchflow and recording the resulting status transitions.
//!
//! Execution is trait-based so the batch driver can be tested without
//! spawning processes.

mod execution;
mod recorder;

// Re-export traits
pub use execution::ExecutionService;

// Re-export implementations
pub use execution::ProcessExecutionService;
pub use recorder::ResultRecorder;
