//! Execution types for the patchflow runner
//!
//! These types only exist at runtime while a run is being processed. They
//! are never persisted directly; the recorder turns them into a [`RunUpdate`].

use chrono::{DateTime, Utc};
use patchflow_core::domain::payload::Payload;
use patchflow_core::dto::run::RunUpdate;

/// Exit code reported for an execution killed by the configured timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the process was terminated by a signal
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Exit code reported when the process could not be waited on
pub const WAIT_ERROR_EXIT_CODE: i32 = -2;

/// Result of executing one run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The executable exited 0
    Success { outputs: Payload },
    /// The executable ran and exited non-zero (or timed out)
    Failure { exit_code: i32, output: String },
    /// The executable could not be started
    LaunchError {
        executable: String,
        diagnostic: String,
    },
}

impl ExecutionOutcome {
    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Failure { .. } => "failure",
            ExecutionOutcome::LaunchError { .. } => "launch_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Convert the outcome into the terminal status write for its run
    ///
    /// # Arguments
    /// * `now` - Timestamp written to `updated_at`
    /// * `excerpt_chars` - Bound on the captured output kept in the error
    pub fn into_update(self, now: DateTime<Utc>, excerpt_chars: usize) -> RunUpdate {
        match self {
            ExecutionOutcome::Success { outputs } => RunUpdate::completed(outputs, now),
            ExecutionOutcome::Failure { exit_code, output } => {
                let tail = excerpt(&output, excerpt_chars);
                let reason = describe_exit(exit_code);
                let error = if tail.is_empty() {
                    reason
                } else {
                    format!("{}: {}", reason, tail)
                };
                RunUpdate::failed(error, now)
            }
            ExecutionOutcome::LaunchError {
                executable,
                diagnostic,
            } => RunUpdate::failed(
                format!("failed to launch {}: {}", executable, diagnostic),
                now,
            ),
        }
    }
}

/// Describes how a failed process ended
fn describe_exit(exit_code: i32) -> String {
    match exit_code {
        SIGNAL_EXIT_CODE => "terminated by signal".to_string(),
        WAIT_ERROR_EXIT_CODE => "exit status unknown".to_string(),
        code => format!("exited with code {}", code),
    }
}

/// Returns the last `max_chars` characters of `text`, trimmed
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }

    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text[start..].trim_start()
}
