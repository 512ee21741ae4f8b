//! Execution service
//!
//! Handles running one patchflow run through the external executable:
//! - Building the command line from the run's patchflow and inputs
//! - Launching the process in the output directory and waiting for it
//! - Capturing and normalizing its output
//! - Classifying the exit into an [`ExecutionOutcome`]
//!
//! The executable is treated as opaque. It receives the patchflow name, a
//! fixed set of flags, the output file path and one `key=value` argument per
//! input, and reports its result through its exit code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchflow_core::ansi;
use patchflow_core::domain::payload::Payload;
use patchflow_core::domain::run::Run;
use serde_json::Value as JsonValue;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::execution::{
    ExecutionOutcome, SIGNAL_EXIT_CODE, TIMEOUT_EXIT_CODE, WAIT_ERROR_EXIT_CODE,
};

/// Key under which the captured output is stored in a run's outputs
pub const LOG_OUTPUT_KEY: &str = "log";

/// Key under which a non-object output file value is stored
pub const RESULT_OUTPUT_KEY: &str = "result";

/// How long to keep reading a killed child's pipes
const PIPE_GRACE: Duration = Duration::from_millis(250);

/// Service trait for executing runs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a run and classifies the result
    ///
    /// Never fails: launch problems are reported as
    /// [`ExecutionOutcome::LaunchError`].
    async fn execute(&self, run: &Run) -> ExecutionOutcome;
}

/// Runs the configured executable as a child process
pub struct ProcessExecutionService {
    executable: PathBuf,
    output_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessExecutionService {
    /// Creates a new process execution service without a timeout
    pub fn new(executable: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            output_dir: output_dir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.patchwork_exec, &config.output_dir).with_timeout(config.exec_timeout)
    }

    /// Path of the file the executable writes its result to
    fn output_path(&self, run_id: i64, now: DateTime<Utc>) -> PathBuf {
        self.output_dir.join(format!(
            "{}_run_{}.json",
            now.format("%Y-%m-%dT%H-%M-%S"),
            run_id
        ))
    }

    fn launch_error(&self, diagnostic: impl Into<String>) -> ExecutionOutcome {
        ExecutionOutcome::LaunchError {
            executable: self.executable.display().to_string(),
            diagnostic: diagnostic.into(),
        }
    }
}

#[async_trait]
impl ExecutionService for ProcessExecutionService {
    async fn execute(&self, run: &Run) -> ExecutionOutcome {
        let Some(patchflow) = run.patchflow_name() else {
            warn!(run_id = run.id, "Run has no patchflow name");
            return self.launch_error(format!("run {} has no patchflow name", run.id));
        };

        let output_path = self.output_path(run.id, Utc::now());
        let args = build_args(patchflow, &output_path, &run.inputs);

        info!(
            run_id = run.id,
            "Running command: {} {}",
            self.executable.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let child = Command::new(&self.executable)
            .args(&args)
            .current_dir(&self.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(run_id = run.id, "Failed to launch patchflow: {}", e);
                return self.launch_error(e.to_string());
            }
        };

        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(run_id = run.id, "Patchflow timed out after {:?}", limit);
                    if let Err(e) = child.kill().await {
                        warn!(run_id = run.id, "Failed to kill patchflow: {}", e);
                    }
                    let output = collect(run.id, stdout, stderr, Some(PIPE_GRACE)).await;
                    return ExecutionOutcome::Failure {
                        exit_code: TIMEOUT_EXIT_CODE,
                        output: combine(
                            output,
                            &format!("timed out after {}s", limit.as_secs_f64()),
                        ),
                    };
                }
            },
            None => child.wait().await,
        };

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                warn!(run_id = run.id, "Failed to wait for patchflow: {}", e);
                let output = collect(run.id, stdout, stderr, Some(PIPE_GRACE)).await;
                return ExecutionOutcome::Failure {
                    exit_code: WAIT_ERROR_EXIT_CODE,
                    output: combine(output, &format!("failed to wait for process: {}", e)),
                };
            }
        };

        let combined = collect(run.id, stdout, stderr, None).await;
        let exit_code = status.code().unwrap_or(SIGNAL_EXIT_CODE);

        if status.success() {
            info!(run_id = run.id, "Patchflow finished successfully");
            let outputs = read_outputs(run.id, &output_path, combined).await;
            ExecutionOutcome::Success { outputs }
        } else {
            warn!(run_id = run.id, exit_code, "Patchflow failed");
            ExecutionOutcome::Failure {
                exit_code,
                output: combined,
            }
        }
    }
}

/// Drains one child pipe into a shared buffer
///
/// The buffer outlives the reader task, so whatever was read before a kill
/// is still available when the pipe never reaches EOF (a grandchild may hold
/// it open).
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut buffer) => buffer.extend_from_slice(&chunk[..n]),
                            Err(_) => break,
                        },
                    }
                }
            })
        });

        Self { buffer, reader }
    }

    /// Waits for the pipe to close (at most `grace` when set) and returns the
    /// normalized text read so far
    async fn finish(self, grace: Option<Duration>) -> String {
        if let Some(mut reader) = self.reader {
            match grace {
                Some(grace) => {
                    if tokio::time::timeout(grace, &mut reader).await.is_err() {
                        reader.abort();
                    }
                }
                None => {
                    let _ = reader.await;
                }
            }
        }

        let bytes = match self.buffer.lock() {
            Ok(buffer) => buffer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        ansi::strip(&String::from_utf8_lossy(&bytes))
    }
}

/// Collects both streams, logs them and joins them stdout first
async fn collect(
    run_id: i64,
    stdout: Capture,
    stderr: Capture,
    grace: Option<Duration>,
) -> String {
    let (stdout, stderr) = tokio::join!(stdout.finish(grace), stderr.finish(grace));

    if !stdout.trim().is_empty() {
        info!(run_id, stream = "stdout", "{}", stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        warn!(run_id, stream = "stderr", "{}", stderr.trim_end());
    }

    combine(stdout, &stderr)
}

/// Builds the executable's argument list
///
/// `<patchflow> --log debug --output <file> --disable_telemetry --plain <key=value>...`
pub fn build_args(patchflow: &str, output_path: &Path, inputs: &Payload) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        patchflow.into(),
        "--log".into(),
        "debug".into(),
        "--output".into(),
        output_path.into(),
        "--disable_telemetry".into(),
        "--plain".into(),
    ];

    args.extend(
        inputs
            .iter()
            .map(|(key, value)| OsString::from(render_input(key, value))),
    );
    args
}

/// Renders one input as a `key=value` argument
///
/// Strings are passed verbatim; every other value in compact JSON form.
pub fn render_input(key: &str, value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => format!("{}={}", key, s),
        other => format!("{}={}", key, other),
    }
}

/// Appends `tail` to `head`, starting it on a new line
fn combine(mut head: String, tail: &str) -> String {
    if !tail.is_empty() && !head.is_empty() && !head.ends_with('\n') {
        head.push('\n');
    }
    head.push_str(tail);
    head
}

/// Collects a successful run's outputs
///
/// Fields of the JSON object in the output file come first; a non-object
/// value is kept under `result`. The captured log is added under `log`
/// unless the file already defined it.
async fn read_outputs(run_id: i64, path: &Path, log: String) -> Payload {
    let mut outputs = match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<JsonValue>(&contents) {
            Ok(value @ JsonValue::Object(_)) => Payload::from_value(value).unwrap_or_default(),
            Ok(value) => {
                let mut payload = Payload::new();
                payload.insert(RESULT_OUTPUT_KEY, value);
                payload
            }
            Err(e) => {
                warn!(run_id, "Output file {} is not valid JSON: {}", path.display(), e);
                Payload::new()
            }
        },
        Err(e) => {
            info!(run_id, "No outputs found for run");
            debug!(run_id, "Could not read {}: {}", path.display(), e);
            Payload::new()
        }
    };

    if !outputs.contains_key(LOG_OUTPUT_KEY) {
        outputs.insert(LOG_OUTPUT_KEY, log);
    }
    outputs
}
