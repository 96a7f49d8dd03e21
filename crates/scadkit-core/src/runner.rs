//! Compiler process execution and result classification.

use crate::error::{Result, ScadError};
use crate::invocation::Invocation;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Default syntax-error marker: `Parse error in line 12`,
/// `Parser error in file "x.scad", line 3`, `... line 5, column 7`.
pub const DEFAULT_ERROR_PATTERN: &str = r"(?i)(?:parse|parser|syntax) error[^\n]*?\bline\s+(?P<line>\d+)(?:[^\n]*?\bcol(?:umn)?\s*(?P<col>\d+))?";

/// Diagnostics longer than this are truncated when displayed.
pub const MAX_DIAGNOSTIC_BYTES: usize = 4096;

/// Outcome class of one invocation, ordered by severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Ok,
    SyntaxError,
    Timeout,
    ProcessError,
}

impl InvocationStatus {
    pub fn name(&self) -> &'static str {
        match self {
            InvocationStatus::Ok => "ok",
            InvocationStatus::SyntaxError => "syntax_error",
            InvocationStatus::Timeout => "timeout",
            InvocationStatus::ProcessError => "process_error",
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the compiler reported a parse error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyntaxLocation {
    pub line: u32,
    pub column: Option<u32>,
}

impl fmt::Display for SyntaxLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(col) => write!(f, "line {}, column {}", self.line, col),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Result of one compiler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Exit code; `None` if the process was killed or never started.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall time in milliseconds.
    pub duration_ms: u64,

    /// Derived status.
    pub status: InvocationStatus,

    /// Parse error location, for `syntax_error`.
    pub syntax: Option<SyntaxLocation>,

    /// Runner-side explanation (timeout limit, spawn failure).
    pub detail: Option<String>,
}

impl InvocationResult {
    /// Whether the invocation succeeded.
    pub fn passed(&self) -> bool {
        self.status == InvocationStatus::Ok
    }

    /// Stderr for display, truncated beyond [`MAX_DIAGNOSTIC_BYTES`].
    pub fn diagnostics(&self) -> String {
        truncate_diagnostic(self.stderr.trim_end(), MAX_DIAGNOSTIC_BYTES)
    }
}

/// Truncate `text` to at most `max` bytes on a char boundary.
pub fn truncate_diagnostic(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... [{} more bytes truncated]",
        &text[..end],
        text.len() - end
    )
}

/// Recognises compiler parse errors in stderr.
///
/// The pattern must contain a named group `line`; an optional group `col`
/// supplies the column.
#[derive(Debug, Clone)]
pub struct ErrorMarker {
    pattern: Regex,
}

impl Default for ErrorMarker {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_ERROR_PATTERN).expect("default error pattern is valid"),
        }
    }
}

impl ErrorMarker {
    /// Compile a custom marker pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex =
            Regex::new(pattern).map_err(|e| ScadError::InvalidErrorPattern(e.to_string()))?;
        if !regex.capture_names().any(|n| n == Some("line")) {
            return Err(ScadError::InvalidErrorPattern(
                "pattern needs a named group `line`".to_string(),
            ));
        }
        Ok(Self { pattern: regex })
    }

    /// Marker from an optional override, falling back to the default.
    pub fn from_override(pattern: Option<&str>) -> Result<Self> {
        match pattern {
            Some(p) => Self::new(p),
            None => Ok(Self::default()),
        }
    }

    /// First parse-error location in `text`.
    pub fn find(&self, text: &str) -> Option<SyntaxLocation> {
        let caps = self.pattern.captures(text)?;
        let line = caps.name("line")?.as_str().parse().ok()?;
        let column = caps.name("col").and_then(|c| c.as_str().parse().ok());
        Some(SyntaxLocation { line, column })
    }
}

/// Classify a finished process.
pub fn classify(
    exit_code: Option<i32>,
    stderr: &str,
    marker: &ErrorMarker,
) -> (InvocationStatus, Option<SyntaxLocation>) {
    if let Some(location) = marker.find(stderr) {
        return (InvocationStatus::SyntaxError, Some(location));
    }
    match exit_code {
        Some(0) => (InvocationStatus::Ok, None),
        _ => (InvocationStatus::ProcessError, None),
    }
}

/// Sender side of batch cancellation.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiver side of batch cancellation, cloned into every task.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Cancel every token derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// What happened to one invocation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The process ran to completion, failed, or timed out.
    Finished(InvocationResult),

    /// The batch was cancelled before the process finished.
    Cancelled,
}

/// Executes one invocation. The seam the orchestrator is generic over.
#[async_trait]
pub trait InvocationExecutor: Send + Sync {
    async fn execute(&self, invocation: &Invocation, cancel: &CancelToken) -> RunOutcome;

    /// The per-invocation time limit, for reporting.
    fn timeout(&self) -> Duration;
}

/// Runs the compiler as a subprocess with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    marker: ErrorMarker,
}

impl ProcessRunner {
    pub fn new(timeout: Duration, marker: ErrorMarker) -> Self {
        Self { timeout, marker }
    }
}

#[async_trait]
impl InvocationExecutor for ProcessRunner {
    async fn execute(&self, invocation: &Invocation, cancel: &CancelToken) -> RunOutcome {
        let start = Instant::now();

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(label = %invocation.label, error = %e, "failed to start compiler");
                let message = format!("failed to start {}: {e}", invocation.program.display());
                return RunOutcome::Finished(InvocationResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: message.clone(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: InvocationStatus::ProcessError,
                    syntax: None,
                    detail: Some(message),
                });
            }
        };

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            _ = tokio::time::sleep(self.timeout) => {
                warn!(label = %invocation.label, timeout_secs = self.timeout.as_secs(), "compiler timed out");
                return RunOutcome::Finished(InvocationResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: InvocationStatus::Timeout,
                    syntax: None,
                    detail: Some(format!("timed out after {}s", self.timeout.as_secs_f64())),
                });
            }
            _ = cancel.cancelled() => {
                debug!(label = %invocation.label, "invocation cancelled");
                return RunOutcome::Cancelled;
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return RunOutcome::Finished(InvocationResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms,
                    status: InvocationStatus::ProcessError,
                    syntax: None,
                    detail: Some(format!("failed waiting for compiler: {e}")),
                })
            }
        };

        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let (status, syntax) = classify(exit_code, &stderr, &self.marker);

        RunOutcome::Finished(InvocationResult {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            status,
            syntax,
            detail: syntax.map(|s| s.to_string()),
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
