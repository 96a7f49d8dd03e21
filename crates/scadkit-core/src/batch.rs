//! Batch orchestration: one compiler invocation per resolved view.

use crate::error::{Result, ScadError};
use crate::invocation::{Invocation, InvocationBuilder};
use crate::obs::{
    batch_span, emit_batch_finished, emit_batch_started, emit_cleanup_error,
    emit_invocation_finished, emit_invocation_started,
};
use crate::request::{OperationKind, OperationRequest, OutputTarget};
use crate::runner::{
    CancelToken, InvocationExecutor, InvocationResult, InvocationStatus, RunOutcome,
    SyntaxLocation,
};
use crate::view::{self, ViewSelector, ViewSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, Instrument};
use uuid::Uuid;

/// Overall status of a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Ok,
    SyntaxError,
    Timeout,
    ProcessError,
    Cancelled,
}

impl BatchStatus {
    pub fn name(&self) -> &'static str {
        match self {
            BatchStatus::Ok => "ok",
            BatchStatus::SyntaxError => "syntax_error",
            BatchStatus::Timeout => "timeout",
            BatchStatus::ProcessError => "process_error",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

impl From<InvocationStatus> for BatchStatus {
    fn from(status: InvocationStatus) -> Self {
        match status {
            InvocationStatus::Ok => BatchStatus::Ok,
            InvocationStatus::SyntaxError => BatchStatus::SyntaxError,
            InvocationStatus::Timeout => BatchStatus::Timeout,
            InvocationStatus::ProcessError => BatchStatus::ProcessError,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One finished unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// View label (or operation name).
    pub label: String,

    /// File the invocation wrote (or was meant to write).
    pub output: PathBuf,

    pub result: InvocationResult,
}

/// Result of running one request across all of its views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: Uuid,

    pub operation: OperationKind,

    pub input: PathBuf,

    pub started_at: DateTime<Utc>,

    /// Total wall time in milliseconds.
    pub duration_ms: u64,

    /// Worst entry status, or `cancelled`.
    pub status: BatchStatus,

    /// Number of units the request asked for.
    pub requested: usize,

    /// Completed units, in view resolution order.
    pub entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.status == BatchStatus::Ok
    }

    /// Number of entries that succeeded.
    pub fn passed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.result.passed()).count()
    }

    /// Number of entries that failed.
    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.result.passed()).count()
    }

    /// First entry that hit a parse error, with its location.
    pub fn first_syntax_error(&self) -> Option<(&BatchEntry, SyntaxLocation)> {
        self.entries
            .iter()
            .find_map(|e| e.result.syntax.map(|loc| (e, loc)))
    }
}

/// Worst status across entries; `ok` when empty.
pub fn aggregate_status<'a>(statuses: impl IntoIterator<Item = &'a InvocationStatus>) -> BatchStatus {
    statuses
        .into_iter()
        .max()
        .copied()
        .map(BatchStatus::from)
        .unwrap_or(BatchStatus::Ok)
}

/// Runs requests through a bounded pool of executor calls.
pub struct BatchOrchestrator<E> {
    executor: Arc<E>,
    builder: InvocationBuilder,
    max_concurrent: usize,
}

impl<E: InvocationExecutor + 'static> BatchOrchestrator<E> {
    pub fn new(executor: E, builder: InvocationBuilder, max_concurrent: usize) -> Self {
        Self {
            executor: Arc::new(executor),
            builder,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Build every invocation for `request` without running anything.
    ///
    /// Any request-level failure (missing input, bad output path) surfaces
    /// here, before a single compiler process starts.
    pub fn plan(&self, request: &OperationRequest) -> Result<Vec<Invocation>> {
        if !request.input.is_file() {
            return Err(ScadError::InputNotFound(request.input.clone()));
        }

        match request.kind {
            OperationKind::Validate | OperationKind::Export => {
                let output = self.output_path(request, None, 1);
                Ok(vec![self.builder.build(request, None, output)?])
            }
            OperationKind::Screenshot => {
                let views = if request.views.is_empty() {
                    view::resolve(&ViewSelector::default())?
                } else {
                    request.views.clone()
                };
                views
                    .iter()
                    .map(|v| {
                        let output = self.output_path(request, Some(v), views.len());
                        self.builder.build(request, Some(v), output)
                    })
                    .collect()
            }
        }
    }

    /// Where one unit of `request` writes.
    ///
    /// - validate: a unique scratch STL under `<scad_home>/tmp`
    /// - export: the explicit file, `<dir>/<stem>.stl`, or
    ///   `<scad_home>/outputs/<stem>.stl`
    /// - screenshot: `<dir>/<stem>_<label>.png`, or `<dir>/<stem>.png` for a
    ///   lone non-turntable view; `<dir>` defaults to
    ///   `<scad_home>/renders/<stem>`
    pub fn output_path(&self, request: &OperationRequest, view: Option<&ViewSpec>, count: usize) -> PathBuf {
        let home = self.builder.scad_home();
        let stem = request.stem();
        let ext = request.kind.extension();

        match request.kind {
            OperationKind::Validate => home
                .join("tmp")
                .join(format!("{stem}_validate_{}.{ext}", Uuid::new_v4().simple())),
            OperationKind::Export => match &request.output {
                OutputTarget::File(file) => file.clone(),
                OutputTarget::Directory(dir) => dir.join(format!("{stem}.{ext}")),
                OutputTarget::Default => home.join("outputs").join(format!("{stem}.{ext}")),
            },
            OperationKind::Screenshot => {
                let single = count == 1 && !request.turntable;
                let dir = match &request.output {
                    OutputTarget::File(file) if single => return file.clone(),
                    OutputTarget::File(file) => file
                        .parent()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_else(|| PathBuf::from(".")),
                    OutputTarget::Directory(dir) => dir.clone(),
                    OutputTarget::Default => home.join("renders").join(&stem),
                };
                match view {
                    Some(v) if !single => dir.join(format!("{stem}_{}.{ext}", v.label)),
                    _ => dir.join(format!("{stem}.{ext}")),
                }
            }
        }
    }

    /// Run `request` to completion (or cancellation).
    ///
    /// Every unit is attempted regardless of sibling failures. Results keep
    /// view order whatever order the processes finish in.
    pub async fn run(&self, request: &OperationRequest, cancel: &CancelToken) -> Result<BatchResult> {
        let invocations = self.plan(request)?;
        let scratch: Vec<PathBuf> = if request.kind == OperationKind::Validate && !request.keep_scratch {
            invocations.iter().map(|i| i.output.clone()).collect()
        } else {
            Vec::new()
        };

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let requested = invocations.len();
        let batch_id_str = batch_id.to_string();
        let span = batch_span(&batch_id_str, request.kind.name());

        emit_batch_started(
            &batch_id_str,
            request.kind.name(),
            &request.input.display().to_string(),
            requested,
        );

        let (entries, cancelled) = self
            .execute_all(invocations, cancel)
            .instrument(span)
            .await;

        // Includes units that were cancelled mid-write.
        for path in &scratch {
            remove_scratch(path);
        }

        let status = if cancelled {
            BatchStatus::Cancelled
        } else if entries.len() < requested {
            BatchStatus::ProcessError
        } else {
            aggregate_status(entries.iter().map(|e| &e.result.status))
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        emit_batch_finished(&batch_id_str, status.name(), entries.len(), requested, duration_ms);

        Ok(BatchResult {
            batch_id,
            operation: request.kind,
            input: request.input.clone(),
            started_at,
            duration_ms,
            status,
            requested,
            entries,
        })
    }

    /// Dispatch every invocation through the semaphore and collect finished
    /// entries in submission order. The flag reports whether any unit was
    /// cancelled or skipped.
    async fn execute_all(
        &self,
        invocations: Vec<Invocation>,
        cancel: &CancelToken,
    ) -> (Vec<BatchEntry>, bool) {
        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::with_capacity(invocations.len());

        for invocation in invocations {
            let executor = Arc::clone(&self.executor);
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();

            let task = tokio::spawn(
                async move {
                    let permit = tokio::select! {
                        permit = sem.acquire_owned() => permit.ok(),
                        _ = cancel.cancelled() => None,
                    };
                    if permit.is_none() || cancel.is_cancelled() {
                        return (invocation, RunOutcome::Cancelled);
                    }

                    emit_invocation_started(
                        &invocation.label,
                        &invocation.output.display().to_string(),
                    );
                    let outcome = executor.execute(&invocation, &cancel).await;
                    drop(permit);
                    (invocation, outcome)
                }
                .in_current_span(),
            );
            tasks.push(task);
        }

        let mut entries = Vec::with_capacity(tasks.len());
        let mut cancelled = false;

        for task in tasks {
            let (invocation, outcome) = match task.await {
                Ok(done) => done,
                Err(e) => {
                    // Only reachable if the executor panics.
                    tracing::error!(error = %e, "invocation task failed");
                    cancelled |= e.is_cancelled();
                    continue;
                }
            };
            match outcome {
                RunOutcome::Finished(result) => {
                    emit_invocation_finished(&invocation.label, result.status, result.duration_ms);
                    entries.push(BatchEntry {
                        label: invocation.label,
                        output: invocation.output,
                        result,
                    });
                }
                RunOutcome::Cancelled => {
                    debug!(label = %invocation.label, "skipped after cancellation");
                    cancelled = true;
                }
            }
        }

        (entries, cancelled)
    }
}

fn remove_scratch(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed scratch output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => emit_cleanup_error(&path.display().to_string(), &e),
    }
}
