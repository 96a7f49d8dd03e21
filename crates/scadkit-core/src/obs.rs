//! Structured observability hooks for batch lifecycle events.
//!
//! This module provides:
//! - A batch-scoped tracing span via [`batch_span`]
//! - Emission functions for batch start, per-invocation start/finish and
//!   batch finish
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use crate::runner::InvocationStatus;
use tracing::info;

/// Span tagging everything inside a batch with its id and operation.
///
/// ```ignore
/// orchestrate().instrument(batch_span("5f0c...", "screenshot")).await;
/// ```
pub fn batch_span(batch_id: &str, operation: &str) -> tracing::Span {
    tracing::info_span!("scadkit.batch", batch_id = %batch_id, operation = %operation)
}

/// Emit event: batch started.
pub fn emit_batch_started(batch_id: &str, operation: &str, input: &str, units: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        operation = %operation,
        input = %input,
        units = units,
    );
}

/// Emit event: one invocation dispatched.
pub fn emit_invocation_started(label: &str, output: &str) {
    info!(event = "invocation.started", label = %label, output = %output);
}

/// Emit event: one invocation finished.
pub fn emit_invocation_finished(label: &str, status: InvocationStatus, duration_ms: u64) {
    if status == InvocationStatus::Ok {
        info!(event = "invocation.finished", label = %label, status = %status, duration_ms = duration_ms);
    } else {
        tracing::warn!(event = "invocation.finished", label = %label, status = %status, duration_ms = duration_ms);
    }
}

/// Emit event: batch finished with its overall status.
pub fn emit_batch_finished(batch_id: &str, status: &str, completed: usize, requested: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        status = %status,
        completed = completed,
        requested = requested,
        duration_ms = duration_ms,
    );
}

/// Emit event: scratch output could not be removed (warning level).
pub fn emit_cleanup_error(path: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "batch.cleanup_error", path = %path, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_span_create() {
        let span = batch_span("test-batch", "validate");
        let _entered = span.enter();
        emit_invocation_started("iso", "/tmp/a_iso.png");
    }
}
