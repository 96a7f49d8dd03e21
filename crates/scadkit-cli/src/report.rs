//! Human-readable and JSON batch summaries.

use scadkit_core::{BatchResult, BatchStatus, InvocationStatus, OperationKind};
use std::fmt::Write;
use std::time::Duration;

/// Output format for `--report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Render `result` in `format`.
pub fn render(result: &BatchResult, format: ReportFormat, timeout: Duration) -> anyhow::Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(result, timeout)),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

/// Per-view breakdown followed by a one-line verdict.
pub fn render_text(result: &BatchResult, timeout: Duration) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} {} ({} view(s), batch {})",
        result.operation,
        result.input.display(),
        result.requested,
        result.batch_id
    );

    for entry in &result.entries {
        let r = &entry.result;
        let mark = if r.passed() { "✓" } else { "✗" };
        let _ = write!(out, "  {mark} {:<12} {:<14}", entry.label, r.status.name());

        match r.status {
            InvocationStatus::Ok => {
                if result.operation != OperationKind::Validate || entry.output.exists() {
                    let _ = write!(out, " {}", entry.output.display());
                }
            }
            InvocationStatus::SyntaxError => {
                if let Some(location) = r.syntax {
                    let _ = write!(out, " at {location}");
                }
            }
            InvocationStatus::Timeout => {
                let _ = write!(out, " after {}s", timeout.as_secs_f64());
            }
            InvocationStatus::ProcessError => match r.exit_code {
                Some(code) => {
                    let _ = write!(out, " exit code {code}");
                }
                None => {
                    let _ = write!(out, " no exit code");
                }
            },
        }
        let _ = writeln!(out, " ({}ms)", r.duration_ms);

        if !r.passed() && r.status != InvocationStatus::Timeout {
            let diagnostics = r.diagnostics();
            for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
                let _ = writeln!(out, "      {line}");
            }
        }
    }

    if result.status == BatchStatus::Cancelled {
        let _ = writeln!(
            out,
            "  cancelled: {} of {} view(s) did not complete",
            result.requested - result.entries.len(),
            result.requested
        );
    }

    let verdict = if result.is_ok() { "✓" } else { "✗" };
    let _ = write!(
        out,
        "{verdict} {}: {}/{} passed in {}ms",
        result.status,
        result.passed_count(),
        result.requested,
        result.duration_ms
    );
    if let Some((entry, location)) = result.first_syntax_error() {
        let _ = write!(out, "; first syntax error in '{}' at {location}", entry.label);
    }
    out.push('\n');
    out
}
