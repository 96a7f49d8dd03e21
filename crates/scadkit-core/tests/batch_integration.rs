//! Integration tests for batch orchestration.
//!
//! Most tests drive the orchestrator through a scripted executor; the
//! `fake_compiler` tests run a real subprocess through `ProcessRunner`.

use async_trait::async_trait;
use scadkit_core::{
    BatchOrchestrator, BatchStatus, CancelHandle, CancelToken, Capabilities, ErrorMarker,
    Invocation, InvocationBuilder, InvocationExecutor, InvocationResult, InvocationStatus,
    OperationRequest, OutputTarget, ProcessRunner, RunOutcome, ScadError, ViewSelector, ViewSpec,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Executor that answers from a script keyed by view label.
#[derive(Default)]
struct ScriptedExecutor {
    statuses: HashMap<String, InvocationStatus>,
    delays: HashMap<String, Duration>,
    /// Labels that only finish when cancelled.
    hang: Vec<String>,
    /// Write each output file before doing anything else.
    touch: bool,
    seen: Mutex<Vec<Invocation>>,
}

impl ScriptedExecutor {
    fn status(mut self, label: &str, status: InvocationStatus) -> Self {
        self.statuses.insert(label.to_string(), status);
        self
    }

    fn delay(mut self, label: &str, delay: Duration) -> Self {
        self.delays.insert(label.to_string(), delay);
        self
    }

    fn hang(mut self, label: &str) -> Self {
        self.hang.push(label.to_string());
        self
    }

    fn touch_outputs(mut self) -> Self {
        self.touch = true;
        self
    }

    fn seen_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.label.clone())
            .collect();
        labels.sort();
        labels
    }
}

#[async_trait]
impl InvocationExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: &Invocation, cancel: &CancelToken) -> RunOutcome {
        self.seen.lock().unwrap().push(invocation.clone());
        if self.touch {
            std::fs::write(&invocation.output, b"partial").unwrap();
        }

        if self.hang.contains(&invocation.label) {
            cancel.cancelled().await;
            return RunOutcome::Cancelled;
        }
        if let Some(delay) = self.delays.get(&invocation.label) {
            tokio::time::sleep(*delay).await;
        }

        let status = self
            .statuses
            .get(&invocation.label)
            .copied()
            .unwrap_or(InvocationStatus::Ok);
        RunOutcome::Finished(InvocationResult {
            exit_code: Some(if status == InvocationStatus::Ok { 0 } else { 1 }),
            stdout: String::new(),
            stderr: if status == InvocationStatus::Ok {
                String::new()
            } else {
                format!("{} failed", invocation.label)
            },
            duration_ms: 1,
            status,
            syntax: None,
            detail: None,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

fn model(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "cube(10);\n").unwrap();
    path
}

fn orchestrator<E: InvocationExecutor + 'static>(
    executor: E,
    home: &Path,
    jobs: usize,
) -> BatchOrchestrator<E> {
    let builder = InvocationBuilder::new("openscad", Capabilities::all(), home);
    BatchOrchestrator::new(executor, builder, jobs)
}

fn views(labels: &[&str]) -> Vec<ViewSpec> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| ViewSpec::new(*l, i as f64 * 90.0, 30.0))
        .collect()
}

/// Test: one failing view does not stop its siblings
#[tokio::test]
async fn test_failure_in_one_view_keeps_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let executor = ScriptedExecutor::default().status("v2", InvocationStatus::ProcessError);
    let orch = orchestrator(executor, dir.path(), 4);

    let request = OperationRequest::screenshot_views(&input, views(&["v1", "v2", "v3"]));
    let result = orch.run(&request, &CancelToken::never()).await.unwrap();

    assert_eq!(result.status, BatchStatus::ProcessError);
    assert_eq!(result.requested, 3);
    assert_eq!(result.entries.len(), 3);
    let statuses: Vec<_> = result.entries.iter().map(|e| e.result.status).collect();
    assert_eq!(
        statuses,
        vec![
            InvocationStatus::Ok,
            InvocationStatus::ProcessError,
            InvocationStatus::Ok
        ]
    );
    assert_eq!(result.passed_count(), 2);
    assert_eq!(result.failed_count(), 1);
    assert!(result.entries[1].result.stderr.contains("v2 failed"));
}

/// Test: entries follow view order, not completion order
#[tokio::test]
async fn test_entries_keep_view_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let executor = ScriptedExecutor::default()
        .delay("a", Duration::from_millis(150))
        .delay("b", Duration::from_millis(75))
        .delay("c", Duration::from_millis(0));
    let orch = orchestrator(executor, dir.path(), 3);

    let request = OperationRequest::screenshot_views(&input, views(&["a", "b", "c"]));
    let result = orch.run(&request, &CancelToken::never()).await.unwrap();

    let labels: Vec<_> = result.entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["a", "b", "c"]);
    assert!(result.is_ok());
}

/// Test: a single worker still runs every unit
#[tokio::test]
async fn test_single_worker_runs_everything() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let orch = orchestrator(ScriptedExecutor::default(), dir.path(), 1);

    let request = OperationRequest::screenshot(&input, &ViewSelector::Preset("ortho".into())).unwrap();
    let result = orch.run(&request, &CancelToken::never()).await.unwrap();

    assert_eq!(result.entries.len(), 6);
    assert_eq!(orch.executor().seen_labels().len(), 6);
}

/// Test: cancellation reports the completed subset
#[tokio::test]
async fn test_cancel_keeps_completed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let executor = ScriptedExecutor::default().hang("slow");
    let orch = orchestrator(executor, dir.path(), 3);

    let request = OperationRequest::screenshot_views(&input, views(&["fast1", "slow", "fast2"]));
    let handle = CancelHandle::new();
    let token = handle.token();

    let (result, _) = tokio::join!(orch.run(&request, &token), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });
    let result = result.unwrap();

    assert_eq!(result.status, BatchStatus::Cancelled);
    let labels: Vec<_> = result.entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["fast1", "fast2"]);
    assert_eq!(result.requested, 3);
}

/// Test: units still queued when cancelled never reach the executor
#[tokio::test]
async fn test_cancel_skips_queued_units() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let executor = ScriptedExecutor::default().hang("first");
    let orch = orchestrator(executor, dir.path(), 1);

    let request = OperationRequest::screenshot_views(&input, views(&["first", "second", "third"]));
    let handle = CancelHandle::new();
    let token = handle.token();

    let (result, _) = tokio::join!(orch.run(&request, &token), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });
    let result = result.unwrap();

    assert_eq!(result.status, BatchStatus::Cancelled);
    assert!(result.entries.is_empty());
    assert_eq!(orch.executor().seen_labels(), vec!["first".to_string()]);
}

/// Test: a validate cancelled mid-write leaves no scratch file behind
#[tokio::test]
async fn test_cancelled_validate_removes_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let executor = ScriptedExecutor::default().hang("validate").touch_outputs();
    let orch = orchestrator(executor, dir.path(), 1);

    let request = OperationRequest::validate(&input);
    let handle = CancelHandle::new();
    let token = handle.token();

    let (result, _) = tokio::join!(orch.run(&request, &token), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });
    let result = result.unwrap();

    assert_eq!(result.status, BatchStatus::Cancelled);
    assert!(result.entries.is_empty());
    let scratch = orch.executor().seen.lock().unwrap()[0].output.clone();
    assert!(scratch.starts_with(dir.path().join("tmp")));
    assert!(!scratch.exists());
}

/// Test: missing input fails before anything runs
#[tokio::test]
async fn test_missing_input_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(ScriptedExecutor::default(), dir.path(), 2);

    let request = OperationRequest::validate(dir.path().join("absent.scad"));
    let err = orch.run(&request, &CancelToken::never()).await.unwrap_err();

    assert!(matches!(err, ScadError::InputNotFound(_)));
    assert!(orch.executor().seen_labels().is_empty());
}

/// Test: exporting onto a directory is rejected up front
#[tokio::test]
async fn test_export_onto_directory_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let target = dir.path().join("out");
    std::fs::create_dir_all(&target).unwrap();
    let orch = orchestrator(ScriptedExecutor::default(), dir.path(), 2);

    let request = OperationRequest::export(&input).with_output(OutputTarget::File(target));
    let err = orch.run(&request, &CancelToken::never()).await.unwrap_err();

    assert!(matches!(err, ScadError::OutputPath { .. }));
    assert!(orch.executor().seen_labels().is_empty());
}

/// Test: exporting into a missing nested directory creates it
#[tokio::test]
async fn test_export_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "part.scad");
    let target = dir.path().join("a").join("b").join("part.stl");
    let orch = orchestrator(ScriptedExecutor::default(), dir.path(), 2);

    let request = OperationRequest::export(&input)
        .with_defines(&["size=20"])
        .unwrap()
        .with_output(OutputTarget::File(target.clone()));
    let result = orch.run(&request, &CancelToken::never()).await.unwrap();

    assert!(result.is_ok());
    assert!(target.parent().unwrap().is_dir());
    assert_eq!(result.entries[0].output, target);

    let seen = orch.executor().seen.lock().unwrap();
    let args = &seen[0].args;
    let d = args.iter().position(|a| a == "-D").unwrap();
    assert_eq!(args[d + 1], "size=20");
}

/// Test: screenshot output names for one view, many views and turntables
#[test]
fn test_screenshot_file_naming() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "gear.scad");
    let out = dir.path().join("shots");
    let orch = orchestrator(ScriptedExecutor::default(), dir.path(), 2);

    let single = OperationRequest::screenshot(&input, &ViewSelector::Preset("single".into()))
        .unwrap()
        .with_output(OutputTarget::Directory(out.clone()));
    let plan = orch.plan(&single).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].output, out.join("gear.png"));

    let many = OperationRequest::screenshot(&input, &ViewSelector::views_from_list("front,top"))
        .unwrap()
        .with_output(OutputTarget::Directory(out.clone()));
    let outputs: Vec<_> = orch.plan(&many).unwrap().into_iter().map(|i| i.output).collect();
    assert_eq!(
        outputs,
        vec![out.join("gear_front.png"), out.join("gear_top.png")]
    );

    let spin = OperationRequest::screenshot(
        &input,
        &ViewSelector::Turntable {
            step: 90.0,
            elevation: 20.0,
            start_azimuth: 0.0,
        },
    )
    .unwrap()
    .with_output(OutputTarget::Directory(out.clone()));
    let outputs: Vec<_> = orch.plan(&spin).unwrap().into_iter().map(|i| i.output).collect();
    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs[0], out.join("gear_frame_000.png"));
    assert_eq!(outputs[3], out.join("gear_frame_003.png"));

    let one_frame = OperationRequest::screenshot(
        &input,
        &ViewSelector::Turntable {
            step: 360.0,
            elevation: 20.0,
            start_azimuth: 0.0,
        },
    )
    .unwrap()
    .with_output(OutputTarget::Directory(out.clone()));
    let outputs: Vec<_> = orch.plan(&one_frame).unwrap().into_iter().map(|i| i.output).collect();
    assert_eq!(outputs, vec![out.join("gear_frame_000.png")]);
}

/// Test: default screenshot directory lives under the tool home
#[test]
fn test_screenshot_default_directory() {
    let dir = tempfile::tempdir().unwrap();
    let input = model(dir.path(), "gear.scad");
    let home = dir.path().join("home");
    let orch = orchestrator(ScriptedExecutor::default(), &home, 2);

    let request = OperationRequest::screenshot(&input, &ViewSelector::Preset("iso".into())).unwrap();
    let plan = orch.plan(&request).unwrap();

    assert_eq!(plan.len(), 4);
    for inv in &plan {
        assert!(inv.output.starts_with(home.join("renders").join("gear")));
    }
    assert!(home.join("renders").join("gear").is_dir());
}

#[cfg(unix)]
mod fake_compiler {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::OnceLock;

    /// A stand-in compiler: reports a parse error when the source contains
    /// `SYNTAX`, otherwise writes something to the `-o` path.
    const SCRIPT: &str = r#"#!/bin/sh
out=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    *) input="$1" ;;
  esac
  shift
done
if grep -q SYNTAX "$input"; then
  echo "ERROR: Parser error in file \"$input\", line 12: syntax error" >&2
  exit 1
fi
echo "solid fake" > "$out"
"#;

    // Written once so no test execs a file another thread still holds open.
    fn compiler() -> &'static Path {
        static DIR: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
        let (_, path) = DIR.get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("fake-openscad");
            std::fs::write(&path, SCRIPT).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            (dir, path)
        });
        path
    }

    fn real_orchestrator(home: &Path) -> BatchOrchestrator<ProcessRunner> {
        let runner = ProcessRunner::new(Duration::from_secs(30), ErrorMarker::default());
        let builder = InvocationBuilder::new(compiler(), Capabilities::none(), home);
        BatchOrchestrator::new(runner, builder, 2)
    }

    /// Test: a parse error surfaces with its line number
    #[tokio::test]
    async fn test_validate_reports_syntax_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.scad");
        std::fs::write(&input, "SYNTAX cube(\n").unwrap();

        let result = real_orchestrator(dir.path())
            .run(&OperationRequest::validate(&input), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(result.status, BatchStatus::SyntaxError);
        let (entry, location) = result.first_syntax_error().unwrap();
        assert_eq!(location.line, 12);
        assert_eq!(entry.label, "validate");
    }

    /// Test: validate removes its scratch output
    #[tokio::test]
    async fn test_validate_discards_scratch_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = model(dir.path(), "part.scad");

        let result = real_orchestrator(dir.path())
            .run(&OperationRequest::validate(&input), &CancelToken::never())
            .await
            .unwrap();

        assert!(result.is_ok());
        let scratch = &result.entries[0].output;
        assert!(scratch.starts_with(dir.path().join("tmp")));
        assert!(!scratch.exists());
    }

    /// Test: validate --keep leaves the scratch output in place
    #[tokio::test]
    async fn test_validate_keep_retains_scratch_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = model(dir.path(), "part.scad");

        let request = OperationRequest::validate(&input).keep_scratch(true);
        let result = real_orchestrator(dir.path())
            .run(&request, &CancelToken::never())
            .await
            .unwrap();

        assert!(result.is_ok());
        assert!(result.entries[0].output.is_file());
    }

    /// Test: export writes the requested file
    #[tokio::test]
    async fn test_export_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = model(dir.path(), "part.scad");

        let result = real_orchestrator(dir.path())
            .run(&OperationRequest::export(&input), &CancelToken::never())
            .await
            .unwrap();

        assert!(result.is_ok());
        let expected = dir.path().join("outputs").join("part.stl");
        assert_eq!(result.entries[0].output, expected);
        assert!(expected.is_file());
    }
}
