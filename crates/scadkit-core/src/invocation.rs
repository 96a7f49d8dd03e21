//! Building compiler invocations from operation requests.

use crate::compiler::Capabilities;
use crate::error::{Result, ScadError};
use crate::request::{OperationKind, OperationRequest};
use crate::view::ViewSpec;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Library search path variable read by the compiler.
pub const LIBRARY_PATH_VAR: &str = "OPENSCADPATH";

/// A fully specified compiler process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// View label (or operation name for single-output operations).
    pub label: String,

    /// Compiler binary.
    pub program: PathBuf,

    /// Arguments, in order, ending with `-o <output> <input>`.
    pub args: Vec<String>,

    /// Extra environment for the child.
    pub envs: Vec<(String, String)>,

    /// The single file this invocation writes.
    pub output: PathBuf,
}

impl Invocation {
    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|a| {
                if a.contains(char::is_whitespace) || a.contains('"') {
                    format!("'{}'", a.replace('\'', "'\\''"))
                } else {
                    a.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Turns requests into [`Invocation`]s for one compiler build.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    program: PathBuf,
    capabilities: Capabilities,
    scad_home: PathBuf,
}

impl InvocationBuilder {
    pub fn new(program: impl Into<PathBuf>, capabilities: Capabilities, scad_home: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            capabilities,
            scad_home: scad_home.into(),
        }
    }

    pub fn scad_home(&self) -> &Path {
        &self.scad_home
    }

    /// Build the invocation for `request` and `view`, writing to `output`.
    ///
    /// Parent directories of the output are created here.
    pub fn build(
        &self,
        request: &OperationRequest,
        view: Option<&ViewSpec>,
        output: PathBuf,
    ) -> Result<Invocation> {
        prepare_output(&output)?;

        let caps = &self.capabilities;
        let mut args = Vec::new();

        if caps.supports("--render") {
            args.push("--render".to_string());
        }
        if caps.supports("--backend") {
            args.push("--backend".to_string());
            args.push(request.render.backend.clone());
        }
        for o in &request.overrides {
            args.push("-D".to_string());
            args.push(o.to_arg());
        }

        if request.kind == OperationKind::Screenshot {
            let render = &request.render;
            if caps.supports("--autocenter") {
                args.push("--autocenter".to_string());
            }
            if caps.supports("--viewall") {
                args.push("--viewall".to_string());
            }
            if let (Some(view), true) = (view, caps.supports("--camera")) {
                args.push(format!("--camera={}", view.camera_arg(render.distance)));
            }
            if caps.supports("--imgsize") {
                args.push(format!("--imgsize={},{}", render.width, render.height));
            }
            if caps.supports("--colorscheme") {
                args.push(format!("--colorscheme={}", render.colorscheme));
            }
            if caps.supports("--projection") {
                args.push(format!("--projection={}", render.projection.flag()));
            }
            if let (Some(opts), true) = (&render.view_options, caps.supports("--view")) {
                args.push(format!("--view={opts}"));
            }
        }

        args.push("-o".to_string());
        args.push(output.display().to_string());
        args.push(request.input.display().to_string());

        let label = view
            .map(|v| v.label.clone())
            .unwrap_or_else(|| request.kind.name().to_string());

        let invocation = Invocation {
            label,
            program: self.program.clone(),
            args,
            envs: vec![(LIBRARY_PATH_VAR.to_string(), self.library_path())],
            output,
        };
        debug!(command = %invocation.command_line(), "built invocation");
        Ok(invocation)
    }

    /// `OPENSCADPATH` with the tool home prepended once.
    fn library_path(&self) -> String {
        let mut parts: Vec<PathBuf> = vec![self.scad_home.clone()];
        if let Some(existing) = std::env::var_os(LIBRARY_PATH_VAR) {
            parts.extend(std::env::split_paths(&existing).filter(|p| {
                !p.as_os_str().is_empty() && p != &self.scad_home
            }));
        }
        std::env::join_paths(&parts)
            .unwrap_or_else(|_| OsString::from(self.scad_home.as_os_str()))
            .to_string_lossy()
            .into_owned()
    }
}

/// Ensure `output` can be written: it must not be a directory and its parent
/// must exist (created if missing).
pub fn prepare_output(output: &Path) -> Result<()> {
    let fail = |reason: String| ScadError::OutputPath {
        path: output.to_path_buf(),
        reason,
    };
    if output.is_dir() {
        return Err(fail("is an existing directory".to_string()));
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if parent.exists() && !parent.is_dir() {
            return Err(fail(format!("parent {} is not a directory", parent.display())));
        }
        std::fs::create_dir_all(parent)
            .map_err(|e| fail(format!("cannot create {}: {e}", parent.display())))?;
    }
    Ok(())
}
