//! Operation requests submitted to the batch orchestrator.

use crate::error::{Result, ScadError};
use crate::view::{self, ViewSelector, ViewSpec, DEFAULT_DISTANCE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What the compiler is asked to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Compile without keeping any output.
    Validate,

    /// Render preview images, one per view.
    Screenshot,

    /// Export a solid (STL).
    Export,
}

impl OperationKind {
    /// Operation name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Validate => "validate",
            OperationKind::Screenshot => "screenshot",
            OperationKind::Export => "export",
        }
    }

    /// File extension of the output this operation writes.
    pub fn extension(&self) -> &'static str {
        match self {
            OperationKind::Screenshot => "png",
            OperationKind::Validate | OperationKind::Export => "stl",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `-D name=literal` variable override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableOverride {
    pub name: String,
    pub literal: String,
}

impl VariableOverride {
    /// Parse `NAME=VALUE`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| ScadError::InvalidOverride {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };
        let (name, literal) = raw.split_once('=').ok_or_else(|| invalid("expected NAME=VALUE"))?;
        let name = name.trim();
        if !is_identifier(name) {
            return Err(invalid("name must be an identifier"));
        }
        Ok(Self {
            name: name.to_string(),
            literal: literal.trim().to_string(),
        })
    }

    /// Render as the single argument following `-D`.
    ///
    /// Values that already read as compiler literals pass through untouched;
    /// anything else becomes a quoted string.
    pub fn to_arg(&self) -> String {
        if is_literal(&self.literal) {
            format!("{}={}", self.name, self.literal)
        } else {
            format!("{}={}", self.name, quote(&self.literal))
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_literal(value: &str) -> bool {
    if matches!(value, "true" | "false" | "undef") {
        return true;
    }
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('[') && value.ends_with(']')))
    {
        return true;
    }
    let numeric_start = value
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .unwrap_or(false);
    numeric_start && value.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Camera projection for previews.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    Orthographic,
    #[default]
    Perspective,
}

impl Projection {
    /// Value for `--projection=`.
    pub fn flag(&self) -> &'static str {
        match self {
            Projection::Orthographic => "o",
            Projection::Perspective => "p",
        }
    }
}

/// Preview and render settings shared by every invocation of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Camera distance for views without their own.
    pub distance: f64,
    pub colorscheme: String,
    pub projection: Projection,
    /// Comma-separated `--view` options (axes, edges, scales, ...).
    pub view_options: Option<String>,
    /// Geometry backend passed as `--backend`.
    pub backend: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            distance: DEFAULT_DISTANCE,
            colorscheme: "Cornfield".to_string(),
            projection: Projection::Perspective,
            view_options: None,
            backend: "Manifold".to_string(),
        }
    }
}

/// Where output goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    /// Derive from the tool's home directory.
    #[default]
    Default,

    /// Exactly this file (export).
    File(PathBuf),

    /// This directory, one file per view (screenshots).
    Directory(PathBuf),
}

/// A unit of work for the orchestrator. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub input: PathBuf,
    pub overrides: Vec<VariableOverride>,
    pub output: OutputTarget,
    /// Resolved views; a single implicit view for validate/export.
    pub views: Vec<ViewSpec>,
    /// Whether the views are turntable frames.
    pub turntable: bool,
    pub render: RenderSettings,
    /// Keep the scratch output of a validate run.
    pub keep_scratch: bool,
}

impl OperationRequest {
    fn base(kind: OperationKind, input: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            input: input.into(),
            overrides: Vec::new(),
            output: OutputTarget::Default,
            views: Vec::new(),
            turntable: false,
            render: RenderSettings::default(),
            keep_scratch: false,
        }
    }

    /// Validate `input`.
    pub fn validate(input: impl Into<PathBuf>) -> Self {
        Self::base(OperationKind::Validate, input)
    }

    /// Export `input` as a solid.
    pub fn export(input: impl Into<PathBuf>) -> Self {
        Self::base(OperationKind::Export, input)
    }

    /// Screenshot `input` from every view the selector resolves to.
    pub fn screenshot(input: impl Into<PathBuf>, selector: &ViewSelector) -> Result<Self> {
        let mut request = Self::base(OperationKind::Screenshot, input);
        request.views = view::resolve(selector)?;
        request.turntable = selector.is_turntable();
        Ok(request)
    }

    /// Screenshot with already-resolved views.
    pub fn screenshot_views(input: impl Into<PathBuf>, views: Vec<ViewSpec>) -> Self {
        let mut request = Self::base(OperationKind::Screenshot, input);
        request.views = views;
        request
    }

    /// Parse and attach `NAME=VALUE` overrides, in order.
    pub fn with_defines<S: AsRef<str>>(mut self, defines: &[S]) -> Result<Self> {
        for raw in defines {
            self.overrides.push(VariableOverride::parse(raw.as_ref())?);
        }
        Ok(self)
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn with_render(mut self, render: RenderSettings) -> Self {
        self.render = render;
        self
    }

    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    /// File stem of the input, used for output naming.
    pub fn stem(&self) -> String {
        input_stem(&self.input)
    }
}

pub(crate) fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string())
}
