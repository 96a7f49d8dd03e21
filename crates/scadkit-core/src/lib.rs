//! scadkit - render orchestration for the OpenSCAD geometry compiler
//!
//! Drives the compiler as a subprocess to:
//! - Validate sources (syntax errors surfaced with line/column)
//! - Capture previews from presets, named views, explicit angles or turntables
//! - Export solids, with `-D` variable overrides
//!
//! Work is split into one invocation per view and run through a bounded
//! worker pool; results come back in view order.

pub mod batch;
pub mod compiler;
pub mod config;
pub mod error;
pub mod invocation;
pub mod library;
pub mod obs;
pub mod request;
pub mod runner;
pub mod telemetry;
pub mod view;

// Re-export key types
pub use batch::{aggregate_status, BatchEntry, BatchOrchestrator, BatchResult, BatchStatus};
pub use compiler::{locate, Capabilities};
pub use config::ToolConfig;
pub use error::{Result, ScadError};
pub use invocation::{Invocation, InvocationBuilder};
pub use library::{Library, SyncAction, KNOWN_LIBRARIES};
pub use request::{
    OperationKind, OperationRequest, OutputTarget, Projection, RenderSettings, VariableOverride,
};
pub use runner::{
    CancelHandle, CancelToken, ErrorMarker, InvocationExecutor, InvocationResult,
    InvocationStatus, ProcessRunner, RunOutcome, SyntaxLocation,
};
pub use telemetry::init_tracing;
pub use view::{ViewSelector, ViewSpec};

/// scadkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
