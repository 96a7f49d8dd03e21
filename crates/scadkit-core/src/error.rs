//! Error taxonomy for scadkit.
//!
//! Everything here is a request-level failure: it is raised before any
//! compiler process runs, or by environment checks around a run. Outcomes of
//! individual compiler invocations are never errors; they are carried by
//! [`crate::runner::InvocationResult`].

use std::path::PathBuf;

/// scadkit errors.
#[derive(Debug, thiserror::Error)]
pub enum ScadError {
    #[error("unknown view or preset '{name}' (available: {available})")]
    UnknownView { name: String, available: String },

    #[error("invalid angle '{token}', expected az:el (e.g. 45:30)")]
    InvalidAngleFormat { token: String },

    #[error("invalid turntable step {step}: must be in (0, 360] and give at most 3600 frames")]
    InvalidTurntableStep { step: f64 },

    #[error("invalid variable override '{raw}': {reason}")]
    InvalidOverride { raw: String, reason: String },

    #[error("output path {path}: {reason}")]
    OutputPath { path: PathBuf, reason: String },

    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("OpenSCAD not found; install it or set OPENSCAD_BIN")]
    CompilerNotFound,

    #[error("invalid error-marker pattern: {0}")]
    InvalidErrorPattern(String),

    #[error("library '{name}' at {path} is not a managed git clone")]
    NotManagedClone { name: String, path: PathBuf },

    #[error("library error: {0}")]
    Library(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScadError {
    /// Whether this error stems from a malformed request rather than the
    /// environment. The CLI maps these to its usage exit code.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            ScadError::UnknownView { .. }
                | ScadError::InvalidAngleFormat { .. }
                | ScadError::InvalidTurntableStep { .. }
                | ScadError::InvalidOverride { .. }
                | ScadError::InvalidErrorPattern(_)
        )
    }
}

/// Result type for scadkit operations.
pub type Result<T> = std::result::Result<T, ScadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_error_names_token() {
        let err = ScadError::InvalidAngleFormat {
            token: "45:".to_string(),
        };
        assert!(err.to_string().contains("'45:'"));
        assert!(err.is_usage());
    }

    #[test]
    fn test_output_path_is_not_usage() {
        let err = ScadError::OutputPath {
            path: PathBuf::from("/tmp/out"),
            reason: "is a directory".to_string(),
        };
        assert!(!err.is_usage());
        assert!(err.to_string().contains("is a directory"));
    }
}
