//! Tool configuration.
//!
//! Defaults are overridden by environment variables (`SCAD_HOME`,
//! `OPENSCAD_BIN`, `SCAD_TIMEOUT_SECS`, `SCAD_JOBS`, `SCAD_ERROR_PATTERN`),
//! which the CLI in turn overrides with flags.

use std::path::PathBuf;
use std::time::Duration;

/// Default per-invocation timeout; geometry compilation can be slow.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration shared by every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Root for libraries, scratch files, renders and exports.
    pub scad_home: PathBuf,

    /// Explicit compiler path; discovered when absent.
    pub compiler: Option<PathBuf>,

    /// Per-invocation timeout.
    pub timeout: Duration,

    /// Maximum concurrent compiler processes.
    pub max_concurrent: usize,

    /// Override for the syntax-error marker regex.
    pub error_pattern: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            scad_home: default_scad_home(),
            compiler: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrent: default_concurrency(),
            error_pattern: None,
        }
    }
}

impl ToolConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let scad_home = non_empty_env("SCAD_HOME")
            .map(|s| expand_home(&s))
            .unwrap_or(defaults.scad_home);
        let compiler = non_empty_env("OPENSCAD_BIN").map(PathBuf::from);
        let timeout = non_empty_env("SCAD_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        let max_concurrent = non_empty_env("SCAD_JOBS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_concurrent);
        let error_pattern = non_empty_env("SCAD_ERROR_PATTERN");

        Self {
            scad_home,
            compiler,
            timeout,
            max_concurrent,
            error_pattern,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn default_scad_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".scad"))
        .unwrap_or_else(|| PathBuf::from(".scad"))
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}
