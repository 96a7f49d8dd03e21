//! Locating the OpenSCAD binary and probing which flags it supports.

use crate::error::{Result, ScadError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Platform install locations checked after `OPENSCAD_BIN`.
const DEFAULT_LOCATIONS: &[&str] = &[
    "/Applications/OpenSCAD.app/Contents/MacOS/OpenSCAD",
    "/usr/bin/openscad",
    "/usr/local/bin/openscad",
];

/// Optional flags the invocation builder knows how to use.
pub const KNOWN_FLAGS: &[&str] = &[
    "--render",
    "--backend",
    "--camera",
    "--imgsize",
    "--viewall",
    "--autocenter",
    "--projection",
    "--view",
    "--colorscheme",
];

/// Find the compiler: explicit path, then `OPENSCAD_BIN`, then platform
/// defaults, then `openscad` on `PATH`.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(ScadError::CompilerNotFound)
        };
    }

    if let Ok(env) = std::env::var("OPENSCAD_BIN") {
        let path = PathBuf::from(env.trim());
        if path.exists() {
            return Ok(path);
        }
        warn!(path = %path.display(), "OPENSCAD_BIN does not exist, searching defaults");
    }

    if let Some(path) = DEFAULT_LOCATIONS.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Ok(path);
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join("openscad"))
                .find(|candidate| candidate.is_file())
        })
        .ok_or(ScadError::CompilerNotFound)
}

/// Flags a particular compiler build advertises in its `--help` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    flags: BTreeSet<String>,
}

impl Capabilities {
    /// Assume every known flag is available.
    pub fn all() -> Self {
        Self {
            flags: KNOWN_FLAGS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// No optional flags at all.
    pub fn none() -> Self {
        Self {
            flags: BTreeSet::new(),
        }
    }

    /// Detect known flags mentioned in help output.
    pub fn from_help(help: &str) -> Self {
        Self {
            flags: KNOWN_FLAGS
                .iter()
                .filter(|flag| mentions_flag(help, flag))
                .map(|f| f.to_string())
                .collect(),
        }
    }

    /// Run `<binary> --help` and detect flags. A probe that fails or times
    /// out yields no optional flags.
    pub async fn probe(binary: &Path, timeout: Duration) -> Self {
        let child = Command::new(binary)
            .arg("--help")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(binary = %binary.display(), error = %e, "capability probe failed to start");
                return Self::none();
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut help = String::from_utf8_lossy(&output.stdout).into_owned();
                help.push_str(&String::from_utf8_lossy(&output.stderr));
                let caps = Self::from_help(&help);
                debug!(flags = ?caps.flags, "probed compiler capabilities");
                caps
            }
            Ok(Err(e)) => {
                warn!(error = %e, "capability probe failed");
                Self::none()
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "capability probe timed out");
                Self::none()
            }
        }
    }

    /// Whether `flag` (e.g. `--camera`) is supported.
    pub fn supports(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// `--view` is a prefix of `--viewall`, so match on a flag boundary.
fn mentions_flag(help: &str, flag: &str) -> bool {
    help.match_indices(flag).any(|(idx, _)| {
        help[idx + flag.len()..]
            .chars()
            .next()
            .map(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_help_detects_flags() {
        let help = "Usage: openscad [options] file\n  --render arg\n  --camera=...\n  --viewall\n  --imgsize=w,h";
        let caps = Capabilities::from_help(help);
        assert!(caps.supports("--render"));
        assert!(caps.supports("--camera"));
        assert!(caps.supports("--viewall"));
        assert!(caps.supports("--imgsize"));
        assert!(!caps.supports("--view"));
        assert!(!caps.supports("--backend"));
    }

    #[test]
    fn test_all_and_none() {
        assert!(KNOWN_FLAGS.iter().all(|f| Capabilities::all().supports(f)));
        assert!(KNOWN_FLAGS.iter().all(|f| !Capabilities::none().supports(f)));
    }

    #[test]
    fn test_locate_explicit_missing() {
        let missing = Path::new("/definitely/not/here/openscad");
        assert!(matches!(
            locate(Some(missing)),
            Err(ScadError::CompilerNotFound)
        ));
    }

    #[test]
    fn test_locate_explicit_existing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(locate(Some(file.path())).unwrap(), file.path());
    }

    #[tokio::test]
    async fn test_probe_missing_binary_yields_none() {
        let caps =
            Capabilities::probe(Path::new("/definitely/not/here"), Duration::from_secs(5)).await;
        assert_eq!(caps, Capabilities::none());
    }
}
