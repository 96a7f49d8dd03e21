//! Fetching and updating OpenSCAD libraries as managed git clones.
//!
//! Libraries live under the tool home (`<scad_home>/<name>`), which the
//! invocation builder puts on `OPENSCADPATH`. Fetching is idempotent:
//! clone when absent, fast-forward when present. A directory that exists
//! but is not a clone of its own is never touched.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, ScadError};
use tracing::info;

/// A library known by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Library {
    pub name: &'static str,
    pub url: &'static str,
}

/// Libraries that can be fetched by name.
pub const KNOWN_LIBRARIES: &[Library] = &[
    Library {
        name: "BOSL2",
        url: "https://github.com/BelfrySCAD/BOSL2.git",
    },
    Library {
        name: "MCAD",
        url: "https://github.com/openscad/MCAD.git",
    },
    Library {
        name: "NopSCADlib",
        url: "https://github.com/nophead/NopSCADlib.git",
    },
];

/// What a sync did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Cloned,
    Updated,
}

/// Look up a known library, case-insensitively.
pub fn find_library(name: &str) -> Result<&'static Library> {
    KNOWN_LIBRARIES
        .iter()
        .find(|l| l.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            ScadError::Library(format!(
                "unknown library '{name}' (known: {})",
                KNOWN_LIBRARIES
                    .iter()
                    .map(|l| l.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// Install location of `library` under `scad_home`.
pub fn library_dir(scad_home: &Path, library: &Library) -> PathBuf {
    scad_home.join(library.name)
}

/// Clone `library` if absent, otherwise fast-forward it.
pub fn fetch(scad_home: &Path, library: &Library) -> Result<SyncAction> {
    sync_clone(library.name, library.url, &library_dir(scad_home, library))
}

/// Fast-forward an installed `library`.
pub fn update(scad_home: &Path, library: &Library) -> Result<SyncAction> {
    let dest = library_dir(scad_home, library);
    if !dest.exists() {
        return Err(ScadError::Library(format!(
            "'{}' is not installed at {}; fetch it first",
            library.name,
            dest.display()
        )));
    }
    pull_ff_only(library.name, &dest)?;
    Ok(SyncAction::Updated)
}

/// Clone `url` into `dest` when absent; fast-forward when it is a managed
/// clone; refuse anything else.
pub fn sync_clone(name: &str, url: &str, dest: &Path) -> Result<SyncAction> {
    if dest.exists() {
        pull_ff_only(name, dest)?;
        return Ok(SyncAction::Updated);
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(library = %name, url = %url, dest = %dest.display(), "cloning library");
    let dest_str = dest.to_string_lossy().into_owned();
    run_git(None, &["clone", "--depth", "1", url, dest_str.as_str()])?;
    Ok(SyncAction::Cloned)
}

fn pull_ff_only(name: &str, dest: &Path) -> Result<()> {
    if !is_managed_clone(dest) {
        return Err(ScadError::NotManagedClone {
            name: name.to_string(),
            path: dest.to_path_buf(),
        });
    }
    info!(library = %name, dest = %dest.display(), "updating library");
    run_git(Some(dest), &["pull", "--ff-only"])?;
    Ok(())
}

/// Whether `dir` is the top level of its own git work tree (not merely
/// nested inside some other repository).
pub fn is_managed_clone(dir: &Path) -> bool {
    let Ok(toplevel) = run_git(Some(dir), &["rev-parse", "--show-toplevel"]) else {
        return false;
    };
    match (
        std::fs::canonicalize(toplevel.trim()),
        std::fs::canonicalize(dir),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|e| ScadError::Library(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ScadError::Library(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
