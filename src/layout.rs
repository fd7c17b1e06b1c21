//! On-disk layout of the outer repository.
//!
//! regraft runs inside an *outer repo* whose root holds `forks.json`, the
//! versioned `pins/` tree, and the transient `clones/` tree:
//!
//! ```text
//! <root>/forks.json
//! <root>/pins/<name>/{HEAD,manifest,res-K.resolution,local-NNN-*.patch}
//! <root>/clones/<name>/
//! ```
//!
//! Engines never write into the final directories directly; they build a
//! sibling staging view (`.work-<name>.<rand>`) and atomically rename it
//! into place. [`Layout`] is the single source of path computation so the
//! pin store, VCS driver, and hook all observe the same view.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Name of the config document that marks the outer repo root.
pub const CONFIG_FILE: &str = "forks.json";

/// Path computation for one outer repo.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Use an explicit root (tests, or callers that already know it).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the nearest directory containing `forks.json`.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut dir = start;
        loop {
            if dir.join(CONFIG_FILE).is_file() {
                return Ok(Self::at(dir));
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => bail!(
                    "not inside a regraft repo: no {CONFIG_FILE} found above {}\n  \
                     Create one with an entry per fork (see forks.json schema).",
                    start.display()
                ),
            }
        }
    }

    /// Discover from the current working directory.
    pub fn discover_cwd() -> Result<Self> {
        Self::discover(&std::env::current_dir()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Parent of all pin directories.
    pub fn pins_root(&self) -> PathBuf {
        self.root.join("pins")
    }

    /// Parent of all clone directories.
    pub fn clones_root(&self) -> PathBuf {
        self.root.join("clones")
    }

    /// Pin directory for one entry.
    pub fn pin_dir(&self, name: &str) -> PathBuf {
        self.pins_root().join(name)
    }

    /// Final clone directory for one entry.
    pub fn clone_dir(&self, name: &str) -> PathBuf {
        self.clones_root().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let nested = dir.path().join("clones/ccc/src");
        std::fs::create_dir_all(&nested).unwrap();

        let layout = Layout::discover(&nested).unwrap();
        assert_eq!(layout.root(), dir.path());
        assert_eq!(layout.pin_dir("ccc"), dir.path().join("pins/ccc"));
        assert_eq!(layout.clone_dir("ccc"), dir.path().join("clones/ccc"));
    }

    #[test]
    fn discover_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = Layout::discover(dir.path()).unwrap_err();
        assert!(format!("{err}").contains(CONFIG_FILE));
    }
}
