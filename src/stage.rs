//! Staging directories and the atomic swap.
//!
//! Record and replay build the new clone and pins in `.work-<name>.<rand>`
//! siblings of the final directories (same filesystem, so the final
//! `rename` is atomic). On any failure the staging dirs are deleted by Drop
//! and the prior real state is untouched; on success [`Staging::swap`]
//! replaces the final directories in two renames.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::debug;

use crate::layout::Layout;

/// An in-flight staging view for one entry.
///
/// Holds tempdirs for the staging clone and staging pins. Dropping an
/// uncommitted `Staging` removes both.
pub struct Staging {
    clone: TempDir,
    pins: TempDir,
}

impl Staging {
    /// Create staging dirs next to the final clone and pin dirs.
    pub fn create(layout: &Layout, name: &str) -> Result<Self> {
        let clones_root = layout.clones_root();
        let pins_root = layout.pins_root();
        fs::create_dir_all(&clones_root)
            .with_context(|| format!("failed to create {}", clones_root.display()))?;
        fs::create_dir_all(&pins_root)
            .with_context(|| format!("failed to create {}", pins_root.display()))?;

        let prefix = format!(".work-{name}.");
        let clone = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&clones_root)
            .context("failed to create staging clone dir")?;
        let pins = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&pins_root)
            .context("failed to create staging pin dir")?;

        debug!(clone = %clone.path().display(), pins = %pins.path().display(), "staging created");
        Ok(Self { clone, pins })
    }

    /// The staging clone directory (empty at creation; clone into it).
    pub fn clone_dir(&self) -> &Path {
        self.clone.path()
    }

    /// The staging pin directory.
    pub fn pin_dir(&self) -> &Path {
        self.pins.path()
    }

    /// Atomically replace the final clone and pin directories.
    ///
    /// Removes the old directories first, then renames staging into place.
    /// After this returns the staging dirs no longer exist under their
    /// `.work-` names and Drop has nothing left to clean.
    pub fn swap(self, layout: &Layout, name: &str) -> Result<()> {
        let clone_staging = self.clone.keep();
        let pin_staging = self.pins.keep();

        rename_over(&clone_staging, &layout.clone_dir(name))?;
        rename_over(&pin_staging, &layout.pin_dir(name))?;
        debug!(name, "staging swapped into place");
        Ok(())
    }

    /// Swap only the clone (reference-only entries have no pins).
    pub fn swap_clone_only(self, layout: &Layout, name: &str) -> Result<()> {
        let clone_staging = self.clone.keep();
        drop(self.pins);

        rename_over(&clone_staging, &layout.clone_dir(name))
    }
}

fn rename_over(staging: &PathBuf, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("failed to remove old {}", dest.display()))?;
    }
    fs::rename(staging, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            staging.display(),
            dest.display()
        )
    })
}

/// Preserved pin files, copied out before record wipes and rebuilds.
///
/// Local patches and prior resolutions are copied to a kept temp directory
/// that survives failure: the record engine reads reuse input from here, and
/// if the record dies the user still has the files.
pub struct Preserved {
    dir: PathBuf,
}

impl Preserved {
    /// Copy `local-*.patch` and `res-*.resolution` files out of a pin dir.
    pub fn take_from(pin_dir: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("regraft-preserved.")
            .tempdir()
            .context("failed to create preserve dir")?
            .keep();

        if pin_dir.is_dir() {
            for entry in fs::read_dir(pin_dir)? {
                let entry = entry?;
                let file_name = entry.file_name();
                let name = file_name.to_string_lossy();
                let keep = (name.starts_with("local-") && name.ends_with(".patch"))
                    || (name.starts_with("res-") && name.ends_with(".resolution"));
                if keep {
                    fs::copy(entry.path(), dir.join(&*file_name))
                        .with_context(|| format!("failed to preserve {name}"))?;
                }
            }
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a preserved resolution sidecar for merge step `k`, if any.
    pub fn resolution(&self, k: usize) -> Option<String> {
        fs::read_to_string(self.dir.join(format!("res-{k}.resolution"))).ok()
    }

    /// Preserved local patches in lexicographic order.
    pub fn local_patches(&self) -> Vec<PathBuf> {
        let mut patches: Vec<PathBuf> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().unwrap_or_default().to_string_lossy();
                name.starts_with("local-") && name.ends_with(".patch")
            })
            .collect();
        patches.sort();
        patches
    }

    /// True when nothing was preserved.
    pub fn is_empty(&self) -> bool {
        fs::read_dir(&self.dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    /// Delete the preserve dir after a successful swap.
    pub fn discard(self) {
        fs::remove_dir_all(&self.dir).ok();
    }
}
