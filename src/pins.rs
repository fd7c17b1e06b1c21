//! The pin store: `HEAD`, `manifest`, `res-K.resolution`, `local-NNN-*.patch`.
//!
//! Pins are the small versioned artifacts that make a recorded build
//! replayable. The store is a plain directory of line-oriented files; the
//! engines point it at either the final pin dir or a staging pin dir, so
//! one code path serves both views.
//!
//! Missing files read as `None` (absence is a normal state, not an error)
//! with one exception: `read_head`, whose absence means the entry was never
//! recorded and is reported as [`RegraftError::StateMissing`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RegraftError;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The recorded merge sequence: base commit plus one step per merged ref.
///
/// Serialized as tab-separated lines. Line 1 is
/// `<full_base_sha>\t<default_branch>`; lines 2..N are
/// `<full_merged_sha>\t<original_ref_string>`. Every SHA is a full 40-char
/// hash; line order is merge order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub base_sha: String,
    pub base_branch: String,
    pub steps: Vec<MergeStep>,
}

/// One fetch-and-merge pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeStep {
    /// Full SHA that was merged.
    pub sha: String,
    /// The ref string as the user configured it (`817`, `fix-panic`, ...).
    /// Retained for diagnostics and as the merge-message payload.
    pub r#ref: String,
}

impl Manifest {
    pub fn new(base_sha: String, base_branch: String) -> Result<Self, RegraftError> {
        require_full_sha(&base_sha)?;
        Ok(Self {
            base_sha,
            base_branch,
            steps: Vec::new(),
        })
    }

    pub fn push_step(&mut self, sha: String, r#ref: String) -> Result<(), RegraftError> {
        require_full_sha(&sha)?;
        self.steps.push(MergeStep { sha, r#ref });
        Ok(())
    }

    /// Number of merge steps (manifest lines minus the base line).
    pub fn merge_count(&self) -> usize {
        self.steps.len()
    }

    pub fn to_tsv(&self) -> String {
        let mut out = format!("{}\t{}\n", self.base_sha, self.base_branch);
        for step in &self.steps {
            out.push_str(&format!("{}\t{}\n", step.sha, step.r#ref));
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, RegraftError> {
        let mut lines = text.lines();
        let base = lines.next().ok_or_else(|| format_err("manifest is empty"))?;
        let (base_sha, base_branch) = split_tsv(base)?;
        let mut manifest = Self::new(base_sha.to_owned(), base_branch.to_owned())
            .map_err(|_| format_err(&format!("base line has a malformed sha: {base}")))?;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (sha, r#ref) = split_tsv(line)?;
            manifest
                .push_step(sha.to_owned(), r#ref.to_owned())
                .map_err(|_| format_err(&format!("merge line has a malformed sha: {line}")))?;
        }
        Ok(manifest)
    }
}

fn split_tsv(line: &str) -> Result<(&str, &str), RegraftError> {
    line.split_once('\t')
        .ok_or_else(|| format_err(&format!("manifest line is not tab-separated: {line}")))
}

fn require_full_sha(sha: &str) -> Result<(), RegraftError> {
    let ok = sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if ok {
        Ok(())
    } else {
        Err(format_err(&format!("not a full 40-char sha: '{sha}'")))
    }
}

fn format_err(detail: &str) -> RegraftError {
    RegraftError::ResolutionFormat {
        detail: detail.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// PinStore
// ---------------------------------------------------------------------------

/// Read/write access to one entry's pin directory.
#[derive(Clone, Debug)]
pub struct PinStore {
    name: String,
    dir: PathBuf,
}

impl PinStore {
    /// A store over `dir`: the final pin dir, or a staging pin dir.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    // -- HEAD --

    /// Read the pinned final SHA. Absence is an error: no HEAD means the
    /// entry was never recorded.
    pub fn read_head(&self) -> Result<String, RegraftError> {
        match fs::read_to_string(self.dir.join("HEAD")) {
            Ok(text) => {
                let sha = text.trim().to_owned();
                require_full_sha(&sha)?;
                Ok(sha)
            }
            Err(_) => Err(RegraftError::StateMissing {
                name: self.name.clone(),
                pin: "HEAD".to_owned(),
            }),
        }
    }

    pub fn head_exists(&self) -> bool {
        self.dir.join("HEAD").is_file()
    }

    pub fn write_head(&self, sha: &str) -> Result<(), RegraftError> {
        require_full_sha(sha)?;
        self.ensure_dir().map_err(io_err)?;
        fs::write(self.dir.join("HEAD"), format!("{sha}\n")).map_err(io_err)
    }

    // -- manifest --

    pub fn read_manifest(&self) -> Result<Option<Manifest>, RegraftError> {
        match fs::read_to_string(self.dir.join("manifest")) {
            Ok(text) => Manifest::parse(&text).map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<(), RegraftError> {
        self.ensure_dir().map_err(io_err)?;
        fs::write(self.dir.join("manifest"), manifest.to_tsv()).map_err(io_err)
    }

    /// Merge steps recorded in the manifest; errors when no manifest exists.
    pub fn merge_count(&self) -> Result<usize, RegraftError> {
        match self.read_manifest()? {
            Some(manifest) => Ok(manifest.merge_count()),
            None => Err(RegraftError::StateMissing {
                name: self.name.clone(),
                pin: "manifest".to_owned(),
            }),
        }
    }

    // -- resolutions --

    pub fn read_resolution(&self, k: usize) -> Option<String> {
        fs::read_to_string(self.dir.join(format!("res-{k}.resolution"))).ok()
    }

    pub fn write_resolution(&self, k: usize, data: &str) -> Result<(), RegraftError> {
        self.ensure_dir().map_err(io_err)?;
        fs::write(self.dir.join(format!("res-{k}.resolution")), data).map_err(io_err)
    }

    // -- local patches --

    /// Local patch files in lexicographic order.
    pub fn list_local_patches(&self) -> Vec<PathBuf> {
        let mut patches: Vec<PathBuf> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_local_patch(p))
            .collect();
        patches.sort();
        patches
    }

    pub fn write_local_patch(&self, file_name: &str, diff: &str) -> Result<PathBuf, RegraftError> {
        self.ensure_dir().map_err(io_err)?;
        let path = self.dir.join(file_name);
        fs::write(&path, diff).map_err(io_err)?;
        Ok(path)
    }
}

pub fn is_local_patch(path: &Path) -> bool {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    name.starts_with("local-") && name.ends_with(".patch")
}

fn io_err(e: std::io::Error) -> RegraftError {
    RegraftError::ResolutionFormat {
        detail: format!("pin write failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
