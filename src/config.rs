//! Fork entry configuration (`forks.json`).
//!
//! The config document is a JSON object keyed by entry name. Each entry
//! declares the upstream URL, an optional personal fork remote, the ordered
//! list of refs to merge, and workspace-inclusion globs:
//!
//! ```json
//! { "ccc": {
//!     "upstream": "https://github.com/upstream/ccc.git",
//!     "fork": "git@github.com:me/ccc.git",
//!     "refs": ["817", "fix-panic", "1a2b3c4d"],
//!     "workspace": { "include": ["crates/*"], "exclude": ["crates/xtask"] }
//!   } }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::RegraftError;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One managed fork.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    /// Upstream repository URL (clone source).
    pub upstream: String,

    /// Optional personal fork, added as remote `fork` after record/replay.
    #[serde(default)]
    pub fork: Option<String>,

    /// Ordered merge refs. Empty means the entry is reference-only.
    #[serde(default)]
    pub refs: Vec<String>,

    /// Workspace-inclusion globs, consumed by workspace regeneration.
    #[serde(default)]
    pub workspace: WorkspaceGlobs,
}

/// Include/exclude glob lists for workspace membership.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceGlobs {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl WorkspaceGlobs {
    /// Validate every pattern parses as a glob.
    fn validate(&self) -> Result<(), String> {
        for pattern in self.include.iter().chain(&self.exclude) {
            glob::Pattern::new(pattern)
                .map_err(|e| format!("bad workspace glob '{pattern}': {e}"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RefKind — pattern dispatch for merge refs
// ---------------------------------------------------------------------------

/// How a configured ref string should be fetched.
///
/// Dispatch is by pattern with fixed tie-breaks: a 7-40 char hex string is a
/// commit hash even when it is all digits; an all-digit string that is not a
/// valid hash length is a pull-request number; anything else is a branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// Commit hash, 7-40 lowercase hex chars.
    Hash,
    /// Pull-request number.
    PullRequest(u64),
    /// Branch name.
    Branch,
}

impl RefKind {
    /// Classify a ref string.
    pub fn of(r: &str) -> Self {
        let is_hex = !r.is_empty() && r.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if is_hex && (7..=40).contains(&r.len()) {
            return Self::Hash;
        }
        if !r.is_empty() && r.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = r.parse::<u64>() {
                return Self::PullRequest(n);
            }
        }
        Self::Branch
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => write!(f, "hash"),
            Self::PullRequest(n) => write!(f, "pr {n}"),
            Self::Branch => write!(f, "branch"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The loaded config document.
#[derive(Clone, Debug, Default)]
pub struct Config {
    entries: BTreeMap<String, Entry>,
}

impl Config {
    /// Load and validate the config document.
    pub fn load(path: &Path) -> Result<Self, RegraftError> {
        let text = std::fs::read_to_string(path).map_err(|e| RegraftError::Config {
            path: Some(path.to_path_buf()),
            detail: format!("cannot read: {e}"),
        })?;
        Self::parse(&text).map_err(|detail| RegraftError::Config {
            path: Some(path.to_path_buf()),
            detail,
        })
    }

    /// Parse a config document from JSON text.
    pub fn parse(text: &str) -> Result<Self, String> {
        let entries: BTreeMap<String, Entry> =
            serde_json::from_str(text).map_err(|e| e.to_string())?;
        for (name, entry) in &entries {
            if entry.upstream.trim().is_empty() {
                return Err(format!("entry '{name}': upstream is empty"));
            }
            entry
                .workspace
                .validate()
                .map_err(|e| format!("entry '{name}': {e}"))?;
        }
        Ok(Self { entries })
    }

    /// Look up one entry.
    pub fn get(&self, name: &str) -> Result<&Entry, RegraftError> {
        self.entries.get(name).ok_or_else(|| RegraftError::Config {
            path: None,
            detail: format!(
                "entry '{name}' not found (known: {})",
                self.names_for_display()
            ),
        })
    }

    /// Sorted entry names, excluding the tool's own entry if present.
    ///
    /// regraft may manage its own source as a fork entry; the aggregate
    /// commands skip it so a broken self-entry cannot wedge `replay-all`.
    pub fn all_names(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter(|n| n.as_str() != "regraft")
            .cloned()
            .collect()
    }

    fn names_for_display(&self) -> String {
        let names = self.all_names();
        if names.is_empty() {
            "none".to_owned()
        } else {
            names.join(", ")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
