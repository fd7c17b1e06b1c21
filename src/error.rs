//! Error types for regraft.
//!
//! Defines [`RegraftError`], the unified error type for record/replay
//! operations. Every variant carries enough context to be self-contained:
//! the message says what went wrong and which command to run next, so a
//! failure never leaves the user guessing.

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// RegraftError
// ---------------------------------------------------------------------------

/// Unified error type for regraft operations.
#[derive(Debug)]
pub enum RegraftError {
    /// The configuration document is missing, malformed, or lacks the entry.
    Config {
        /// Path to the config document, when known.
        path: Option<PathBuf>,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// The status predicate reported the live clone dirty, blocking a
    /// destructive operation.
    GuardFailed {
        /// The entry name.
        name: String,
        /// The reasons the clone is considered dirty, one per line.
        reasons: Vec<String>,
    },

    /// A git subprocess exited nonzero.
    Vcs {
        /// The git command that was run (e.g. `"git merge --no-ff"`).
        command: String,
        /// Captured stderr from git, trimmed.
        stderr: String,
    },

    /// A resolution sidecar failed to parse or apply.
    ResolutionFormat {
        /// What the codec was doing when it failed.
        detail: String,
    },

    /// The conflict-resolution advisor failed or returned garbage.
    Advisor {
        /// Description of the RPC failure or malformed response.
        detail: String,
    },

    /// A local patch failed to apply.
    LocalPatch {
        /// The patch file that failed.
        patch: PathBuf,
        /// Captured apply error.
        detail: String,
    },

    /// Replay produced a HEAD that differs from the pinned one.
    HeadMismatch {
        /// The entry name.
        name: String,
        /// The SHA the pins promised.
        pinned: String,
        /// The SHA replay actually produced.
        actual: String,
    },

    /// An expected pin file is absent.
    StateMissing {
        /// The entry name.
        name: String,
        /// The missing pin file, relative to the pin directory.
        pin: String,
    },
}

impl fmt::Display for RegraftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { path, detail } => {
                match path {
                    Some(p) => write!(f, "config error in '{}': {detail}", p.display())?,
                    None => write!(f, "config error: {detail}")?,
                }
                write!(f, "\n  To fix: edit forks.json and correct the entry.")
            }
            Self::GuardFailed { name, reasons } => {
                write!(f, "clone '{name}' has local state that would be lost:")?;
                for reason in reasons {
                    write!(f, "\n  - {reason}")?;
                }
                write!(
                    f,
                    "\n  To keep it: regraft save {name}   (capture as a local patch)\
                     \n  To discard: commit or stash elsewhere, then retry."
                )
            }
            Self::Vcs { command, stderr } => {
                write!(f, "git command failed: {command}")?;
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                Ok(())
            }
            Self::ResolutionFormat { detail } => {
                write!(
                    f,
                    "resolution data is unusable: {detail}\
                     \n  To fix: re-record the entry to regenerate its pins:\
                     \n    regraft record <name>"
                )
            }
            Self::Advisor { detail } => {
                write!(
                    f,
                    "conflict advisor failed: {detail}\
                     \n  To fix: check ANTHROPIC_API_KEY and network access, then retry the record."
                )
            }
            Self::LocalPatch { patch, detail } => {
                write!(
                    f,
                    "local patch '{}' did not apply: {detail}\
                     \n  To fix: the patch no longer matches the merged tree.\
                     \n  Rebase it by hand or delete it, then re-record.",
                    patch.display()
                )
            }
            Self::HeadMismatch {
                name,
                pinned,
                actual,
            } => {
                write!(
                    f,
                    "replay of '{name}' diverged from the pinned HEAD.\
                     \n  pinned: {pinned}\
                     \n  actual: {actual}\
                     \n  The pins are stale or an upstream input changed.\
                     \n  To fix: regraft record {name}"
                )
            }
            Self::StateMissing { name, pin } => {
                write!(
                    f,
                    "entry '{name}' is missing pin '{pin}'.\
                     \n  To fix: regraft record {name}"
                )
            }
        }
    }
}

impl std::error::Error for RegraftError {}

// ---------------------------------------------------------------------------
// ExitCodeError
// ---------------------------------------------------------------------------

/// Error indicating the process should exit with a specific nonzero code
/// without printing an error chain (`status` uses this for "dirty").
#[derive(Debug)]
pub struct ExitCodeError(pub i32);

impl fmt::Display for ExitCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.0)
    }
}

impl std::error::Error for ExitCodeError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
