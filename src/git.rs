//! Subprocess git driver.
//!
//! Every VCS operation the engines need, wrapped over `git` with captured
//! output and structured errors. Nothing here shells out through a shell;
//! args are passed verbatim.
//!
//! Commits created by the engines use the deterministic identity: author
//! and committer `ci <ci@local>` with an epoch-seconds timestamp in UTC.
//! The identity is passed as environment variables on the specific
//! `Command`, never through process-global state, so parallel work inside a
//! single step can't cross-contaminate.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::error::RegraftError;

/// Deterministic commit identity.
pub const IDENT_NAME: &str = "ci";
pub const IDENT_EMAIL: &str = "ci@local";

/// How to clone an upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloneMode {
    /// `--filter=blob:none`: full history, blobs on demand.
    Blobless,
    /// `--depth 1`: reference-only entries.
    Shallow,
}

/// Result of a merge or cherry-pick attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean,
    Conflicted,
}

/// A working clone.
#[derive(Debug)]
pub struct Repo {
    dir: PathBuf,
}

impl Repo {
    /// Clone `url` into `dest` (which may exist if empty).
    pub fn clone(url: &str, dest: &Path, mode: CloneMode) -> Result<Self, RegraftError> {
        let dest_str = dest.to_string_lossy().into_owned();
        let mut args = vec!["clone"];
        match mode {
            CloneMode::Blobless => args.push("--filter=blob:none"),
            CloneMode::Shallow => args.extend(["--depth", "1"]),
        }
        args.extend([url, dest_str.as_str()]);
        run_git(None, &args, None)?;
        Ok(Self::open(dest))
    }

    /// Wrap an existing clone directory.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run(&self, args: &[&str]) -> Result<String, RegraftError> {
        run_git(Some(&self.dir), args, None)
    }

    fn run_identity(&self, args: &[&str], t: u64) -> Result<String, RegraftError> {
        run_git(Some(&self.dir), args, Some(t))
    }

    /// Per-clone options that pin the conflict-marker byte layout:
    /// diff3 markers (ancestor section present) and a fixed 40-char abbrev
    /// (the base marker label otherwise varies with repo size).
    pub fn set_deterministic_options(&self) -> Result<(), RegraftError> {
        self.run(&["config", "merge.conflictStyle", "diff3"])?;
        self.run(&["config", "core.abbrev", "40"])?;
        Ok(())
    }

    // -- fetching --

    pub fn fetch_sha(&self, sha: &str, depth: Option<u32>) -> Result<(), RegraftError> {
        match depth {
            Some(d) => {
                let d = d.to_string();
                self.run(&["fetch", "--depth", &d, "origin", sha])?;
            }
            None => {
                self.run(&["fetch", "origin", sha])?;
            }
        }
        Ok(())
    }

    /// Fetch `pull/<n>/head` into local branch `pr-<n>`.
    pub fn fetch_pr(&self, n: u64) -> Result<(), RegraftError> {
        let refspec = format!("pull/{n}/head:pr-{n}");
        self.run(&["fetch", "origin", &refspec])?;
        Ok(())
    }

    pub fn fetch_branch(&self, branch: &str) -> Result<(), RegraftError> {
        self.run(&["fetch", "origin", branch])?;
        Ok(())
    }

    // -- inspection --

    pub fn rev_parse(&self, revspec: &str) -> Result<String, RegraftError> {
        Ok(self.run(&["rev-parse", "--verify", revspec])?.trim().to_owned())
    }

    /// Whether `revspec` resolves to an object already present locally.
    pub fn has_object(&self, revspec: &str) -> bool {
        self.rev_parse(revspec).is_ok()
    }

    pub fn head_sha(&self) -> Result<String, RegraftError> {
        self.rev_parse("HEAD")
    }

    pub fn current_branch(&self) -> Result<String, RegraftError> {
        Ok(self
            .run(&["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_owned())
    }

    /// Local branches matching a pattern, in git's (sorted) order.
    pub fn branches_matching(&self, pattern: &str) -> Result<Vec<String>, RegraftError> {
        let out = self.run(&[
            "branch",
            "--list",
            pattern,
            "--format=%(refname:short)",
        ])?;
        Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
    }

    // -- branching --

    pub fn checkout(&self, revspec: &str) -> Result<(), RegraftError> {
        self.run(&["checkout", revspec])?;
        Ok(())
    }

    pub fn create_branch(&self, name: &str) -> Result<(), RegraftError> {
        self.run(&["checkout", "-b", name])?;
        Ok(())
    }

    pub fn reset_hard(&self, revspec: &str) -> Result<(), RegraftError> {
        self.run(&["reset", "--hard", revspec])?;
        Ok(())
    }

    // -- merging --

    /// Merge `sha` with `--no-ff` under deterministic identity `t`.
    ///
    /// A nonzero exit with unmerged index entries is a conflict, not an
    /// error; anything else nonzero is a [`RegraftError::Vcs`].
    pub fn merge_no_ff(&self, sha: &str, message: &str, t: u64) -> Result<MergeOutcome, RegraftError> {
        match self.run_identity(&["merge", "--no-ff", "-m", message, sha], t) {
            Ok(_) => Ok(MergeOutcome::Clean),
            Err(err) => {
                if self.list_unmerged()?.is_empty() {
                    Err(err)
                } else {
                    Ok(MergeOutcome::Conflicted)
                }
            }
        }
    }

    /// Unmerged paths in git's reported (path-sorted) order.
    pub fn list_unmerged(&self) -> Result<Vec<String>, RegraftError> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
    }

    pub fn stage(&self, path: &str) -> Result<(), RegraftError> {
        self.run(&["add", "--", path])?;
        Ok(())
    }

    pub fn stage_all(&self) -> Result<(), RegraftError> {
        self.run(&["add", "-A"])?;
        Ok(())
    }

    /// Overwrite the pending merge message so `merge --continue` commits
    /// exactly these bytes.
    pub fn write_merge_msg(&self, message: &str) -> Result<(), RegraftError> {
        let git_dir = self.run(&["rev-parse", "--git-dir"])?;
        let git_dir = git_dir.trim();
        let path = if Path::new(git_dir).is_absolute() {
            PathBuf::from(git_dir).join("MERGE_MSG")
        } else {
            self.dir.join(git_dir).join("MERGE_MSG")
        };
        std::fs::write(&path, format!("{message}\n")).map_err(|e| RegraftError::Vcs {
            command: format!("write {}", path.display()),
            stderr: e.to_string(),
        })
    }

    pub fn merge_continue_noedit(&self, t: u64) -> Result<(), RegraftError> {
        self.run_identity(&["-c", "core.editor=true", "merge", "--continue"], t)?;
        Ok(())
    }

    pub fn commit(&self, message: &str, t: u64) -> Result<(), RegraftError> {
        self.run_identity(&["commit", "-m", message], t)?;
        Ok(())
    }

    // -- patches --

    /// Apply a unified diff to the worktree and index.
    pub fn apply_patch(&self, patch: &Path) -> Result<(), RegraftError> {
        let patch_str = patch.to_string_lossy().into_owned();
        self.run(&["apply", "--index", &patch_str])?;
        Ok(())
    }

    /// `git diff --cached <rev>` output, for emitting local patches.
    pub fn diff_cached(&self, rev: &str) -> Result<String, RegraftError> {
        run_git_raw(Some(&self.dir), &["diff", "--cached", rev], None).and_then(|out| {
            if out.status.success() || out.status.code() == Some(1) {
                String::from_utf8(out.stdout).map_err(|e| RegraftError::Vcs {
                    command: "git diff --cached".to_owned(),
                    stderr: e.to_string(),
                })
            } else {
                Err(vcs_error(&["diff", "--cached", rev], &out))
            }
        })
    }

    /// True when the tree at `rev` matches (worktree or index view).
    pub fn diff_clean(&self, rev: &str, cached: bool) -> Result<bool, RegraftError> {
        let mut args = vec!["diff", "--quiet"];
        if cached {
            args.push("--cached");
        }
        args.push(rev);
        quiet_bool(&self.dir, &args)
    }

    /// True when nothing is staged relative to HEAD.
    pub fn index_clean(&self) -> Result<bool, RegraftError> {
        quiet_bool(&self.dir, &["diff", "--cached", "--quiet"])
    }

    // -- status inputs --

    pub fn list_untracked(&self) -> Result<Vec<String>, RegraftError> {
        let out = self.run(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
    }

    pub fn stash_list(&self) -> Result<Vec<String>, RegraftError> {
        let out = self.run(&["stash", "list"])?;
        Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
    }

    pub fn log_oneline_range(&self, from: &str, to: &str) -> Result<String, RegraftError> {
        let range = format!("{from}..{to}");
        self.run(&["log", "--oneline", &range])
    }

    /// `git diff --stat <rev>` summary lines.
    pub fn diff_stat(&self, rev: &str) -> Result<String, RegraftError> {
        self.run(&["diff", "--stat", rev])
    }

    // -- push support --

    pub fn cherry_pick_range(&self, from: &str, to: &str) -> Result<MergeOutcome, RegraftError> {
        let range = format!("{from}..{to}");
        match self.run(&["cherry-pick", &range]) {
            Ok(_) => Ok(MergeOutcome::Clean),
            Err(err) => {
                if self.list_unmerged()?.is_empty() {
                    Err(err)
                } else {
                    Ok(MergeOutcome::Conflicted)
                }
            }
        }
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<(), RegraftError> {
        self.run(&["remote", "add", name, url])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subprocess plumbing
// ---------------------------------------------------------------------------

fn run_git(cwd: Option<&Path>, args: &[&str], identity_t: Option<u64>) -> Result<String, RegraftError> {
    let out = run_git_raw(cwd, args, identity_t)?;
    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    } else {
        Err(vcs_error(args, &out))
    }
}

fn run_git_raw(cwd: Option<&Path>, args: &[&str], identity_t: Option<u64>) -> Result<Output, RegraftError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let Some(t) = identity_t {
        apply_identity(&mut cmd, t);
    }
    debug!(args = %args.join(" "), "git");
    cmd.output().map_err(|e| RegraftError::Vcs {
        command: command_line(args),
        stderr: format!("failed to spawn git: {e}"),
    })
}

/// Exit 0 → true, exit 1 → false, anything else → error.
fn quiet_bool(dir: &Path, args: &[&str]) -> Result<bool, RegraftError> {
    let out = run_git_raw(Some(dir), args, None)?;
    match out.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(vcs_error(args, &out)),
    }
}

fn apply_identity(cmd: &mut Command, t: u64) {
    let date = format!("@{t} +0000");
    cmd.env("GIT_AUTHOR_NAME", IDENT_NAME)
        .env("GIT_AUTHOR_EMAIL", IDENT_EMAIL)
        .env("GIT_AUTHOR_DATE", &date)
        .env("GIT_COMMITTER_NAME", IDENT_NAME)
        .env("GIT_COMMITTER_EMAIL", IDENT_EMAIL)
        .env("GIT_COMMITTER_DATE", &date)
        // deterministic commits are never interactive; a caller's
        // GIT_EDITOR must not hijack `merge --continue`
        .env("GIT_EDITOR", "true");
}

fn vcs_error(args: &[&str], out: &Output) -> RegraftError {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let message = format!("{stderr}{stdout}");
    RegraftError::Vcs {
        command: command_line(args),
        stderr: message.trim().to_owned(),
    }
}

fn command_line(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

// ---------------------------------------------------------------------------
// Tests (require a `git` binary, like the rest of the suite)
// ---------------------------------------------------------------------------
