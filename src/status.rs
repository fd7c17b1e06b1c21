//! The status predicate: is a clone safe to wipe?
//!
//! A clone is *clean* when everything it contains is reproducible from
//! pins — so `clean`, `reset`, and `record` may destroy it. Anything the
//! pins cannot reproduce (divergent commits, uncommitted edits, untracked
//! files, stashes) makes it *dirty*, with one reason line per finding.

use anyhow::Result;

use crate::config::{Config, Entry};
use crate::error::ExitCodeError;
use crate::git::Repo;
use crate::layout::Layout;
use crate::pins::PinStore;

/// The predicate's verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloneStatus {
    /// Safe to wipe: everything is reproducible from pins.
    Clean,
    /// Wiping would lose state; each string is one human-readable reason.
    Dirty(Vec<String>),
}

/// Decide whether the live clone for `name` diverges from its pins.
pub fn check(layout: &Layout, entry: &Entry, name: &str) -> Result<CloneStatus> {
    let clone_dir = layout.clone_dir(name);
    if !clone_dir.exists() {
        return Ok(CloneStatus::Clean);
    }

    let pins = PinStore::new(name, layout.pin_dir(name));
    if !pins.head_exists() {
        let reference_only = entry.refs.is_empty() && pins.list_local_patches().is_empty();
        if reference_only {
            return Ok(CloneStatus::Clean);
        }
        return Ok(CloneStatus::Dirty(vec![
            "clone exists but no HEAD pin is recorded".to_owned(),
        ]));
    }

    let pinned = pins.read_head()?;
    let repo = Repo::open(&clone_dir);
    let mut reasons = Vec::new();

    let head = repo.head_sha()?;
    if head != pinned {
        reasons.push(format!(
            "HEAD {} diverged from pinned {}",
            &head[..8],
            &pinned[..8]
        ));
        for line in repo.log_oneline_range(&pinned, &head)?.lines() {
            reasons.push(format!("  commit: {line}"));
        }
    }

    if !repo.diff_clean(&pinned, false)? {
        reasons.push("worktree differs from pinned HEAD".to_owned());
        for line in repo.diff_stat(&pinned)?.lines() {
            reasons.push(format!("  {}", line.trim()));
        }
    } else if !repo.diff_clean(&pinned, true)? {
        reasons.push("index differs from pinned HEAD".to_owned());
    }

    let untracked = repo.list_untracked()?;
    if !untracked.is_empty() {
        reasons.push(format!("{} untracked file(s)", untracked.len()));
        for path in &untracked {
            reasons.push(format!("  untracked: {path}"));
        }
    }

    let stashes = repo.stash_list()?;
    if !stashes.is_empty() {
        reasons.push(format!("{} stashed entr(y/ies)", stashes.len()));
        for stash in &stashes {
            reasons.push(format!("  {stash}"));
        }
    }

    if reasons.is_empty() {
        Ok(CloneStatus::Clean)
    } else {
        Ok(CloneStatus::Dirty(reasons))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Exit 0 when clean, 1 when dirty.
pub fn run(layout: &Layout, config: &Config, name: &str) -> Result<()> {
    let entry = config.get(name)?;
    match check(layout, entry, name)? {
        CloneStatus::Clean => {
            println!("{name}: clean");
            Ok(())
        }
        CloneStatus::Dirty(reasons) => {
            println!("{name}: dirty");
            for reason in &reasons {
                println!("  - {reason}");
            }
            Err(ExitCodeError(1).into())
        }
    }
}

/// Status of every entry; exit code is the OR of the individual verdicts.
pub fn run_all(layout: &Layout, config: &Config) -> Result<()> {
    let mut any_dirty = false;
    for name in config.all_names() {
        let entry = config.get(&name)?;
        match check(layout, entry, &name)? {
            CloneStatus::Clean => println!("{name}: clean"),
            CloneStatus::Dirty(reasons) => {
                any_dirty = true;
                println!("{name}: dirty");
                for reason in &reasons {
                    println!("  - {reason}");
                }
            }
        }
    }
    if any_dirty {
        Err(ExitCodeError(1).into())
    } else {
        Ok(())
    }
}
