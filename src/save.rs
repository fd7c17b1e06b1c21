//! `save`: capture local work as a numbered patch pin.
//!
//! The patch is `git diff --cached <pinned HEAD>` with everything staged,
//! so committed, staged, and untracked changes all land in one file. The
//! clone is then rebuilt from the pre-patch base with every patch applied
//! as a deterministic commit, which keeps the pinned HEAD reproducible by
//! replay.

use std::fs;

use anyhow::{bail, Context, Result};

use crate::error::RegraftError;
use crate::git::Repo;
use crate::layout::Layout;
use crate::pins::PinStore;
use crate::record::apply_local_patches;

/// Reduce a description to `[A-Za-z0-9_-]+`: invalid runs collapse to a
/// single `-`, and an empty result falls back to `local`.
pub fn sanitize_desc(desc: &str) -> String {
    let mut out = String::with_capacity(desc.len());
    let mut last_was_dash = false;
    for ch in desc.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
            last_was_dash = ch == '-';
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    let out = out.trim_matches('-').to_owned();
    if out.is_empty() {
        "local".to_owned()
    } else {
        out
    }
}

pub fn run(layout: &Layout, name: &str, desc: Option<&str>) -> Result<()> {
    let clone_dir = layout.clone_dir(name);
    if !clone_dir.exists() {
        bail!(
            "no clone for '{name}' at {}\n  Build it first: regraft replay {name}",
            clone_dir.display()
        );
    }

    let pins = PinStore::new(name, layout.pin_dir(name));
    let pinned = pins.read_head()?;
    let repo = Repo::open(&clone_dir);

    let branch = repo.current_branch()?;
    if branch != "wip" {
        bail!(
            "save requires branch 'wip' (currently on '{branch}').\n  \
             Switch back: git -C {} checkout wip",
            clone_dir.display()
        );
    }

    // No-op when nothing changed vs the pinned HEAD: no commits on top,
    // clean worktree and index, nothing untracked.
    let head = repo.head_sha()?;
    if head == pinned
        && repo.diff_clean(&pinned, false)?
        && repo.diff_clean(&pinned, true)?
        && repo.list_untracked()?.is_empty()
    {
        println!("'{name}' has no changes vs pinned HEAD; nothing to save.");
        return Ok(());
    }

    let desc = sanitize_desc(desc.unwrap_or("local"));
    let existing = pins.list_local_patches();
    let number = existing.len() + 1;
    let file_name = format!("local-{number:03}-{desc}.patch");

    repo.stage_all()?;
    let diff = repo.diff_cached(&pinned)?;
    if diff.is_empty() {
        println!("'{name}' has no content changes; nothing to save.");
        return Ok(());
    }
    let patch_path = pins.write_local_patch(&file_name, &diff)?;
    println!("Wrote {file_name}");

    // Rebuild: drop back to the pre-local-patches commit, then re-apply
    // every patch (including the new one) as deterministic commits.
    let merge_count = pins.merge_count()?;
    let base = format!("{pinned}~{}", existing.len());
    let rebuild = (|| -> Result<String, RegraftError> {
        repo.reset_hard(&base)?;
        apply_local_patches(&repo, &pins.list_local_patches(), merge_count)?;
        repo.head_sha()
    })();

    match rebuild {
        Ok(new_head) => {
            pins.write_head(&new_head)?;
            println!("Saved '{name}'; pinned HEAD is now {new_head}.");
            Ok(())
        }
        Err(err) => {
            fs::remove_file(&patch_path).ok();
            Err(err).with_context(|| {
                format!(
                    "re-applying local patches failed; removed {file_name}.\n  \
                     Restore the clone with: git -C {} reset --hard {pinned}",
                    clone_dir.display()
                )
            })
        }
    }
}
