//! The record engine.
//!
//! Builds a fresh clone in staging (base checkout, merge-by-SHA loop with
//! conflict resolution, post-merge hook, local patches), writes the pins,
//! and atomically swaps the result into place. Any failure after staging
//! begins removes the staging dirs and leaves the prior state intact;
//! local patches and old resolutions preserved at the start survive in
//! their temp location either way.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use rayon::prelude::*;
use tracing::info;

use crate::advisor::Advisor;
use crate::config::{Config, RefKind};
use crate::error::RegraftError;
use crate::git::{CloneMode, MergeOutcome, Repo};
use crate::hook::{run_post_merge_hook, PostMergeHook};
use crate::layout::Layout;
use crate::pins::{Manifest, PinStore};
use crate::resolution;
use crate::resolve::resolve_file;
use crate::stage::{Preserved, Staging};
use crate::status::{self, CloneStatus};

/// Merge-commit message for a configured ref. Record writes it and replay
/// reproduces it from the manifest, so the commit bytes agree.
pub fn merge_message(r: &str) -> String {
    format!("Merge {r} into wip")
}

/// Record an entry: rebuild its clone from upstream plus refs, resolving
/// conflicts through the advisor, and pin the result.
pub fn run(
    layout: &Layout,
    config: &Config,
    name: &str,
    refs_override: &[String],
    advisor: &dyn Advisor,
    hook: &dyn PostMergeHook,
) -> Result<()> {
    let entry = config.get(name)?;

    if let CloneStatus::Dirty(reasons) = status::check(layout, entry, name)? {
        return Err(RegraftError::GuardFailed {
            name: name.to_owned(),
            reasons,
        }
        .into());
    }

    let refs: Vec<String> = if refs_override.is_empty() {
        entry.refs.clone()
    } else {
        refs_override.to_vec()
    };

    let preserved = Preserved::take_from(&layout.pin_dir(name))?;

    match record_staged(layout, entry, name, &refs, &preserved, advisor, hook) {
        Ok(head) => {
            preserved.discard();
            println!("Recorded '{name}' at {head}.");
            Ok(())
        }
        Err(err) => {
            eprintln!("FAILED — previous state is intact");
            if !preserved.is_empty() {
                eprintln!(
                    "  preserved patches/resolutions: {}",
                    preserved.dir().display()
                );
            }
            Err(err)
        }
    }
}

fn record_staged(
    layout: &Layout,
    entry: &crate::config::Entry,
    name: &str,
    refs: &[String],
    preserved: &Preserved,
    advisor: &dyn Advisor,
    hook: &dyn PostMergeHook,
) -> Result<String> {
    let staging = Staging::create(layout, name)?;
    let pins = PinStore::new(name, staging.pin_dir());

    println!("Cloning {} ...", entry.upstream);
    let repo = Repo::clone(&entry.upstream, staging.clone_dir(), CloneMode::Blobless)?;
    repo.set_deterministic_options()?;

    let base_branch = repo.current_branch()?;
    let base_sha = repo.head_sha()?;
    repo.create_branch("wip")?;
    let mut manifest = Manifest::new(base_sha, base_branch)?;
    pins.write_manifest(&manifest)?;

    for (i, r) in refs.iter().enumerate() {
        let step = i + 1;
        let kind = RefKind::of(r);
        let sha = fetch_ref(&repo, r, &kind)?;
        manifest.push_step(sha.clone(), r.clone())?;
        pins.write_manifest(&manifest)?;

        println!("[{step}/{}] merge {} ({kind} {r})", refs.len(), &sha[..8]);
        let message = merge_message(r);
        match repo.merge_no_ff(&sha, &message, step as u64)? {
            MergeOutcome::Clean => {}
            MergeOutcome::Conflicted => {
                resolve_step(&repo, &pins, step, preserved, advisor, &message)?;
            }
        }
    }

    let merge_count = manifest.merge_count();
    run_post_merge_hook(&repo, hook, merge_count)?;

    // Restore preserved local patches into the staging pins, then replay
    // them as deterministic commits.
    for patch in preserved.local_patches() {
        let file_name = patch.file_name().expect("patch has a file name");
        fs::copy(&patch, pins.dir().join(file_name))?;
    }
    apply_local_patches(&repo, &pins.list_local_patches(), merge_count)?;

    let head = repo.head_sha()?;
    pins.write_head(&head)?;

    if let Some(fork) = &entry.fork {
        repo.add_remote("fork", fork)?;
    }

    staging.swap(layout, name)?;
    info!(name, head = %head, "record complete");
    Ok(head)
}

/// Resolve one conflicted merge step and continue the merge.
fn resolve_step(
    repo: &Repo,
    pins: &PinStore,
    step: usize,
    preserved: &Preserved,
    advisor: &dyn Advisor,
    message: &str,
) -> Result<()> {
    let paths = repo.list_unmerged()?;
    println!("  resolving {} conflicted file(s)", paths.len());

    let prior = preserved
        .resolution(step)
        .and_then(|text| resolution::parse(&text).ok());

    let inputs: Vec<(String, String)> = paths
        .iter()
        .map(|path| {
            let content = fs::read_to_string(repo.dir().join(path))?;
            Ok((path.clone(), content))
        })
        .collect::<Result<_>>()?;

    // Files resolve in parallel; hunks within a file are sequential. Any
    // failure cancels the whole record.
    let results: Vec<crate::resolve::ResolvedFile> = inputs
        .par_iter()
        .map(|(path, content)| {
            let block = prior.as_ref().and_then(|p| p.block_for(path));
            resolve_file(path, content, block, advisor)
        })
        .collect::<Result<_, RegraftError>>()?;

    let mut sidecars = String::new();
    for ((path, _), resolved) in inputs.iter().zip(&results) {
        if resolved.content.is_empty() {
            return Err(RegraftError::ResolutionFormat {
                detail: format!("resolver produced an empty file for '{path}'"),
            }
            .into());
        }
        if resolution::count_conflict_markers(&resolved.content) != 0 {
            return Err(RegraftError::ResolutionFormat {
                detail: format!("resolver left conflict markers in '{path}'"),
            }
            .into());
        }
        fs::write(repo.dir().join(path), &resolved.content)?;
        repo.stage(path)?;
        sidecars.push_str(&resolved.sidecar);
    }

    pins.write_resolution(step, &sidecars)?;
    repo.write_merge_msg(message)?;
    repo.merge_continue_noedit(step as u64)?;
    Ok(())
}

/// Fetch a ref by its dispatched kind and resolve it to a full SHA.
fn fetch_ref(repo: &Repo, r: &str, kind: &RefKind) -> Result<String, RegraftError> {
    match kind {
        RefKind::Hash => {
            let spec = format!("{r}^{{commit}}");
            if !repo.has_object(&spec) {
                repo.fetch_sha(r, None)?;
            }
            repo.rev_parse(&spec)
        }
        RefKind::PullRequest(n) => {
            repo.fetch_pr(*n)?;
            repo.rev_parse(&format!("pr-{n}"))
        }
        RefKind::Branch => {
            repo.fetch_branch(r)?;
            repo.rev_parse("FETCH_HEAD")
        }
    }
}

/// Apply local patches in order, one deterministic commit each.
///
/// The i-th patch (0-based, lexicographic order) commits with timestamp
/// `merge_count + 2 + i`; the message is derived from the file stem so
/// record, replay, and save all produce identical commits.
pub fn apply_local_patches(
    repo: &Repo,
    patches: &[PathBuf],
    merge_count: usize,
) -> Result<(), RegraftError> {
    for (i, patch) in patches.iter().enumerate() {
        let stem = patch
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = stem.strip_prefix("local-").unwrap_or(&stem);
        println!("  applying {label}");
        repo.apply_patch(patch)
            .map_err(|e| RegraftError::LocalPatch {
                patch: patch.clone(),
                detail: e.to_string(),
            })?;
        repo.commit(&format!("local: {label}"), (merge_count + 2 + i) as u64)?;
    }
    Ok(())
}
