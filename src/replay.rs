//! The replay engine.
//!
//! Rebuilds a clone purely from pins: checkout the manifest base, merge
//! each recorded SHA, apply recorded resolutions positionally, run the
//! hook, apply local patches, and assert the result equals the pinned
//! HEAD. Replay never contacts the advisor; network is only touched for
//! clone and fetches.

use std::fs;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::error::RegraftError;
use crate::git::{CloneMode, MergeOutcome, Repo};
use crate::hook::{run_post_merge_hook, PostMergeHook};
use crate::layout::Layout;
use crate::pins::{Manifest, PinStore};
use crate::record::{apply_local_patches, merge_message};
use crate::resolution;
use crate::stage::Staging;

/// Replay an entry from its pins.
pub fn run(layout: &Layout, config: &Config, name: &str, hook: &dyn PostMergeHook) -> Result<()> {
    let entry = config.get(name)?;

    if layout.clone_dir(name).exists() {
        println!(
            "'{name}' already exists at {}; nothing to do.",
            layout.clone_dir(name).display()
        );
        return Ok(());
    }

    let pins = PinStore::new(name, layout.pin_dir(name));
    let manifest = pins.read_manifest()?;

    match manifest {
        None if entry.refs.is_empty() => {
            // Reference-only entry: a shallow clone is the whole build.
            let staging = Staging::create(layout, name)?;
            println!("Shallow-cloning {} ...", entry.upstream);
            Repo::clone(&entry.upstream, staging.clone_dir(), CloneMode::Shallow)?;
            staging.swap_clone_only(layout, name)?;
            println!("Cloned reference-only entry '{name}'.");
            Ok(())
        }
        None => {
            eprintln!(
                "'{name}' has refs configured but no manifest; cannot replay.\n  \
                 Record it first: regraft record {name}"
            );
            Ok(())
        }
        Some(manifest) => match replay_staged(layout, entry, name, &pins, &manifest, hook) {
            Ok(head) => {
                println!("Replayed '{name}' at {head}.");
                Ok(())
            }
            Err(err) => {
                eprintln!("FAILED — previous state is intact");
                Err(err)
            }
        },
    }
}

fn replay_staged(
    layout: &Layout,
    entry: &crate::config::Entry,
    name: &str,
    pins: &PinStore,
    manifest: &Manifest,
    hook: &dyn PostMergeHook,
) -> Result<String> {
    let staging = Staging::create(layout, name)?;

    println!("Cloning {} ...", entry.upstream);
    let repo = Repo::clone(&entry.upstream, staging.clone_dir(), CloneMode::Blobless)?;
    repo.set_deterministic_options()?;
    repo.checkout(&manifest.base_sha)?;
    repo.create_branch("wip")?;

    for (i, step) in manifest.steps.iter().enumerate() {
        let k = i + 1;
        if !repo.has_object(&format!("{}^{{commit}}", step.sha)) {
            repo.fetch_sha(&step.sha, None)?;
        }

        println!(
            "[{k}/{}] merge {} ({})",
            manifest.merge_count(),
            &step.sha[..8],
            step.r#ref
        );
        let message = merge_message(&step.r#ref);
        match repo.merge_no_ff(&step.sha, &message, k as u64)? {
            MergeOutcome::Clean => {}
            MergeOutcome::Conflicted => {
                apply_recorded_resolutions(&repo, pins, name, k)?;
                repo.write_merge_msg(&message)?;
                repo.merge_continue_noedit(k as u64)?;
            }
        }
    }

    run_post_merge_hook(&repo, hook, manifest.merge_count())?;
    apply_local_patches(&repo, &pins.list_local_patches(), manifest.merge_count())?;

    let pinned = pins.read_head()?;
    let actual = repo.head_sha()?;
    if pinned != actual {
        return Err(RegraftError::HeadMismatch {
            name: name.to_owned(),
            pinned,
            actual,
        }
        .into());
    }

    if let Some(fork) = &entry.fork {
        repo.add_remote("fork", fork)?;
    }

    staging.swap_clone_only(layout, name)?;
    info!(name, head = %actual, "replay complete");
    Ok(actual)
}

/// Apply the recorded sidecar for merge step `k` to every unmerged path.
fn apply_recorded_resolutions(
    repo: &Repo,
    pins: &PinStore,
    name: &str,
    k: usize,
) -> Result<()> {
    let text = pins.read_resolution(k).ok_or_else(|| RegraftError::StateMissing {
        name: name.to_owned(),
        pin: format!("res-{k}.resolution"),
    })?;
    let sidecar = resolution::parse(&text)?;

    let unmerged = repo.list_unmerged()?;
    if sidecar.blocks.len() != unmerged.len() {
        return Err(RegraftError::ResolutionFormat {
            detail: format!(
                "merge step {k} has {} conflicted file(s) but the sidecar records {}",
                unmerged.len(),
                sidecar.blocks.len()
            ),
        }
        .into());
    }

    for path in &unmerged {
        let block = sidecar
            .block_for(path)
            .ok_or_else(|| RegraftError::ResolutionFormat {
                detail: format!("sidecar for merge step {k} has no block for '{path}'"),
            })?;
        let conflicted = fs::read_to_string(repo.dir().join(path))?;
        let resolved = resolution::apply_block(block, &conflicted)?;
        fs::write(repo.dir().join(path), resolved)?;
        repo.stage(path)?;
    }
    Ok(())
}
