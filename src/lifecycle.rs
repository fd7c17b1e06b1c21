//! Destructive lifecycle commands and the `*-all` aggregates.
//!
//! `clean` and `reset` both run the status predicate first; a dirty clone
//! is never deleted. `reset` additionally removes the pins, returning the
//! entry to its unrecorded state.

use std::fs;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::RegraftError;
use crate::hook::PostMergeHook;
use crate::layout::Layout;
use crate::replay;
use crate::status::{self, CloneStatus};

/// Remove the clone after the status guard allows it.
pub fn clean(layout: &Layout, config: &Config, name: &str) -> Result<()> {
    let entry = config.get(name)?;
    if let CloneStatus::Dirty(reasons) = status::check(layout, entry, name)? {
        return Err(RegraftError::GuardFailed {
            name: name.to_owned(),
            reasons,
        }
        .into());
    }

    let clone_dir = layout.clone_dir(name);
    if clone_dir.exists() {
        fs::remove_dir_all(&clone_dir)
            .with_context(|| format!("failed to remove {}", clone_dir.display()))?;
        println!("Removed clone '{name}'.");
    } else {
        println!("'{name}' has no clone; nothing to remove.");
    }
    Ok(())
}

/// `clean` plus pin removal.
pub fn reset(layout: &Layout, config: &Config, name: &str) -> Result<()> {
    clean(layout, config, name)?;

    let pin_dir = layout.pin_dir(name);
    if pin_dir.exists() {
        fs::remove_dir_all(&pin_dir)
            .with_context(|| format!("failed to remove {}", pin_dir.display()))?;
        println!("Removed pins for '{name}'.");
    }
    Ok(())
}

/// Clean every entry; keeps going past per-entry failures.
pub fn clean_all(layout: &Layout, config: &Config) -> Result<()> {
    run_for_all(config, |name| clean(layout, config, name))
}

/// Replay every entry; keeps going past per-entry failures.
pub fn replay_all(
    layout: &Layout,
    config: &Config,
    hook: &dyn PostMergeHook,
) -> Result<()> {
    run_for_all(config, |name| replay::run(layout, config, name, hook))
}

fn run_for_all(config: &Config, mut op: impl FnMut(&str) -> Result<()>) -> Result<()> {
    let mut failures = Vec::new();
    for name in config.all_names() {
        if let Err(err) = op(&name) {
            eprintln!("{name}: {err:#}");
            failures.push(name);
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} entr(y/ies) failed: {}", failures.len(), failures.join(", "))
    }
}
