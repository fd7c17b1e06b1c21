//! `push`: move local wip commits onto a PR branch.
//!
//! Cherry-picks `<pinned HEAD>..wip` onto the target branch (an explicit
//! argument, or the lexicographically last `pr-*` branch). A conflicted
//! cherry-pick is left in place for the user to finish — rolling back
//! would discard their half-done resolution.

use anyhow::{bail, Result};

use crate::error::ExitCodeError;
use crate::git::{MergeOutcome, Repo};
use crate::layout::Layout;
use crate::pins::PinStore;

pub fn run(layout: &Layout, name: &str, target: Option<&str>) -> Result<()> {
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
            "push requires branch 'wip' (currently on '{branch}').\n  \
             Switch back: git -C {} checkout wip",
            clone_dir.display()
        );
    }

    let target = match target {
        Some(t) => t.to_owned(),
        None => {
            // pr-* branches sort lexicographically; with several PR
            // branches present, pass the target explicitly.
            let mut candidates = repo.branches_matching("pr-*")?;
            match candidates.pop() {
                Some(last) => last,
                None => bail!(
                    "no pr-* branch to push onto.\n  \
                     Pass a target: regraft push {name} <branch>"
                ),
            }
        }
    };

    println!("Cherry-picking {}..wip onto {target}", &pinned[..8]);
    repo.checkout(&target)?;

    match repo.cherry_pick_range(&pinned, "wip")? {
        MergeOutcome::Clean => {
            println!(
                "Done. Review and push:\n  git -C {dir} push fork {target}",
                dir = clone_dir.display()
            );
            Ok(())
        }
        MergeOutcome::Conflicted => {
            // Deliberately no rollback: the user finishes or aborts.
            eprintln!(
                "Cherry-pick onto '{target}' hit conflicts. Finish it with:\n  \
                 git -C {dir} cherry-pick --continue\n\
                 or abort and return to wip:\n  \
                 git -C {dir} cherry-pick --abort && git -C {dir} checkout wip",
                dir = clone_dir.display()
            );
            Err(ExitCodeError(1).into())
        }
    }
}
