//! The post-merge hook seam.
//!
//! Some entries need repository-specific surgery after the merge loop
//! (rewriting package descriptors to point at source trees, and the like).
//! The engines model that as one pluggable hook invocation; whatever it
//! changes is committed once, deterministically, in both record and replay.

use crate::error::RegraftError;
use crate::git::Repo;

/// Commit message for the hook's tree mutations.
pub const HOOK_COMMIT_MESSAGE: &str = "patch: source-level type resolution";

/// Invoked once per record/replay after the last merge step.
pub trait PostMergeHook: Sync {
    /// Mutate the merged worktree. Return `true` when anything changed.
    fn run(&self, repo: &Repo) -> Result<bool, RegraftError>;
}

/// The default hook: touches nothing.
pub struct NoopHook;

impl PostMergeHook for NoopHook {
    fn run(&self, _repo: &Repo) -> Result<bool, RegraftError> {
        Ok(false)
    }
}

/// Run the hook and commit its changes with timestamp `merge_count + 1`.
///
/// Idempotent: a hook that claims changes but leaves the tree identical
/// creates no commit, so the local-patch timestamp offsets stay valid.
pub fn run_post_merge_hook(
    repo: &Repo,
    hook: &dyn PostMergeHook,
    merge_count: usize,
) -> Result<(), RegraftError> {
    if !hook.run(repo)? {
        return Ok(());
    }
    repo.stage_all()?;
    if repo.index_clean()? {
        return Ok(());
    }
    repo.commit(HOOK_COMMIT_MESSAGE, (merge_count + 1) as u64)
}
