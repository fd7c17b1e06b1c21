//! Status predicate, guard behavior, and lifecycle commands.

mod common;

use common::*;

// -- S6: the guard blocks destructive commands on local work --

#[test]
fn guard_blocks_record_until_wip_is_restored() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);
    let pinned = fixture.pin("HEAD").unwrap().trim().to_string();

    // User commits on wip.
    std::fs::write(fixture.clone_dir().join("hack.txt"), "wip hack\n").unwrap();
    commit(&fixture.clone_dir(), "hack on wip");

    let status_out = regraft_fails(fixture.root.path(), &["status", "ccc"]);
    assert!(status_out.contains("dirty"));
    assert!(status_out.contains("diverged from pinned"));
    assert!(status_out.contains("hack on wip"), "lists intervening commits");

    let record_out = regraft_fails(fixture.root.path(), &["record", "ccc"]);
    assert!(record_out.contains("local state that would be lost"));
    assert!(record_out.contains("regraft save ccc"));

    let clean_out = regraft_fails(fixture.root.path(), &["clean", "ccc"]);
    assert!(clean_out.contains("local state that would be lost"));

    // Restore the pinned HEAD; everything unblocks.
    git(&fixture.clone_dir(), &["reset", "--hard", &pinned]);
    regraft_ok(fixture.root.path(), &["status", "ccc"]);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);
}

#[test]
fn untracked_files_make_status_dirty() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);

    std::fs::write(fixture.clone_dir().join("scratch.txt"), "notes\n").unwrap();
    let out = regraft_fails(fixture.root.path(), &["status", "ccc"]);
    assert!(out.contains("untracked: scratch.txt"));

    std::fs::remove_file(fixture.clone_dir().join("scratch.txt")).unwrap();
    regraft_ok(fixture.root.path(), &["status", "ccc"]);
}

#[test]
fn worktree_edits_make_status_dirty() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);

    let app = fixture.clone_dir().join("app.txt");
    std::fs::write(&app, "mangled\n").unwrap();
    let out = regraft_fails(fixture.root.path(), &["status", "ccc"]);
    assert!(out.contains("worktree differs from pinned HEAD"));
}

// -- S9/reference-only entries --

#[test]
fn reference_only_entry_shallow_clones_and_stays_clean() {
    let fixture = setup(&[]);

    // No clone yet: clean.
    regraft_ok(fixture.root.path(), &["status", "ccc"]);

    // Replay shallow-clones without recording anything.
    regraft_ok(fixture.root.path(), &["replay", "ccc"]);
    assert!(fixture.clone_dir().exists());
    assert!(fixture.pin("manifest").is_none());
    assert!(fixture.pin("HEAD").is_none());

    // Still clean, so clean-all may wipe it.
    regraft_ok(fixture.root.path(), &["status", "ccc"]);
    regraft_ok(fixture.root.path(), &["clean", "ccc"]);
    assert!(!fixture.clone_dir().exists());
}

#[test]
fn replay_with_refs_but_no_manifest_skips_with_diagnostic() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);

    let out = regraft_in(fixture.root.path(), &["replay", "ccc"]);
    assert!(out.status.success(), "skip is not a failure");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("regraft record ccc"));
    assert!(!fixture.clone_dir().exists());
}

// -- reset --

#[test]
fn reset_removes_clone_and_pins() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);
    assert!(fixture.pin_dir().exists());

    regraft_ok(fixture.root.path(), &["reset", "ccc"]);
    assert!(!fixture.clone_dir().exists());
    assert!(!fixture.pin_dir().exists());
    regraft_ok(fixture.root.path(), &["status", "ccc"]);
}

// -- status-all aggregates --

#[test]
fn status_all_ors_the_verdicts() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);

    let stdout = regraft_ok(fixture.root.path(), &["status-all"]);
    assert!(stdout.contains("ccc: clean"));

    std::fs::write(fixture.clone_dir().join("scratch.txt"), "x\n").unwrap();
    let out = regraft_fails(fixture.root.path(), &["status-all"]);
    assert!(out.contains("ccc: dirty"));
}

// -- push --

#[test]
fn push_cherry_picks_wip_onto_pr_branch() {
    let fixture = setup(&["7"]);
    add_feature_branch(&fixture);
    git(
        fixture.upstream.path(),
        &["update-ref", "refs/pull/7/head", "feature"],
    );
    regraft_ok(fixture.root.path(), &["record", "ccc"]);

    // The cherry-pick commits as the user, so the clone needs an identity.
    git(&fixture.clone_dir(), &["config", "user.name", "test"]);
    git(&fixture.clone_dir(), &["config", "user.email", "test@test"]);

    // One commit of local work on wip.
    std::fs::write(fixture.clone_dir().join("fix.txt"), "the fix\n").unwrap();
    commit(&fixture.clone_dir(), "fix: the fix");

    let stdout = regraft_ok(fixture.root.path(), &["push", "ccc"]);
    assert!(stdout.contains("onto pr-7"));

    let branch = git(&fixture.clone_dir(), &["rev-parse", "--abbrev-ref", "HEAD"]);
    assert_eq!(branch.trim(), "pr-7");
    assert!(fixture.clone_dir().join("fix.txt").exists());
    let log = git(&fixture.clone_dir(), &["log", "--oneline", "-1"]);
    assert!(log.contains("fix: the fix"));
}

#[test]
fn push_requires_wip_branch() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);
    git(&fixture.clone_dir(), &["checkout", "-b", "elsewhere"]);

    let out = regraft_fails(fixture.root.path(), &["push", "ccc"]);
    assert!(out.contains("requires branch 'wip'"));
}

#[test]
fn push_without_pr_branch_asks_for_a_target() {
    let fixture = setup(&["feature"]);
    add_feature_branch(&fixture);
    regraft_ok(fixture.root.path(), &["record", "ccc"]);
    std::fs::write(fixture.clone_dir().join("fix.txt"), "x\n").unwrap();
    commit(&fixture.clone_dir(), "fix");

    let out = regraft_fails(fixture.root.path(), &["push", "ccc"]);
    assert!(out.contains("no pr-* branch"));
}

// -- config errors surface actionably --

#[test]
fn unknown_entry_is_a_config_error() {
    let fixture = setup(&[]);
    let out = regraft_fails(fixture.root.path(), &["status", "ghost"]);
    assert!(out.contains("ghost"));
    assert!(out.contains("not found"));
}
