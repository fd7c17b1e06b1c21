//! Shared test helpers for regraft integration tests.
//!
//! All tests run against real git repositories in temp directories — no
//! side effects outside them. `setup(...)` builds an outer repo (with
//! forks.json) plus a local upstream whose upload-pack is configured to
//! serve partial clones and any-SHA fetches, the way real hosts do.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

pub struct Fixture {
    /// Outer repo root: forks.json, pins/, clones/.
    pub root: TempDir,
    /// The upstream repository the entry clones from.
    pub upstream: TempDir,
}

impl Fixture {
    pub fn upstream_url(&self) -> String {
        format!("file://{}", self.upstream.path().display())
    }

    pub fn clone_dir(&self) -> PathBuf {
        self.root.path().join("clones/ccc")
    }

    pub fn pin_dir(&self) -> PathBuf {
        self.root.path().join("pins/ccc")
    }

    pub fn pin(&self, file: &str) -> Option<String> {
        std::fs::read_to_string(self.pin_dir().join(file)).ok()
    }

    /// Rewrite forks.json with the given refs for entry "ccc".
    pub fn set_refs(&self, refs: &[&str]) {
        write_config(self.root.path(), &self.upstream_url(), refs);
    }
}

/// Build a fixture: upstream with one base commit on `main`, and an outer
/// repo whose single entry "ccc" merges `refs`.
pub fn setup(refs: &[&str]) -> Fixture {
    let upstream = TempDir::new().expect("failed to create upstream temp dir");
    git(upstream.path(), &["init", "-b", "main"]);
    // Serve partial clones and exact-SHA fetches like a real host.
    git(upstream.path(), &["config", "uploadpack.allowFilter", "true"]);
    git(
        upstream.path(),
        &["config", "uploadpack.allowAnySHA1InWant", "true"],
    );
    std::fs::write(
        upstream.path().join("app.txt"),
        "alpha\nbeta\ngamma\n",
    )
    .unwrap();
    commit(upstream.path(), "base commit");

    let root = TempDir::new().expect("failed to create outer temp dir");
    write_config(
        root.path(),
        &format!("file://{}", upstream.path().display()),
        refs,
    );

    Fixture { root, upstream }
}

fn write_config(root: &Path, upstream_url: &str, refs: &[&str]) {
    let refs_json: Vec<String> = refs.iter().map(|r| format!("\"{r}\"")).collect();
    let config = format!(
        "{{ \"ccc\": {{ \"upstream\": \"{upstream_url}\", \"refs\": [{}] }} }}\n",
        refs_json.join(", ")
    );
    std::fs::write(root.join("forks.json"), config).unwrap();
}

/// Run git in a directory; panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@test")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@test")
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "git {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.to_string()
}

/// Stage everything and commit.
pub fn commit(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", message]);
}

/// Add a non-conflicting `feature` branch to the upstream: one commit on
/// top of main that appends a line.
pub fn add_feature_branch(fixture: &Fixture) {
    let dir = fixture.upstream.path();
    git(dir, &["checkout", "-b", "feature"]);
    std::fs::write(dir.join("app.txt"), "alpha\nbeta\ngamma\ndelta\n").unwrap();
    commit(dir, "feature: add delta");
    git(dir, &["checkout", "main"]);
}

/// Add a `clash` branch and a diverging commit on main so merging `clash`
/// conflicts on the `beta` line (diff3: ours=beta-main, base=beta,
/// theirs=beta-side).
pub fn add_conflicting_branch(fixture: &Fixture) {
    let dir = fixture.upstream.path();
    git(dir, &["checkout", "-b", "clash"]);
    std::fs::write(dir.join("app.txt"), "alpha\nbeta-side\ngamma\n").unwrap();
    commit(dir, "clash: change beta");
    git(dir, &["checkout", "main"]);
    std::fs::write(dir.join("app.txt"), "alpha\nbeta-main\ngamma\n").unwrap();
    commit(dir, "main: change beta");
}

/// Run regraft with the given args inside the outer repo.
pub fn regraft_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_regraft"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to execute regraft")
}

/// Run regraft and assert success. Returns stdout.
pub fn regraft_ok(dir: &Path, args: &[&str]) -> String {
    let out = regraft_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "regraft {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.to_string()
}

/// Run regraft and assert failure. Returns stderr + stdout.
pub fn regraft_fails(dir: &Path, args: &[&str]) -> String {
    let out = regraft_in(dir, args);
    assert!(
        !out.status.success(),
        "Expected regraft {} to fail, but it succeeded.\nstdout: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
    );
    format!(
        "{}{}",
        String::from_utf8_lossy(&out.stderr),
        String::from_utf8_lossy(&out.stdout)
    )
}

/// HEAD SHA of a repository directory.
pub fn head_of(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"]).trim().to_string()
}

// ---------------------------------------------------------------------------
// Scripted advisor for library-level record tests
// ---------------------------------------------------------------------------

use std::sync::Mutex;

use regraft::advisor::Advisor;
use regraft::error::RegraftError;

/// Advisor with queued responses; errors when the script runs dry, so an
/// `UnreachableAdvisor` is just an empty script.
pub struct ScriptedAdvisor {
    classify: Mutex<Vec<String>>,
    generate: Mutex<Vec<String>>,
    pub classify_calls: Mutex<usize>,
    pub generate_calls: Mutex<usize>,
}

impl ScriptedAdvisor {
    pub fn new(classify: &[&str], generate: &[&str]) -> Self {
        Self {
            classify: Mutex::new(classify.iter().rev().map(|s| (*s).to_owned()).collect()),
            generate: Mutex::new(generate.iter().rev().map(|s| (*s).to_owned()).collect()),
            classify_calls: Mutex::new(0),
            generate_calls: Mutex::new(0),
        }
    }

    /// An advisor that must never be consulted.
    pub fn unreachable() -> Self {
        Self::new(&[], &[])
    }

    pub fn total_calls(&self) -> usize {
        *self.classify_calls.lock().unwrap() + *self.generate_calls.lock().unwrap()
    }
}

impl Advisor for ScriptedAdvisor {
    fn classify(&self, _prompt: &str) -> Result<String, RegraftError> {
        *self.classify_calls.lock().unwrap() += 1;
        self.classify
            .lock()
            .unwrap()
            .pop()
            .ok_or(RegraftError::Advisor {
                detail: "unexpected classify call".to_owned(),
            })
    }

    fn generate(&self, _prompt: &str) -> Result<String, RegraftError> {
        *self.generate_calls.lock().unwrap() += 1;
        self.generate
            .lock()
            .unwrap()
            .pop()
            .ok_or(RegraftError::Advisor {
                detail: "unexpected generate call".to_owned(),
            })
    }
}
