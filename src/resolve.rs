//! Record-time conflict resolution for a single file.
//!
//! A conflicted file is resolved hunk by hunk through a cascade:
//!
//! 1. **Tier 0**: mechanical resolution, one side equals the base (take the other),
//!    or both sides agree.
//! 2. **Reuse**: a prior recording resolved the same hunk (matched by
//!    fingerprint, or by section line counts for legacy sidecars without
//!    fingerprints).
//! 3. **Tier 1**: the advisor picks a whole-hunk strategy per conflict in
//!    one batched call.
//! 4. **Tier 2**: the advisor writes merged code for whatever is left, in
//!    one batched call.
//!
//! The finalized resolutions are emitted through the codec and then applied
//! back onto the conflicted input, so the returned content is by
//! construction what replay will reproduce.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::RegraftError;
use crate::resolution::{
    self, apply_block, emit_block, fingerprint, CountedResolution, FileBlock,
};
use crate::advisor::Advisor;

// ---------------------------------------------------------------------------
// Hunk extraction
// ---------------------------------------------------------------------------

/// One diff3 conflict region, partitioned into its three sections.
///
/// Edit/delete conflicts legitimately produce empty sections; an empty
/// buffer is a zero-length section, not an absence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hunk {
    pub ours: Vec<String>,
    pub base: Vec<String>,
    pub theirs: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Ours,
    Base,
    Theirs,
}

fn is_marker(line: &str, ch: u8) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 7 && bytes[..7].iter().all(|&b| b == ch) && bytes.get(7) != Some(&ch)
}

/// Partition every conflict region of `content` into hunks.
///
/// Requires diff3 markers: a `=======` before any `|||||||` means the clone
/// was not configured for diff3 and the record cannot proceed.
pub fn extract_hunks(content: &str) -> Result<Vec<Hunk>, RegraftError> {
    let mut hunks = Vec::new();
    let mut current = Hunk::default();
    let mut section = Section::Outside;

    for line in content.lines() {
        match section {
            Section::Outside => {
                if is_marker(line, b'<') {
                    current = Hunk::default();
                    section = Section::Ours;
                }
            }
            Section::Ours => {
                if is_marker(line, b'|') {
                    section = Section::Base;
                } else if is_marker(line, b'=') {
                    return Err(format_err(
                        "conflict has no ancestor section; expected diff3 markers",
                    ));
                } else {
                    current.ours.push(line.to_owned());
                }
            }
            Section::Base => {
                if is_marker(line, b'=') {
                    section = Section::Theirs;
                } else {
                    current.base.push(line.to_owned());
                }
            }
            Section::Theirs => {
                if is_marker(line, b'>') {
                    hunks.push(std::mem::take(&mut current));
                    section = Section::Outside;
                } else {
                    current.theirs.push(line.to_owned());
                }
            }
        }
    }

    if section != Section::Outside {
        return Err(format_err("unterminated conflict region"));
    }
    Ok(hunks)
}

// ---------------------------------------------------------------------------
// Tier 1 strategies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Ours,
    Theirs,
    /// Ours then theirs.
    BothOt,
    /// Theirs then ours.
    BothTo,
    Generate,
}

impl Strategy {
    fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "OURS" => Self::Ours,
            "THEIRS" => Self::Theirs,
            "BOTH_OT" => Self::BothOt,
            "BOTH_TO" => Self::BothTo,
            // GENERATE and anything unrecognized defer to tier 2.
            _ => Self::Generate,
        }
    }

    fn apply(self, hunk: &Hunk) -> Option<Vec<String>> {
        match self {
            Self::Ours => Some(hunk.ours.clone()),
            Self::Theirs => Some(hunk.theirs.clone()),
            Self::BothOt => {
                Some(hunk.ours.iter().chain(&hunk.theirs).cloned().collect())
            }
            Self::BothTo => {
                Some(hunk.theirs.iter().chain(&hunk.ours).cloned().collect())
            }
            Self::Generate => None,
        }
    }
}

/// Parse `N STRATEGY` lines. Tolerant: extra whitespace is fine, and lines
/// whose first token is not an integer are ignored.
fn parse_classify(response: &str) -> BTreeMap<usize, Strategy> {
    let mut out = BTreeMap::new();
    for line in response.lines() {
        let mut tokens = line.split_whitespace();
        let Some(Ok(n)) = tokens.next().map(str::parse::<usize>) else {
            continue;
        };
        let Some(strategy) = tokens.next() else {
            continue;
        };
        out.insert(n, Strategy::parse(strategy));
    }
    out
}

/// Parse `=== RESOLUTION N ===` blocks. Every line between one header and
/// the next belongs to the block verbatim, leading blanks included.
fn parse_generate(response: &str) -> BTreeMap<usize, Vec<String>> {
    let mut out: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut current: Option<usize> = None;

    for line in response.lines() {
        if let Some(n) = parse_resolution_header(line) {
            current = Some(n);
            out.entry(n).or_default();
        } else if let Some(n) = current {
            out.get_mut(&n).expect("block opened above").push(line.to_owned());
        }
    }
    out
}

fn parse_resolution_header(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix("=== RESOLUTION ")?.strip_suffix("===")?;
    inner.trim().parse().ok()
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn render_conflict(n: usize, hunk: &Hunk) -> String {
    let mut out = format!("CONFLICT {n}\n--- ours ---\n");
    for line in &hunk.ours {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("--- base ---\n");
    for line in &hunk.base {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("--- theirs ---\n");
    for line in &hunk.theirs {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn render_classify_prompt(path: &str, items: &[(usize, &Hunk)]) -> String {
    let mut out = format!(
        "File: {path}\nChoose a strategy for each conflict. Answer one line per \
         conflict: `N STRATEGY` with STRATEGY in OURS, THEIRS, BOTH_OT, BOTH_TO, GENERATE.\n\n"
    );
    for (i, (_, hunk)) in items.iter().enumerate() {
        out.push_str(&render_conflict(i + 1, hunk));
        out.push('\n');
    }
    out
}

fn render_generate_prompt(path: &str, items: &[(usize, &Hunk)]) -> String {
    let mut out = format!(
        "File: {path}\nWrite the merged code for each conflict. Start each answer with \
         a line `=== RESOLUTION N ===` and emit only code after it.\n\n"
    );
    for (i, (_, hunk)) in items.iter().enumerate() {
        out.push_str(&render_conflict(i + 1, hunk));
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// The resolver
// ---------------------------------------------------------------------------

/// A fully resolved file plus its resolution sidecar block.
#[derive(Clone, Debug)]
pub struct ResolvedFile {
    /// The resolved working-tree content.
    pub content: String,
    /// The sidecar block, `--- <path>` header included.
    pub sidecar: String,
}

/// Resolve one conflicted file through the tier cascade.
///
/// `prior` is this path's block from the previous recording's sidecar, used
/// for reuse. The advisor is only contacted for hunks that survive tier 0
/// and reuse.
pub fn resolve_file(
    path: &str,
    conflicted: &str,
    prior: Option<&FileBlock>,
    advisor: &dyn Advisor,
) -> Result<ResolvedFile, RegraftError> {
    let hunks = extract_hunks(conflicted)?;
    if hunks.is_empty() {
        return Err(format_err(&format!(
            "'{path}' was reported conflicted but contains no conflict markers"
        )));
    }

    let mut resolved: Vec<Option<Vec<String>>> = vec![None; hunks.len()];

    // Tier 0: mechanical.
    for (k, hunk) in hunks.iter().enumerate() {
        resolved[k] = if hunk.ours == hunk.base {
            Some(hunk.theirs.clone())
        } else if hunk.theirs == hunk.base {
            Some(hunk.ours.clone())
        } else if hunk.ours == hunk.theirs {
            Some(hunk.ours.clone())
        } else {
            None
        };
    }

    // Reuse: fingerprint match is strong; a count match is only honored
    // for legacy records that never stored a fingerprint.
    if let Some(prior) = prior {
        for (k, hunk) in hunks.iter().enumerate() {
            if resolved[k].is_some() {
                continue;
            }
            let Some(previous) = prior.hunks.get(k) else {
                continue;
            };
            let reusable = match &previous.sha {
                Some(sha) => *sha == fingerprint(&hunk.ours, &hunk.base, &hunk.theirs),
                None => {
                    previous.ours == hunk.ours.len()
                        && previous.base == hunk.base.len()
                        && previous.theirs == hunk.theirs.len()
                }
            };
            if reusable {
                debug!(path, hunk = k + 1, "reusing prior resolution");
                resolved[k] = Some(previous.resolution.clone());
            }
        }
    }

    // Tier 1: batched strategy classification.
    let pending: Vec<(usize, &Hunk)> = hunks
        .iter()
        .enumerate()
        .filter(|(k, _)| resolved[*k].is_none())
        .map(|(k, h)| (k, h))
        .collect();

    let mut generate_queue: Vec<(usize, &Hunk)> = Vec::new();
    if !pending.is_empty() {
        let response = advisor.classify(&render_classify_prompt(path, &pending))?;
        let strategies = parse_classify(&response);
        for (i, (k, hunk)) in pending.iter().enumerate() {
            let strategy = strategies.get(&(i + 1)).copied().unwrap_or(Strategy::Generate);
            match strategy.apply(hunk) {
                Some(lines) => resolved[*k] = Some(lines),
                None => generate_queue.push((*k, hunk)),
            }
        }
    }

    // Tier 2: batched generation for the remainder.
    if !generate_queue.is_empty() {
        let response = advisor.generate(&render_generate_prompt(path, &generate_queue))?;
        let generated = parse_generate(&response);
        for (i, (k, _)) in generate_queue.iter().enumerate() {
            let lines = generated.get(&(i + 1)).ok_or_else(|| RegraftError::Advisor {
                detail: format!("response for '{path}' is missing RESOLUTION {}", i + 1),
            })?;
            resolved[*k] = Some(lines.clone());
        }
    }

    // Finalize: every hunk must be resolved; emit and re-apply via the
    // codec so counts are verified and the returned content is exactly what
    // replay will produce.
    let block = FileBlock {
        path: path.to_owned(),
        hunks: hunks
            .iter()
            .zip(&resolved)
            .map(|(hunk, resolution)| {
                let resolution = resolution
                    .clone()
                    .ok_or_else(|| format_err(&format!("unresolved hunk in '{path}'")))?;
                Ok(CountedResolution {
                    ours: hunk.ours.len(),
                    base: hunk.base.len(),
                    theirs: hunk.theirs.len(),
                    sha: Some(fingerprint(&hunk.ours, &hunk.base, &hunk.theirs)),
                    resolution,
                })
            })
            .collect::<Result<_, RegraftError>>()?,
    };

    let content = apply_block(&block, conflicted)?;
    if resolution::count_conflict_markers(&content) != 0 {
        return Err(format_err(&format!(
            "resolved content for '{path}' still contains conflict markers"
        )));
    }

    Ok(ResolvedFile {
        content,
        sidecar: emit_block(&block),
    })
}

fn format_err(detail: &str) -> RegraftError {
    RegraftError::ResolutionFormat {
        detail: detail.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted advisor: queued responses, call counting, fails when the
    /// script runs dry.
    struct ScriptedAdvisor {
        classify: Mutex<Vec<String>>,
        generate: Mutex<Vec<String>>,
        pub classify_calls: Mutex<usize>,
        pub generate_calls: Mutex<usize>,
    }

    impl ScriptedAdvisor {
        fn new(classify: &[&str], generate: &[&str]) -> Self {
            Self {
                classify: Mutex::new(classify.iter().rev().map(|s| (*s).to_owned()).collect()),
                generate: Mutex::new(generate.iter().rev().map(|s| (*s).to_owned()).collect()),
                classify_calls: Mutex::new(0),
                generate_calls: Mutex::new(0),
            }
        }

        /// An advisor that must never be consulted.
        fn unreachable() -> Self {
            Self::new(&[], &[])
        }
    }

    impl Advisor for ScriptedAdvisor {
        fn classify(&self, _prompt: &str) -> Result<String, RegraftError> {
            *self.classify_calls.lock().unwrap() += 1;
            self.classify.lock().unwrap().pop().ok_or(RegraftError::Advisor {
                detail: "unexpected classify call".to_owned(),
            })
        }

        fn generate(&self, _prompt: &str) -> Result<String, RegraftError> {
            *self.generate_calls.lock().unwrap() += 1;
            self.generate.lock().unwrap().pop().ok_or(RegraftError::Advisor {
                detail: "unexpected generate call".to_owned(),
            })
        }
    }

    fn conflict(ours: &[&str], base: &[&str], theirs: &[&str]) -> String {
        let mut out = String::from("<<<<<<< HEAD\n");
        for l in ours {
            out.push_str(l);
            out.push('\n');
        }
        out.push_str("||||||| 2222222222222222222222222222222222222222\n");
        for l in base {
            out.push_str(l);
            out.push('\n');
        }
        out.push_str("=======\n");
        for l in theirs {
            out.push_str(l);
            out.push('\n');
        }
        out.push_str(">>>>>>> 1111111111111111111111111111111111111111\n");
        out
    }

    #[test]
    fn extract_partitions_sections() {
        let content = format!("before\n{}after\n", conflict(&["o"], &["b"], &["t1", "t2"]));
        let hunks = extract_hunks(&content).unwrap();
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].ours, vec!["o"]);
        assert_eq!(hunks[0].base, vec!["b"]);
        assert_eq!(hunks[0].theirs, vec!["t1", "t2"]);
    }

    #[test]
    fn extract_handles_empty_sections() {
        // delete/edit conflict: our side removed the lines entirely
        let content = conflict(&[], &["b"], &["t"]);
        let hunks = extract_hunks(&content).unwrap();
        assert!(hunks[0].ours.is_empty());
        assert_eq!(hunks[0].base, vec!["b"]);
    }

    #[test]
    fn extract_rejects_two_way_markers() {
        let content = "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> x\n";
        let err = extract_hunks(content).unwrap_err();
        assert!(format!("{err}").contains("diff3"));
    }

    #[test]
    fn extract_rejects_unterminated_region() {
        let content = "<<<<<<< HEAD\nours\n";
        assert!(extract_hunks(content).is_err());
    }

    #[test]
    fn tier0_takes_theirs_when_ours_matches_base() {
        let content = conflict(&["same"], &["same"], &["new"]);
        let advisor = ScriptedAdvisor::unreachable();
        let resolved = resolve_file("a.rs", &content, None, &advisor).unwrap();
        assert_eq!(resolved.content, "new\n");
        assert_eq!(*advisor.classify_calls.lock().unwrap(), 0);
    }

    #[test]
    fn tier0_takes_ours_when_theirs_matches_base() {
        let content = conflict(&["new"], &["same"], &["same"]);
        let advisor = ScriptedAdvisor::unreachable();
        let resolved = resolve_file("a.rs", &content, None, &advisor).unwrap();
        assert_eq!(resolved.content, "new\n");
    }

    #[test]
    fn tier0_takes_ours_when_sides_agree() {
        let content = conflict(&["agree"], &["old"], &["agree"]);
        let advisor = ScriptedAdvisor::unreachable();
        let resolved = resolve_file("a.rs", &content, None, &advisor).unwrap();
        assert_eq!(resolved.content, "agree\n");
    }

    #[test]
    fn reuse_by_fingerprint_skips_advisor() {
        let content = conflict(&["o"], &["b"], &["t"]);
        let hunks = extract_hunks(&content).unwrap();
        let prior = FileBlock {
            path: "a.rs".to_owned(),
            hunks: vec![CountedResolution {
                ours: 1,
                base: 1,
                theirs: 1,
                resolution: vec!["merged".to_owned()],
                sha: Some(fingerprint(&hunks[0].ours, &hunks[0].base, &hunks[0].theirs)),
            }],
        };
        let advisor = ScriptedAdvisor::unreachable();
        let resolved = resolve_file("a.rs", &content, Some(&prior), &advisor).unwrap();
        assert_eq!(resolved.content, "merged\n");
        assert_eq!(*advisor.classify_calls.lock().unwrap(), 0);
    }

    #[test]
    fn reuse_by_counts_only_without_recorded_sha() {
        let content = conflict(&["o"], &["b"], &["t"]);
        let prior = FileBlock {
            path: "a.rs".to_owned(),
            hunks: vec![CountedResolution {
                ours: 1,
                base: 1,
                theirs: 1,
                resolution: vec!["legacy".to_owned()],
                sha: None,
            }],
        };
        let advisor = ScriptedAdvisor::unreachable();
        let resolved = resolve_file("a.rs", &content, Some(&prior), &advisor).unwrap();
        assert_eq!(resolved.content, "legacy\n");

        // The re-emitted sidecar has been upgraded with a fingerprint.
        assert!(resolved.sidecar.contains("sha="));
    }

    #[test]
    fn stale_fingerprint_falls_through_to_advisor() {
        let content = conflict(&["o"], &["b"], &["t"]);
        let prior = FileBlock {
            path: "a.rs".to_owned(),
            hunks: vec![CountedResolution {
                ours: 1,
                base: 1,
                theirs: 1,
                resolution: vec!["stale".to_owned()],
                sha: Some("f".repeat(64)),
            }],
        };
        let advisor = ScriptedAdvisor::new(&["1 THEIRS"], &[]);
        let resolved = resolve_file("a.rs", &content, Some(&prior), &advisor).unwrap();
        assert_eq!(resolved.content, "t\n");
        assert_eq!(*advisor.classify_calls.lock().unwrap(), 1);
    }

    #[test]
    fn tier1_strategies_map_to_section_orders() {
        let content = format!(
            "{}{}{}{}",
            conflict(&["o1"], &["b1"], &["t1"]),
            conflict(&["o2"], &["b2"], &["t2"]),
            conflict(&["o3"], &["b3"], &["t3"]),
            conflict(&["o4"], &["b4"], &["t4"]),
        );
        let advisor = ScriptedAdvisor::new(&["1 OURS\n2 THEIRS\n3 BOTH_OT\n4 BOTH_TO"], &[]);
        let resolved = resolve_file("a.rs", &content, None, &advisor).unwrap();
        assert_eq!(resolved.content, "o1\nt2\no3\nt3\nt4\no4\n");
        assert_eq!(*advisor.generate_calls.lock().unwrap(), 0);
    }

    #[test]
    fn tier1_parser_ignores_junk_and_defers_unknown() {
        let response = "Sure, here are my picks:\n  1   OURS  \nnot a line\n2 FROBNICATE";
        let parsed = parse_classify(response);
        assert_eq!(parsed[&1], Strategy::Ours);
        assert_eq!(parsed[&2], Strategy::Generate);
    }

    #[test]
    fn tier2_generates_remaining_hunks() {
        let content = conflict(&["o"], &["b"], &["t"]);
        let advisor = ScriptedAdvisor::new(
            &["1 GENERATE"],
            &["=== RESOLUTION 1 ===\nmerged_line_1\nmerged_line_2"],
        );
        let resolved = resolve_file("a.rs", &content, None, &advisor).unwrap();
        assert_eq!(resolved.content, "merged_line_1\nmerged_line_2\n");
        assert_eq!(*advisor.generate_calls.lock().unwrap(), 1);
    }

    #[test]
    fn tier2_retains_leading_blank_lines() {
        let parsed = parse_generate("=== RESOLUTION 1 ===\n\ncode\n");
        assert_eq!(parsed[&1], vec!["", "code"]);
    }

    #[test]
    fn tier2_missing_block_is_an_error() {
        let content = conflict(&["o"], &["b"], &["t"]);
        let advisor = ScriptedAdvisor::new(&["1 GENERATE"], &["no headers at all"]);
        let err = resolve_file("a.rs", &content, None, &advisor).unwrap_err();
        assert!(format!("{err}").contains("RESOLUTION 1"));
    }

    #[test]
    fn mixed_tiers_second_run_reuses_everything() {
        // Hunk A resolves in tier 0, hunk B needs generation. A second
        // record with the emitted sidecar as prior must make no advisor
        // calls at all.
        let content = format!(
            "{}{}",
            conflict(&["same"], &["same"], &["keep"]),
            conflict(&["o"], &["b"], &["t"]),
        );
        let advisor = ScriptedAdvisor::new(&["2 GENERATE"], &["=== RESOLUTION 1 ===\nmerged"]);
        // Tier-1 numbering is local to the pending subset: the single
        // pending hunk is CONFLICT 1 in the prompt, but answering with an
        // out-of-range number defers it to generation anyway.
        let first = resolve_file("a.rs", &content, None, &advisor).unwrap();
        assert_eq!(first.content, "keep\nmerged\n");

        let prior = crate::resolution::parse(&first.sidecar).unwrap();
        let silent = ScriptedAdvisor::unreachable();
        let second =
            resolve_file("a.rs", &content, prior.block_for("a.rs"), &silent).unwrap();
        assert_eq!(second.content, first.content);
        assert_eq!(second.sidecar, first.sidecar);
        assert_eq!(*silent.classify_calls.lock().unwrap(), 0);
        assert_eq!(*silent.generate_calls.lock().unwrap(), 0);
    }

    #[test]
    fn resolution_header_parse_is_tolerant() {
        assert_eq!(parse_resolution_header("=== RESOLUTION 3 ==="), Some(3));
        assert_eq!(parse_resolution_header("  === RESOLUTION 12  ===  "), Some(12));
        assert_eq!(parse_resolution_header("=== SOMETHING 3 ==="), None);
    }
}
