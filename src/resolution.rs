//! The counted-resolution format.
//!
//! A resolution sidecar (`res-K.resolution`) is a concatenation of per-file
//! blocks. Each block names a conflicted file and carries one `CONFLICT`
//! record per diff3 marker region, in file order:
//!
//! ```text
//! --- src/lib.rs
//! CONFLICT ours=2 base=1 theirs=2 resolution=3 sha=<hex64>
//! <3 lines of resolution text>
//! ```
//!
//! The applier is purely positional: it walks the conflicted file, and at
//! each `<<<<<<<` marker consumes `ours + 1 + base + 1 + theirs + 1` lines
//! by count (the three `+1`s are the `|||||||`, `=======`, `>>>>>>>`
//! boundary lines) and emits the recorded resolution in their place. It
//! never inspects the consumed lines, which is what makes replay immune to
//! content drift inside structurally-identical hunks. The sha fingerprint
//! decides *reusability* during record; it is never consulted here.

use sha2::{Digest, Sha256};

use crate::error::RegraftError;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// One `CONFLICT` record: section line counts plus replacement text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountedResolution {
    pub ours: usize,
    pub base: usize,
    pub theirs: usize,
    /// Replacement lines, without trailing newlines.
    pub resolution: Vec<String>,
    /// SHA-256 fingerprint of the hunk sections. `None` only in legacy
    /// sidecars written before fingerprints existed.
    pub sha: Option<String>,
}

/// All `CONFLICT` records for one conflicted file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBlock {
    /// Repo-relative path.
    pub path: String,
    pub hunks: Vec<CountedResolution>,
}

/// A parsed `res-K.resolution` sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionFile {
    pub blocks: Vec<FileBlock>,
}

impl ResolutionFile {
    pub fn block_for(&self, path: &str) -> Option<&FileBlock> {
        self.blocks.iter().find(|b| b.path == path)
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 of `ours \n ---BOUNDARY--- \n base \n ---BOUNDARY--- \n theirs`.
pub fn fingerprint(ours: &[String], base: &[String], theirs: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ours.join("\n").as_bytes());
    hasher.update(b"\n---BOUNDARY---\n");
    hasher.update(base.join("\n").as_bytes());
    hasher.update(b"\n---BOUNDARY---\n");
    hasher.update(theirs.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Emit
// ---------------------------------------------------------------------------

pub fn emit_block(block: &FileBlock) -> String {
    let mut out = format!("--- {}\n", block.path);
    for hunk in &block.hunks {
        out.push_str(&format!(
            "CONFLICT ours={} base={} theirs={} resolution={}",
            hunk.ours,
            hunk.base,
            hunk.theirs,
            hunk.resolution.len()
        ));
        if let Some(sha) = &hunk.sha {
            out.push_str(&format!(" sha={sha}"));
        }
        out.push('\n');
        for line in &hunk.resolution {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

pub fn emit(file: &ResolutionFile) -> String {
    file.blocks.iter().map(emit_block).collect()
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Parse a sidecar. Resolution text is consumed by count, so it may freely
/// contain lines that look like headers.
pub fn parse(text: &str) -> Result<ResolutionFile, RegraftError> {
    let mut blocks: Vec<FileBlock> = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if let Some(path) = line.strip_prefix("--- ") {
            blocks.push(FileBlock {
                path: path.to_owned(),
                hunks: Vec::new(),
            });
        } else if line.starts_with("CONFLICT ") {
            let block = blocks.last_mut().ok_or_else(|| {
                format_err("CONFLICT record before any '--- <path>' header")
            })?;
            let (mut hunk, count) = parse_conflict_header(line)?;
            for n in 0..count {
                let text_line = lines.next().ok_or_else(|| {
                    format_err(&format!(
                        "resolution for '{}' ends after {n} of {count} lines",
                        block.path
                    ))
                })?;
                hunk.resolution.push(text_line.to_owned());
            }
            block.hunks.push(hunk);
        } else if line.trim().is_empty() {
            continue;
        } else {
            return Err(format_err(&format!("unexpected line: {line}")));
        }
    }

    Ok(ResolutionFile { blocks })
}

/// Parse `CONFLICT ours=<O> base=<B> theirs=<T> resolution=<R> [sha=<hex>]`.
/// Returns the record (with an empty resolution vec) and the line count the
/// caller must consume into it.
fn parse_conflict_header(line: &str) -> Result<(CountedResolution, usize), RegraftError> {
    let mut ours = None;
    let mut base = None;
    let mut theirs = None;
    let mut resolution = None;
    let mut sha = None;

    for token in line.split_whitespace().skip(1) {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format_err(&format!("bad CONFLICT token '{token}'")))?;
        match key {
            "ours" => ours = Some(parse_count(key, value)?),
            "base" => base = Some(parse_count(key, value)?),
            "theirs" => theirs = Some(parse_count(key, value)?),
            "resolution" => resolution = Some(parse_count(key, value)?),
            "sha" => sha = Some(value.to_owned()),
            _ => return Err(format_err(&format!("unknown CONFLICT key '{key}'"))),
        }
    }

    let (Some(ours), Some(base), Some(theirs), Some(resolution)) =
        (ours, base, theirs, resolution)
    else {
        return Err(format_err(&format!("incomplete CONFLICT header: {line}")));
    };

    Ok((
        CountedResolution {
            ours,
            base,
            theirs,
            resolution: Vec::with_capacity(resolution),
            sha,
        },
        resolution,
    ))
}

fn parse_count(key: &str, value: &str) -> Result<usize, RegraftError> {
    value
        .parse()
        .map_err(|_| format_err(&format!("CONFLICT {key}={value} is not a count")))
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// True for a diff3 conflict-start line: exactly seven `<` at the front.
pub fn is_conflict_start(line: &str) -> bool {
    line.starts_with("<<<<<<<") && line.as_bytes().get(7) != Some(&b'<')
}

/// Count conflict regions in a working-tree file.
pub fn count_conflict_markers(content: &str) -> usize {
    content.lines().filter(|l| is_conflict_start(l)).count()
}

/// Apply one file's counted resolutions to its conflicted content.
///
/// Fails when the marker count and record count disagree, or when a hunk's
/// recorded span runs past the end of the file.
pub fn apply_block(block: &FileBlock, conflicted: &str) -> Result<String, RegraftError> {
    let had_trailing_newline = conflicted.ends_with('\n');
    let lines: Vec<&str> = conflicted.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    let mut k = 0;

    while i < lines.len() {
        if is_conflict_start(lines[i]) {
            let hunk = block.hunks.get(k).ok_or_else(|| {
                format_err(&format!(
                    "'{}' has more conflict markers than the {} recorded resolution(s)",
                    block.path,
                    block.hunks.len()
                ))
            })?;
            // the start marker, three boundary markers, and the three sections
            let span = 1 + hunk.ours + 1 + hunk.base + 1 + hunk.theirs + 1;
            if i + span > lines.len() {
                return Err(format_err(&format!(
                    "conflict {} in '{}' runs past the end of the file",
                    k + 1,
                    block.path
                )));
            }
            i += span;
            out.extend(hunk.resolution.iter().cloned());
            k += 1;
        } else {
            out.push(lines[i].to_owned());
            i += 1;
        }
    }

    if k != block.hunks.len() {
        return Err(format_err(&format!(
            "'{}' has {k} conflict marker(s) but {} recorded resolution(s)",
            block.path,
            block.hunks.len()
        )));
    }

    let mut text = out.join("\n");
    if had_trailing_newline && !text.is_empty() {
        text.push('\n');
    }
    Ok(text)
}

fn format_err(detail: &str) -> RegraftError {
    RegraftError::ResolutionFormat {
        detail: detail.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
