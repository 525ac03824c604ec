//! Artifact extraction from model output.
//!
//! Models asked for a JSON array of `{"path": ..., "content": ...}` objects
//! routinely wrap it in prose, fence it in markdown, leave trailing commas
//! or run out of tokens half-way through the last file. This module recovers
//! as many artifacts as possible and never fails: the worst case is an empty
//! vector.
//!
//! # Extraction Strategies
//!
//! Tried in order; the first one that yields at least one artifact wins:
//! 1. Direct: the whole trimmed text is the array
//! 2. Fenced: the array sits in a ```` ```json ```` (or any other) fenced block
//! 3. Bracket scan: the best balanced `[{...}]` region anywhere in the text
//! 4. Field reconstruction: rebuild objects one by one from their
//!    `"path"`/`"content"` fields, tolerating truncation and bad siblings
//!
//! # Example
//!
//! ```
//! use artifact_forge::utils::artifact_extraction::extract_artifacts;
//!
//! let raw = "Here you go:\n[{\"path\": \"a.txt\", \"content\": \"hi\"},]";
//! let artifacts = extract_artifacts(raw);
//! assert_eq!(artifacts.len(), 1);
//! assert_eq!(artifacts[0].path, "a.txt");
//! ```

use regex::Regex;
use serde_json::Value;

use crate::generation::{Artifact, ArtifactSet};

/// Which cascade step produced the artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionStrategy {
    Direct,
    FencedBlock,
    BracketScan,
    FieldReconstruction,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Direct => "direct",
            ExtractionStrategy::FencedBlock => "fenced_block",
            ExtractionStrategy::BracketScan => "bracket_scan",
            ExtractionStrategy::FieldReconstruction => "field_reconstruction",
        }
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifacts plus the strategy that found them.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub artifacts: Vec<Artifact>,
    /// `None` when nothing was recoverable.
    pub strategy: Option<ExtractionStrategy>,
}

impl Extraction {
    fn none() -> Self {
        Self {
            artifacts: Vec::new(),
            strategy: None,
        }
    }

    fn found(set: ArtifactSet, strategy: ExtractionStrategy) -> Self {
        Self {
            artifacts: set.into_vec(),
            strategy: Some(strategy),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Recover artifacts from raw model output.
pub fn extract_artifacts(raw: &str) -> Vec<Artifact> {
    extract_artifacts_with_strategy(raw).artifacts
}

/// Recover artifacts and report the winning strategy.
pub fn extract_artifacts_with_strategy(raw: &str) -> Extraction {
    if let Some(set) = try_direct(raw) {
        return Extraction::found(set, ExtractionStrategy::Direct);
    }
    if let Some(set) = try_fenced_blocks(raw) {
        return Extraction::found(set, ExtractionStrategy::FencedBlock);
    }
    if let Some(set) = try_bracket_scan(raw) {
        return Extraction::found(set, ExtractionStrategy::BracketScan);
    }
    if let Some(set) = try_field_reconstruction(raw) {
        return Extraction::found(set, ExtractionStrategy::FieldReconstruction);
    }

    tracing::debug!(
        len = raw.len(),
        "No artifacts recoverable from model output"
    );
    Extraction::none()
}

/// Strategy 1: the trimmed text is itself the array.
fn try_direct(raw: &str) -> Option<ArtifactSet> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    parse_artifact_array(trimmed).filter(|set| !set.is_empty())
}

/// Strategy 2: fenced blocks, ```` ```json ```` first, then any fence.
fn try_fenced_blocks(raw: &str) -> Option<ArtifactSet> {
    let tagged = Regex::new(r"```json[^\n]*\n([\s\S]*?)```").ok()?;
    let any = Regex::new(r"```[^\n]*\n([\s\S]*?)```").ok()?;

    for re in [&tagged, &any] {
        let best = re
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|inner| inner.starts_with('['))
            .filter_map(parse_artifact_array)
            .filter(|set| !set.is_empty())
            .max_by_key(|set| set.len());
        if best.is_some() {
            return best;
        }
    }
    None
}

/// Lexical state of the bracket scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InString,
    Escaped,
}

/// Byte ranges of top-level balanced `[...]` regions whose first
/// non-whitespace interior character is `{`.
///
/// Single forward pass. Quotes are only tracked inside an open region, so
/// stray quotes in surrounding prose cannot desynchronize the scan. A region
/// whose interior does not open with `{` is abandoned on the spot.
fn find_object_array_regions(text: &str) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut state = ScanState::Normal;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut awaiting_first = false;

    for (i, c) in text.char_indices() {
        match state {
            ScanState::Escaped => {
                state = ScanState::InString;
                continue;
            }
            ScanState::InString => {
                match c {
                    '\\' => state = ScanState::Escaped,
                    '"' => state = ScanState::Normal,
                    _ => {}
                }
                continue;
            }
            ScanState::Normal => {}
        }

        if depth == 0 {
            if c == '[' {
                depth = 1;
                start = i;
                awaiting_first = true;
            }
            continue;
        }

        if awaiting_first {
            if c.is_whitespace() {
                continue;
            }
            awaiting_first = false;
            if c != '{' {
                depth = 0;
                continue;
            }
        }

        match c {
            '"' => state = ScanState::InString,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    regions.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    regions
}

/// Strategy 3: keep the region that parses into the most entries carrying a
/// `path` field. Later regions win ties.
fn try_bracket_scan(raw: &str) -> Option<ArtifactSet> {
    let mut best: Option<(usize, ArtifactSet)> = None;

    for (start, end) in find_object_array_regions(raw) {
        let Some(values) = parse_json_array(&raw[start..end]) else {
            continue;
        };
        let with_path = values
            .iter()
            .filter(|v| v.get("path").is_some())
            .count();
        if with_path == 0 {
            continue;
        }
        let set = artifacts_from_values(values);
        if set.is_empty() {
            continue;
        }
        if best.as_ref().map_or(true, |(count, _)| with_path >= *count) {
            best = Some((with_path, set));
        }
    }

    best.map(|(_, set)| set)
}

/// Strategy 4: rebuild objects from `"path"` / `"content"` field pairs.
///
/// An object whose content string never terminates (truncated output) is
/// dropped; the ones before it survive.
fn try_field_reconstruction(raw: &str) -> Option<ArtifactSet> {
    let re = Regex::new(
        r#"\{\s*"path"\s*:\s*"((?:[^"\\]|\\.)*)"\s*,\s*"content"\s*:\s*""#,
    )
    .ok()?;

    let mut set = ArtifactSet::new();
    let mut pos = 0;

    while pos < raw.len() {
        let Some(caps) = re.captures_at(raw, pos) else {
            break;
        };
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            break;
        };

        let body_start = whole.end();
        match find_content_end(&raw[body_start..]) {
            Some((content_len, consumed)) => {
                let content = &raw[body_start..body_start + content_len];
                if let (Some(path), Some(content)) =
                    (unescape_json_string(path.as_str()), unescape_json_string(content))
                {
                    if let Some(artifact) = Artifact::new(path, content) {
                        set.insert(artifact);
                    }
                }
                pos = body_start + consumed;
            }
            None => break,
        }
    }

    (!set.is_empty()).then_some(set)
}

/// Find the closing quote of a JSON string body that is followed (after
/// whitespace) by `}`. Returns the body length and the number of bytes
/// consumed through the `}`.
fn find_content_end(s: &str) -> Option<(usize, usize)> {
    let mut state = ScanState::InString;

    for (i, c) in s.char_indices() {
        match state {
            ScanState::Escaped => state = ScanState::InString,
            ScanState::InString => match c {
                '\\' => state = ScanState::Escaped,
                '"' => {
                    let rest = &s[i + 1..];
                    let after_ws = rest.trim_start();
                    if after_ws.starts_with('}') {
                        let consumed = s.len() - after_ws.len() + 1;
                        return Some((i, consumed));
                    }
                }
                _ => {}
            },
            ScanState::Normal => {}
        }
    }

    None
}

/// Decode a JSON string body. Raw control characters, which models often
/// emit inside strings, are escaped first.
fn unescape_json_string(body: &str) -> Option<String> {
    let mut quoted = String::with_capacity(body.len() + 2);
    quoted.push('"');
    for c in body.chars() {
        match c {
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    serde_json::from_str::<String>(&quoted).ok()
}

/// Drop commas that are directly followed (after whitespace) by `}` or `]`,
/// leaving string contents untouched.
pub fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut state = ScanState::Normal;

    for (i, &c) in chars.iter().enumerate() {
        match state {
            ScanState::Escaped => state = ScanState::InString,
            ScanState::InString => match c {
                '\\' => state = ScanState::Escaped,
                '"' => state = ScanState::Normal,
                _ => {}
            },
            ScanState::Normal => match c {
                '"' => state = ScanState::InString,
                ',' => {
                    let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                    if matches!(next, Some('}') | Some(']')) {
                        continue;
                    }
                }
                _ => {}
            },
        }
        out.push(c);
    }

    out
}

fn parse_json_array(candidate: &str) -> Option<Vec<Value>> {
    let cleaned = strip_trailing_commas(candidate);
    match serde_json::from_str::<Value>(&cleaned).ok()? {
        Value::Array(values) => Some(values),
        _ => None,
    }
}

/// Strictly parse `candidate` as an array and keep its valid artifacts.
fn parse_artifact_array(candidate: &str) -> Option<ArtifactSet> {
    parse_json_array(candidate).map(artifacts_from_values)
}

fn artifacts_from_values(values: Vec<Value>) -> ArtifactSet {
    values
        .into_iter()
        .filter_map(|value| {
            let path = value.get("path")?.as_str()?;
            let content = value.get("content")?.as_str()?;
            Artifact::new(path, content)
        })
        .collect()
}
