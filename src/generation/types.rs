//! Artifact and file-request types.

use std::collections::HashMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Relative path inside the output tree.
    pub path: String,
    /// Full file content.
    pub content: String,
}

impl Artifact {
    /// Build an artifact, normalizing the path. Returns `None` when the path
    /// is not a safe relative path.
    pub fn new(path: impl AsRef<str>, content: impl Into<String>) -> Option<Self> {
        let path = normalize_artifact_path(path.as_ref())?;
        Some(Self {
            path,
            content: content.into(),
        })
    }
}

/// Trim whitespace and a leading `./`, then reject empty, absolute and
/// parent-escaping paths.
pub fn normalize_artifact_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return None;
    }
    // Windows drive prefix, e.g. "C:"
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return None;
    }
    if trimmed.split(['/', '\\']).any(|part| part == "..") {
        return None;
    }
    let all_normal = Path::new(trimmed)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !all_normal || trimmed.ends_with('/') {
        return None;
    }
    Some(trimmed.to_string())
}

/// Path-unique collection of artifacts.
///
/// Inserting an existing path replaces its content but keeps the position
/// of the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    items: Vec<Artifact>,
    index: HashMap<String, usize>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns `true` if the path was new.
    pub fn insert(&mut self, artifact: Artifact) -> bool {
        match self.index.get(&artifact.path) {
            Some(&pos) => {
                self.items[pos] = artifact;
                false
            }
            None => {
                self.index.insert(artifact.path.clone(), self.items.len());
                self.items.push(artifact);
                true
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.index.get(path).map(|&pos| &self.items[pos])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.items.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.items.iter().map(|a| a.path.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<Artifact> {
        self.items
    }
}

impl FromIterator<Artifact> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        let mut set = ArtifactSet::new();
        for artifact in iter {
            set.insert(artifact);
        }
        set
    }
}

impl IntoIterator for ArtifactSet {
    type Item = Artifact;
    type IntoIter = std::vec::IntoIter<Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A file requested from the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    /// What the file should contain; inserted into the per-file prompt.
    #[serde(default)]
    pub description: String,
}

impl FileSpec {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }

    /// Lower-cased extension, or empty when there is none.
    pub fn extension(&self) -> String {
        file_extension(&self.path)
    }
}

pub(crate) fn file_extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Why a single file was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFailure {
    /// Only narration came back; no line looked like file content.
    ThinkingText,
    /// Nothing was left after preamble stripping.
    Empty,
    /// The client returned an error after its own retries.
    Generation(String),
    /// The requested path is not a safe relative path.
    InvalidPath,
}

impl FileFailure {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FileFailure::ThinkingText => "thinking_text",
            FileFailure::Empty => "empty",
            FileFailure::Generation(_) => "generation_error",
            FileFailure::InvalidPath => "invalid_path",
        }
    }
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFailure::ThinkingText => write!(f, "response contained only reasoning text"),
            FileFailure::Empty => write!(f, "response was empty after cleanup"),
            FileFailure::Generation(msg) => write!(f, "generation failed: {}", msg),
            FileFailure::InvalidPath => write!(f, "invalid file path"),
        }
    }
}

/// A file that produced no artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: FileFailure,
}

/// Outcome of a multi-file generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub artifacts: ArtifactSet,
    pub skipped: Vec<SkippedFile>,
    /// Number of files requested.
    pub requested: usize,
    /// Files that needed their one retry (whether or not it succeeded).
    pub retried: usize,
}

impl GenerationReport {
    pub fn produced(&self) -> usize {
        self.artifacts.len()
    }

    /// Fraction of requested files that produced an artifact; 1.0 for an
    /// empty request.
    pub fn success_ratio(&self) -> f64 {
        if self.requested == 0 {
            return 1.0;
        }
        self.produced() as f64 / self.requested as f64
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_validation() {
        assert!(Artifact::new("src/main.rs", "").is_some());
        assert_eq!(
            Artifact::new("  ./app/page.tsx ", "x").map(|a| a.path),
            Some("app/page.tsx".to_string())
        );

        assert!(Artifact::new("", "x").is_none());
        assert!(Artifact::new("   ", "x").is_none());
        assert!(Artifact::new("/etc/passwd", "x").is_none());
        assert!(Artifact::new("../outside.txt", "x").is_none());
        assert!(Artifact::new("src/../../x", "x").is_none());
        assert!(Artifact::new("C:\\windows\\x", "x").is_none());
        assert!(Artifact::new("src\\..\\x", "x").is_none());
        assert!(Artifact::new("src/", "x").is_none());
    }

    #[test]
    fn test_artifact_set_last_write_wins_first_position_kept() {
        let mut set = ArtifactSet::new();
        assert!(set.insert(Artifact::new("a.txt", "1").unwrap()));
        assert!(set.insert(Artifact::new("b.txt", "2").unwrap()));
        assert!(!set.insert(Artifact::new("a.txt", "3").unwrap()));

        assert_eq!(set.len(), 2);
        assert_eq!(set.paths(), vec!["a.txt", "b.txt"]);
        assert_eq!(set.get("a.txt").map(|a| a.content.as_str()), Some("3"));
        assert!(set.contains("b.txt"));
        assert!(!set.contains("c.txt"));
    }

    #[test]
    fn test_artifact_set_from_iterator() {
        let set: ArtifactSet = vec![
            Artifact::new("x", "1").unwrap(),
            Artifact::new("y", "2").unwrap(),
            Artifact::new("x", "3").unwrap(),
        ]
        .into_iter()
        .collect();

        let items = set.into_vec();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "3");
    }

    #[test]
    fn test_file_spec_extension() {
        assert_eq!(FileSpec::new("app/Page.TSX", "").extension(), "tsx");
        assert_eq!(FileSpec::new("Dockerfile", "").extension(), "");
    }

    #[test]
    fn test_report_ratio() {
        let mut report = GenerationReport {
            requested: 4,
            ..Default::default()
        };
        assert_eq!(report.success_ratio(), 0.0);

        report.artifacts.insert(Artifact::new("a", "").unwrap());
        report.artifacts.insert(Artifact::new("b", "").unwrap());
        assert_eq!(report.produced(), 2);
        assert_eq!(report.success_ratio(), 0.5);

        assert_eq!(GenerationReport::default().success_ratio(), 1.0);
    }

    #[test]
    fn test_file_failure_labels() {
        assert_eq!(FileFailure::ThinkingText.label(), "thinking_text");
        assert!(FileFailure::Generation("boom".to_string())
            .to_string()
            .contains("boom"));
    }
}
