//! Per-file generation.
//!
//! Asking for a whole project in one response makes a single truncation or
//! stray reasoning block fatal for every file. Instead each file gets its own
//! request with a modest output budget; files are generated concurrently
//! (bounded by the client's semaphore) and a failed file costs only itself.

use std::sync::Arc;

use futures::future::join_all;

use super::content_start::{strip_preamble, Stripped};
use super::types::{
    normalize_artifact_path, Artifact, ArtifactSet, FileFailure, FileSpec, GenerationReport,
    SkippedFile,
};
use crate::error::LlmError;
use crate::llm::{GenerationClient, GenerationRequest};
use crate::metrics::MetricsCollector;
use crate::utils::artifact_extraction::extract_artifacts_with_strategy;

/// Lower bound for the per-file output budget.
pub const MIN_PER_FILE_TOKENS: u32 = 6000;

/// Upper bound for the per-file output budget.
pub const MAX_PER_FILE_TOKENS: u32 = 7000;

/// Default per-file output budget.
pub const DEFAULT_PER_FILE_TOKENS: u32 = 6500;

/// Default output budget for whole-bundle generation.
pub const DEFAULT_BUNDLE_TOKENS: u32 = 16384;

const RETRY_INSTRUCTION: &str = "IMPORTANT: your previous answer contained no usable file \
content. Output ONLY the raw content of the file. No narration, no explanations, no \
thinking out loud, no markdown fences.";

/// Clamp a requested per-file budget into the supported range.
pub fn clamp_per_file_tokens(requested: u32) -> u32 {
    requested.clamp(MIN_PER_FILE_TOKENS, MAX_PER_FILE_TOKENS)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub per_file_max_tokens: u32,
    pub bundle_max_tokens: u32,
    pub temperature: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            per_file_max_tokens: DEFAULT_PER_FILE_TOKENS,
            bundle_max_tokens: DEFAULT_BUNDLE_TOKENS,
            temperature: crate::llm::types::DEFAULT_TEMPERATURE,
        }
    }
}

impl CoordinatorConfig {
    /// Set the per-file budget; values outside [6000, 7000] are clamped.
    pub fn with_per_file_max_tokens(mut self, tokens: u32) -> Self {
        self.per_file_max_tokens = clamp_per_file_tokens(tokens);
        self
    }

    pub fn with_bundle_max_tokens(mut self, tokens: u32) -> Self {
        self.bundle_max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Drives one or more [`GenerationClient`]s to produce a set of files.
///
/// With several clients, files are spread across them round-robin so each
/// credential's semaphore and rate limit carry part of the load.
pub struct FileCoordinator {
    clients: Vec<Arc<GenerationClient>>,
    config: CoordinatorConfig,
    metrics: MetricsCollector,
}

impl FileCoordinator {
    pub fn new(client: Arc<GenerationClient>, config: CoordinatorConfig) -> Self {
        let config = CoordinatorConfig {
            per_file_max_tokens: clamp_per_file_tokens(config.per_file_max_tokens),
            ..config
        };
        Self {
            clients: vec![client],
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Add another independent client to share per-file requests with.
    pub fn with_client(mut self, client: Arc<GenerationClient>) -> Self {
        self.clients.push(client);
        self
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client_for(&self, index: usize) -> &GenerationClient {
        &self.clients[index % self.clients.len()]
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Generate every file in `files`, one request each.
    ///
    /// Never fails as a whole: files that could not be produced are listed in
    /// [`GenerationReport::skipped`]. The requests run inside this future, so
    /// dropping it cancels all of them.
    pub async fn generate_set(&self, files: &[FileSpec], shared_context: &str) -> GenerationReport {
        tracing::info!(
            files = files.len(),
            clients = self.clients.len(),
            "Generating file set"
        );

        let outcomes = join_all(
            files
                .iter()
                .enumerate()
                .map(|(i, file)| {
                    self.generate_file(self.client_for(i), file, files, shared_context)
                }),
        )
        .await;

        let mut report = GenerationReport {
            requested: files.len(),
            ..Default::default()
        };

        for (file, (outcome, retried)) in files.iter().zip(outcomes) {
            if retried {
                report.retried += 1;
            }
            match outcome {
                Ok(artifact) => {
                    report.artifacts.insert(artifact);
                }
                Err(reason) => {
                    tracing::warn!(
                        path = %file.path,
                        reason = %reason,
                        "Skipping file after retry"
                    );
                    self.metrics.record_file_skipped(reason.label());
                    report.skipped.push(SkippedFile {
                        path: file.path.clone(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            produced = report.produced(),
            requested = report.requested,
            skipped = report.skipped.len(),
            "File set generation finished"
        );
        report
    }

    /// Generate one file with at most one retry. The flag reports whether
    /// the retry was used.
    async fn generate_file(
        &self,
        client: &GenerationClient,
        file: &FileSpec,
        siblings: &[FileSpec],
        shared_context: &str,
    ) -> (Result<Artifact, FileFailure>, bool) {
        let Some(path) = normalize_artifact_path(&file.path) else {
            return (Err(FileFailure::InvalidPath), false);
        };

        let prompt = build_file_prompt(file, siblings, shared_context);
        let first = self.attempt_file(client, &path, &prompt).await;
        let failure = match first {
            Ok(artifact) => return (Ok(artifact), false),
            Err(failure) => failure,
        };

        tracing::info!(
            path = %path,
            reason = %failure,
            "Retrying file with stricter instruction"
        );
        let retry_prompt = format!("{}\n\n{}", prompt, RETRY_INSTRUCTION);
        (self.attempt_file(client, &path, &retry_prompt).await, true)
    }

    async fn attempt_file(
        &self,
        client: &GenerationClient,
        path: &str,
        prompt: &str,
    ) -> Result<Artifact, FileFailure> {
        let request = GenerationRequest::new(prompt)
            .with_max_tokens(self.config.per_file_max_tokens)
            .with_temperature(self.config.temperature);

        let result = client
            .complete(&request)
            .await
            .map_err(|e| FileFailure::Generation(e.to_string()))?;

        if result.is_thinking_only() {
            tracing::debug!(path = %path, "Only reasoning text returned, trying to salvage it");
        }

        let candidate = result.best_text().unwrap_or_default();
        let content = interpret_candidate(path, candidate)?;
        Artifact::new(path, content).ok_or(FileFailure::InvalidPath)
    }

    /// Legacy whole-set mode: one request, output fed to the extractor.
    pub async fn generate_bundle(&self, prompt: &str) -> Result<Vec<Artifact>, LlmError> {
        let request = GenerationRequest::new(prompt)
            .with_max_tokens(self.config.bundle_max_tokens)
            .with_temperature(self.config.temperature);

        let result = self.client_for(0).complete(&request).await?;
        let raw = result.best_text().unwrap_or_default();
        let extraction = extract_artifacts_with_strategy(raw);

        match extraction.strategy {
            Some(strategy) => {
                self.metrics.record_extraction(strategy.as_str());
                tracing::info!(
                    artifacts = extraction.artifacts.len(),
                    strategy = %strategy,
                    "Bundle extracted"
                );
            }
            None => tracing::warn!(len = raw.len(), "Bundle response contained no artifacts"),
        }

        Ok(extraction.artifacts)
    }
}

/// Turn a model answer for a single file into its content.
///
/// An answer that is itself an artifact array containing this path yields
/// that artifact's content; anything else goes through preamble stripping.
pub fn interpret_candidate(path: &str, candidate: &str) -> Result<String, FileFailure> {
    let extraction = extract_artifacts_with_strategy(candidate);
    if let Some(artifact) = extraction.artifacts.into_iter().find(|a| a.path == path) {
        return Ok(artifact.content);
    }

    match strip_preamble(path, candidate) {
        Stripped::Content(content) => Ok(content),
        Stripped::ThinkingText => Err(FileFailure::ThinkingText),
        Stripped::Empty => Err(FileFailure::Empty),
    }
}

/// Default per-file prompt.
pub fn build_file_prompt(file: &FileSpec, siblings: &[FileSpec], shared_context: &str) -> String {
    let mut prompt = String::new();

    let context = shared_context.trim();
    if !context.is_empty() {
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    if siblings.len() > 1 {
        prompt.push_str("The project consists of these files:\n");
        for sibling in siblings {
            if sibling.description.is_empty() {
                prompt.push_str(&format!("- {}\n", sibling.path));
            } else {
                prompt.push_str(&format!("- {}: {}\n", sibling.path, sibling.description));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Write the complete content of `{}`.", file.path));
    if !file.description.is_empty() {
        prompt.push('\n');
        prompt.push_str(&file.description);
    }
    prompt.push_str("\nOutput only the file content.");

    prompt
}

/// Paths of `set` that were requested but missing, in request order.
pub fn missing_paths<'a>(files: &'a [FileSpec], set: &ArtifactSet) -> Vec<&'a str> {
    files
        .iter()
        .map(|f| f.path.as_str())
        .filter(|p| !set.contains(p))
        .collect()
}
