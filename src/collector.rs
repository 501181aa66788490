//! Adaptive Collection Loop
//!
//! Drives the analyzer across multiple iterations for one branch,
//! accumulating a deduplicated issue set. Iteration 1 asks for a
//! comprehensive review; later iterations send gap-fill prompts carrying a
//! do-not-repeat list and a rotating directed ask. The loop stops once
//! `stable_window` consecutive post-minimum iterations add nothing new, or
//! at the iteration cap.
//!
//! State machine per branch:
//! `Collecting -> Converged | Exhausted -> Validating -> Done`, with any
//! unabsorbed failure ending in `Failed`.

use crate::analyzer::AnalyzerConnection;
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::issue::Issue;
use crate::parser::{parse_response, ResponseFormat};
use crate::prompts::{comprehensive_prompt, gap_fill_prompt, KnownFinding, PromptClass};
use crate::repo_index::RepositoryIndex;
use crate::validator::{validate_issue, ValidationOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

// ============================================================================
// State & History
// ============================================================================

/// Phase of a branch collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionPhase {
    Collecting,
    Converged,
    Exhausted,
    Validating,
    Done,
    Failed,
}

/// What happened during one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Issues the parser produced this iteration.
    pub parsed: usize,
    /// Issues that were new after fingerprint dedupe.
    pub added: usize,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ResponseFormat>,
    pub timed_out: bool,
    /// Failure detail when this iteration was absorbed non-fatally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Per-branch collection metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub iterations: u32,
    pub converged: bool,
    pub phase: CollectionPhase,
    pub history: Vec<IterationRecord>,
    /// Issues whose location was rewritten during validation.
    pub recovered: usize,
    /// Issues dropped during validation.
    pub dropped: usize,
    /// Deduplicated parser warnings across all iterations.
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    /// Detail of an absorbed (non-fatal) iteration failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_early: Option<String>,
}

/// Final output of one branch collection.
#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub issues: Vec<Issue>,
    pub metadata: CollectionMetadata,
}

// ============================================================================
// Collector
// ============================================================================

/// Runs the adaptive loop for one branch at a time.
pub struct Collector {
    connection: Arc<AnalyzerConnection>,
    semaphore: Arc<Semaphore>,
    config: EngineConfig,
    cancel: CancelToken,
}

impl Collector {
    pub fn new(
        connection: Arc<AnalyzerConnection>,
        semaphore: Arc<Semaphore>,
        config: EngineConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            connection,
            semaphore,
            config,
            cancel,
        }
    }

    /// Collect the final issue set for one branch.
    ///
    /// `known_issues` seeds the do-not-repeat list (used when the head
    /// branch is analyzed after the base branch in sequential mode).
    pub async fn collect(
        &self,
        repo_url: &str,
        branch: &str,
        index: &RepositoryIndex,
        known_issues: &[KnownFinding],
    ) -> Result<CollectionResult> {
        let started = Instant::now();
        let mut accumulated: Vec<Issue> = Vec::new();
        let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut no_new_streak = 0u32;
        let mut successes = 0u32;
        let mut phase = CollectionPhase::Collecting;
        let mut aborted_early: Option<String> = None;

        for iteration in 1..=self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return Err(EngineError::cancelled("caller request"));
            }

            let iter_started = Instant::now();
            let (class, prompt) = self.build_prompt(
                repo_url,
                branch,
                iteration,
                &accumulated,
                known_issues,
            );

            let call = async {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| EngineError::cancelled("analyzer semaphore closed"))?;
                self.connection
                    .call(class, repo_url, branch, &prompt, &self.cancel)
                    .await
            };

            let outcome = tokio::time::timeout(self.config.iteration_timeout(), call).await;
            let duration_ms = iter_started.elapsed().as_millis() as u64;

            match outcome {
                Err(_elapsed) => {
                    warn!(branch, iteration, "iteration exceeded its soft timeout");
                    history.push(IterationRecord {
                        iteration,
                        parsed: 0,
                        added: 0,
                        duration_ms,
                        warnings: Vec::new(),
                        format: None,
                        timed_out: true,
                        failure: Some("iteration timeout".to_string()),
                    });
                    if successes > 0 {
                        aborted_early = Some("iteration timeout".to_string());
                        phase = CollectionPhase::Exhausted;
                        break;
                    }
                    return Err(EngineError::FetchFailed {
                        category: crate::error::FetchFailure::Timeout,
                        detail: format!(
                            "iteration {iteration} exceeded {} ms with no prior success",
                            self.config.per_iteration_timeout_ms
                        ),
                    });
                }
                Ok(Err(error)) => {
                    if error.is_cancelled() {
                        return Err(error);
                    }
                    warn!(branch, iteration, "iteration failed: {}", error);
                    let detail = error.to_string();
                    history.push(IterationRecord {
                        iteration,
                        parsed: 0,
                        added: 0,
                        duration_ms,
                        warnings: Vec::new(),
                        format: None,
                        timed_out: false,
                        failure: Some(detail.clone()),
                    });
                    if successes > 0 {
                        // Useful prior iterations exist; keep what we have.
                        aborted_early = Some(detail);
                        phase = CollectionPhase::Exhausted;
                        break;
                    }
                    return Err(error);
                }
                Ok(Ok(payload)) => {
                    let parsed = parse_response(&payload);
                    let parsed_count = parsed.issues.len();
                    let mut added = 0usize;

                    for issue in parsed.issues {
                        let fp = fingerprint::intra_branch(&issue);
                        match by_fingerprint.get(&fp).copied() {
                            Some(existing) => {
                                // Collisions reduce to the higher-confidence record.
                                if issue.confidence > accumulated[existing].confidence {
                                    accumulated[existing] = issue;
                                }
                            }
                            None => {
                                by_fingerprint.insert(fp, accumulated.len());
                                accumulated.push(issue);
                                added += 1;
                            }
                        }
                    }
                    successes += 1;

                    // Convergence accounting begins only after the minimum
                    // iteration budget has been spent.
                    if iteration > self.config.min_iterations && added == 0 {
                        no_new_streak += 1;
                    } else if added > 0 {
                        no_new_streak = 0;
                    }

                    debug!(
                        branch,
                        iteration,
                        parsed = parsed_count,
                        added,
                        total = accumulated.len(),
                        streak = no_new_streak,
                        "iteration complete"
                    );

                    history.push(IterationRecord {
                        iteration,
                        parsed: parsed_count,
                        added,
                        duration_ms,
                        warnings: parsed.warnings,
                        format: Some(parsed.format),
                        timed_out: false,
                        failure: None,
                    });

                    if no_new_streak >= self.config.stable_window {
                        phase = CollectionPhase::Converged;
                        break;
                    }
                    if iteration == self.config.max_iterations {
                        phase = CollectionPhase::Exhausted;
                    }
                }
            }

            // Yield between iterations: the only intra-loop suspension point.
            tokio::task::yield_now().await;
        }

        let converged = phase == CollectionPhase::Converged;
        let iterations = history.len() as u32;
        info!(
            branch,
            iterations,
            converged,
            accumulated = accumulated.len(),
            "collection loop finished, validating"
        );

        // Validation: ground every issue, then collapse duplicates that
        // recovery may have produced.
        let mut recovered = 0usize;
        let mut dropped = 0usize;
        let mut kept: Vec<Issue> = Vec::new();
        for issue in accumulated {
            match validate_issue(issue, index) {
                ValidationOutcome::Valid(issue) => kept.push(issue),
                ValidationOutcome::Recovered(issue) => {
                    recovered += 1;
                    kept.push(issue);
                }
                ValidationOutcome::Dropped(issue, reason) => {
                    debug!(title = %issue.title, %reason, "issue dropped in validation");
                    dropped += 1;
                }
            }
        }

        let issues = finalize_issue_set(kept);

        let mut warnings: Vec<String> = Vec::new();
        for record in &history {
            for warning in &record.warnings {
                if !warnings.contains(warning) {
                    warnings.push(warning.clone());
                }
            }
        }

        Ok(CollectionResult {
            issues,
            metadata: CollectionMetadata {
                iterations,
                converged,
                phase: CollectionPhase::Done,
                history,
                recovered,
                dropped,
                warnings,
                duration_ms: started.elapsed().as_millis() as u64,
                aborted_early,
            },
        })
    }

    fn build_prompt(
        &self,
        repo_url: &str,
        branch: &str,
        iteration: u32,
        accumulated: &[Issue],
        known_issues: &[KnownFinding],
    ) -> (PromptClass, String) {
        if iteration == 1 && known_issues.is_empty() {
            return (
                PromptClass::Comprehensive,
                comprehensive_prompt(repo_url, branch),
            );
        }

        let mut known: Vec<KnownFinding> = accumulated
            .iter()
            .map(|issue| KnownFinding {
                title: issue.title.clone(),
                file: issue.file().map(str::to_string),
            })
            .collect();
        let mut seen: Vec<String> = known.iter().map(|k| k.title.to_lowercase()).collect();
        for finding in known_issues {
            let lower = finding.title.to_lowercase();
            if !seen.contains(&lower) {
                seen.push(lower);
                known.push(finding.clone());
            }
        }

        if iteration == 1 {
            // First iteration with pre-seeded knowledge still wants the
            // comprehensive sweep, minus the already-known findings.
            (
                PromptClass::Comprehensive,
                format!(
                    "{}\n\nThese findings are already known - do not repeat them:\n{}",
                    comprehensive_prompt(repo_url, branch),
                    known
                        .iter()
                        .map(|k| match &k.file {
                            Some(file) => format!("- {} ({})", k.title, file),
                            None => format!("- {}", k.title),
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                ),
            )
        } else {
            (
                PromptClass::GapFill(iteration),
                gap_fill_prompt(repo_url, branch, iteration, &known),
            )
        }
    }
}

/// Collapse duplicate fingerprints (recovery can merge two locations into
/// one) and assign run-stable ids.
fn finalize_issue_set(kept: Vec<Issue>) -> Vec<Issue> {
    let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
    let mut issues: Vec<Issue> = Vec::new();
    for issue in kept {
        let fp = fingerprint::intra_branch(&issue);
        match by_fingerprint.get(&fp).copied() {
            Some(existing) => {
                if issue.confidence > issues[existing].confidence {
                    issues[existing] = issue;
                }
            }
            None => {
                by_fingerprint.insert(fp, issues.len());
                issues.push(issue);
            }
        }
    }
    for (position, issue) in issues.iter_mut().enumerate() {
        let fp = fingerprint::intra_branch(issue);
        issue.id = format!("{}-{:03}", &fp[..12], position + 1);
    }
    issues
}
