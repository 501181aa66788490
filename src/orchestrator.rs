//! Analysis Orchestrator
//!
//! Top-level entry point: checks out the base and head references, builds
//! one repository index per working tree, runs the adaptive collection
//! loop for both branches (in parallel by default), categorizes the two
//! final sets, and emits a `ComparisonResult`.
//!
//! Working trees are released on every exit path; a branch failure with a
//! surviving sibling degrades to a partial result instead of losing the
//! whole run.

use crate::analyzer::{AnalyzerConnection, AnalyzerTransport, TokenUsage};
use crate::cache::{CacheStats, SharedCache};
use crate::cancel::CancelToken;
use crate::categorizer::{compare_branches, UnchangedIssue};
use crate::checkout::CheckoutProvider;
use crate::collector::{CollectionMetadata, CollectionResult, Collector, IterationRecord};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::issue::Issue;
use crate::prompts::KnownFinding;
use crate::repo_index::{IndexConfig, IndexStats, RepositoryIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Result Types
// ============================================================================

/// One branch failed while the other succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialFailure {
    /// Which role failed: "base" or "head".
    pub branch: String,
    pub category: String,
    pub detail: String,
}

/// Per-branch slice of the run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub reference: String,
    pub iterations: u32,
    pub converged: bool,
    pub recovered: usize,
    pub dropped: usize,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub history: Vec<IterationRecord>,
    pub index: IndexStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_early: Option<String>,
}

impl BranchMetadata {
    fn new(reference: &str, metadata: CollectionMetadata, index: IndexStats) -> Self {
        Self {
            reference: reference.to_string(),
            iterations: metadata.iterations,
            converged: metadata.converged,
            recovered: metadata.recovered,
            dropped: metadata.dropped,
            warnings: metadata.warnings,
            duration_ms: metadata.duration_ms,
            history: metadata.history,
            index,
            aborted_early: metadata.aborted_early,
        }
    }
}

/// Everything needed to reproduce and account for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub run_id: Uuid,
    pub repo_url: String,
    pub base_ref: String,
    pub head_ref: String,
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<BranchMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<BranchMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_failure: Option<PartialFailure>,
    pub cache: CacheStats,
    pub usage: TokenUsage,
    pub estimated_cost_usd: f64,
}

/// Final output of one analysis. JSON-serializable, no cyclic references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub base_issues: Vec<Issue>,
    pub head_issues: Vec<Issue>,
    pub new_issues: Vec<Issue>,
    pub resolved_issues: Vec<Issue>,
    pub unchanged_issues: Vec<UnchangedIssue>,
    pub metadata: AnalysisMetadata,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Owns the analyzer connection and the checkout provider for the process
/// lifetime; one value serves many `analyze` calls.
pub struct Orchestrator {
    config: EngineConfig,
    transport: Arc<dyn AnalyzerTransport>,
    connection: Arc<AnalyzerConnection>,
    checkout: Arc<dyn CheckoutProvider>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn AnalyzerTransport>,
        checkout: Arc<dyn CheckoutProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let connection = Arc::new(AnalyzerConnection::new(
            Arc::clone(&transport),
            config.clone(),
        ));
        Ok(Self {
            config,
            transport,
            connection,
            checkout,
        })
    }

    /// Plug an external shared cache tier into the connection.
    pub fn with_shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.connection = Arc::new(
            AnalyzerConnection::new(Arc::clone(&self.transport), self.config.clone())
                .with_shared_cache(cache),
        );
        self
    }

    /// Analyze `head_ref` against `base_ref`.
    pub async fn analyze(
        &self,
        repo_url: &str,
        base_ref: &str,
        head_ref: &str,
    ) -> Result<ComparisonResult> {
        self.analyze_with_cancel(repo_url, base_ref, head_ref, CancelToken::new())
            .await
    }

    /// Analyze with an externally controlled cancellation token. The
    /// overall wall-clock budget also cancels through the same token, so
    /// working trees are released before this returns.
    pub async fn analyze_with_cancel(
        &self,
        repo_url: &str,
        base_ref: &str,
        head_ref: &str,
        cancel: CancelToken,
    ) -> Result<ComparisonResult> {
        let run = self.run_analysis(repo_url, base_ref, head_ref, &cancel);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(self.config.overall_timeout()) => {
                warn!(
                    budget_ms = self.config.overall_timeout_ms,
                    "overall analysis budget expired, cancelling"
                );
                cancel.cancel();
                // Let the run unwind gracefully so checkouts are released.
                match run.await {
                    Ok(result) => Ok(result),
                    Err(err) if err.is_cancelled() => {
                        Err(EngineError::cancelled("overall timeout"))
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn run_analysis(
        &self,
        repo_url: &str,
        base_ref: &str,
        head_ref: &str,
        cancel: &CancelToken,
    ) -> Result<ComparisonResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(%run_id, repo_url, base_ref, head_ref, "analysis started");

        let base_path = self.checkout.checkout(repo_url, base_ref).await?;
        let head_path = match self.checkout.checkout(repo_url, head_ref).await {
            Ok(path) => path,
            Err(err) => {
                self.release_quietly(&base_path).await;
                return Err(err);
            }
        };

        let outcome = self
            .run_branches(
                repo_url, base_ref, head_ref, &base_path, &head_path, cancel, run_id,
                started_at, started,
            )
            .await;

        // Working trees are scoped to this call, released on every path.
        self.release_quietly(&base_path).await;
        self.release_quietly(&head_path).await;

        outcome
    }

    async fn release_quietly(&self, path: &Path) {
        if let Err(err) = self.checkout.release(path).await {
            warn!("failed to release {}: {}", path.display(), err);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_branches(
        &self,
        repo_url: &str,
        base_ref: &str,
        head_ref: &str,
        base_path: &Path,
        head_path: &Path,
        cancel: &CancelToken,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Result<ComparisonResult> {
        let index_config = IndexConfig {
            file_size_cap_bytes: self.config.index_file_size_cap_bytes,
            group_min: self.config.snippet_index_group_min,
            group_max: self.config.snippet_index_group_max,
            ..Default::default()
        };

        let (base_index, head_index) = tokio::try_join!(
            build_index_blocking(base_path, index_config.clone()),
            build_index_blocking(head_path, index_config),
        )?;
        let base_index_stats = base_index.stats().clone();
        let head_index_stats = head_index.stats().clone();

        let semaphore = Arc::new(Semaphore::new(self.config.analyzer_concurrency));
        let base_collector = Collector::new(
            Arc::clone(&self.connection),
            Arc::clone(&semaphore),
            self.config.clone(),
            cancel.clone(),
        );
        let head_collector = Collector::new(
            Arc::clone(&self.connection),
            Arc::clone(&semaphore),
            self.config.clone(),
            cancel.clone(),
        );

        let (base_outcome, head_outcome) = if self.config.branch_parallelism >= 2 {
            tokio::join!(
                base_collector.collect(repo_url, base_ref, &base_index, &[]),
                head_collector.collect(repo_url, head_ref, &head_index, &[]),
            )
        } else {
            // Sequential mode: the head run can skip everything the base
            // run already found.
            let base_outcome = base_collector
                .collect(repo_url, base_ref, &base_index, &[])
                .await;
            let known: Vec<KnownFinding> = base_outcome
                .as_ref()
                .map(|result| {
                    result
                        .issues
                        .iter()
                        .map(|issue| KnownFinding {
                            title: issue.title.clone(),
                            file: issue.file().map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();
            let head_outcome = head_collector
                .collect(repo_url, head_ref, &head_index, &known)
                .await;
            (base_outcome, head_outcome)
        };

        // Cancellation never yields a partial result.
        for outcome in [&base_outcome, &head_outcome] {
            if let Err(err) = outcome {
                if err.is_cancelled() {
                    return Err(EngineError::cancelled("caller request"));
                }
            }
        }

        let (base, head, partial_failure) = match (base_outcome, head_outcome) {
            (Ok(base), Ok(head)) => (Some(base), Some(head), None),
            (Ok(base), Err(err)) => {
                error!(branch = head_ref, "head collection failed: {}", err);
                let failure = PartialFailure {
                    branch: "head".to_string(),
                    category: err.category_label().to_string(),
                    detail: err.to_string(),
                };
                (Some(base), None, Some(failure))
            }
            (Err(err), Ok(head)) => {
                error!(branch = base_ref, "base collection failed: {}", err);
                let failure = PartialFailure {
                    branch: "base".to_string(),
                    category: err.category_label().to_string(),
                    detail: err.to_string(),
                };
                (None, Some(head), Some(failure))
            }
            (Err(base_err), Err(head_err)) => {
                error!(
                    "both branches failed: base: {}; head: {}",
                    base_err, head_err
                );
                return Err(EngineError::BranchFailed {
                    branch: base_ref.to_string(),
                    source: Box::new(base_err),
                });
            }
        };

        let result = self
            .compose_result(ComposeArgs {
                run_id,
                repo_url,
                base_ref,
                head_ref,
                started_at,
                started,
                base,
                head,
                partial_failure,
                base_index_stats,
                head_index_stats,
            })
            .await;

        // The result is being emitted; cache entries backing it may now be
        // evicted on the cache's own schedule.
        self.connection.mark_delivered().await;

        Ok(result)
    }

    async fn compose_result(&self, args: ComposeArgs<'_>) -> ComparisonResult {
        let ComposeArgs {
            run_id,
            repo_url,
            base_ref,
            head_ref,
            started_at,
            started,
            base,
            head,
            partial_failure,
            base_index_stats,
            head_index_stats,
        } = args;

        let (base_issues, base_meta) = split_collection(base, base_ref, base_index_stats);
        let (head_issues, head_meta) = split_collection(head, head_ref, head_index_stats);

        let comparison = compare_branches(&base_issues, &head_issues);

        let usage = self.connection.usage().await;
        let cache = self.connection.cache_stats().await;
        let estimated_cost_usd = usage.estimated_cost(
            self.config.cost_per_million_input_tokens,
            self.config.cost_per_million_output_tokens,
        );

        info!(
            %run_id,
            new = comparison.new_issues.len(),
            resolved = comparison.resolved_issues.len(),
            unchanged = comparison.unchanged_issues.len(),
            partial = partial_failure.is_some(),
            "analysis complete"
        );

        ComparisonResult {
            base_issues,
            head_issues,
            new_issues: comparison.new_issues,
            resolved_issues: comparison.resolved_issues,
            unchanged_issues: comparison.unchanged_issues,
            metadata: AnalysisMetadata {
                run_id,
                repo_url: repo_url.to_string(),
                base_ref: base_ref.to_string(),
                head_ref: head_ref.to_string(),
                started_at,
                total_duration_ms: started.elapsed().as_millis() as u64,
                base: base_meta,
                head: head_meta,
                partial_failure,
                cache,
                usage,
                estimated_cost_usd,
            },
        }
    }
}

struct ComposeArgs<'a> {
    run_id: Uuid,
    repo_url: &'a str,
    base_ref: &'a str,
    head_ref: &'a str,
    started_at: DateTime<Utc>,
    started: Instant,
    base: Option<CollectionResult>,
    head: Option<CollectionResult>,
    partial_failure: Option<PartialFailure>,
    base_index_stats: IndexStats,
    head_index_stats: IndexStats,
}

fn split_collection(
    collection: Option<CollectionResult>,
    reference: &str,
    index_stats: IndexStats,
) -> (Vec<Issue>, Option<BranchMetadata>) {
    match collection {
        Some(result) => {
            let metadata = BranchMetadata::new(reference, result.metadata, index_stats);
            (result.issues, Some(metadata))
        }
        None => (Vec::new(), None),
    }
}

async fn build_index_blocking(path: &Path, config: IndexConfig) -> Result<RepositoryIndex> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || RepositoryIndex::build(&path, &config))
        .await
        .map_err(|e| EngineError::IndexIo(format!("index build task panicked: {e}")))?
}
