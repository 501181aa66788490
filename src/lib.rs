//! # Reviewflow - Iterative Code-Review Analysis Engine
//!
//! Reviewflow turns an unreliable, nondeterministic LLM analysis service
//! into a stable, deduplicated, location-accurate set of code-review
//! issues, then categorizes them across a base and head branch.
//!
//! ## Architecture
//!
//! - **Repository index**: in-memory, content-addressed index of a working
//!   tree for sub-millisecond snippet lookups
//! - **Unified parser**: format-agnostic extraction of issues from JSON,
//!   labeled text, and markdown responses
//! - **Validator**: grounds every issue to a real file and line, recovering
//!   fabricated locations through the snippet index
//! - **Adaptive collection loop**: multi-iteration prompting with gap
//!   analysis and convergence detection
//! - **Categorizer**: new / resolved / unchanged partitions across branches
//! - **Connection layer**: timeouts, retries with backoff, two-tier caching
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reviewflow::{EngineConfig, GitCheckout, HttpAnalyzer, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> reviewflow::Result<()> {
//!     let config = EngineConfig::default();
//!     let transport = Arc::new(
//!         HttpAnalyzer::new("https://analyzer.example.com/v1/analyze", &config)?,
//!     );
//!     let checkout = Arc::new(GitCheckout::new("data/checkouts")?);
//!     let orchestrator = Orchestrator::new(config, transport, checkout)?;
//!
//!     let result = orchestrator
//!         .analyze("https://github.com/acme/service.git", "main", "feature/retry")
//!         .await?;
//!     println!("{} new issues", result.new_issues.len());
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod cache;
pub mod cancel;
pub mod categorizer;
pub mod checkout;
pub mod collector;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod issue;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod repo_index;
pub mod telemetry;
pub mod validator;

pub use analyzer::{
    AnalyzerConnection, AnalyzerPayload, AnalyzerRequest, AnalyzerResponse, AnalyzerTransport,
    ChatMessage, HttpAnalyzer, TokenUsage,
};
pub use cache::{cache_key, CacheStats, MemoryCache, SharedCache};
pub use cancel::CancelToken;
pub use categorizer::{compare_branches, BranchComparison, UnchangedIssue};
pub use checkout::{CheckoutProvider, GitCheckout};
pub use collector::{
    CollectionMetadata, CollectionPhase, CollectionResult, Collector, IterationRecord,
};
pub use config::EngineConfig;
pub use error::{EngineError, FetchFailure, Result};
pub use issue::{Category, Issue, Location, Severity};
pub use orchestrator::{
    AnalysisMetadata, BranchMetadata, ComparisonResult, Orchestrator, PartialFailure,
};
pub use parser::{parse_response, ParseOutcome, ResponseFormat};
pub use prompts::{comprehensive_prompt, gap_fill_prompt, KnownFinding, PromptClass};
pub use repo_index::{IndexConfig, IndexStats, RepositoryIndex, SnippetMatch};
pub use telemetry::init_tracing;
pub use validator::{validate_and_filter, validate_issue, DropReason, ValidationOutcome, ValidationReport};
