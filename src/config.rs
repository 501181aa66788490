//! Engine configuration.
//!
//! Every setting has a default; consumers can load overrides from a TOML
//! file and from `REVIEWFLOW_*` environment variables.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// Tunable settings for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // ------------------------------------------------------------------
    // Collection loop
    // ------------------------------------------------------------------
    /// Minimum iterations per branch before convergence may trigger.
    pub min_iterations: u32,

    /// Hard cap on iterations per branch.
    pub max_iterations: u32,

    /// Consecutive no-new-issue iterations required to converge.
    pub stable_window: u32,

    // ------------------------------------------------------------------
    // Timeouts
    // ------------------------------------------------------------------
    /// Soft budget for one collection iteration (call + parse + merge).
    pub per_iteration_timeout_ms: u64,

    /// Deadline for a single analyzer request.
    pub analyzer_request_timeout_ms: u64,

    /// Wall-clock budget for a whole `analyze` call.
    pub overall_timeout_ms: u64,

    // ------------------------------------------------------------------
    // Retry policy
    // ------------------------------------------------------------------
    /// Maximum attempts per analyzer call (first try included).
    pub max_retries: u32,

    /// Initial backoff between attempts.
    pub backoff_initial_ms: u64,

    /// Backoff ceiling.
    pub backoff_max_ms: u64,

    /// Jitter applied to each backoff, as a fraction (0.2 = ±20%).
    pub backoff_jitter: f64,

    // ------------------------------------------------------------------
    // Concurrency
    // ------------------------------------------------------------------
    /// How many branch collections may run at once (1 = sequential).
    pub branch_parallelism: usize,

    /// Global cap on concurrent analyzer calls across branches.
    pub analyzer_concurrency: usize,

    // ------------------------------------------------------------------
    // Repository index
    // ------------------------------------------------------------------
    /// Files larger than this are kept in the file set but skipped for
    /// snippet indexing.
    pub index_file_size_cap_bytes: u64,

    /// Smallest multi-line snippet window indexed.
    pub snippet_index_group_min: usize,

    /// Largest snippet window indexed.
    pub snippet_index_group_max: usize,

    // ------------------------------------------------------------------
    // Response cache
    // ------------------------------------------------------------------
    /// Bounded capacity of the process-local response cache.
    pub cache_capacity_entries: usize,

    /// TTL for comprehensive-prompt responses.
    pub cache_ttl_seconds_comprehensive: u64,

    /// TTL for gap-fill and requery responses.
    pub cache_ttl_seconds_gap_fill: u64,

    // ------------------------------------------------------------------
    // Analyzer request shape
    // ------------------------------------------------------------------
    /// Model identifier forwarded to the analyzer.
    pub model: String,

    /// Sampling temperature forwarded to the analyzer.
    pub temperature: f64,

    /// Completion-token cap forwarded to the analyzer.
    pub max_tokens: u32,

    // ------------------------------------------------------------------
    // Cost accounting (0.0 disables cost estimation)
    // ------------------------------------------------------------------
    pub cost_per_million_input_tokens: f64,
    pub cost_per_million_output_tokens: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_iterations: 3,
            max_iterations: 10,
            stable_window: 2,
            per_iteration_timeout_ms: 60_000,
            analyzer_request_timeout_ms: 120_000,
            overall_timeout_ms: 300_000,
            max_retries: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 15_000,
            backoff_jitter: 0.2,
            branch_parallelism: 2,
            analyzer_concurrency: 2,
            index_file_size_cap_bytes: 1_048_576,
            snippet_index_group_min: 2,
            snippet_index_group_max: 10,
            cache_capacity_entries: 50,
            cache_ttl_seconds_comprehensive: 300,
            cache_ttl_seconds_gap_fill: 600,
            model: "analysis-default".to_string(),
            temperature: 0.3,
            max_tokens: 4_000,
            cost_per_million_input_tokens: 0.0,
            cost_per_million_output_tokens: 0.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any missing key.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            EngineError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fold in `REVIEWFLOW_*` environment overrides for the settings
    /// operators commonly tune.
    pub fn apply_env_overrides(mut self) -> Self {
        fn env_u32(name: &str, into: &mut u32) {
            if let Ok(v) = std::env::var(name) {
                if let Ok(n) = v.parse() {
                    *into = n;
                }
            }
        }
        fn env_u64(name: &str, into: &mut u64) {
            if let Ok(v) = std::env::var(name) {
                if let Ok(n) = v.parse() {
                    *into = n;
                }
            }
        }
        fn env_usize(name: &str, into: &mut usize) {
            if let Ok(v) = std::env::var(name) {
                if let Ok(n) = v.parse() {
                    *into = n;
                }
            }
        }

        env_u32("REVIEWFLOW_MIN_ITERATIONS", &mut self.min_iterations);
        env_u32("REVIEWFLOW_MAX_ITERATIONS", &mut self.max_iterations);
        env_u32("REVIEWFLOW_STABLE_WINDOW", &mut self.stable_window);
        env_u64(
            "REVIEWFLOW_REQUEST_TIMEOUT_MS",
            &mut self.analyzer_request_timeout_ms,
        );
        env_u64("REVIEWFLOW_OVERALL_TIMEOUT_MS", &mut self.overall_timeout_ms);
        env_u32("REVIEWFLOW_MAX_RETRIES", &mut self.max_retries);
        env_usize(
            "REVIEWFLOW_ANALYZER_CONCURRENCY",
            &mut self.analyzer_concurrency,
        );
        env_usize(
            "REVIEWFLOW_BRANCH_PARALLELISM",
            &mut self.branch_parallelism,
        );
        if let Ok(model) = std::env::var("REVIEWFLOW_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
        self
    }

    /// Reject settings that would make the loop or the retry policy
    /// degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.min_iterations == 0 {
            return Err(EngineError::Config("min_iterations must be >= 1".into()));
        }
        if self.max_iterations < self.min_iterations {
            return Err(EngineError::Config(format!(
                "max_iterations ({}) must be >= min_iterations ({})",
                self.max_iterations, self.min_iterations
            )));
        }
        if self.stable_window == 0 || self.stable_window > self.max_iterations {
            return Err(EngineError::Config(format!(
                "stable_window ({}) must be in 1..=max_iterations",
                self.stable_window
            )));
        }
        if self.max_retries == 0 {
            return Err(EngineError::Config("max_retries must be >= 1".into()));
        }
        if self.analyzer_request_timeout_ms == 0 || self.overall_timeout_ms == 0 {
            return Err(EngineError::Config("timeouts must be non-zero".into()));
        }
        if self.analyzer_concurrency == 0 || self.branch_parallelism == 0 {
            return Err(EngineError::Config(
                "concurrency limits must be >= 1".into(),
            ));
        }
        if self.snippet_index_group_min < 1
            || self.snippet_index_group_max < self.snippet_index_group_min
        {
            return Err(EngineError::Config(
                "snippet index group bounds are inverted".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(EngineError::Config(
                "backoff_jitter must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.analyzer_request_timeout_ms)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_millis(self.per_iteration_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }
}
