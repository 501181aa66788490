//! Prompt templates for the adaptive collection loop.
//!
//! Prompt text is data, not code: templates live here as constants and are
//! composed by substitution, so prompt evolution never touches the loop
//! itself.

use serde::{Deserialize, Serialize};

// ============================================================================
// Prompt Classes
// ============================================================================

/// Which kind of prompt a request carries; part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptClass {
    /// First-iteration full sweep.
    Comprehensive,
    /// Gap-fill prompt for iteration `n` (2-based).
    GapFill(u32),
    /// Re-query for a specific snippet's context.
    SnippetRequery,
}

impl PromptClass {
    /// Stable label used in cache keys and logs.
    pub fn label(&self) -> String {
        match self {
            Self::Comprehensive => "comprehensive".to_string(),
            Self::GapFill(iteration) => format!("gap_fill_{iteration}"),
            Self::SnippetRequery => "snippet_requery".to_string(),
        }
    }
}

// ============================================================================
// Known Findings (do-not-repeat list)
// ============================================================================

/// A finding already reported, carried into gap-fill prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFinding {
    pub title: String,
    pub file: Option<String>,
}

// ============================================================================
// Templates
// ============================================================================

/// System message sent with every analyzer request.
pub const REVIEWER_SYSTEM: &str = "\
You are a senior code reviewer analyzing a repository for concrete, \
verifiable issues. Every finding must reference code that actually exists \
in the repository. Use exact repository paths relative to the repo root; \
never fabricate paths, line numbers, or code. If you are not certain where \
an issue lives, quote the exact code snippet instead of guessing a path.";

/// Required shape of each finding, shared by all prompt classes.
const ISSUE_SHAPE: &str = r#"Return your findings as JSON:
{
  "issues": [
    {
      "title": "short description of the issue",
      "severity": "critical|high|medium|low",
      "category": "security|performance|code-quality|dependencies|testing|architecture|error-handling|other",
      "file": "exact/path/from/repo/root.ext",
      "line": 123,
      "code": "the exact offending code, quoted verbatim",
      "description": "why this is a problem and what impact it has",
      "suggestion": "how to fix it"
    }
  ]
}

Every field matters: title, severity, category, file, line, code, and
suggestion must be present for each issue. Quote code verbatim from the
repository - never paraphrase it."#;

const COMPREHENSIVE_TEMPLATE: &str = "\
Perform a comprehensive code review of repository {repo_url} at branch \
{branch}.

Look for issues across all of: security vulnerabilities, performance \
problems, error handling gaps, code quality, dependency risks, missing \
tests, and architectural concerns.

{issue_shape}

Use exact repository paths; never fabricate. Do not report placeholder \
locations like <path> or src/.../file.";

const GAP_FILL_TEMPLATE: &str = "\
You are continuing an iterative review of repository {repo_url} at branch \
{branch}. This is pass {iteration}.

These {known_count} findings have already been reported - do not repeat \
them:
{known_list}

Focus this pass on {focus}. Report only NEW issues not covered above.

{issue_shape}

Use exact repository paths; never fabricate locations.";

/// Directed asks rotated across gap-fill iterations.
const FOCUS_AREAS: &[&str] = &[
    "edge cases and boundary conditions the code mishandles",
    "concurrency hazards: races, deadlocks, and unsynchronized shared state",
    "error paths: swallowed failures, missing retries, and partial-state bugs",
    "dependency and version issues: outdated, vulnerable, or misused packages",
];

// ============================================================================
// Composition
// ============================================================================

/// First-iteration prompt demanding the full issue shape.
pub fn comprehensive_prompt(repo_url: &str, branch: &str) -> String {
    COMPREHENSIVE_TEMPLATE
        .replace("{repo_url}", repo_url)
        .replace("{branch}", branch)
        .replace("{issue_shape}", ISSUE_SHAPE)
}

/// Gap-fill prompt for iteration `iteration` (>= 2), parameterized by what
/// is already known.
pub fn gap_fill_prompt(
    repo_url: &str,
    branch: &str,
    iteration: u32,
    known: &[KnownFinding],
) -> String {
    let known_list = if known.is_empty() {
        "(none yet)".to_string()
    } else {
        known
            .iter()
            .map(|finding| match &finding.file {
                Some(file) => format!("- {} ({})", finding.title, file),
                None => format!("- {}", finding.title),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let focus = FOCUS_AREAS[(iteration.saturating_sub(2) as usize) % FOCUS_AREAS.len()];

    GAP_FILL_TEMPLATE
        .replace("{repo_url}", repo_url)
        .replace("{branch}", branch)
        .replace("{iteration}", &iteration.to_string())
        .replace("{known_count}", &known.len().to_string())
        .replace("{known_list}", &known_list)
        .replace("{focus}", focus)
        .replace("{issue_shape}", ISSUE_SHAPE)
}
