//! Issue Validator & Recovery
//!
//! Grounds every candidate issue to a real file and line. Locations the
//! analyzer got wrong (or fabricated) are recovered through the snippet
//! index; candidates that cannot be grounded are dropped, except
//! high-severity findings which are kept with an unknown location so they
//! are never silently lost.
//!
//! This module never errors; outcomes are data.

use crate::fingerprint::normalize_snippet;
use crate::issue::{Issue, Location, Severity};
use crate::repo_index::RepositoryIndex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Confidence penalty for a high-severity issue kept without a location.
const UNLOCATED_PENALTY: u8 = 20;

// ============================================================================
// Outcomes
// ============================================================================

/// Why an issue was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// No grounded location and no snippet that resolves to one.
    NoLocation,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLocation => write!(f, "no grounded location"),
        }
    }
}

/// Result of validating a single candidate issue.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// The claimed location exists and matches.
    Valid(Issue),
    /// The location was rewritten via snippet lookup.
    Recovered(Issue),
    /// The issue could not be grounded.
    Dropped(Issue, DropReason),
}

/// Partitioned result of bulk validation.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: Vec<Issue>,
    pub recovered: Vec<Issue>,
    pub dropped: Vec<(Issue, DropReason)>,
}

// ============================================================================
// Validation
// ============================================================================

/// Validate one candidate issue against the repository index.
pub fn validate_issue(mut issue: Issue, index: &RepositoryIndex) -> ValidationOutcome {
    // Step 1: does the claimed location hold up?
    if let Some(location) = &issue.location {
        if let Some(line_count) = index.line_count(&location.file) {
            if location.line >= 1 && location.line <= line_count {
                if snippet_matches_location(&issue, location, index) {
                    return ValidationOutcome::Valid(issue);
                }
                // The file and line exist but the snippet lives elsewhere;
                // fall through to recovery.
                debug!(
                    file = %location.file,
                    line = location.line,
                    "claimed location does not contain the snippet, attempting recovery"
                );
            }
        }
    }

    // Step 2: recover via snippet lookup.
    if !issue.code_snippet.trim().is_empty() {
        let matches = index.lookup_snippet(&issue.code_snippet);
        if let Some(best) = matches.first() {
            debug!(
                title = %issue.title,
                file = %best.file,
                line = best.line,
                score = best.match_score,
                "recovered issue location"
            );
            issue.location = Some(Location::new(best.file.clone(), best.line));
            issue.confidence = issue.confidence.min(best.match_score);
            return ValidationOutcome::Recovered(issue);
        }
    }

    // Step 3: keep high-severity findings, drop the rest.
    if issue.severity <= Severity::High {
        issue.location = None;
        issue.confidence = issue.confidence.saturating_sub(UNLOCATED_PENALTY);
        return ValidationOutcome::Valid(issue);
    }

    ValidationOutcome::Dropped(issue, DropReason::NoLocation)
}

/// When an issue carries a snippet, require the claimed line to actually
/// contain it (whitespace-normalized). Issues without snippets pass on
/// file/line bounds alone.
fn snippet_matches_location(issue: &Issue, location: &Location, index: &RepositoryIndex) -> bool {
    let snippet = normalize_snippet(&issue.code_snippet);
    if snippet.is_empty() {
        return true;
    }
    let snippet_lines = issue.code_snippet.lines().filter(|l| !l.trim().is_empty()).count() as u32;
    let context = snippet_lines.saturating_sub(1);
    match index.extract_lines(&location.file, location.line, context) {
        Ok(excerpt) => {
            let there = normalize_snippet(&excerpt.code);
            there.contains(&snippet)
        }
        Err(_) => false,
    }
}

/// Bulk validation: partitions the candidates and guarantees that every
/// surviving located issue points at a real file and an in-bounds line.
pub fn validate_and_filter(issues: Vec<Issue>, index: &RepositoryIndex) -> ValidationReport {
    let mut report = ValidationReport::default();
    for issue in issues {
        match validate_issue(issue, index) {
            ValidationOutcome::Valid(issue) => report.valid.push(issue),
            ValidationOutcome::Recovered(issue) => report.recovered.push(issue),
            ValidationOutcome::Dropped(issue, reason) => report.dropped.push((issue, reason)),
        }
    }
    debug!(
        valid = report.valid.len(),
        recovered = report.recovered.len(),
        dropped = report.dropped.len(),
        "validation complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Category;
    use crate::repo_index::IndexConfig;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &str)]) -> (TempDir, RepositoryIndex) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        let index = RepositoryIndex::build(dir.path(), &IndexConfig::default()).unwrap();
        (dir, index)
    }

    fn issue(
        title: &str,
        severity: Severity,
        file: Option<(&str, u32)>,
        snippet: &str,
        confidence: u8,
    ) -> Issue {
        let mut issue = Issue::new(title, severity, Category::ErrorHandling);
        issue.location = file.map(|(f, l)| Location::new(f, l));
        issue.code_snippet = snippet.to_string();
        issue.confidence = confidence;
        issue
    }

    #[test]
    fn valid_location_with_matching_snippet() {
        let source = format!("{}    await fn();\n{}", "x();\n".repeat(46), "y();\n".repeat(73));
        let (_dir, index) = tree(&[("source/index.ts", &source)]);

        let candidate = issue(
            "Unhandled promise rejection",
            Severity::High,
            Some(("source/index.ts", 47)),
            "await fn();",
            70,
        );
        match validate_issue(candidate, &index) {
            ValidationOutcome::Valid(validated) => {
                assert_eq!(validated.location.as_ref().unwrap().line, 47);
                assert_eq!(validated.confidence, 70);
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_recovers_via_snippet() {
        let source = format!("{}  await fn();\n", "pad();\n".repeat(87));
        let (_dir, index) = tree(&[("source/retry.ts", &source)]);

        let candidate = issue(
            "Unhandled promise rejection",
            Severity::High,
            Some(("src/api/payment.ts", 10)),
            "await fn();",
            70,
        );
        match validate_issue(candidate, &index) {
            ValidationOutcome::Recovered(recovered) => {
                let location = recovered.location.unwrap();
                assert_eq!(location.file, "source/retry.ts");
                assert_eq!(location.line, 88);
                assert!(recovered.confidence <= 80);
            }
            other => panic!("expected Recovered, got {other:?}"),
        }
    }

    #[test]
    fn wrong_line_in_existing_file_recovers() {
        let (_dir, index) = tree(&[(
            "src/db.rs",
            "fn a() {}\nfn b() {}\nfn c() {\n    run_query(sql);\n}\n",
        )]);

        let candidate = issue(
            "Query built from user input",
            Severity::Medium,
            Some(("src/db.rs", 1)),
            "run_query(sql);",
            80,
        );
        match validate_issue(candidate, &index) {
            ValidationOutcome::Recovered(recovered) => {
                assert_eq!(recovered.location.unwrap().line, 4);
            }
            other => panic!("expected Recovered, got {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_line_without_snippet_high_severity_kept() {
        let (_dir, index) = tree(&[("src/a.rs", "fn a() {}\n")]);

        let candidate = issue(
            "Memory safety concern",
            Severity::Critical,
            Some(("src/a.rs", 500)),
            "",
            80,
        );
        match validate_issue(candidate, &index) {
            ValidationOutcome::Valid(kept) => {
                assert!(kept.location.is_none());
                assert_eq!(kept.confidence, 60);
            }
            other => panic!("expected kept-with-unknown, got {other:?}"),
        }
    }

    #[test]
    fn low_severity_without_grounding_dropped() {
        let (_dir, index) = tree(&[("src/a.rs", "fn a() {}\n")]);

        let candidate = issue(
            "Inconsistent naming",
            Severity::Low,
            Some(("missing.rs", 3)),
            "",
            60,
        );
        match validate_issue(candidate, &index) {
            ValidationOutcome::Dropped(_, reason) => assert_eq!(reason, DropReason::NoLocation),
            other => panic!("expected Dropped, got {other:?}"),
        }
    }

    #[test]
    fn bulk_validation_partitions_and_grounds() {
        let (_dir, index) = tree(&[(
            "src/main.rs",
            "fn main() {\n    let data = load();\n    process(data);\n}\n",
        )]);

        let candidates = vec![
            issue("Good", Severity::Medium, Some(("src/main.rs", 2)), "let data = load();", 90),
            issue("Lost", Severity::Low, None, "", 50),
            issue("Movable", Severity::Medium, Some(("other.rs", 9)), "process(data);", 70),
        ];
        let report = validate_and_filter(candidates, &index);

        assert_eq!(report.valid.len(), 1);
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.dropped.len(), 1);

        // Location soundness holds for every survivor with a location.
        for survivor in report.valid.iter().chain(report.recovered.iter()) {
            if let Some(location) = &survivor.location {
                let count = index.line_count(&location.file).unwrap();
                assert!(location.line >= 1 && location.line <= count);
            }
        }
    }
}
