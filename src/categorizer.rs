//! Cross-Branch Categorizer
//!
//! Matches the final issue sets of the base and head branches and
//! partitions head/base issues into new, resolved, and unchanged. Matching
//! uses the location-agnostic cross-branch fingerprint so refactors that
//! move code do not turn an old issue into a "new" one.

use crate::fingerprint;
use crate::issue::{Issue, Location};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

// ============================================================================
// Partition Types
// ============================================================================

/// An issue present on both branches, carrying both representations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnchangedIssue {
    /// The head branch's representation.
    pub issue: Issue,
    /// The matching base-branch issue.
    pub base_issue: Issue,
}

impl UnchangedIssue {
    /// Where the issue lived on the base branch.
    pub fn original_location(&self) -> Option<&Location> {
        self.base_issue.location.as_ref()
    }
}

/// Output of comparing two branches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchComparison {
    /// Head issues with no fingerprint match in base.
    pub new_issues: Vec<Issue>,
    /// Base issues with no fingerprint match in head.
    pub resolved_issues: Vec<Issue>,
    /// Head issues whose fingerprint appears in base.
    pub unchanged_issues: Vec<UnchangedIssue>,
}

// ============================================================================
// Comparison
// ============================================================================

/// Partition base and head issue sets.
///
/// Duplicate cross-branch fingerprints within the head set should not
/// survive collection; if one does, the highest-confidence record wins and
/// a warning is logged.
pub fn compare_branches(base: &[Issue], head: &[Issue]) -> BranchComparison {
    let base_by_fp: HashMap<String, &Issue> = base
        .iter()
        .map(|issue| (fingerprint::cross_branch(issue), issue))
        .collect();

    // Collapse head-side fingerprint collisions to the best record.
    let mut head_by_fp: HashMap<String, &Issue> = HashMap::new();
    let mut head_order: Vec<String> = Vec::new();
    for issue in head {
        let fp = fingerprint::cross_branch(issue);
        let existing_confidence = head_by_fp.get(&fp).map(|existing| existing.confidence);
        match existing_confidence {
            Some(confidence) => {
                warn!(
                    title = %issue.title,
                    "duplicate cross-branch fingerprint in head set"
                );
                if issue.confidence > confidence {
                    head_by_fp.insert(fp, issue);
                }
            }
            None => {
                head_by_fp.insert(fp.clone(), issue);
                head_order.push(fp);
            }
        }
    }

    let mut comparison = BranchComparison::default();

    for fp in &head_order {
        let Some(issue) = head_by_fp.get(fp) else {
            continue;
        };
        match base_by_fp.get(fp) {
            Some(base_issue) => comparison.unchanged_issues.push(UnchangedIssue {
                issue: (*issue).clone(),
                base_issue: (*base_issue).clone(),
            }),
            None => comparison.new_issues.push((*issue).clone()),
        }
    }

    let head_fps: std::collections::HashSet<&String> = head_order.iter().collect();
    for issue in base {
        let fp = fingerprint::cross_branch(issue);
        if !head_fps.contains(&fp) {
            comparison.resolved_issues.push(issue.clone());
        }
    }

    sort_partition(&mut comparison.new_issues);
    sort_partition(&mut comparison.resolved_issues);
    comparison
        .unchanged_issues
        .sort_by(|a, b| partition_key(&a.issue).cmp(&partition_key(&b.issue)));

    comparison
}

type PartitionKey<'a> = (
    crate::issue::Severity,
    crate::issue::Category,
    &'a str,
    u32,
);

/// Ordering within a partition: severity, then category, then file path,
/// then line. Unknown locations sort after located issues of the same
/// severity and category.
fn partition_key(issue: &Issue) -> PartitionKey<'_> {
    match &issue.location {
        Some(location) => (
            issue.severity,
            issue.category,
            location.file.as_str(),
            location.line,
        ),
        None => (issue.severity, issue.category, "\u{10FFFF}", u32::MAX),
    }
}

fn sort_partition(issues: &mut [Issue]) {
    issues.sort_by(|a, b| partition_key(a).cmp(&partition_key(b)));
}
