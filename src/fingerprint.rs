//! Content fingerprints and text normalization.
//!
//! Two distinct fingerprints exist on purpose:
//!
//! - the **intra-branch** fingerprint is location-sensitive (with a small
//!   line bucket) and deduplicates issues within one branch collection;
//! - the **cross-branch** fingerprint is location-agnostic and snippet-based
//!   so refactors that move code do not break base/head matching.

use crate::issue::Issue;
use sha2::{Digest, Sha256};

/// Line numbers within this distance collapse to the same intra-branch
/// fingerprint bucket.
const LINE_BUCKET: u32 = 5;

// ============================================================================
// Normalization
// ============================================================================

/// Lowercase a title and strip everything that is not alphanumeric.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalize a code fragment the way the snippet index does: trim each
/// line, collapse whitespace runs to a single space, drop blank lines, and
/// join the remainder with single spaces.
///
/// This function is the single definition of snippet normalization; the
/// index builder and every lookup path share it.
pub fn normalize_snippet(snippet: &str) -> String {
    let mut out = String::with_capacity(snippet.len());
    for line in snippet.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        let mut last_was_space = false;
        for c in trimmed.chars() {
            if c.is_whitespace() {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            } else {
                out.push(c);
                last_was_space = false;
            }
        }
    }
    out
}

/// Replace numeric literals with `N` on top of snippet normalization, for
/// the cross-branch fingerprint.
pub fn mask_numeric_literals(normalized: &str) -> String {
    let mut out = String::with_capacity(normalized.len());
    let mut in_number = false;
    for c in normalized.chars() {
        if c.is_ascii_digit() {
            if !in_number {
                out.push('N');
                in_number = true;
            }
        } else if c == '.' && in_number {
            // Swallow the fractional part of a float literal.
        } else {
            out.push(c);
            in_number = false;
        }
    }
    out
}

fn hex_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Dedupe key within one branch collection.
pub fn intra_branch(issue: &Issue) -> String {
    let (file, bucket) = match &issue.location {
        Some(location) => (location.file.as_str(), location.line / LINE_BUCKET),
        None => ("unknown", 0),
    };
    hex_digest(&[
        &normalize_title(&issue.title),
        issue.severity.as_str(),
        issue.category.as_str(),
        file,
        &bucket.to_string(),
    ])
}

/// Matching key used by the cross-branch categorizer.
///
/// Snippet-based when a snippet exists; otherwise falls back to the file
/// basename (or `"unknown"` for location-less issues).
pub fn cross_branch(issue: &Issue) -> String {
    let snippet = normalize_snippet(&issue.code_snippet);
    if !snippet.is_empty() {
        hex_digest(&[
            &normalize_title(&issue.title),
            issue.severity.as_str(),
            issue.category.as_str(),
            &mask_numeric_literals(&snippet),
        ])
    } else {
        let basename = issue
            .location
            .as_ref()
            .map(|l| l.basename())
            .unwrap_or("unknown");
        hex_digest(&[
            &normalize_title(&issue.title),
            issue.severity.as_str(),
            issue.category.as_str(),
            basename,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, Location, Severity};
    use proptest::prelude::*;

    fn issue_at(title: &str, file: &str, line: u32) -> Issue {
        let mut issue = Issue::new(title, Severity::High, Category::Security);
        issue.location = Some(Location::new(file, line));
        issue
    }

    #[test]
    fn title_normalization_strips_punctuation() {
        assert_eq!(normalize_title("SQL Injection!"), "sqlinjection");
        assert_eq!(normalize_title("  N+1  query "), "n1query");
    }

    #[test]
    fn snippet_normalization_collapses_whitespace() {
        let raw = "  if (x) {\n\n      return   y;\n  }\n";
        assert_eq!(normalize_snippet(raw), "if (x) { return y; }");
    }

    #[test]
    fn numeric_masking() {
        let normalized = normalize_snippet("retry(3, 1.5, id)");
        assert_eq!(mask_numeric_literals(&normalized), "retry(N, N, id)");
    }

    #[test]
    fn nearby_lines_share_intra_fingerprint() {
        let a = issue_at("SQL injection", "api/users.ts", 45);
        let b = issue_at("SQL injection", "api/users.ts", 47);
        let c = issue_at("SQL injection", "api/users.ts", 90);
        assert_eq!(intra_branch(&a), intra_branch(&b));
        assert_ne!(intra_branch(&a), intra_branch(&c));
    }

    #[test]
    fn cross_branch_ignores_location_when_snippet_present() {
        let mut base = issue_at("SQL injection", "api/users.ts", 45);
        base.code_snippet = "SELECT * FROM users WHERE id = \" + id".to_string();
        let mut head = issue_at("SQL injection", "api/v2/users.ts", 12);
        head.code_snippet = "SELECT * FROM users   WHERE id = \" + id".to_string();
        assert_eq!(cross_branch(&base), cross_branch(&head));
    }

    #[test]
    fn cross_branch_basename_fallback() {
        let a = issue_at("Missing tests", "src/api/users.ts", 10);
        let b = issue_at("Missing tests", "lib/api/users.ts", 99);
        assert_eq!(cross_branch(&a), cross_branch(&b));

        let c = issue_at("Missing tests", "lib/api/orders.ts", 99);
        assert_ne!(cross_branch(&a), cross_branch(&c));
    }

    proptest! {
        #[test]
        fn snippet_normalization_is_idempotent(s in "\\PC{0,200}") {
            let once = normalize_snippet(&s);
            prop_assert_eq!(normalize_snippet(&once), once.clone());
        }

        #[test]
        fn fingerprints_are_hex_sha256(title in "\\PC{1,60}") {
            let issue = Issue::new(title, Severity::Medium, Category::Other);
            let fp = intra_branch(&issue);
            prop_assert_eq!(fp.len(), 64);
            prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
