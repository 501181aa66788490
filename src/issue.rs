//! Core issue model.
//!
//! `Issue` is the central entity flowing through the engine. The parser is
//! the only component that maps loose analyzer strings onto the `Severity`
//! and `Category` enums; everything downstream works with typed values.

use serde::{Deserialize, Serialize};

// ============================================================================
// Severity
// ============================================================================

/// Issue severity, normalized from whatever alias the analyzer produced.
///
/// Ordering follows declaration order: `Critical < High < Medium < Low`, so
/// an ascending sort lists the most severe issues first.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Map an analyzer-provided severity string onto the enum.
    ///
    /// Aliases: `crit`/`blocker` → critical, `major` → high, `minor` → low.
    /// Anything unrecognized lands on `Medium`.
    pub fn parse_lenient(raw: &str) -> Self {
        let token = raw.trim().to_lowercase();
        match token.as_str() {
            "critical" | "crit" | "blocker" => Self::Critical,
            "high" | "major" | "severe" => Self::High,
            "medium" | "moderate" => Self::Medium,
            "low" | "minor" | "trivial" | "info" | "informational" => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Category
// ============================================================================

/// Issue category, normalized from analyzer text.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Security,
    Performance,
    CodeQuality,
    Dependencies,
    Testing,
    Architecture,
    ErrorHandling,
    Other,
}

impl Category {
    /// Map an analyzer-provided category string onto the enum, if it names
    /// one directly.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw
            .trim()
            .to_lowercase()
            .replace([' ', '_'], "-");
        match token.as_str() {
            "security" | "vulnerability" => Some(Self::Security),
            "performance" | "perf" => Some(Self::Performance),
            "code-quality" | "quality" | "style" | "maintainability" => Some(Self::CodeQuality),
            "dependencies" | "dependency" | "deps" => Some(Self::Dependencies),
            "testing" | "tests" | "test-coverage" => Some(Self::Testing),
            "architecture" | "design" => Some(Self::Architecture),
            "error-handling" | "errors" | "reliability" => Some(Self::ErrorHandling),
            "other" | "misc" => Some(Self::Other),
            _ => None,
        }
    }

    /// Infer a category from free text (title + description keywords).
    /// Falls back to `CodeQuality` when nothing matches.
    pub fn infer_from_text(text: &str) -> Self {
        let lower = text.to_lowercase();

        const SECURITY: &[&str] = &[
            "sql injection",
            "sql",
            "xss",
            "csrf",
            "auth",
            "password",
            "secret",
            "crypto",
            "injection",
            "sanitiz",
            "escap",
        ];
        const PERFORMANCE: &[&str] = &[
            "n+1",
            "latency",
            "memory",
            "leak",
            "o(",
            "cache",
            "slow",
            "alloc",
            "throughput",
        ];
        const ERROR_HANDLING: &[&str] = &[
            "unhandled",
            "exception",
            "panic",
            "error handling",
            "rejection",
            "swallow",
            "unwrap",
        ];
        const TESTING: &[&str] = &["test", "coverage", "assert", "flaky"];
        const DEPENDENCIES: &[&str] = &["dependency", "outdated", "cve", "version pin", "vulnerable package"];
        const ARCHITECTURE: &[&str] = &["coupling", "layering", "circular", "god object", "architecture"];

        let matches = |set: &[&str]| set.iter().any(|kw| lower.contains(kw));

        if matches(SECURITY) {
            Self::Security
        } else if matches(PERFORMANCE) {
            Self::Performance
        } else if matches(ERROR_HANDLING) {
            Self::ErrorHandling
        } else if matches(DEPENDENCIES) {
            Self::Dependencies
        } else if matches(TESTING) {
            Self::Testing
        } else if matches(ARCHITECTURE) {
            Self::Architecture
        } else {
            Self::CodeQuality
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::CodeQuality => "code-quality",
            Self::Dependencies => "dependencies",
            Self::Testing => "testing",
            Self::Architecture => "architecture",
            Self::ErrorHandling => "error-handling",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Location
// ============================================================================

/// A grounded source location. `None` at the issue level is the "unknown"
/// sentinel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// Path relative to the repository root, forward slashes.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column, when the analyzer supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: normalize_path(&file.into()),
            line,
            column: None,
        }
    }

    /// Final path component, used by the cross-branch fingerprint fallback.
    pub fn basename(&self) -> &str {
        self.file.rsplit('/').next().unwrap_or(&self.file)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Normalize an analyzer-provided path into repo-relative form: forward
/// slashes, no leading `/` or `./`.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(stripped) = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix('/'))
    {
        path = stripped.to_string();
    }
    path
}

/// Whether an analyzer-provided path is obviously a placeholder rather than
/// a real repository path.
pub fn is_placeholder_path(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.eq_ignore_ascii_case("unknown") || trimmed.eq_ignore_ascii_case("n/a") {
        return true;
    }
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        return true;
    }
    if trimmed.contains('\u{2026}') || trimmed.contains("/.../") {
        return true;
    }
    false
}

// ============================================================================
// Issue
// ============================================================================

/// One code-review finding, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Stable within one analysis run; assigned after final dedupe.
    pub id: String,

    /// Short human phrase.
    pub title: String,

    /// Longer prose; may be empty.
    #[serde(default)]
    pub description: String,

    pub severity: Severity,

    pub category: Category,

    /// Grounded location, or `None` when unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Verbatim code extracted from the analyzed source; may be empty.
    #[serde(default)]
    pub code_snippet: String,

    /// Optional remediation text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Parser/validator confidence, 0–100.
    pub confidence: u8,
}

impl Issue {
    /// Construct an issue with the fields the parser extracts; `id` is
    /// assigned later by the collection loop.
    pub fn new(title: impl Into<String>, severity: Severity, category: Category) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            description: String::new(),
            severity,
            category,
            location: None,
            code_snippet: String::new(),
            suggestion: None,
            confidence: 0,
        }
    }

    /// Synthesize a title from the first 80 characters of a description.
    pub fn title_from_description(description: &str) -> String {
        let single_line = description
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        let mut title: String = single_line.chars().take(80).collect();
        if single_line.chars().count() > 80 {
            // Cut on a word boundary where possible.
            if let Some(pos) = title.rfind(' ') {
                title.truncate(pos);
            }
            title.push('\u{2026}');
        }
        title
    }

    /// File path if the location is known.
    pub fn file(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.file.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_aliases() {
        assert_eq!(Severity::parse_lenient("CRIT"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("blocker"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("Major"), Severity::High);
        assert_eq!(Severity::parse_lenient("minor"), Severity::Low);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Medium);
    }

    #[test]
    fn severity_ordering_puts_critical_first() {
        let mut severities = vec![Severity::Low, Severity::Critical, Severity::High];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::High, Severity::Low]
        );
    }

    #[test]
    fn category_direct_parse() {
        assert_eq!(Category::parse("Security"), Some(Category::Security));
        assert_eq!(Category::parse("error handling"), Some(Category::ErrorHandling));
        assert_eq!(Category::parse("code_quality"), Some(Category::CodeQuality));
        assert_eq!(Category::parse("nonsense"), None);
    }

    #[test]
    fn category_inference() {
        assert_eq!(
            Category::infer_from_text("Possible SQL injection in query builder"),
            Category::Security
        );
        assert_eq!(
            Category::infer_from_text("N+1 query causes high latency"),
            Category::Performance
        );
        assert_eq!(
            Category::infer_from_text("Unhandled promise rejection"),
            Category::ErrorHandling
        );
        assert_eq!(
            Category::infer_from_text("variable naming is inconsistent"),
            Category::CodeQuality
        );
    }

    #[test]
    fn placeholder_paths() {
        assert!(is_placeholder_path(""));
        assert!(is_placeholder_path("unknown"));
        assert!(is_placeholder_path("<path>"));
        assert!(is_placeholder_path("src/\u{2026}/file.ts"));
        assert!(is_placeholder_path("a/.../b.rs"));
        assert!(!is_placeholder_path("src/main.rs"));
        assert!(!is_placeholder_path("/src/api/payment.ts"));
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("/src/api/payment.ts"), "src/api/payment.ts");
        assert_eq!(normalize_path("./lib/mod.rs"), "lib/mod.rs");
        assert_eq!(normalize_path("a\\b\\c.py"), "a/b/c.py");
    }

    #[test]
    fn title_synthesis_truncates_on_word_boundary() {
        let description = "word ".repeat(40);
        let title = Issue::title_from_description(&description);
        assert!(title.chars().count() <= 81);
        assert!(title.ends_with('\u{2026}'));

        let short = Issue::title_from_description("short description");
        assert_eq!(short, "short description");
    }

    #[test]
    fn basename_extraction() {
        let location = Location::new("api/v2/users.ts", 12);
        assert_eq!(location.basename(), "users.ts");
        let flat = Location::new("main.rs", 1);
        assert_eq!(flat.basename(), "main.rs");
    }
}
