//! Unified Response Parser
//!
//! Converts one analyzer response — whatever shape it arrived in — into a
//! normalized list of candidate issues. This is the only place in the
//! engine that tolerates heterogeneous input; downstream code never
//! re-inspects raw analyzer text.
//!
//! Four formats are auto-detected, in order:
//!
//! 1. structured object with an `issues` array,
//! 2. JSON embedded in surrounding prose or markdown fences,
//! 3. labeled text blocks (`Issue:`, `Severity:`, `File:`, ...),
//! 4. numbered or bulleted markdown lists.
//!
//! The parser is deterministic, does no I/O, and never fails: unrecognized
//! input produces an empty list and a warning.

use crate::analyzer::AnalyzerPayload;
use crate::issue::{is_placeholder_path, normalize_path, Category, Issue, Location, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Outcome Types
// ============================================================================

/// Which shape the response was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    StructuredJson,
    EmbeddedJson,
    LabeledText,
    MarkdownList,
    Unrecognized,
}

impl ResponseFormat {
    /// Base confidence assigned to issues parsed from this format.
    fn base_confidence(self) -> u8 {
        match self {
            Self::StructuredJson => 95,
            Self::EmbeddedJson => 80,
            Self::LabeledText => 70,
            Self::MarkdownList => 60,
            Self::Unrecognized => 0,
        }
    }
}

/// Result of parsing one analyzer response.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub issues: Vec<Issue>,
    pub format: ResponseFormat,
    pub warnings: Vec<String>,
}

impl ParseOutcome {
    fn empty(format: ResponseFormat, warning: impl Into<String>) -> Self {
        Self {
            issues: Vec::new(),
            format,
            warnings: vec![warning.into()],
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parse an analyzer payload into candidate issues.
pub fn parse_response(payload: &AnalyzerPayload) -> ParseOutcome {
    match payload {
        AnalyzerPayload::Json(value) => parse_structured(value),
        AnalyzerPayload::Text(text) => parse_text(text),
    }
}

fn parse_structured(value: &Value) -> ParseOutcome {
    match issues_array(value) {
        Some(items) => {
            let mut warnings = Vec::new();
            let issues = build_issues_from_json(items, ResponseFormat::StructuredJson, &mut warnings);
            ParseOutcome {
                issues,
                format: ResponseFormat::StructuredJson,
                warnings,
            }
        }
        None => ParseOutcome::empty(
            ResponseFormat::Unrecognized,
            "structured payload has no issues array",
        ),
    }
}

fn parse_text(text: &str) -> ParseOutcome {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParseOutcome::empty(ResponseFormat::Unrecognized, "empty response");
    }

    // 1. The whole payload is JSON.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if issues_array(&value).is_some() {
            return parse_structured(&value);
        }
    }

    // 2. JSON embedded in prose or fences.
    let defenced = strip_markdown_fences(trimmed);
    for candidate in [defenced, trimmed] {
        if let Some(fragment) = extract_balanced_object(candidate) {
            let repaired = repair_json(fragment);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                if let Some(items) = issues_array(&value) {
                    let mut warnings = Vec::new();
                    let issues =
                        build_issues_from_json(items, ResponseFormat::EmbeddedJson, &mut warnings);
                    return ParseOutcome {
                        issues,
                        format: ResponseFormat::EmbeddedJson,
                        warnings,
                    };
                }
            }
        }
    }

    // 3. Labeled text records.
    if looks_labeled(trimmed) {
        let mut warnings = Vec::new();
        let issues = parse_labeled_text(trimmed, &mut warnings);
        if !issues.is_empty() {
            return ParseOutcome {
                issues,
                format: ResponseFormat::LabeledText,
                warnings,
            };
        }
    }

    // 4. Markdown lists.
    if looks_listed(trimmed) {
        let mut warnings = Vec::new();
        let issues = parse_markdown_list(trimmed, &mut warnings);
        if !issues.is_empty() {
            return ParseOutcome {
                issues,
                format: ResponseFormat::MarkdownList,
                warnings,
            };
        }
    }

    ParseOutcome::empty(
        ResponseFormat::Unrecognized,
        format!(
            "unrecognized response format (first 80 chars: {:?})",
            trimmed.chars().take(80).collect::<String>()
        ),
    )
}

// ============================================================================
// Structured / Embedded JSON
// ============================================================================

/// Find the issues array inside a JSON value. Accepts a top-level array,
/// or an object with `issues` (or a few common aliases).
fn issues_array(value: &Value) -> Option<&Vec<Value>> {
    if let Some(array) = value.as_array() {
        return Some(array);
    }
    let obj = value.as_object()?;
    for key in ["issues", "findings", "problems", "results"] {
        if let Some(array) = obj.get(key).and_then(Value::as_array) {
            return Some(array);
        }
    }
    None
}

fn build_issues_from_json(
    items: &[Value],
    format: ResponseFormat,
    warnings: &mut Vec<String>,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        match item.as_object() {
            Some(obj) => {
                if let Some(issue) = issue_from_json_object(obj, format) {
                    issues.push(issue);
                } else {
                    warnings.push(format!("issue #{idx} had no usable title or description"));
                }
            }
            None => {
                // Tolerate bare-string findings.
                if let Some(text) = item.as_str() {
                    if !text.trim().is_empty() {
                        issues.push(issue_from_free_text(text, format));
                        continue;
                    }
                }
                warnings.push(format!("issue #{idx} is not an object"));
            }
        }
    }
    issues
}

fn string_field<'a>(
    obj: &'a serde_json::Map<String, Value>,
    keys: &[&str],
) -> Option<&'a str> {
    for key in keys {
        if let Some(text) = obj.get(*key).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn line_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<u32> {
    for key in keys {
        match obj.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(line) = n.as_u64() {
                    if line > 0 && line <= u64::from(u32::MAX) {
                        return Some(line as u32);
                    }
                }
            }
            Some(Value::String(s)) => {
                if let Ok(line) = s.trim().parse::<u32>() {
                    if line > 0 {
                        return Some(line);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn issue_from_json_object(
    obj: &serde_json::Map<String, Value>,
    format: ResponseFormat,
) -> Option<Issue> {
    let title = string_field(obj, &["title", "issue", "name", "summary"])
        .unwrap_or("")
        .trim()
        .to_string();
    let description = string_field(obj, &["description", "impact", "detail", "details", "explanation"])
        .unwrap_or("")
        .trim()
        .to_string();
    if title.is_empty() && description.is_empty() {
        return None;
    }

    let heuristic_text = format!("{title} {description}");

    let severity = string_field(obj, &["severity", "priority", "level"])
        .map(Severity::parse_lenient)
        .unwrap_or_else(|| infer_severity(&heuristic_text));

    let category = string_field(obj, &["category", "type", "kind"])
        .and_then(Category::parse)
        .unwrap_or_else(|| Category::infer_from_text(&heuristic_text));

    // Location: top-level file/line, or a nested location object.
    let location_obj = obj.get("location").and_then(Value::as_object);
    let file = string_field(obj, &["file", "path", "filename"]).or_else(|| {
        location_obj.and_then(|loc| string_field(loc, &["file", "path", "filename"]))
    });
    let line = line_field(obj, &["line", "line_number", "lineNumber"])
        .or_else(|| location_obj.and_then(|loc| line_field(loc, &["line", "line_number"])));
    let column = line_field(obj, &["column", "col"])
        .or_else(|| location_obj.and_then(|loc| line_field(loc, &["column", "col"])));

    let location = build_location(file, line, column);

    let code_snippet = match obj
        .get("code_snippet")
        .or_else(|| obj.get("codeSnippet"))
        .or_else(|| obj.get("snippet"))
        .or_else(|| obj.get("code"))
    {
        Some(Value::String(s)) => s.trim_matches('\n').to_string(),
        Some(Value::Array(lines)) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    let suggestion = string_field(obj, &["suggestion", "recommendation", "fix", "remediation"])
        .map(|s| s.trim().to_string());

    Some(finalize_issue(
        title,
        description,
        severity,
        category,
        location,
        code_snippet,
        suggestion,
        format,
    ))
}

fn issue_from_free_text(text: &str, format: ResponseFormat) -> Issue {
    let description = text.trim().to_string();
    finalize_issue(
        String::new(),
        description.clone(),
        infer_severity(&description),
        Category::infer_from_text(&description),
        None,
        String::new(),
        None,
        format,
    )
}

// ============================================================================
// Labeled Text
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Title,
    Severity,
    Category,
    File,
    Line,
    Code,
    Suggestion,
    Description,
}

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*>]\s*)?(?:\*\*)?([a-z][a-z /_]{0,20}?)(?:\*\*)?\s*[:=]\s*(.*)$")
        .expect("label regex")
});

static HR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-=_*]{3,}\s*$").expect("hr regex"));

fn field_kind(label: &str) -> Option<FieldKind> {
    let label = label.trim().to_lowercase().replace('_', " ");
    match label.as_str() {
        "issue" | "title" => Some(FieldKind::Title),
        "severity" | "priority" => Some(FieldKind::Severity),
        "category" | "type" => Some(FieldKind::Category),
        "file" | "path" | "filename" | "file path" => Some(FieldKind::File),
        "line" | "line number" | "lines" => Some(FieldKind::Line),
        "code" | "snippet" | "code snippet" => Some(FieldKind::Code),
        "recommendation" | "fix" | "suggestion" | "remediation" => Some(FieldKind::Suggestion),
        "impact" | "description" | "details" | "detail" => Some(FieldKind::Description),
        _ => None,
    }
}

fn looks_labeled(text: &str) -> bool {
    let mut labels = 0usize;
    let mut has_title = false;
    for line in text.lines() {
        if let Some(captures) = LABEL_RE.captures(line) {
            if let Some(kind) = field_kind(&captures[1]) {
                labels += 1;
                if kind == FieldKind::Title {
                    has_title = true;
                }
            }
        }
    }
    has_title && labels >= 2
}

#[derive(Debug, Default)]
struct LabeledRecord {
    title: Option<String>,
    severity: Option<String>,
    category: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    code: Vec<String>,
    suggestion: Vec<String>,
    description: Vec<String>,
}

impl LabeledRecord {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.file.is_none()
            && self.code.is_empty()
            && self.description.is_empty()
    }
}

fn parse_labeled_text(text: &str, warnings: &mut Vec<String>) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut record = LabeledRecord::default();
    let mut last_field: Option<FieldKind> = None;
    let mut in_fence = false;

    let mut flush = |record: &mut LabeledRecord, issues: &mut Vec<Issue>| {
        if record.is_empty() {
            *record = LabeledRecord::default();
            return;
        }
        if let Some(issue) = labeled_record_to_issue(std::mem::take(record)) {
            issues.push(issue);
        } else {
            warnings.push("labeled record had no usable title or description".to_string());
        }
    };

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            if in_fence {
                last_field = Some(FieldKind::Code);
            }
            continue;
        }
        if in_fence {
            record.code.push(line.to_string());
            continue;
        }

        if HR_RE.is_match(line) {
            flush(&mut record, &mut issues);
            last_field = None;
            continue;
        }
        if line.trim().is_empty() {
            flush(&mut record, &mut issues);
            last_field = None;
            continue;
        }

        let label_match = LABEL_RE
            .captures(line)
            .and_then(|c| field_kind(&c[1]).map(|kind| (kind, c[2].trim().to_string())));

        match label_match {
            Some((FieldKind::Title, value)) => {
                if record.title.is_some() {
                    flush(&mut record, &mut issues);
                }
                record.title = Some(value);
                last_field = Some(FieldKind::Title);
            }
            Some((kind, value)) => {
                match kind {
                    FieldKind::Severity => record.severity = Some(value),
                    FieldKind::Category => record.category = Some(value),
                    FieldKind::File => record.file = Some(value),
                    FieldKind::Line => {
                        record.line = value
                            .trim_matches(|c: char| !c.is_ascii_digit())
                            .parse()
                            .ok()
                    }
                    FieldKind::Code => {
                        if !value.is_empty() {
                            record.code.push(value);
                        }
                    }
                    FieldKind::Suggestion => record.suggestion.push(value),
                    FieldKind::Description => record.description.push(value),
                    FieldKind::Title => unreachable!("handled above"),
                }
                last_field = Some(kind);
            }
            None => {
                // Continuation of the previous multi-line field.
                match last_field {
                    Some(FieldKind::Code) => record.code.push(line.to_string()),
                    Some(FieldKind::Suggestion) => {
                        record.suggestion.push(line.trim().to_string())
                    }
                    _ => record.description.push(line.trim().to_string()),
                }
            }
        }
    }
    flush(&mut record, &mut issues);

    issues
}

fn labeled_record_to_issue(record: LabeledRecord) -> Option<Issue> {
    let title = record.title.unwrap_or_default();
    let description = record.description.join("\n").trim().to_string();
    if title.is_empty() && description.is_empty() {
        return None;
    }

    let heuristic_text = format!("{title} {description}");
    let severity = record
        .severity
        .map(|s| Severity::parse_lenient(&s))
        .unwrap_or_else(|| infer_severity(&heuristic_text));
    let category = record
        .category
        .as_deref()
        .and_then(Category::parse)
        .unwrap_or_else(|| Category::infer_from_text(&heuristic_text));

    let location = build_location(record.file.as_deref(), record.line, None);
    let code = record.code.join("\n").trim_matches('\n').to_string();
    let suggestion = if record.suggestion.is_empty() {
        None
    } else {
        Some(record.suggestion.join("\n").trim().to_string())
    };

    Some(finalize_issue(
        title,
        description,
        severity,
        category,
        location,
        code,
        suggestion,
        ResponseFormat::LabeledText,
    ))
}

// ============================================================================
// Markdown Lists
// ============================================================================

static LIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{1,3}[.)]|[-*+])\s+(.*)$").expect("list regex"));

static INLINE_LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)`?([A-Za-z0-9_\-./]+\.[A-Za-z0-9]{1,8}):(\d{1,6})`?").expect("loc regex")
});

static INLINE_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*>]\s*)?(?:\*\*)?(?:file|path)(?:\*\*)?\s*[:=]\s*`?([^`\n]+?)`?\s*$")
        .expect("file regex")
});

static INLINE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*>]\s*)?(?:\*\*)?line(?:\*\*)?\s*[:=]\s*(\d{1,6})\s*$")
        .expect("line regex")
});

static SEVERITY_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(critical|blocker|high|major|medium|moderate|low|minor)\b")
        .expect("severity regex")
});

static SEVERITY_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*>]\s*)?(?:\*\*)?severity(?:\*\*)?\s*[:=]\s*(\w+)")
        .expect("severity label regex")
});

static SUGGESTION_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*>]\s*)?(?:\*\*)?(?:fix|suggestion|recommendation)(?:\*\*)?\s*[:=]\s*(.+)$")
        .expect("suggestion label regex")
});

static FENCED_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\n?(.*?)```").expect("fence regex")
});

fn looks_listed(text: &str) -> bool {
    text.lines().any(|l| LIST_ITEM_RE.is_match(l))
}

fn parse_markdown_list(text: &str, warnings: &mut Vec<String>) -> Vec<Issue> {
    // Group top-level items with their indented continuation lines.
    let mut items: Vec<String> = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            if let Some(current) = items.last_mut() {
                current.push('\n');
                current.push_str(line);
            }
            continue;
        }
        if !in_fence && LIST_ITEM_RE.is_match(line) && !line.starts_with(' ') {
            items.push(line.to_string());
        } else if let Some(current) = items.last_mut() {
            current.push('\n');
            current.push_str(line);
        }
    }

    let mut issues = Vec::new();
    for item in items {
        match markdown_item_to_issue(&item) {
            Some(issue) => issues.push(issue),
            None => warnings.push("list item had no usable content".to_string()),
        }
    }
    issues
}

fn markdown_item_to_issue(item: &str) -> Option<Issue> {
    let first_line = item.lines().next()?;
    let headline = LIST_ITEM_RE
        .captures(first_line)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| first_line.to_string());
    let title = headline
        .replace("**", "")
        .trim()
        .trim_end_matches(':')
        .to_string();
    if title.is_empty() {
        return None;
    }

    let severity = SEVERITY_LABEL_RE
        .captures(item)
        .map(|c| Severity::parse_lenient(&c[1]))
        .or_else(|| {
            SEVERITY_WORD_RE
                .captures(&title)
                .map(|c| Severity::parse_lenient(&c[1]))
        })
        .unwrap_or_else(|| infer_severity(item));

    let file = INLINE_FILE_RE.captures(item).map(|c| c[1].trim().to_string());
    let line = INLINE_LINE_RE
        .captures(item)
        .and_then(|c| c[1].parse::<u32>().ok());

    // Fall back to an inline `path:line` form anywhere in the item.
    let (file, line) = match (file, line) {
        (Some(f), l) => (Some(f), l),
        (None, l) => match INLINE_LOCATION_RE.captures(item) {
            Some(captures) => (
                Some(captures[1].to_string()),
                l.or_else(|| captures[2].parse().ok()),
            ),
            None => (None, l),
        },
    };

    let code_snippet = FENCED_CODE_RE
        .captures(item)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();

    let suggestion = SUGGESTION_LABEL_RE
        .captures(item)
        .map(|c| c[1].trim().to_string());

    // Description: everything after the first line, minus extracted labels
    // and fences.
    let description = item
        .lines()
        .skip(1)
        .filter(|l| {
            let t = l.trim();
            !t.is_empty()
                && !t.starts_with("```")
                && !INLINE_FILE_RE.is_match(l)
                && !INLINE_LINE_RE.is_match(l)
                && !SEVERITY_LABEL_RE.is_match(l)
                && !SUGGESTION_LABEL_RE.is_match(l)
        })
        .map(|l| l.trim().trim_start_matches(['-', '*', '+']).trim())
        .collect::<Vec<_>>()
        .join("\n");

    let heuristic_text = format!("{title} {description}");
    let category = Category::infer_from_text(&heuristic_text);
    let location = build_location(file.as_deref(), line, None);

    Some(finalize_issue(
        title,
        description,
        severity,
        category,
        location,
        code_snippet,
        suggestion,
        ResponseFormat::MarkdownList,
    ))
}

// ============================================================================
// Shared Normalization
// ============================================================================

fn build_location(file: Option<&str>, line: Option<u32>, column: Option<u32>) -> Option<Location> {
    let file = file?;
    if is_placeholder_path(file) {
        return None;
    }
    let normalized = normalize_path(file);
    if normalized.is_empty() {
        return None;
    }
    let mut location = Location::new(normalized, line.unwrap_or(1).max(1));
    location.column = column;
    Some(location)
}

/// Severity heuristics for responses that never named one.
fn infer_severity(text: &str) -> Severity {
    let lower = text.to_lowercase();
    if lower.contains("sql injection")
        || lower.contains("remote code")
        || lower.contains("rce")
        || lower.contains("auth bypass")
        || lower.contains("authentication bypass")
    {
        Severity::Critical
    } else if lower.contains("security")
        || lower.contains("vulnerab")
        || lower.contains("injection")
        || lower.contains("xss")
        || lower.contains("crash")
        || lower.contains("data loss")
        || lower.contains("panic")
    {
        Severity::High
    } else if lower.contains("style")
        || lower.contains("naming")
        || lower.contains("typo")
        || lower.contains("documentation")
        || lower.contains("comment")
    {
        Severity::Low
    } else {
        Severity::Medium
    }
}

#[allow(clippy::too_many_arguments)]
fn finalize_issue(
    title: String,
    description: String,
    severity: Severity,
    category: Category,
    location: Option<Location>,
    code_snippet: String,
    suggestion: Option<String>,
    format: ResponseFormat,
) -> Issue {
    let title = if title.is_empty() {
        Issue::title_from_description(&description)
    } else {
        title
    };

    let mut confidence = format.base_confidence();
    if location.is_none() {
        confidence = confidence.saturating_sub(10);
    }
    if code_snippet.is_empty() {
        confidence = confidence.saturating_sub(10);
    }

    let mut issue = Issue::new(title, severity, category);
    issue.description = description;
    issue.location = location;
    issue.code_snippet = code_snippet;
    issue.suggestion = suggestion;
    issue.confidence = confidence;
    issue
}

// ============================================================================
// JSON Extraction & Repair
// ============================================================================

/// Strip a single outer markdown code fence, if present.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Extract the first balanced top-level `{...}` fragment, string-aware.
fn extract_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fix the JSON defects analyzers commonly produce: trailing commas, smart
/// quotes, stray control characters.
fn repair_json(json: &str) -> String {
    let mut fixed = json.replace(",]", "]").replace(",}", "}");
    fixed = fixed
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'");
    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
