//! Repository Indexer
//!
//! Builds an in-memory, content-addressed index of a working tree: the set
//! of text files, per-file line counts, and a snippet index mapping
//! normalized code fragments to their occurrences. The index is immutable
//! after construction and lives for exactly one analysis.
//!
//! Lookups are O(1) expected; ties are resolved deterministically so issue
//! recovery always lands on the same location for the same input.

use crate::error::{EngineError, Result};
use crate::fingerprint::normalize_snippet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Directory names never descended into, regardless of gitignore state.
const DENY_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "out",
    "venv",
    ".venv",
    "__pycache__",
    "coverage",
    ".idea",
    ".vscode",
];

/// Extensions considered text: source languages plus common config.
const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "java", "kt", "go", "c", "h", "cpp",
    "hpp", "cc", "cs", "rb", "php", "swift", "scala", "sh", "sql", "html", "css", "vue",
    "toml", "yaml", "yml", "json", "xml", "ini",
];

/// Settings for index construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Files larger than this stay in the file set but are not snippet-indexed.
    pub file_size_cap_bytes: u64,

    /// Smallest multi-line window added to the snippet index.
    pub group_min: usize,

    /// Largest window added to the snippet index.
    pub group_max: usize,

    /// Extension whitelist (lowercase, no dot).
    pub extensions: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file_size_cap_bytes: 1_048_576,
            group_min: 2,
            group_max: 10,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// Index Data
// ============================================================================

/// One indexed occurrence of a normalized snippet.
#[derive(Debug, Clone)]
struct SnippetOccurrence {
    file: String,
    /// 1-based first line of the window.
    line: u32,
    /// Hash of the verbatim window text, for exact-match scoring.
    raw_hash: u64,
}

/// A scored lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetMatch {
    pub file: String,
    pub line: u32,
    /// 100 exact, 80 whitespace-normalized, 60 one-token fuzzy.
    pub match_score: u8,
}

/// Code extracted around a location.
#[derive(Debug, Clone)]
pub struct CodeExcerpt {
    pub code: String,
    pub language_hint: Option<&'static str>,
}

/// Summary statistics, surfaced in analysis metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: usize,
    pub total_lines: u64,
    pub snippet_keys: usize,
    pub skipped_oversize: usize,
    pub build_ms: u64,
}

/// Immutable in-memory index of one working tree.
pub struct RepositoryIndex {
    root: PathBuf,
    files: HashSet<String>,
    line_counts: HashMap<String, u32>,
    snippet_index: HashMap<Arc<str>, Vec<SnippetOccurrence>>,
    /// (first-token hash, token count) -> candidate keys, for fuzzy lookup.
    fuzzy_first: HashMap<(u64, u32), Vec<Arc<str>>>,
    /// (last-token hash, token count) -> candidate keys.
    fuzzy_last: HashMap<(u64, u32), Vec<Arc<str>>>,
    built_at: Instant,
    stats: IndexStats,
}

impl RepositoryIndex {
    /// Build the index eagerly with one pass per file.
    ///
    /// Individual file read errors are logged and the file is skipped; the
    /// build itself only fails if `root` is unreadable.
    pub fn build(root: impl AsRef<Path>, config: &IndexConfig) -> Result<Self> {
        let started = Instant::now();
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(EngineError::IndexIo(format!(
                "repository root is not a readable directory: {}",
                root.display()
            )));
        }
        std::fs::read_dir(root).map_err(|e| {
            EngineError::IndexIo(format!("cannot read {}: {}", root.display(), e))
        })?;

        let mut index = Self {
            root: root.to_path_buf(),
            files: HashSet::new(),
            line_counts: HashMap::new(),
            snippet_index: HashMap::new(),
            fuzzy_first: HashMap::new(),
            fuzzy_last: HashMap::new(),
            built_at: started,
            stats: IndexStats::default(),
        };

        // Collect and sort paths first so construction order (and therefore
        // stats and occurrence order) is deterministic.
        let mut paths: Vec<PathBuf> = Vec::new();
        let walker = ignore::WalkBuilder::new(root).follow_links(false).build();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.into_path();
            if Self::denied(root, &path) {
                continue;
            }
            if !Self::extension_allowed(&path, &config.extensions) {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        for path in paths {
            index.index_file(&path, config);
        }

        index.stats.snippet_keys = index.snippet_index.len();
        index.stats.build_ms = started.elapsed().as_millis() as u64;
        debug!(
            files = index.stats.files,
            snippet_keys = index.stats.snippet_keys,
            build_ms = index.stats.build_ms,
            "repository index built"
        );
        Ok(index)
    }

    fn denied(root: &Path, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(root) else {
            return true;
        };
        rel.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            DENY_DIRS.iter().any(|d| *d == name)
        })
    }

    fn extension_allowed(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                extensions.iter().any(|allowed| *allowed == lower)
            })
            .unwrap_or(false)
    }

    fn index_file(&mut self, path: &Path, config: &IndexConfig) {
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => return,
        };

        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(file = %rel, "skipping file, metadata error: {}", e);
                return;
            }
        };

        let content = match std::fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(file = %rel, "skipping non-UTF-8 file");
                    return;
                }
            },
            Err(e) => {
                warn!(file = %rel, "skipping file, read error: {}", e);
                return;
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let line_count = lines.len() as u32;

        self.files.insert(rel.clone());
        self.line_counts.insert(rel.clone(), line_count);
        self.stats.files += 1;
        self.stats.total_lines += u64::from(line_count);

        if size > config.file_size_cap_bytes {
            self.stats.skipped_oversize += 1;
            return;
        }

        self.index_snippets(&rel, &lines, config);
    }

    /// Index every window of contiguous non-blank lines. Single-line windows
    /// are always indexed (analyzer snippets are frequently one line);
    /// multi-line windows follow the configured group bounds.
    fn index_snippets(&mut self, rel: &str, lines: &[&str], config: &IndexConfig) {
        let mut run_start = 0usize;
        let mut i = 0usize;
        while i <= lines.len() {
            let blank = i == lines.len() || lines[i].trim().is_empty();
            if blank {
                if i > run_start {
                    self.index_run(rel, lines, run_start, i, config);
                }
                run_start = i + 1;
            }
            i += 1;
        }
    }

    fn index_run(
        &mut self,
        rel: &str,
        lines: &[&str],
        start: usize,
        end: usize,
        config: &IndexConfig,
    ) {
        let run_len = end - start;
        let mut window_lens: Vec<usize> = vec![1];
        for len in config.group_min..=config.group_max {
            if len > 1 {
                window_lens.push(len);
            }
        }

        for &len in &window_lens {
            if len > run_len {
                continue;
            }
            for offset in 0..=(run_len - len) {
                let window = &lines[start + offset..start + offset + len];
                let raw = window.join("\n");
                let key = normalize_snippet(&raw);
                if key.is_empty() {
                    continue;
                }
                let occurrence = SnippetOccurrence {
                    file: rel.to_string(),
                    line: (start + offset + 1) as u32,
                    raw_hash: raw_hash64(&raw),
                };
                if !self.snippet_index.contains_key(key.as_str()) {
                    let key: Arc<str> = Arc::from(key.as_str());
                    self.register_fuzzy(&key);
                    self.snippet_index.insert(key, Vec::new());
                }
                if let Some(occurrences) = self.snippet_index.get_mut(key.as_str()) {
                    occurrences.push(occurrence);
                }
            }
        }
    }

    fn register_fuzzy(&mut self, key: &Arc<str>) {
        let tokens: Vec<&str> = key.split(' ').collect();
        let count = tokens.len() as u32;
        if let Some(first) = tokens.first() {
            self.fuzzy_first
                .entry((token_hash(first), count))
                .or_default()
                .push(Arc::clone(key));
        }
        if let Some(last) = tokens.last() {
            self.fuzzy_last
                .entry((token_hash(last), count))
                .or_default()
                .push(Arc::clone(key));
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains_file(&self, file: &str) -> bool {
        self.files.contains(file)
    }

    pub fn line_count(&self, file: &str) -> Option<u32> {
        self.line_counts.get(file).copied()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    /// Locate a code snippet in the tree.
    ///
    /// Scores: 100 for an exact contiguous match, 80 for a
    /// whitespace-normalized match, 60 for a fuzzy match tolerating one
    /// differing token. Results are ordered by score, then file path, then
    /// line, and the ordering is stable across invocations.
    pub fn lookup_snippet(&self, snippet: &str) -> Vec<SnippetMatch> {
        let key = normalize_snippet(snippet);
        if key.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<SnippetMatch> = Vec::new();

        if let Some(occurrences) = self.snippet_index.get(key.as_str()) {
            let query_hash = raw_hash64(&raw_query_form(snippet));
            for occ in occurrences {
                let score = if occ.raw_hash == query_hash { 100 } else { 80 };
                matches.push(SnippetMatch {
                    file: occ.file.clone(),
                    line: occ.line,
                    match_score: score,
                });
            }
        } else {
            self.fuzzy_lookup(&key, &mut matches);
        }

        matches.sort_by(|a, b| {
            b.match_score
                .cmp(&a.match_score)
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.line.cmp(&b.line))
        });
        let mut seen: HashSet<(String, u32)> = HashSet::new();
        matches.retain(|m| seen.insert((m.file.clone(), m.line)));
        matches
    }

    fn fuzzy_lookup(&self, key: &str, matches: &mut Vec<SnippetMatch>) {
        let tokens: Vec<&str> = key.split(' ').collect();
        let count = tokens.len() as u32;
        let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
            return;
        };

        let mut candidates: Vec<&Arc<str>> = Vec::new();
        if let Some(keys) = self.fuzzy_first.get(&(token_hash(first), count)) {
            candidates.extend(keys.iter());
        }
        if let Some(keys) = self.fuzzy_last.get(&(token_hash(last), count)) {
            candidates.extend(keys.iter());
        }

        let mut seen_keys: HashSet<&str> = HashSet::new();
        for candidate in candidates {
            if !seen_keys.insert(candidate.as_ref()) {
                continue;
            }
            let candidate_tokens: Vec<&str> = candidate.split(' ').collect();
            if candidate_tokens.len() != tokens.len() {
                continue;
            }
            let mismatches = tokens
                .iter()
                .zip(candidate_tokens.iter())
                .filter(|(a, b)| a != b)
                .count();
            if mismatches <= 1 {
                if let Some(occurrences) = self.snippet_index.get(candidate.as_ref()) {
                    for occ in occurrences {
                        matches.push(SnippetMatch {
                            file: occ.file.clone(),
                            line: occ.line,
                            match_score: 60,
                        });
                    }
                }
            }
        }
    }

    /// Extract the line at `line` plus `context` lines on each side,
    /// reading from the working tree.
    pub fn extract_lines(&self, file: &str, line: u32, context: u32) -> Result<CodeExcerpt> {
        let count = self
            .line_count(file)
            .ok_or_else(|| EngineError::NotFound(format!("file not indexed: {file}")))?;
        if line == 0 || line > count {
            return Err(EngineError::NotFound(format!(
                "{file}:{line} is out of bounds (file has {count} lines)"
            )));
        }

        let path = self.root.join(file);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::NotFound(format!("cannot read {file}: {e}")))?;
        let lines: Vec<&str> = content.lines().collect();

        let start = (line as usize).saturating_sub(1 + context as usize);
        let end = ((line + context) as usize).min(lines.len());
        let code = lines[start..end].join("\n");

        Ok(CodeExcerpt {
            code,
            language_hint: language_hint(file),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Verbatim form of a query snippet used for exact-match scoring: strip
/// carriage returns and surrounding blank lines, keep interior whitespace.
fn raw_query_form(snippet: &str) -> String {
    let lines: Vec<&str> = snippet.lines().map(|l| l.trim_end_matches('\r')).collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

fn raw_hash64(raw: &str) -> u64 {
    let digest = Sha256::digest(raw.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn token_hash(token: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

/// Language hint from a file extension, for downstream code fencing.
pub fn language_hint(file: &str) -> Option<&'static str> {
    let ext = file.rsplit('.').next()?.to_lowercase();
    let hint = match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "kt" => "kotlin",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" => "bash",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        "vue" => "vue",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "xml" => "xml",
        _ => return None,
    };
    Some(hint)
}
