//! End-to-end engine tests with a scripted analyzer and on-disk working
//! trees. No network, no real git: the transport and checkout provider are
//! test doubles driven through the public API.

use async_trait::async_trait;
use reviewflow::{
    AnalyzerPayload, AnalyzerRequest, AnalyzerResponse, AnalyzerTransport, CancelToken, Category,
    CheckoutProvider, EngineConfig, EngineError, FetchFailure, Orchestrator, RepositoryIndex,
    Result, Severity, TokenUsage,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ============================================================================
// Test Doubles
// ============================================================================

/// One scripted analyzer reply.
#[derive(Clone)]
enum Reply {
    Json(serde_json::Value),
    Text(String),
    Fail(FetchFailure),
    Hang,
}

/// Analyzer transport with an independent reply script per branch. When a
/// script runs out, its last entry repeats.
struct ScriptedAnalyzer {
    scripts: HashMap<String, Vec<Reply>>,
    cursors: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<AnalyzerRequest>>,
}

impl ScriptedAnalyzer {
    fn new(scripts: HashMap<String, Vec<Reply>>) -> Self {
        Self {
            scripts,
            cursors: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn prompts_for(&self, branch: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.branch == branch)
            .map(|request| {
                request
                    .messages
                    .iter()
                    .map(|message| message.content.clone())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }
}

#[async_trait]
impl AnalyzerTransport for ScriptedAnalyzer {
    async fn send(&self, request: &AnalyzerRequest) -> Result<AnalyzerResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let reply = {
            let mut cursors = self.cursors.lock().unwrap();
            let cursor = cursors.entry(request.branch.clone()).or_insert(0);
            let script = self
                .scripts
                .get(&request.branch)
                .unwrap_or_else(|| panic!("no script for branch {}", request.branch));
            let position = (*cursor).min(script.len() - 1);
            *cursor += 1;
            script[position].clone()
        };

        match reply {
            Reply::Json(value) => Ok(AnalyzerResponse {
                payload: AnalyzerPayload::Json(value),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 40,
                },
            }),
            Reply::Text(text) => Ok(AnalyzerResponse {
                payload: AnalyzerPayload::Text(text),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 40,
                },
            }),
            Reply::Fail(category) => Err(EngineError::FetchFailed {
                category,
                detail: "scripted failure".to_string(),
            }),
            Reply::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }
}

/// Checkout provider serving pre-built temp directories by reference name.
struct StaticCheckout {
    trees: HashMap<String, PathBuf>,
    released: AtomicUsize,
}

impl StaticCheckout {
    fn new(trees: HashMap<String, PathBuf>) -> Self {
        Self {
            trees,
            released: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CheckoutProvider for StaticCheckout {
    async fn checkout(&self, _repo_url: &str, reference: &str) -> Result<PathBuf> {
        self.trees
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::Checkout(format!("unknown reference {reference}")))
    }

    async fn release(&self, _path: &Path) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn write_tree(files: &[(&str, String)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

/// A file whose `target_line` (1-based) is exactly `line_content`, padded
/// to `total_lines` lines.
fn file_with_line_at(target_line: u32, line_content: &str, total_lines: u32) -> String {
    let mut lines = Vec::new();
    for n in 1..=total_lines {
        if n == target_line {
            lines.push(line_content.to_string());
        } else {
            lines.push(format!("const filler{n} = {n};"));
        }
    }
    lines.join("\n") + "\n"
}

fn empty_issues() -> Reply {
    Reply::Json(serde_json::json!({ "issues": [] }))
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        max_retries: 1,
        backoff_initial_ms: 1,
        backoff_max_ms: 2,
        backoff_jitter: 0.0,
        ..Default::default()
    }
}

fn orchestrator_for(
    scripts: HashMap<String, Vec<Reply>>,
    trees: HashMap<String, PathBuf>,
    config: EngineConfig,
) -> (Orchestrator, Arc<ScriptedAnalyzer>, Arc<StaticCheckout>) {
    let transport = Arc::new(ScriptedAnalyzer::new(scripts));
    let checkout = Arc::new(StaticCheckout::new(trees));
    let orchestrator = Orchestrator::new(
        config,
        Arc::clone(&transport) as Arc<dyn AnalyzerTransport>,
        Arc::clone(&checkout) as Arc<dyn CheckoutProvider>,
    )
    .unwrap();
    (orchestrator, transport, checkout)
}

// ============================================================================
// Scenario Tests
// ============================================================================

/// Labeled-text parse and validation: the issue lands exactly where the
/// analyzer said, with its confidence intact.
#[tokio::test]
async fn labeled_text_issue_is_parsed_and_validated() {
    let head_tree = write_tree(&[(
        "source/index.ts",
        file_with_line_at(47, "await fn();", 120),
    )]);
    let base_tree = write_tree(&[(
        "source/index.ts",
        file_with_line_at(47, "await fn();", 120),
    )]);

    let labeled = "Issue: Unhandled promise rejection\n\
                   Severity: High\n\
                   Category: error-handling\n\
                   File: source/index.ts\n\
                   Line: 47\n\
                   Code: await fn();\n";

    let scripts = HashMap::from([
        ("main".to_string(), vec![empty_issues()]),
        (
            "feature".to_string(),
            vec![Reply::Text(labeled.to_string()), empty_issues()],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    assert_eq!(result.head_issues.len(), 1);
    let issue = &result.head_issues[0];
    assert_eq!(issue.severity, Severity::High);
    assert_eq!(issue.category, Category::ErrorHandling);
    let location = issue.location.as_ref().unwrap();
    assert_eq!(location.file, "source/index.ts");
    assert_eq!(location.line, 47);
    assert!(issue.confidence >= 70);
    assert_eq!(result.new_issues.len(), 1);
    assert!(result.metadata.head.as_ref().unwrap().warnings.is_empty());
}

/// A fabricated path is rewritten to the snippet's real location.
#[tokio::test]
async fn placeholder_path_recovers_to_real_location() {
    let head_tree = write_tree(&[(
        "source/retry.ts",
        file_with_line_at(88, "await fn();", 100),
    )]);
    let base_tree = write_tree(&[(
        "source/retry.ts",
        file_with_line_at(88, "await fn();", 100),
    )]);

    let labeled = "Issue: Unhandled promise rejection\n\
                   Severity: High\n\
                   Category: error-handling\n\
                   File: /src/api/payment.ts\n\
                   Line: 10\n\
                   Code: await fn();\n";

    let scripts = HashMap::from([
        ("main".to_string(), vec![empty_issues()]),
        (
            "feature".to_string(),
            vec![Reply::Text(labeled.to_string()), empty_issues()],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    assert_eq!(result.head_issues.len(), 1);
    let issue = &result.head_issues[0];
    let location = issue.location.as_ref().unwrap();
    assert_eq!(location.file, "source/retry.ts");
    assert_eq!(location.line, 88);
    assert!(issue.confidence <= 80);
    assert_eq!(result.metadata.head.as_ref().unwrap().recovered, 1);
}

/// Convergence: {A,B,C}, {B,C,D}, {A,D}, {}, {} stops at iteration 5 with
/// the accumulated four issues.
#[tokio::test]
async fn collection_converges_at_iteration_five() {
    let tree_content = file_with_line_at(1, "export function entry() {}", 60);
    let head_tree = write_tree(&[("src/app.ts", tree_content.clone())]);
    let base_tree = write_tree(&[("src/app.ts", tree_content)]);

    let issue = |title: &str, line: u32| {
        serde_json::json!({
            "title": title,
            "severity": "medium",
            "category": "code-quality",
            "file": "src/app.ts",
            "line": line
        })
    };
    let batch = |issues: Vec<serde_json::Value>| Reply::Json(serde_json::json!({ "issues": issues }));

    let scripts = HashMap::from([
        ("main".to_string(), vec![empty_issues()]),
        (
            "feature".to_string(),
            vec![
                batch(vec![issue("A", 1), issue("B", 10), issue("C", 20)]),
                batch(vec![issue("B", 10), issue("C", 20), issue("D", 30)]),
                batch(vec![issue("A", 1), issue("D", 30)]),
                batch(vec![]),
                batch(vec![]),
            ],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    let head_meta = result.metadata.head.as_ref().unwrap();
    assert_eq!(head_meta.iterations, 5);
    assert!(head_meta.converged);
    assert_eq!(result.head_issues.len(), 4);
}

/// Cross-branch categorization tolerates a refactor: the same snippet at a
/// new path is unchanged, not new + resolved.
#[tokio::test]
async fn refactored_issue_categorized_as_unchanged() {
    let snippet = "db.query(\"SELECT * FROM users WHERE id = \" + id)";
    let base_tree = write_tree(&[("api/users.ts", file_with_line_at(45, snippet, 80))]);
    let head_tree = write_tree(&[("api/v2/users.ts", file_with_line_at(12, snippet, 40))]);

    let base_issue = serde_json::json!({
        "title": "SQL injection",
        "severity": "critical",
        "category": "security",
        "file": "api/users.ts",
        "line": 45,
        "code": snippet
    });
    let head_issue = serde_json::json!({
        "title": "SQL injection",
        "severity": "critical",
        "category": "security",
        "file": "api/v2/users.ts",
        "line": 12,
        "code": snippet
    });

    let scripts = HashMap::from([
        (
            "main".to_string(),
            vec![
                Reply::Json(serde_json::json!({ "issues": [base_issue] })),
                empty_issues(),
            ],
        ),
        (
            "feature".to_string(),
            vec![
                Reply::Json(serde_json::json!({ "issues": [head_issue] })),
                empty_issues(),
            ],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    assert_eq!(result.unchanged_issues.len(), 1);
    assert!(result.new_issues.is_empty());
    assert!(result.resolved_issues.is_empty());
    let unchanged = &result.unchanged_issues[0];
    assert_eq!(
        unchanged.issue.location.as_ref().unwrap().file,
        "api/v2/users.ts"
    );
    assert_eq!(
        unchanged.original_location().unwrap().file,
        "api/users.ts"
    );
}

/// Partial failure: the head collection dies on its first iteration, the
/// base result still comes back, and metadata says exactly what happened.
#[tokio::test]
async fn head_failure_degrades_to_partial_result() {
    let content = file_with_line_at(5, "let total = orders.reduce(sum);", 30);
    let base_tree = write_tree(&[("src/billing.ts", content.clone())]);
    let head_tree = write_tree(&[("src/billing.ts", content)]);

    let base_issue = serde_json::json!({
        "title": "Unbounded reduce on user input",
        "severity": "high",
        "category": "performance",
        "file": "src/billing.ts",
        "line": 5,
        "code": "let total = orders.reduce(sum);"
    });

    let scripts = HashMap::from([
        (
            "main".to_string(),
            vec![
                Reply::Json(serde_json::json!({ "issues": [base_issue] })),
                empty_issues(),
            ],
        ),
        (
            "feature".to_string(),
            vec![Reply::Fail(FetchFailure::ServerError)],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    assert!(result.head_issues.is_empty());
    assert!(result.new_issues.is_empty());
    assert_eq!(result.resolved_issues.len(), result.base_issues.len());
    let partial = result.metadata.partial_failure.as_ref().unwrap();
    assert_eq!(partial.branch, "head");
    assert_eq!(partial.category, "FetchFailed");
    assert!(result.metadata.head.is_none());
    assert!(result.metadata.base.is_some());

    // Both working trees were released despite the failure.
    assert_eq!(checkout.released.load(Ordering::SeqCst), 2);
}

/// Both branches failing propagates a hard error, and still releases.
#[tokio::test]
async fn both_branches_failing_is_fatal() {
    let tree = write_tree(&[("src/a.ts", file_with_line_at(1, "let a = 1;", 5))]);
    let scripts = HashMap::from([
        ("main".to_string(), vec![Reply::Fail(FetchFailure::Timeout)]),
        (
            "feature".to_string(),
            vec![Reply::Fail(FetchFailure::Timeout)],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), tree.path().to_path_buf()),
        ("feature".to_string(), tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, checkout) = orchestrator_for(scripts, trees, fast_config());

    let err = orchestrator
        .analyze("repo", "main", "feature")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BranchFailed { .. }));
    assert_eq!(checkout.released.load(Ordering::SeqCst), 2);
}

/// Sequential mode forwards base findings into the head run's
/// do-not-repeat list.
#[tokio::test]
async fn sequential_mode_forwards_known_issues() {
    let content = file_with_line_at(3, "session.token = token;", 20);
    let base_tree = write_tree(&[("src/auth.ts", content.clone())]);
    let head_tree = write_tree(&[("src/auth.ts", content)]);

    let base_issue = serde_json::json!({
        "title": "Token stored without expiry",
        "severity": "high",
        "category": "security",
        "file": "src/auth.ts",
        "line": 3,
        "code": "session.token = token;"
    });

    let scripts = HashMap::from([
        (
            "main".to_string(),
            vec![
                Reply::Json(serde_json::json!({ "issues": [base_issue] })),
                empty_issues(),
            ],
        ),
        ("feature".to_string(), vec![empty_issues()]),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let config = EngineConfig {
        branch_parallelism: 1,
        ..fast_config()
    };
    let (orchestrator, transport, _checkout) = orchestrator_for(scripts, trees, config);

    orchestrator.analyze("repo", "main", "feature").await.unwrap();

    let head_prompts = transport.prompts_for("feature");
    assert!(!head_prompts.is_empty());
    assert!(
        head_prompts[0].contains("Token stored without expiry"),
        "head run must carry the base findings in its do-not-repeat list"
    );
}

/// Cancellation liveness: a hanging analyzer plus a small overall budget
/// still returns promptly, with working trees released.
#[tokio::test]
async fn overall_timeout_cancels_hanging_analysis() {
    let tree = write_tree(&[("src/a.ts", file_with_line_at(1, "let a = 1;", 5))]);
    let scripts = HashMap::from([
        ("main".to_string(), vec![Reply::Hang]),
        ("feature".to_string(), vec![Reply::Hang]),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), tree.path().to_path_buf()),
        ("feature".to_string(), tree.path().to_path_buf()),
    ]);
    let config = EngineConfig {
        overall_timeout_ms: 300,
        analyzer_request_timeout_ms: 60_000,
        per_iteration_timeout_ms: 60_000,
        ..fast_config()
    };
    let (orchestrator, _transport, checkout) = orchestrator_for(scripts, trees, config);

    let started = Instant::now();
    let err = orchestrator
        .analyze("repo", "main", "feature")
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must unblock the run promptly"
    );
    assert_eq!(checkout.released.load(Ordering::SeqCst), 2);
}

/// External cancellation mid-run returns Cancelled, never a partial result.
#[tokio::test]
async fn external_cancellation_returns_cancelled() {
    let tree = write_tree(&[("src/a.ts", file_with_line_at(1, "let a = 1;", 5))]);
    let scripts = HashMap::from([
        ("main".to_string(), vec![Reply::Hang]),
        ("feature".to_string(), vec![Reply::Hang]),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), tree.path().to_path_buf()),
        ("feature".to_string(), tree.path().to_path_buf()),
    ]);
    let config = EngineConfig {
        analyzer_request_timeout_ms: 60_000,
        per_iteration_timeout_ms: 60_000,
        ..fast_config()
    };
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, config);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = orchestrator
        .analyze_with_cancel("repo", "main", "feature", cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

// ============================================================================
// Result Invariants
// ============================================================================

/// Location soundness over the emitted result: every located issue points
/// at a real file and an in-bounds line of its branch's tree.
#[tokio::test]
async fn emitted_locations_are_sound() {
    let head_tree = write_tree(&[
        ("src/good.ts", file_with_line_at(7, "misuse(here);", 20)),
        ("src/other.ts", file_with_line_at(3, "also(bad);", 10)),
    ]);
    let base_tree = write_tree(&[("src/good.ts", file_with_line_at(7, "misuse(here);", 20))]);

    // One well-located issue, one fabricated path that recovers, and one
    // ungroundable low-severity issue that must be filtered out.
    let head_batch = serde_json::json!({ "issues": [
        {
            "title": "Misuse of here",
            "severity": "medium",
            "category": "code-quality",
            "file": "src/good.ts",
            "line": 7,
            "code": "misuse(here);"
        },
        {
            "title": "Also bad",
            "severity": "medium",
            "category": "code-quality",
            "file": "generated/fake.ts",
            "line": 2,
            "code": "also(bad);"
        },
        {
            "title": "Nowhere to be found",
            "severity": "low",
            "category": "code-quality",
            "file": "missing.ts",
            "line": 1
        }
    ]});

    let scripts = HashMap::from([
        ("main".to_string(), vec![empty_issues()]),
        (
            "feature".to_string(),
            vec![Reply::Json(head_batch), empty_issues()],
        ),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), base_tree.path().to_path_buf()),
        ("feature".to_string(), head_tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    assert_eq!(result.head_issues.len(), 2);
    let index =
        RepositoryIndex::build(head_tree.path(), &reviewflow::IndexConfig::default()).unwrap();
    for issue in &result.head_issues {
        let location = issue.location.as_ref().expect("survivors are located");
        let count = index
            .line_count(&location.file)
            .expect("file exists in tree");
        assert!(location.line >= 1 && location.line <= count);
    }
    assert_eq!(result.metadata.head.as_ref().unwrap().dropped, 1);
}

/// The comparison result round-trips through JSON.
#[tokio::test]
async fn result_is_json_serializable() {
    let tree = write_tree(&[("src/a.ts", file_with_line_at(2, "let b = a;", 10))]);
    let scripts = HashMap::from([
        (
            "main".to_string(),
            vec![
                Reply::Json(serde_json::json!({ "issues": [{
                    "title": "Shadowed variable",
                    "severity": "low",
                    "category": "code-quality",
                    "file": "src/a.ts",
                    "line": 2,
                    "code": "let b = a;"
                }]})),
                empty_issues(),
            ],
        ),
        ("feature".to_string(), vec![empty_issues()]),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), tree.path().to_path_buf()),
        ("feature".to_string(), tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(parsed.get("metadata").is_some());
    assert_eq!(
        parsed["resolved_issues"].as_array().unwrap().len(),
        result.resolved_issues.len()
    );
}

/// Token usage from the transport is accounted into result metadata.
#[tokio::test]
async fn usage_is_accumulated_into_metadata() {
    let tree = write_tree(&[("src/a.ts", file_with_line_at(1, "let a = 1;", 5))]);
    let scripts = HashMap::from([
        ("main".to_string(), vec![empty_issues()]),
        ("feature".to_string(), vec![empty_issues()]),
    ]);
    let trees = HashMap::from([
        ("main".to_string(), tree.path().to_path_buf()),
        ("feature".to_string(), tree.path().to_path_buf()),
    ]);
    let (orchestrator, _transport, _checkout) = orchestrator_for(scripts, trees, fast_config());

    let result = orchestrator.analyze("repo", "main", "feature").await.unwrap();
    assert!(result.metadata.usage.total() > 0);
    assert_eq!(result.metadata.estimated_cost_usd, 0.0);
}
