//! Working-tree checkout provider.
//!
//! The orchestrator only sees the `CheckoutProvider` trait; `GitCheckout`
//! is the default implementation, driving the git CLI to produce one
//! detached worktree per analyzed reference inside a managed directory.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

// ============================================================================
// Provider Trait
// ============================================================================

/// Produces and releases filesystem snapshots of repository references.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Produce a stable working tree for `(repo_url, reference)`.
    /// Idempotent: may reuse a cached tree.
    async fn checkout(&self, repo_url: &str, reference: &str) -> Result<PathBuf>;

    /// Release a working tree obtained from `checkout`.
    async fn release(&self, path: &Path) -> Result<()>;
}

// ============================================================================
// Git CLI Implementation
// ============================================================================

/// Checkout provider backed by the git CLI.
///
/// Each repository is cloned once under the managed directory; every
/// requested reference becomes a detached worktree next to the clone, so
/// two branches of the same repository can be analyzed concurrently.
pub struct GitCheckout {
    workdir: PathBuf,
}

impl GitCheckout {
    pub fn new(workdir: impl Into<PathBuf>) -> Result<Self> {
        let workdir = workdir.into();
        if !workdir.exists() {
            std::fs::create_dir_all(&workdir).map_err(|e| {
                EngineError::Checkout(format!(
                    "failed to create checkout directory {}: {e}",
                    workdir.display()
                ))
            })?;
            info!("created checkout directory {}", workdir.display());
        }
        Ok(Self { workdir })
    }

    fn repo_dir(&self, repo_url: &str) -> PathBuf {
        let digest = Sha256::digest(repo_url.as_bytes());
        self.workdir.join(format!("repo-{}", &hex::encode(digest)[..16]))
    }

    fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.args(args);
        // Never prompt for credentials from inside the engine.
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        let output = cmd
            .output()
            .map_err(|e| EngineError::Checkout(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Checkout(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

}

#[async_trait]
impl CheckoutProvider for GitCheckout {
    async fn checkout(&self, repo_url: &str, reference: &str) -> Result<PathBuf> {
        let repo_url = repo_url.to_string();
        let reference = reference.to_string();
        let workdir = self.workdir.clone();
        let repo_dir = self.repo_dir(&repo_url);

        // Subprocess work stays off the async runtime.
        let this = GitCheckoutInner {
            workdir,
            repo_dir,
            repo_url,
            reference,
        };
        tokio::task::spawn_blocking(move || this.materialize())
            .await
            .map_err(|e| EngineError::Checkout(format!("checkout task panicked: {e}")))?
    }

    async fn release(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        let workdir = self.workdir.clone();
        tokio::task::spawn_blocking(move || {
            if !path.starts_with(&workdir) || !path.exists() {
                return Ok(());
            }
            // Resolve the owning clone from inside the worktree, then
            // unregister it there before removing leftovers.
            let path_str = path.to_string_lossy().to_string();
            let common_dir = GitCheckout::run_git(
                &["rev-parse", "--path-format=absolute", "--git-common-dir"],
                Some(&path),
            )
            .ok();
            if let Some(common_dir) = common_dir {
                let git_dir = PathBuf::from(common_dir);
                if let Some(clone_dir) = git_dir.parent() {
                    let _ = GitCheckout::run_git(
                        &["worktree", "remove", "--force", &path_str],
                        Some(clone_dir),
                    );
                }
            }
            if path.exists() {
                std::fs::remove_dir_all(&path).map_err(|e| {
                    EngineError::Checkout(format!(
                        "failed to remove worktree {}: {e}",
                        path.display()
                    ))
                })?;
            }
            debug!("released worktree {}", path.display());
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Checkout(format!("release task panicked: {e}")))?
    }
}

struct GitCheckoutInner {
    workdir: PathBuf,
    repo_dir: PathBuf,
    repo_url: String,
    reference: String,
}

impl GitCheckoutInner {
    fn materialize(&self) -> Result<PathBuf> {
        // Clone (or refresh) the backing repository.
        if self.repo_dir.join(".git").exists() {
            GitCheckout::run_git(&["fetch", "--all", "--quiet"], Some(&self.repo_dir))?;
        } else {
            let repo_dir_str = self.repo_dir.to_string_lossy();
            GitCheckout::run_git(&["clone", "--quiet", &self.repo_url, &repo_dir_str], None)?;
        }

        // One detached worktree per reference.
        let safe_ref: String = self
            .reference
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let worktree = self.workdir.join(format!(
            "{}-{safe_ref}",
            self.repo_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "repo".to_string())
        ));

        if worktree.exists() {
            debug!("reusing worktree {}", worktree.display());
            return Ok(worktree);
        }

        let worktree_str = worktree.to_string_lossy();
        GitCheckout::run_git(
            &[
                "worktree",
                "add",
                "--detach",
                &worktree_str,
                &self.reference,
            ],
            Some(&self.repo_dir),
        )?;
        info!(
            "checked out {}@{} at {}",
            self.repo_url,
            self.reference,
            worktree.display()
        );
        Ok(worktree)
    }
}
