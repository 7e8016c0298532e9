//! Git workspace management for the Agent Runtime's Workspace/Branch/Publish
//! steps.
//!
//! Grounded on `worktree::WorktreeManager`'s subprocess + thiserror pattern,
//! but without the worktree duality that manager exists for: this pipeline
//! gives each project a single persistent clone rather than one worktree per
//! task, so there is no shared-object-store lock contention to serialise
//! against beyond what a single mutex per workspace already buys us.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitOpsError {
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit { command: String, code: i32, stderr: String },
}

fn run(dir: &Path, args: &[&str]) -> Result<std::process::Output, GitOpsError> {
    Command::new("git").args(args).current_dir(dir).output().map_err(|e| GitOpsError::GitCommand {
        message: format!("failed to run git {}", args.join(" ")),
        source: e,
    })
}

fn require_success(command: &str, output: std::process::Output) -> Result<std::process::Output, GitOpsError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitOpsError::GitExit {
            command: command.to_owned(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A project's single working copy on disk.
///
/// Mutating operations are serialised through an internal mutex, mirroring
/// `WorktreeManager::git_lock`: git's index lock means two concurrent
/// `git commit`s in the same working copy would otherwise race.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl GitWorkspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Derive the conventional branch name for a task, e.g. `fix/issue-42`.
    pub fn branch_name(task_kind_prefix: &str, issue: u64) -> String {
        format!("{task_kind_prefix}/issue-{issue}")
    }

    /// Ensure a local working copy exists at `path`, cloning `remote_url`
    /// if absent. If a working copy is already present, fetches instead --
    /// this is the idempotent "ensure" the Agent Runtime's Workspace step
    /// needs on every task, not just the project's first.
    pub fn ensure(path: impl Into<PathBuf>, remote_url: &str) -> Result<Self, GitOpsError> {
        let path = path.into();

        if path.join(".git").exists() {
            let workspace = Self { path, lock: Arc::new(Mutex::new(())) };
            workspace.fetch()?;
            return Ok(workspace);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitOpsError::GitCommand {
                message: format!("failed to create parent directory {}", parent.display()),
                source: e,
            })?;
        }

        let output = Command::new("git")
            .args(["clone", remote_url])
            .arg(&path)
            .output()
            .map_err(|e| GitOpsError::GitCommand { message: "failed to run git clone".to_owned(), source: e })?;
        require_success("clone", output)?;

        Ok(Self { path, lock: Arc::new(Mutex::new(())) })
    }

    fn fetch(&self) -> Result<(), GitOpsError> {
        let output = run(&self.path, &["fetch", "--all", "--prune"])?;
        require_success("fetch", output)?;
        Ok(())
    }

    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, GitOpsError> {
        let output = run(&self.path, &["rev-parse", "--verify", &format!("refs/heads/{branch_name}")])?;
        Ok(output.status.success())
    }

    /// Create (or check out, if already present) `branch_name` off
    /// `base_branch`.
    pub fn create_branch(&self, base_branch: &str, branch_name: &str) -> Result<(), GitOpsError> {
        let _lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.branch_exists(branch_name)? {
            let output = run(&self.path, &["checkout", branch_name])?;
            require_success("checkout", output)?;
            return Ok(());
        }

        let checkout_base = run(&self.path, &["checkout", base_branch])?;
        require_success("checkout base", checkout_base)?;

        let create = run(&self.path, &["checkout", "-b", branch_name])?;
        require_success("checkout -b", create)?;
        Ok(())
    }

    /// Stage and commit all working-tree changes. Returns `Ok(false)` when
    /// there was nothing to commit.
    pub fn commit_all(&self, message: &str) -> Result<bool, GitOpsError> {
        let _lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let _ = run(&self.path, &["config", "user.email", "pipeline@localhost"]);
        let _ = run(&self.path, &["config", "user.name", "ai-dev-pipeline"]);

        let add = run(&self.path, &["add", "-A"])?;
        require_success("add -A", add)?;

        let status = run(&self.path, &["status", "--porcelain"])?;
        if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
            return Ok(false);
        }

        let commit = run(&self.path, &["commit", "-m", message])?;
        require_success("commit", commit)?;
        Ok(true)
    }

    /// Push `branch_name` to the configured remote (`origin` by
    /// convention), creating the upstream tracking ref if absent.
    pub fn push(&self, branch_name: &str) -> Result<(), GitOpsError> {
        let _lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let output = run(&self.path, &["push", "--set-upstream", "origin", branch_name])?;
        require_success("push", output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_bare_remote(dir: &Path) {
        let output = Command::new("git").args(["init", "--bare"]).current_dir(dir).output().unwrap();
        assert!(output.status.success());
    }

    fn seed_remote_via_clone(remote_path: &Path, scratch: &Path) {
        let clone = scratch.join("seed");
        let output =
            Command::new("git").args(["clone", remote_path.to_str().unwrap()]).arg(&clone).output().unwrap();
        assert!(output.status.success());
        let _ = Command::new("git").args(["config", "user.email", "t@t.dev"]).current_dir(&clone).output();
        let _ = Command::new("git").args(["config", "user.name", "T"]).current_dir(&clone).output();
        std::fs::write(clone.join("README.md"), "seed\n").unwrap();
        let _ = Command::new("git").args(["add", "."]).current_dir(&clone).output();
        let _ = Command::new("git").args(["commit", "-m", "seed"]).current_dir(&clone).output();
        let output = Command::new("git").args(["push", "origin", "HEAD:main"]).current_dir(&clone).output().unwrap();
        assert!(output.status.success());
    }

    #[test]
    fn branch_name_uses_kind_prefix_and_issue() {
        assert_eq!(GitWorkspace::branch_name("fix", 42), "fix/issue-42");
    }

    #[test]
    fn ensure_clones_then_creates_branch_commits_and_pushes() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        init_bare_remote(&remote);
        seed_remote_via_clone(&remote, tmp.path());

        let workspace_path = tmp.path().join("workspace");
        let workspace = GitWorkspace::ensure(&workspace_path, remote.to_str().unwrap()).unwrap();

        workspace.create_branch("main", "fix/issue-7").unwrap();
        std::fs::write(workspace.path().join("fix.txt"), "patched\n").unwrap();
        let committed = workspace.commit_all("fix: issue 7").unwrap();
        assert!(committed);

        workspace.push("fix/issue-7").unwrap();

        // Re-running ensure() against the same path should fetch, not clone.
        let reopened = GitWorkspace::ensure(&workspace_path, remote.to_str().unwrap()).unwrap();
        assert!(reopened.branch_exists("fix/issue-7").unwrap());
    }

    #[test]
    fn commit_all_is_noop_when_nothing_changed() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        init_bare_remote(&remote);
        seed_remote_via_clone(&remote, tmp.path());

        let workspace_path = tmp.path().join("workspace");
        let workspace = GitWorkspace::ensure(&workspace_path, remote.to_str().unwrap()).unwrap();

        let committed = workspace.commit_all("nothing to do").unwrap();
        assert!(!committed);
    }
}
