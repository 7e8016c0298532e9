//! Agent Runtime: the per-agent-kind `execute(task) -> Result` contract.
//!
//! Grounded on `lifecycle::run_agent_lifecycle`'s numbered-steps shape
//! (workspace, spawn, collect, gate, evaluate) and `orchestrator::mod`'s
//! commit-and-report idiom, but restructured around this pipeline's own
//! eight-step envelope (resolve/branch/workspace/generate/validate/publish/
//! open-review/annotate) instead of the teacher's worktree-plus-gate model,
//! and extended with `original_source/agents/pipeline_monitor.py`'s log-
//! truncate-and-retry pattern for the Validate step's one recovery attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use aidp_broker::models::{AgentKind, Task, TaskKind};

use crate::error::PipelineError;
use crate::generation::{GenerationExecutor, GenerationRequest};
use crate::git_ops::GitWorkspace;
use crate::upstream::{ReviewDecision, Upstream};

const TEST_TIMEOUT: Duration = Duration::from_secs(120);
const FAILURE_EXCERPT_BYTES: usize = 3 * 1024;

/// Outcome of executing one task through the Agent Runtime.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub pr_number: Option<u64>,
    pub summary: String,
    /// Set only by the QA agent kind's review step.
    pub review_decision: Option<ReviewDecision>,
}

/// Hook the Devops agent kind calls through for redeploy-on-demand tasks,
/// implemented by the Deployment Finisher.
#[async_trait]
pub trait RedeployTrigger: Send + Sync {
    async fn trigger_redeploy(&self, repo: &str) -> anyhow::Result<String>;
}

/// Per-project git remote and development-branch configuration the Agent
/// Runtime needs to resolve a workspace and branch point.
#[derive(Debug, Clone)]
pub struct ProjectGitConfig {
    pub remote_url: String,
    pub development_branch: String,
}

#[derive(Clone)]
pub struct AgentRuntime {
    generation: GenerationExecutor,
    upstream: Arc<dyn Upstream>,
    redeploy: Arc<dyn RedeployTrigger>,
    workspace_root: PathBuf,
}

impl AgentRuntime {
    pub fn new(
        generation: GenerationExecutor,
        upstream: Arc<dyn Upstream>,
        redeploy: Arc<dyn RedeployTrigger>,
        workspace_root: PathBuf,
    ) -> Self {
        Self { generation, upstream, redeploy, workspace_root }
    }

    /// Descriptive capability list for a given agent kind. Consumed only by
    /// introspection surfaces (e.g. a future `aidp project list` detail view).
    pub fn capabilities(kind: AgentKind) -> Vec<&'static str> {
        match kind {
            AgentKind::Backend => vec!["implement-feature", "fix-bug", "write-tests", "refactor"],
            AgentKind::Frontend => vec!["implement-feature", "fix-bug", "write-tests", "refactor"],
            AgentKind::Database => vec!["implement-feature", "fix-bug", "write-tests", "refactor"],
            AgentKind::Qa => vec!["review-pr"],
            AgentKind::ProductManager => vec!["plan-product"],
            AgentKind::ProjectManager => vec!["plan-requirements"],
            AgentKind::Devops => vec!["redeploy"],
        }
    }

    pub async fn execute(
        &self,
        task: &Task,
        project: &ProjectGitConfig,
    ) -> Result<ExecutionOutcome, PipelineError> {
        match task.agent_kind {
            AgentKind::Backend | AgentKind::Frontend | AgentKind::Database => {
                self.run_producing_envelope(task, project).await
            }
            AgentKind::Qa => self.run_qa_review(task).await,
            AgentKind::ProductManager | AgentKind::ProjectManager => self.run_planning(task).await,
            AgentKind::Devops => self.run_devops(task).await,
        }
    }

    // -- Producing agent kinds: backend / frontend / database -------------

    async fn run_producing_envelope(
        &self,
        task: &Task,
        project: &ProjectGitConfig,
    ) -> Result<ExecutionOutcome, PipelineError> {
        // 1. Resolve.
        let (title, body, _labels) = self
            .upstream
            .get_issue_title_body(&task.repo, task.issue)
            .await
            .map_err(|e| PipelineError::UpstreamNotFound(e.to_string()))?;

        // 2. Branch.
        let branch_prefix = match task.kind {
            TaskKind::FixBug => "fix",
            TaskKind::WriteTests => "test",
            TaskKind::Refactor => "refactor",
            _ => "feat",
        };
        let branch_name = GitWorkspace::branch_name(branch_prefix, task.issue);

        // 3. Workspace.
        let workspace_path = self.workspace_root.join(sanitize_repo(&task.repo));
        let workspace = GitWorkspace::ensure(&workspace_path, &project.remote_url)
            .map_err(|e| PipelineError::ValidationFailed(e.to_string()))?;
        workspace
            .create_branch(&project.development_branch, &branch_name)
            .map_err(|e| PipelineError::ValidationFailed(e.to_string()))?;

        // 4. Generate.
        let instructions = format!(
            "Issue #{}: {title}\n\n{body}\n\nImplement this in the current working copy. \
             Stay within the files relevant to the issue.",
            task.issue
        );
        let request = GenerationRequest {
            repo: task.repo.clone(),
            issue: task.issue,
            agent_kind: task.agent_kind,
            instructions,
            working_dir: workspace.path().to_path_buf(),
            env_vars: HashMap::new(),
        };
        self.generation.run(&request).await.map_err(|kind| PipelineError::GenerationFailed(kind.to_string()))?;

        // 5. Validate.
        self.validate(workspace.path(), &request).await?;

        // 6. Publish.
        let commit_message = format!("{branch_prefix}: issue #{} ({title})", task.issue);
        workspace.commit_all(&commit_message).map_err(|e| PipelineError::PushFailed(e.to_string()))?;
        workspace.push(&branch_name).map_err(|e| PipelineError::PushFailed(e.to_string()))?;

        // 7. Open review.
        let pr_title = format!("{title} (fixes #{})", task.issue);
        let pr_body = format!("Resolves #{}.\n\nGenerated by the {} agent.", task.issue, task.agent_kind);
        let pr = self
            .upstream
            .open_pull_request(&task.repo, &branch_name, &project.development_branch, &pr_title, &pr_body)
            .await
            .map_err(|e| PipelineError::PushFailed(e.to_string()))?;

        // 8. Annotate.
        info!(repo = %task.repo, issue = task.issue, pr = pr.number, "opened pull request");

        Ok(ExecutionOutcome {
            pr_number: Some(pr.number),
            summary: format!("opened PR #{} for issue #{}", pr.number, task.issue),
            review_decision: None,
        })
    }

    async fn validate(&self, workspace_path: &Path, request: &GenerationRequest) -> Result<(), PipelineError> {
        let Some(test_command) = detect_test_command(workspace_path) else {
            warn!(path = %workspace_path.display(), "no recognised test framework, skipping validation");
            return Ok(());
        };

        match run_test_command(workspace_path, &test_command).await {
            Ok(()) => Ok(()),
            Err(first_failure) => {
                warn!(error = %first_failure, "validation failed, attempting one recovery pass");

                let excerpt = truncate_bytes(&first_failure, FAILURE_EXCERPT_BYTES);
                let mut retry_request = request.clone();
                retry_request.instructions = format!(
                    "{}\n\nThe test suite failed with the following output:\n{excerpt}\n\nFix the code so the tests pass.",
                    request.instructions
                );
                self.generation
                    .run(&retry_request)
                    .await
                    .map_err(|kind| PipelineError::GenerationFailed(kind.to_string()))?;

                run_test_command(workspace_path, &test_command)
                    .await
                    .map_err(PipelineError::ValidationFailed)
            }
        }
    }

    // -- QA ----------------------------------------------------------------

    async fn run_qa_review(&self, task: &Task) -> Result<ExecutionOutcome, PipelineError> {
        let pr_number = task.pr_number.ok_or_else(|| {
            PipelineError::ValidationFailed("QA task has no associated pull request".to_owned())
        })?;

        let pr = self
            .upstream
            .get_pull_request(&task.repo, pr_number)
            .await
            .map_err(|e| PipelineError::UpstreamNotFound(e.to_string()))?;

        let workspace_path = self.workspace_root.join(sanitize_repo(&task.repo));
        let tests_pass = match detect_test_command(&workspace_path) {
            Some(command) => run_test_command(&workspace_path, &command).await.is_ok(),
            None => true,
        };
        let quality_pass = match detect_quality_check_command(&workspace_path) {
            Some(command) => run_test_command(&workspace_path, &command).await.is_ok(),
            None => true,
        };

        let approve = tests_pass && quality_pass && !pr.changed_files.is_empty();
        let decision =
            if approve { ReviewDecision::Approve } else { ReviewDecision::RequestChanges };
        let review_body = if approve {
            "Automated review: checks passed.".to_owned()
        } else {
            "Automated review: checks failed, requesting changes.".to_owned()
        };

        self.upstream
            .create_review(&task.repo, pr_number, decision, &review_body)
            .await
            .map_err(|e| PipelineError::PushFailed(e.to_string()))?;

        Ok(ExecutionOutcome {
            pr_number: Some(pr_number),
            summary: if approve { "approved".to_owned() } else { "requested changes".to_owned() },
            review_decision: Some(decision),
        })
    }

    // -- Planning (product manager / project manager) ----------------------

    async fn run_planning(&self, task: &Task) -> Result<ExecutionOutcome, PipelineError> {
        let request = GenerationRequest {
            repo: task.repo.clone(),
            issue: task.issue,
            agent_kind: task.agent_kind,
            instructions: "Break the product idea and requirements into a concrete initial task list."
                .to_owned(),
            working_dir: self.workspace_root.join(sanitize_repo(&task.repo)),
            env_vars: HashMap::new(),
        };
        let outcome = self
            .generation
            .run(&request)
            .await
            .map_err(|kind| PipelineError::GenerationFailed(kind.to_string()))?;
        Ok(ExecutionOutcome {
            pr_number: None,
            summary: outcome.final_message.unwrap_or_else(|| "planning complete".to_owned()),
            review_decision: None,
        })
    }

    // -- DevOps pass-through -------------------------------------------------

    async fn run_devops(&self, task: &Task) -> Result<ExecutionOutcome, PipelineError> {
        let note = self
            .redeploy
            .trigger_redeploy(&task.repo)
            .await
            .map_err(|e| PipelineError::ContainerRunFailed(e.to_string()))?;
        Ok(ExecutionOutcome { pr_number: None, summary: note, review_decision: None })
    }

    /// Accessor for the worker pool's QA specialisation (labelling on
    /// rejection, looking up merge state) without re-exposing the whole
    /// runtime's internals.
    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    /// Merge an approved pull request and close its originating issue.
    pub async fn merge_and_close(&self, repo: &str, pr_number: u64, issue: u64) -> anyhow::Result<()> {
        self.upstream.merge_pull_request(repo, pr_number).await?;
        self.upstream.close_issue(repo, issue).await?;
        Ok(())
    }
}

/// Detect and run a workspace's test suite outside of the envelope, for
/// direct CLI invocation (`aidp test`). Returns `Ok(None)` when no
/// recognised framework is present rather than treating it as failure.
pub async fn run_project_tests(workspace_path: &Path) -> Result<Option<()>, String> {
    match detect_test_command(workspace_path) {
        Some(command) => run_test_command(workspace_path, &command).await.map(Some),
        None => Ok(None),
    }
}

fn sanitize_repo(repo: &str) -> String {
    repo.replace('/', "__")
}

fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Detect the test runner for a working copy by presence of well-known
/// config files, mirroring the Agent Runtime's "absence skips validation
/// with a warning" rule rather than failing the task.
fn detect_test_command(workspace_path: &Path) -> Option<Vec<String>> {
    if workspace_path.join("Cargo.toml").exists() {
        Some(vec!["cargo".to_owned(), "test".to_owned()])
    } else if workspace_path.join("package.json").exists() {
        Some(vec!["npm".to_owned(), "test".to_owned(), "--silent".to_owned()])
    } else if workspace_path.join("pyproject.toml").exists() || workspace_path.join("requirements.txt").exists() {
        Some(vec!["pytest".to_owned()])
    } else {
        None
    }
}

/// Detect the code-quality check for a working copy, mirroring
/// `detect_test_command`'s per-framework detection. Absence skips the check
/// (treated as passing) rather than failing the QA review.
fn detect_quality_check_command(workspace_path: &Path) -> Option<Vec<String>> {
    if workspace_path.join("Cargo.toml").exists() {
        Some(vec!["cargo".to_owned(), "clippy".to_owned(), "--".to_owned(), "-D".to_owned(), "warnings".to_owned()])
    } else if workspace_path.join("package.json").exists() {
        Some(vec!["npm".to_owned(), "run".to_owned(), "lint".to_owned(), "--silent".to_owned()])
    } else if workspace_path.join("pyproject.toml").exists() || workspace_path.join("requirements.txt").exists() {
        Some(vec!["ruff".to_owned(), "check".to_owned(), ".".to_owned()])
    } else {
        None
    }
}

async fn run_test_command(workspace_path: &Path, command: &[String]) -> Result<(), String> {
    let (program, args) = command.split_first().expect("test command is never empty");
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).current_dir(workspace_path);

    let run = async {
        cmd.output().await.map_err(|e| format!("failed to run {}: {e}", program))
    };

    match tokio::time::timeout(TEST_TIMEOUT, run).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push('\n');
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(combined)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(format!("test command timed out after {TEST_TIMEOUT:?}")),
    }
}
