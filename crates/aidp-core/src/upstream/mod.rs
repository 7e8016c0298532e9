//! Upstream code-host adapter.
//!
//! The teacher has no equivalent (it only ever talks to its own database),
//! so this module is grounded on the pack's `octocrab`-based examples
//! instead: a narrow `async_trait` seam over the handful of GitHub
//! operations the pipeline actually needs, with a real `octocrab` adapter
//! and an in-memory fake for tests -- the same object-safe-trait-plus-two-
//! implementations shape the teacher uses for `Harness`.

use async_trait::async_trait;

/// A pull request as returned by [`Upstream::open_pull_request`] and read
/// back by [`Upstream::get_pull_request`].
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
    pub changed_files: Vec<String>,
}

/// A single CI run as surfaced by the Pipeline Monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRun {
    pub run_id: u64,
    pub branch: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunConclusion {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
}

/// The external-API adapter seam. Every method maps to one operation listed
/// in the external-interfaces upstream-code-host contract.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get_issue_title_body(&self, repo: &str, issue: u64) -> anyhow::Result<(String, String, Vec<String>)>;
    async fn create_branch(&self, repo: &str, branch: &str, from: &str) -> anyhow::Result<()>;
    async fn open_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest>;
    async fn get_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<PullRequest>;
    async fn merge_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<()>;
    async fn create_review(&self, repo: &str, number: u64, decision: ReviewDecision, body: &str) -> anyhow::Result<()>;
    async fn add_label(&self, repo: &str, issue: u64, label: &str) -> anyhow::Result<()>;
    async fn add_comment(&self, repo: &str, issue: u64, body: &str) -> anyhow::Result<()>;
    async fn close_issue(&self, repo: &str, issue: u64) -> anyhow::Result<()>;
    async fn list_workflow_runs(&self, repo: &str, branch: &str) -> anyhow::Result<Vec<WorkflowRun>>;
    async fn fetch_run_logs(&self, repo: &str, run_id: u64) -> anyhow::Result<String>;
}

/// `octocrab`-backed adapter for GitHub.
pub struct GitHubUpstream {
    client: octocrab::Octocrab,
}

impl GitHubUpstream {
    pub fn new(token: impl Into<String>) -> anyhow::Result<Self> {
        let client = octocrab::Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self { client })
    }

    fn split_repo(repo: &str) -> anyhow::Result<(&str, &str)> {
        repo.split_once('/').ok_or_else(|| anyhow::anyhow!("repo must be 'owner/name', got '{repo}'"))
    }
}

#[async_trait]
impl Upstream for GitHubUpstream {
    async fn get_issue_title_body(&self, repo: &str, issue: u64) -> anyhow::Result<(String, String, Vec<String>)> {
        let (owner, name) = Self::split_repo(repo)?;
        let issue = self.client.issues(owner, name).get(issue).await?;
        let labels = issue.labels.into_iter().map(|l| l.name).collect();
        Ok((issue.title, issue.body.unwrap_or_default(), labels))
    }

    async fn create_branch(&self, repo: &str, branch: &str, from: &str) -> anyhow::Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        let repos = self.client.repos(owner, name);
        let base_ref = repos.get_ref(&octocrab::params::repos::Reference::Branch(from.to_owned())).await?;
        let sha = match base_ref.object {
            octocrab::models::repos::Object::Commit { sha, .. } => sha,
            octocrab::models::repos::Object::Tag { sha, .. } => sha,
            _ => anyhow::bail!("unexpected ref object type for branch '{from}'"),
        };
        repos.create_ref(&octocrab::params::repos::Reference::Branch(branch.to_owned()), sha).await?;
        Ok(())
    }

    async fn open_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        let (owner, name) = Self::split_repo(repo)?;
        let pr = self.client.pulls(owner, name).create(title, head, base).body(body).send().await?;
        let files = self.client.pulls(owner, name).list_files(pr.number).await?;
        Ok(PullRequest {
            number: pr.number,
            title: pr.title.unwrap_or_default(),
            body: pr.body.unwrap_or_default(),
            head_branch: head.to_owned(),
            base_branch: base.to_owned(),
            changed_files: files.into_iter().map(|f| f.filename).collect(),
        })
    }

    async fn get_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<PullRequest> {
        let (owner, name) = Self::split_repo(repo)?;
        let pr = self.client.pulls(owner, name).get(number).await?;
        let files = self.client.pulls(owner, name).list_files(number).await?;
        Ok(PullRequest {
            number,
            title: pr.title.unwrap_or_default(),
            body: pr.body.unwrap_or_default(),
            head_branch: pr.head.ref_field,
            base_branch: pr.base.ref_field,
            changed_files: files.into_iter().map(|f| f.filename).collect(),
        })
    }

    async fn merge_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        self.client.pulls(owner, name).merge(number).send().await?;
        Ok(())
    }

    async fn create_review(&self, repo: &str, number: u64, decision: ReviewDecision, body: &str) -> anyhow::Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        let event = match decision {
            ReviewDecision::Approve => octocrab::params::pulls::review::ReviewEvent::Approve,
            ReviewDecision::RequestChanges => octocrab::params::pulls::review::ReviewEvent::RequestChanges,
        };
        self.client.pulls(owner, name).reviews(number).create().body(body).event(event).send().await?;
        Ok(())
    }

    async fn add_label(&self, repo: &str, issue: u64, label: &str) -> anyhow::Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        self.client.issues(owner, name).add_labels(issue, &[label.to_owned()]).await?;
        Ok(())
    }

    async fn add_comment(&self, repo: &str, issue: u64, body: &str) -> anyhow::Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        self.client.issues(owner, name).create_comment(issue, body).await?;
        Ok(())
    }

    async fn close_issue(&self, repo: &str, issue: u64) -> anyhow::Result<()> {
        let (owner, name) = Self::split_repo(repo)?;
        self.client
            .issues(owner, name)
            .update(issue)
            .state(octocrab::models::IssueState::Closed)
            .send()
            .await?;
        Ok(())
    }

    async fn list_workflow_runs(&self, repo: &str, branch: &str) -> anyhow::Result<Vec<WorkflowRun>> {
        let (owner, name) = Self::split_repo(repo)?;
        let page = self
            .client
            .workflows(owner, name)
            .list_all_runs()
            .branch(branch)
            .send()
            .await?;
        Ok(page
            .items
            .into_iter()
            .map(|run| WorkflowRun {
                run_id: run.id.into_inner(),
                branch: run.head_branch,
                status: match run.status.as_str() {
                    "queued" => RunStatus::Queued,
                    "in_progress" => RunStatus::InProgress,
                    _ => RunStatus::Completed,
                },
                conclusion: run.conclusion.as_deref().map(|c| {
                    if c == "success" {
                        RunConclusion::Success
                    } else {
                        RunConclusion::Failure
                    }
                }),
            })
            .collect())
    }

    async fn fetch_run_logs(&self, repo: &str, run_id: u64) -> anyhow::Result<String> {
        let (owner, name) = Self::split_repo(repo)?;
        let bytes = self
            .client
            .actions()
            .download_workflow_run_logs(owner, name, octocrab::models::RunId(run_id))
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
pub mod fake;

#[cfg(test)]
mod tests {
    #[test]
    fn split_repo_rejects_missing_slash() {
        assert!(super::GitHubUpstream::split_repo("no-slash-here").is_err());
    }

    #[test]
    fn split_repo_splits_owner_and_name() {
        let (owner, name) = super::GitHubUpstream::split_repo("acme/widgets").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(name, "widgets");
    }
}
