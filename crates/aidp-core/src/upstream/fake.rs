//! In-memory `Upstream` fake for tests, shaped like an in-memory stand-in
//! for a real adapter, not a mock of specific call expectations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{PullRequest, ReviewDecision, Upstream, WorkflowRun};

#[derive(Default)]
struct State {
    issues: HashMap<(String, u64), (String, String, Vec<String>)>,
    next_pr_number: u64,
    pull_requests: HashMap<(String, u64), PullRequest>,
    merged: Vec<(String, u64)>,
    closed_issues: Vec<(String, u64)>,
    reviews: Vec<(String, u64, ReviewDecision, String)>,
    labels: Vec<(String, u64, String)>,
    comments: Vec<(String, u64, String)>,
    workflow_runs: HashMap<String, Vec<WorkflowRun>>,
    run_logs: HashMap<u64, String>,
}

pub struct FakeUpstream {
    state: Mutex<State>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { next_pr_number: 1, ..Default::default() }) }
    }

    pub fn seed_issue(&self, repo: &str, issue: u64, title: &str, body: &str, labels: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.issues.insert(
            (repo.to_owned(), issue),
            (title.to_owned(), body.to_owned(), labels.iter().map(|s| s.to_string()).collect()),
        );
    }

    pub fn seed_workflow_run(&self, repo: &str, run: WorkflowRun) {
        let mut state = self.state.lock().unwrap();
        state.workflow_runs.entry(repo.to_owned()).or_default().push(run);
    }

    pub fn seed_run_logs(&self, run_id: u64, logs: &str) {
        self.state.lock().unwrap().run_logs.insert(run_id, logs.to_owned());
    }

    pub fn was_merged(&self, repo: &str, number: u64) -> bool {
        self.state.lock().unwrap().merged.contains(&(repo.to_owned(), number))
    }

    pub fn was_closed(&self, repo: &str, issue: u64) -> bool {
        self.state.lock().unwrap().closed_issues.contains(&(repo.to_owned(), issue))
    }

    pub fn labels_for(&self, repo: &str, issue: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .labels
            .iter()
            .filter(|(r, i, _)| r == repo && *i == issue)
            .map(|(_, _, l)| l.clone())
            .collect()
    }

    pub fn comment_count(&self, repo: &str, issue: u64) -> usize {
        self.state.lock().unwrap().comments.iter().filter(|(r, i, _)| r == repo && *i == issue).count()
    }

    pub fn last_review(&self, repo: &str, number: u64) -> Option<ReviewDecision> {
        self.state
            .lock()
            .unwrap()
            .reviews
            .iter()
            .rev()
            .find(|(r, n, _, _)| r == repo && *n == number)
            .map(|(_, _, d, _)| *d)
    }
}

impl Default for FakeUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn get_issue_title_body(&self, repo: &str, issue: u64) -> anyhow::Result<(String, String, Vec<String>)> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(&(repo.to_owned(), issue))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("issue {issue} not seeded for {repo}"))
    }

    async fn create_branch(&self, _repo: &str, _branch: &str, _from: &str) -> anyhow::Result<()> {
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
        let mut state = self.state.lock().unwrap();
        let number = state.next_pr_number;
        state.next_pr_number += 1;
        let pr = PullRequest {
            number,
            title: title.to_owned(),
            body: body.to_owned(),
            head_branch: head.to_owned(),
            base_branch: base.to_owned(),
            changed_files: vec![],
        };
        state.pull_requests.insert((repo.to_owned(), number), pr.clone());
        Ok(pr)
    }

    async fn get_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<PullRequest> {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .get(&(repo.to_owned(), number))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("pull request {number} not found for {repo}"))
    }

    async fn merge_pull_request(&self, repo: &str, number: u64) -> anyhow::Result<()> {
        self.state.lock().unwrap().merged.push((repo.to_owned(), number));
        Ok(())
    }

    async fn create_review(&self, repo: &str, number: u64, decision: ReviewDecision, body: &str) -> anyhow::Result<()> {
        self.state.lock().unwrap().reviews.push((repo.to_owned(), number, decision, body.to_owned()));
        Ok(())
    }

    async fn add_label(&self, repo: &str, issue: u64, label: &str) -> anyhow::Result<()> {
        self.state.lock().unwrap().labels.push((repo.to_owned(), issue, label.to_owned()));
        Ok(())
    }

    async fn add_comment(&self, repo: &str, issue: u64, body: &str) -> anyhow::Result<()> {
        self.state.lock().unwrap().comments.push((repo.to_owned(), issue, body.to_owned()));
        Ok(())
    }

    async fn close_issue(&self, repo: &str, issue: u64) -> anyhow::Result<()> {
        self.state.lock().unwrap().closed_issues.push((repo.to_owned(), issue));
        Ok(())
    }

    async fn list_workflow_runs(&self, repo: &str, branch: &str) -> anyhow::Result<Vec<WorkflowRun>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workflow_runs
            .get(repo)
            .map(|runs| runs.iter().filter(|r| r.branch == branch).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_run_logs(&self, _repo: &str, run_id: u64) -> anyhow::Result<String> {
        Ok(self.state.lock().unwrap().run_logs.get(&run_id).cloned().unwrap_or_default())
    }
}
