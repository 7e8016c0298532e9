//! `aidp assign`: classify one upstream issue and enqueue it for the agent
//! kind the classifier picks.

use anyhow::{Context, Result};
use chrono::Utc;

use aidp_broker::models::{Task, TaskKind};
use aidp_broker::queries::assignment;
use aidp_core::issue_classifier::{self, IssueSummary};
use aidp_core::upstream::Upstream;

use crate::config::ResolvedConfig;
use crate::wiring;

/// Priority is the issue number itself (older issues dispatch first); the
/// assignment store's sorted set treats a lower value as earlier.
fn priority_for(issue: u64) -> f64 {
    issue as f64
}

pub async fn run(config: &ResolvedConfig, repo: &str, issue: u64, workspace_root: &std::path::Path) -> Result<()> {
    let upstream = wiring::build_upstream(config)?;
    let (title, body, labels) = upstream
        .get_issue_title_body(repo, issue)
        .await
        .with_context(|| format!("failed to fetch issue {repo}#{issue}"))?;

    let classification = issue_classifier::classify(&IssueSummary { labels, title: title.clone(), body });
    println!(
        "Issue {repo}#{issue} ('{title}') classified as {} (confidence {:.2})",
        classification.agent_kind, classification.confidence
    );

    let mut conn = wiring::connect_broker(config).await?;
    let task = Task {
        kind: TaskKind::ImplementFeature,
        repo: repo.to_owned(),
        issue,
        pr_number: None,
        agent_kind: classification.agent_kind,
        workspace_path: workspace_root.join(sanitize_repo(repo)).display().to_string(),
        enqueued_at: Utc::now(),
    };
    assignment::enqueue(&mut conn, &task, priority_for(issue)).await?;
    println!("Enqueued for the {} worker.", classification.agent_kind);
    Ok(())
}

fn sanitize_repo(repo: &str) -> String {
    repo.replace('/', "__")
}
