//! `aidp pipeline run`: seed the Issue Classifier's fan-out by enqueueing
//! the active project's planning tasks.

use anyhow::{Context, Result};
use chrono::Utc;

use aidp_broker::models::{AgentKind, Task, TaskKind};
use aidp_broker::queries::assignment;

use crate::config::ResolvedConfig;
use crate::project_cmds;
use crate::wiring;

/// Planning tasks have no associated upstream issue; `0` is the sentinel
/// the Pipeline Monitor's own CI-fix requests already use for the same
/// reason.
const PLANNING_ISSUE: u64 = 0;

pub async fn run(config: &ResolvedConfig, workspace_root: &std::path::Path) -> Result<()> {
    let project = project_cmds::require_active(workspace_root)?;
    let repo = project.repo.clone().context("active project has no upstream repository configured")?;

    let mut conn = wiring::connect_broker(config).await?;
    let workspace_path = project.workspace_path.display().to_string();

    for agent_kind in [AgentKind::ProductManager, AgentKind::ProjectManager] {
        let task = Task {
            kind: TaskKind::ImplementFeature,
            repo: repo.clone(),
            issue: PLANNING_ISSUE,
            pr_number: None,
            agent_kind,
            workspace_path: workspace_path.clone(),
            enqueued_at: Utc::now(),
        };
        assignment::enqueue(&mut conn, &task, 0.0).await?;
        println!("Enqueued {agent_kind} planning task for '{}'.", project.name);
    }

    println!("Run `aidp worker start` to begin draining the queues.");
    Ok(())
}
