//! `aidp monitor start|stop|status`: the per-project pipeline monitor loop,
//! run the same foreground-until-Ctrl+C way as the worker pool.

use std::sync::Arc;

use anyhow::{Context, Result};

use aidp_core::git_ops::GitWorkspace;
use aidp_core::pipeline_monitor::{LoggingNotifier, PipelineMonitor, PipelineMonitorConfig};

use crate::config::ResolvedConfig;
use crate::project_cmds;
use crate::wiring;

pub async fn run_start(config: &ResolvedConfig, workspace_root: &std::path::Path) -> Result<()> {
    let project = project_cmds::require_active(workspace_root)?;
    let repo = project.repo.clone().context("active project has no upstream repository configured")?;

    let conn = wiring::connect_broker(config).await?;
    let upstream = wiring::build_upstream(config)?;
    let generation = wiring::build_generation(config);
    let git_config = wiring::git_config(config, &repo);
    let workspace = GitWorkspace::ensure(project.workspace_path.clone(), &git_config.remote_url)
        .context("failed to prepare the project's git workspace")?;

    let monitor_config = PipelineMonitorConfig {
        poll_interval: config.pipeline.monitor_poll_interval,
        branch: config.development_branch.clone(),
    };

    let monitor = PipelineMonitor::start(
        repo,
        workspace,
        upstream,
        generation,
        conn,
        Arc::new(LoggingNotifier),
        monitor_config,
    );

    println!("Pipeline monitor running for '{}'. Ctrl+C to stop.", project.name);
    crate::worker_cmd::wait_for_shutdown().await;
    monitor.stop().await;
    println!("Pipeline monitor stopped.");
    Ok(())
}

pub fn run_stop() {
    println!("Monitors run in the foreground; press Ctrl+C in the `aidp monitor start` session to stop them.");
}

pub fn run_status() {
    println!("Monitor status is only visible from the process running `aidp monitor start`; this command has none of its own state to report.");
}
