//! `aidp worker start|stop|status`.
//!
//! `start` runs the pool in the foreground until Ctrl+C, in the same
//! double-signal shape as the teacher's `dispatch_cmd` (first signal drains
//! gracefully, second forces exit). `status` reads worker snapshots
//! straight from the broker, since they are externalized there regardless
//! of which process is currently running the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use aidp_broker::models::AgentKind;
use aidp_broker::queries::workers;
use aidp_core::agent_runtime::AgentRuntime;
use aidp_core::worker_pool::{NoopDrainHook, WorkerPool, WorkerPoolConfig};

use crate::config::ResolvedConfig;
use crate::deploy_cmd::FinisherRedeployTrigger;
use crate::project_cmds;
use crate::wiring;

pub async fn run_start(config: &ResolvedConfig, workspace_root: &std::path::Path) -> Result<()> {
    let project = project_cmds::require_active(workspace_root)?;
    let repo = project.repo.clone().context("active project has no upstream repository configured")?;

    let conn = wiring::connect_broker(config).await?;
    let upstream = wiring::build_upstream(config)?;
    let generation = wiring::build_generation(config);
    let redeploy = Arc::new(FinisherRedeployTrigger::new(config.clone(), workspace_root.to_path_buf()));
    let runtime = Arc::new(AgentRuntime::new(generation, upstream, redeploy, workspace_root.to_path_buf()));
    let git_config = wiring::git_config(config, &repo);

    let pool_config = WorkerPoolConfig { poll_interval: config.pipeline.worker_poll_interval };
    let pool = WorkerPool::start(conn, runtime, git_config, pool_config, Arc::new(NoopDrainHook));

    println!("Worker pool running for '{}'. Ctrl+C to stop.", project.name);
    wait_for_shutdown().await;
    pool.shutdown().await;
    println!("Worker pool stopped.");
    Ok(())
}

pub fn run_stop() {
    println!("Workers run in the foreground; press Ctrl+C in the `aidp worker start` session to stop them.");
}

pub async fn run_status(config: &ResolvedConfig) -> Result<()> {
    let mut conn = wiring::connect_broker(config).await?;
    let snapshots = workers::read_all_snapshots(&mut conn).await?;

    for agent_kind in AgentKind::ALL {
        match snapshots.iter().find(|s| s.agent_kind == agent_kind) {
            Some(snapshot) => println!("{:<16} {}", agent_kind.to_string(), snapshot.state),
            None => println!("{:<16} unknown (never reported)", agent_kind.to_string()),
        }
    }
    Ok(())
}

/// Wait for Ctrl+C; a second signal force-exits the process immediately.
pub(crate) async fn wait_for_shutdown() {
    let got_first = Arc::new(AtomicBool::new(false));
    loop {
        tokio::signal::ctrl_c().await.ok();
        if got_first.swap(true, Ordering::SeqCst) {
            eprintln!("\nForce exit.");
            std::process::exit(130);
        }
        eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
        return;
    }
}
