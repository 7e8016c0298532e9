//! Worker snapshot publication, read back by the pipeline monitor's stall
//! detector and the CLI's `worker status` command.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::models::{AgentKind, WorkerSnapshot};

fn worker_key(agent_kind: AgentKind) -> String {
    format!("aidp:worker:{agent_kind}")
}

/// Publish the current snapshot for `agent_kind`. Called by the worker loop
/// on every state transition.
pub async fn publish_snapshot(conn: &mut ConnectionManager, snapshot: &WorkerSnapshot) -> Result<()> {
    let value = serde_json::to_string(snapshot).context("failed to serialize worker snapshot")?;
    conn.set::<_, _, ()>(worker_key(snapshot.agent_kind), value)
        .await
        .context("failed to publish worker snapshot")?;
    Ok(())
}

/// Read the last published snapshot for `agent_kind`.
pub async fn read_snapshot(
    conn: &mut ConnectionManager,
    agent_kind: AgentKind,
) -> Result<Option<WorkerSnapshot>> {
    let raw: Option<String> = conn
        .get(worker_key(agent_kind))
        .await
        .context("failed to read worker snapshot")?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).context("failed to deserialize worker snapshot")?,
        )),
        None => Ok(None),
    }
}

/// Read the snapshot for every agent kind, in [`AgentKind::ALL`] order.
pub async fn read_all_snapshots(conn: &mut ConnectionManager) -> Result<Vec<WorkerSnapshot>> {
    let mut out = Vec::with_capacity(AgentKind::ALL.len());
    for kind in AgentKind::ALL {
        if let Some(snapshot) = read_snapshot(conn, kind).await? {
            out.push(snapshot);
        }
    }
    Ok(out)
}
