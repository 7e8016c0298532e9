//! Worker pool: one polling loop per agent kind, claiming from its broker
//! queue and executing through the [`crate::agent_runtime::AgentRuntime`].
//!
//! Grounded on `orchestrator::run_orchestrator`'s semaphore/channel/
//! cancellation-token shape, but restructured around a fixed, independent
//! loop per [`AgentKind`] rather than one DAG-wide scheduler: each queue is
//! claimed with the broker's atomic pop-of-lowest-score, so there is no
//! cross-kind coordination to do and no DAG to walk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aidp_broker::models::{AgentKind, Task, TaskKind, TrackingStatus, WorkerSnapshot, WorkerState};
use aidp_broker::queries::{assignment, workers};

use crate::agent_runtime::{AgentRuntime, ProjectGitConfig};
use crate::upstream::{ReviewDecision, Upstream};

/// Hook fired once every queue is empty and every worker is idle or stopped.
/// Fires at most once per drain (cleared the next time any worker leaves
/// `idle`), mirroring a level-triggered rather than edge-spammed signal.
#[async_trait::async_trait]
pub trait DrainHook: Send + Sync {
    async fn on_drained(&self);
}

pub struct NoopDrainHook;

#[async_trait::async_trait]
impl DrainHook for NoopDrainHook {
    async fn on_drained(&self) {}
}

#[derive(Clone)]
pub struct WorkerPoolConfig {
    pub poll_interval: Duration,
}

struct WorkerHandle {
    task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns one background task per [`AgentKind`] and the shared drain-detection
/// state they report into.
pub struct WorkerPool {
    workers: HashMap<AgentKind, WorkerHandle>,
}

impl WorkerPool {
    /// Start one polling loop per agent kind in [`AgentKind::ALL`] order.
    pub fn start(
        conn: ConnectionManager,
        runtime: Arc<AgentRuntime>,
        project: ProjectGitConfig,
        config: WorkerPoolConfig,
        drain_hook: Arc<dyn DrainHook>,
    ) -> Self {
        let mut workers = HashMap::new();
        let conn = Arc::new(AsyncMutex::new(conn));
        let was_drained = Arc::new(std::sync::atomic::AtomicBool::new(false));

        for agent_kind in AgentKind::ALL {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_worker_loop(
                agent_kind,
                Arc::clone(&conn),
                Arc::clone(&runtime),
                project.clone(),
                config.clone(),
                cancel.clone(),
                Arc::clone(&drain_hook),
                Arc::clone(&was_drained),
            ));
            workers.insert(agent_kind, WorkerHandle { task, cancel });
        }

        Self { workers }
    }

    /// Request every worker to stop after its current iteration and wait for
    /// them to finish. Best-effort: a worker stuck mid-task is awaited, not
    /// killed.
    pub async fn shutdown(self) {
        for (agent_kind, handle) in self.workers {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(%agent_kind, error = %e, "worker task panicked during shutdown");
            }
        }
    }
}

async fn run_worker_loop(
    agent_kind: AgentKind,
    conn: Arc<AsyncMutex<ConnectionManager>>,
    runtime: Arc<AgentRuntime>,
    project: ProjectGitConfig,
    config: WorkerPoolConfig,
    cancel: CancellationToken,
    drain_hook: Arc<dyn DrainHook>,
    was_drained: Arc<std::sync::atomic::AtomicBool>,
) {
    loop {
        if cancel.is_cancelled() {
            publish_state(&conn, agent_kind, WorkerState::Stopped, None).await;
            return;
        }

        publish_state(&conn, agent_kind, WorkerState::Polling, None).await;

        let claimed = {
            let mut guard = conn.lock().await;
            assignment::claim_next(&mut guard, agent_kind).await
        };

        let task = match claimed {
            Ok(Some(task)) => task,
            Ok(None) => {
                publish_state(&conn, agent_kind, WorkerState::Idle, None).await;
                if check_drained(&conn, &was_drained).await {
                    drain_hook.on_drained().await;
                }
                if wait_or_cancel(&config.poll_interval, &cancel).await {
                    continue;
                }
                publish_state(&conn, agent_kind, WorkerState::Stopped, None).await;
                return;
            }
            Err(e) => {
                error!(%agent_kind, error = %e, "failed to poll queue");
                publish_state(&conn, agent_kind, WorkerState::Error, None).await;
                if wait_or_cancel(&config.poll_interval, &cancel).await {
                    continue;
                }
                return;
            }
        };

        was_drained.store(false, std::sync::atomic::Ordering::SeqCst);
        let started_at = Utc::now();
        publish_state(&conn, agent_kind, WorkerState::Working, Some(started_at)).await;

        let outcome = execute_task(&runtime, &task, &project).await;

        let mut guard = conn.lock().await;
        match outcome {
            Ok((summary, pr_number)) => {
                if let Err(e) = assignment::complete(&mut guard, &task.repo, task.issue, &summary).await {
                    error!(%agent_kind, repo = %task.repo, issue = task.issue, error = %e, "failed to record completion");
                }
                info!(%agent_kind, repo = %task.repo, issue = task.issue, "task completed");

                if matches!(agent_kind, AgentKind::Backend | AgentKind::Frontend) {
                    if let Some(pr_number) = pr_number {
                        let qa_task = Task {
                            kind: TaskKind::ReviewPr,
                            repo: task.repo.clone(),
                            issue: task.issue,
                            pr_number: Some(pr_number),
                            agent_kind: AgentKind::Qa,
                            workspace_path: task.workspace_path.clone(),
                            enqueued_at: Utc::now(),
                        };
                        if let Err(e) = assignment::enqueue(&mut guard, &qa_task, task.issue as f64).await {
                            error!(repo = %task.repo, issue = task.issue, error = %e, "failed to enqueue QA review task");
                        }
                    }
                }
            }
            Err(e) => {
                if let Err(write_err) = assignment::fail(&mut guard, &task.repo, task.issue, &e.to_string()).await {
                    error!(%agent_kind, repo = %task.repo, issue = task.issue, error = %write_err, "failed to record failure");
                }
                warn!(%agent_kind, repo = %task.repo, issue = task.issue, error = %e, "task failed");
            }
        }
        drop(guard);
    }
}

/// Dispatch a claimed task to the runtime, applying the QA worker's
/// merge-on-approval / request-changes specialisation on top of the
/// runtime's generic review execution. Returns the outcome summary plus
/// its reported pull-request number, if any, so the caller can chain a
/// Backend/Frontend completion into a QA review task.
async fn execute_task(
    runtime: &AgentRuntime,
    task: &Task,
    project: &ProjectGitConfig,
) -> Result<(String, Option<u64>)> {
    let outcome = runtime.execute(task, project).await.map_err(anyhow::Error::msg)?;

    if task.agent_kind == AgentKind::Qa {
        if let Some(pr_number) = outcome.pr_number {
            match outcome.review_decision {
                Some(ReviewDecision::Approve) => {
                    runtime.merge_and_close(&task.repo, pr_number, task.issue).await?;
                }
                Some(ReviewDecision::RequestChanges) => {
                    runtime.upstream().add_label(&task.repo, task.issue, "needs-revision").await?;
                    anyhow::bail!("QA requested changes on PR #{pr_number}");
                }
                None => {}
            }
        }
    }

    Ok((outcome.summary, outcome.pr_number))
}

async fn publish_state(
    conn: &Arc<AsyncMutex<ConnectionManager>>,
    agent_kind: AgentKind,
    state: WorkerState,
    current_task_started_at: Option<chrono::DateTime<Utc>>,
) {
    let snapshot = WorkerSnapshot { agent_kind, state, current_task_started_at };
    let mut guard = conn.lock().await;
    if let Err(e) = workers::publish_snapshot(&mut guard, &snapshot).await {
        warn!(%agent_kind, error = %e, "failed to publish worker snapshot");
    }
}

/// True when every queue is empty and every worker is idle or stopped, and
/// this is the first time that state has been observed since the last
/// non-drained reading.
async fn check_drained(conn: &Arc<AsyncMutex<ConnectionManager>>, was_drained: &std::sync::atomic::AtomicBool) -> bool {
    let mut guard = conn.lock().await;

    for agent_kind in AgentKind::ALL {
        match assignment::queue_depth(&mut guard, agent_kind).await {
            Ok(0) => {}
            _ => return false,
        }
    }

    let snapshots = match workers::read_all_snapshots(&mut guard).await {
        Ok(s) => s,
        Err(_) => return false,
    };
    let all_idle = snapshots.iter().all(|s| matches!(s.state, WorkerState::Idle | WorkerState::Stopped));
    drop(guard);

    if all_idle && !was_drained.swap(true, std::sync::atomic::Ordering::SeqCst) {
        return true;
    }
    false
}

/// Sleep for `interval` unless cancelled first. Returns `true` if the sleep
/// completed (caller should keep looping), `false` if cancelled.
async fn wait_or_cancel(interval: &Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(*interval) => true,
        _ = cancel.cancelled() => false,
    }
}

/// True when `(repo, issue)` is marked `completed` or `failed` in the
/// tracking store -- used by callers that need to know a task has finished
/// without holding a direct handle to it (e.g. integration tests).
pub async fn is_settled(conn: &mut ConnectionManager, repo: &str, issue: u64) -> Result<bool> {
    let record = assignment::assignment_status(conn, repo, issue).await?;
    Ok(matches!(
        record.map(|r| r.status),
        Some(TrackingStatus::Completed) | Some(TrackingStatus::Failed)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_or_cancel_returns_false_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let completed = wait_or_cancel(&Duration::from_secs(30), &cancel).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn wait_or_cancel_returns_true_on_short_timer() {
        let cancel = CancellationToken::new();
        let completed = wait_or_cancel(&Duration::from_millis(1), &cancel).await;
        assert!(completed);
    }
}
