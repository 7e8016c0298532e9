//! The assignment store: per-agent priority queues plus `(repo, issue)`
//! tracking records.
//!
//! Queues are Redis sorted sets keyed `aidp:queue:<agent_kind>` with the
//! serialized [`Task`] as member and the priority as score. Claiming is the
//! broker's atomic pop-of-lowest-score primitive (`ZPOPMIN`), which is the
//! sole mutual-exclusion mechanism guaranteeing at-most-one worker per task.
//! Tracking records live at `aidp:tracking:<repo>:<issue>` as a JSON string
//! with a seven-day TTL refreshed on every write.

use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::models::{
    truncate_text, AgentKind, Task, TrackingRecord, TrackingStatus, TRACKING_RECORD_TTL_SECS,
    TRACKING_TEXT_TRUNCATE_BYTES,
};

fn queue_key(agent_kind: AgentKind) -> String {
    format!("aidp:queue:{agent_kind}")
}

fn tracking_key(repo: &str, issue: u64) -> String {
    format!("aidp:tracking:{repo}:{issue}")
}

/// Insert `task` into its agent's priority queue and create its tracking
/// record in `pending`.
pub async fn enqueue(conn: &mut ConnectionManager, task: &Task, priority: f64) -> Result<()> {
    let member = serde_json::to_string(task).context("failed to serialize task")?;
    conn.zadd::<_, _, _, ()>(queue_key(task.agent_kind), member, priority)
        .await
        .context("failed to push task onto queue")?;

    let (repo, issue) = task.tracking_key();
    let record = TrackingRecord {
        repo,
        issue,
        agent_kind: task.agent_kind,
        status: TrackingStatus::Pending,
        enqueued_at: task.enqueued_at,
        claimed_at: None,
        finished_at: None,
        result_summary: None,
        error_text: None,
    };
    write_tracking_record(conn, &record).await
}

/// Atomically claim the lowest-priority task for `agent_kind`, if any, and
/// advance its tracking record to `in_progress`.
pub async fn claim_next(conn: &mut ConnectionManager, agent_kind: AgentKind) -> Result<Option<Task>> {
    let popped: Vec<(String, f64)> = conn
        .zpopmin(queue_key(agent_kind), 1)
        .await
        .context("failed to pop from queue")?;

    let Some((member, _score)) = popped.into_iter().next() else {
        return Ok(None);
    };

    let task: Task = serde_json::from_str(&member).context("failed to deserialize claimed task")?;

    let (repo, issue) = task.tracking_key();
    let mut record = read_tracking_record(conn, &repo, issue)
        .await?
        .unwrap_or(TrackingRecord {
            repo: repo.clone(),
            issue,
            agent_kind,
            status: TrackingStatus::Pending,
            enqueued_at: task.enqueued_at,
            claimed_at: None,
            finished_at: None,
            result_summary: None,
            error_text: None,
        });
    record.status = TrackingStatus::InProgress;
    record.claimed_at = Some(Utc::now());
    write_tracking_record(conn, &record).await?;

    Ok(Some(task))
}

/// Mark `(repo, issue)` completed with a truncated result summary.
pub async fn complete(
    conn: &mut ConnectionManager,
    repo: &str,
    issue: u64,
    result_summary: &str,
) -> Result<()> {
    let mut record = read_tracking_record(conn, repo, issue)
        .await?
        .with_context(|| format!("no tracking record for {repo}#{issue}"))?;
    record.status = TrackingStatus::Completed;
    record.finished_at = Some(Utc::now());
    record.result_summary = Some(truncate_text(result_summary, TRACKING_TEXT_TRUNCATE_BYTES));
    write_tracking_record(conn, &record).await
}

/// Mark `(repo, issue)` failed with a truncated error message.
pub async fn fail(conn: &mut ConnectionManager, repo: &str, issue: u64, error: &str) -> Result<()> {
    let mut record = read_tracking_record(conn, repo, issue)
        .await?
        .with_context(|| format!("no tracking record for {repo}#{issue}"))?;
    record.status = TrackingStatus::Failed;
    record.finished_at = Some(Utc::now());
    record.error_text = Some(truncate_text(error, TRACKING_TEXT_TRUNCATE_BYTES));
    write_tracking_record(conn, &record).await
}

/// Non-destructively read up to `count` lowest-priority tasks for `agent_kind`.
pub async fn peek(conn: &mut ConnectionManager, agent_kind: AgentKind, count: isize) -> Result<Vec<Task>> {
    let members: Vec<String> = conn
        .zrange(queue_key(agent_kind), 0, count.saturating_sub(1).max(0))
        .await
        .context("failed to read queue range")?;
    members
        .iter()
        .map(|m| serde_json::from_str(m).context("failed to deserialize queued task"))
        .collect()
}

/// Number of tasks currently queued for `agent_kind`.
pub async fn queue_depth(conn: &mut ConnectionManager, agent_kind: AgentKind) -> Result<u64> {
    let depth: u64 = conn
        .zcard(queue_key(agent_kind))
        .await
        .context("failed to read queue cardinality")?;
    Ok(depth)
}

/// Read the tracking record for `(repo, issue)`, if one exists and has not
/// expired.
pub async fn assignment_status(
    conn: &mut ConnectionManager,
    repo: &str,
    issue: u64,
) -> Result<Option<TrackingRecord>> {
    read_tracking_record(conn, repo, issue).await
}

async fn read_tracking_record(
    conn: &mut ConnectionManager,
    repo: &str,
    issue: u64,
) -> Result<Option<TrackingRecord>> {
    let raw: Option<String> = conn
        .get(tracking_key(repo, issue))
        .await
        .context("failed to read tracking record")?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).context("failed to deserialize tracking record")?,
        )),
        None => Ok(None),
    }
}

async fn write_tracking_record(conn: &mut ConnectionManager, record: &TrackingRecord) -> Result<()> {
    let key = tracking_key(&record.repo, record.issue);
    let value = serde_json::to_string(record).context("failed to serialize tracking record")?;
    conn.set_ex::<_, _, ()>(key, value, TRACKING_RECORD_TTL_SECS as u64)
        .await
        .context("failed to write tracking record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(agent_kind: AgentKind, issue: u64) -> Task {
        Task {
            kind: crate::models::TaskKind::FixBug,
            repo: "acme/widgets".into(),
            issue,
            pr_number: None,
            agent_kind,
            workspace_path: "/tmp/acme-widgets".into(),
            enqueued_at: Utc::now(),
        }
    }

    // These exercise pure (de)serialization / key-derivation logic that does
    // not require a live broker; full round-trip behavior against a real
    // Redis instance is covered by the integration tests in
    // `aidp-broker/tests/assignment_store_test.rs`.

    #[test]
    fn queue_key_is_per_agent() {
        assert_eq!(queue_key(AgentKind::Backend), "aidp:queue:backend");
        assert_eq!(queue_key(AgentKind::Qa), "aidp:queue:qa");
    }

    #[test]
    fn tracking_key_is_per_repo_issue() {
        assert_eq!(
            tracking_key("acme/widgets", 42),
            "aidp:tracking:acme/widgets:42"
        );
    }

    #[test]
    fn task_roundtrips_through_json() {
        let task = sample_task(AgentKind::Backend, 7);
        let encoded = serde_json::to_string(&task).unwrap();
        let decoded: Task = serde_json::from_str(&encoded).unwrap();
        assert_eq!(task, decoded);
    }
}
