//! Integration tests for the assignment store.
//!
//! These tests require a Redis instance, either started on-demand via
//! testcontainers or pointed at by `AIDP_TEST_REDIS_URL`.

use chrono::Utc;

use aidp_broker::models::{AgentKind, Task, TaskKind, TrackingStatus};
use aidp_broker::queries::assignment;

fn task(agent_kind: AgentKind, repo: &str, issue: u64) -> Task {
    Task {
        kind: TaskKind::FixBug,
        repo: repo.to_owned(),
        issue,
        pr_number: None,
        agent_kind,
        workspace_path: format!("/tmp/{repo}"),
        enqueued_at: Utc::now(),
    }
}

#[tokio::test]
async fn claim_ordering_respects_priority_then_fifo() {
    let mut conn = aidp_test_utils::connection().await;
    let repo = aidp_test_utils::unique_repo("s1");

    assignment::enqueue(&mut conn, &task(AgentKind::Backend, &repo, 7), 7.0)
        .await
        .unwrap();
    assignment::enqueue(&mut conn, &task(AgentKind::Backend, &repo, 3), 3.0)
        .await
        .unwrap();
    assignment::enqueue(&mut conn, &task(AgentKind::Backend, &repo, 12), 12.0)
        .await
        .unwrap();

    let first = assignment::claim_next(&mut conn, AgentKind::Backend)
        .await
        .unwrap()
        .expect("first claim");
    assert_eq!(first.issue, 3);

    let second = assignment::claim_next(&mut conn, AgentKind::Backend)
        .await
        .unwrap()
        .expect("second claim");
    assert_eq!(second.issue, 7);

    let third = assignment::claim_next(&mut conn, AgentKind::Backend)
        .await
        .unwrap()
        .expect("third claim");
    assert_eq!(third.issue, 12);

    let fourth = assignment::claim_next(&mut conn, AgentKind::Backend)
        .await
        .unwrap();
    assert!(fourth.is_none());
}

#[tokio::test]
async fn claim_transitions_tracking_record_to_in_progress() {
    let mut conn = aidp_test_utils::connection().await;
    let repo = aidp_test_utils::unique_repo("s2");

    assignment::enqueue(&mut conn, &task(AgentKind::Frontend, &repo, 1), 1.0)
        .await
        .unwrap();

    let before = assignment::assignment_status(&mut conn, &repo, 1)
        .await
        .unwrap()
        .expect("record exists");
    assert_eq!(before.status, TrackingStatus::Pending);

    assignment::claim_next(&mut conn, AgentKind::Frontend)
        .await
        .unwrap();

    let after = assignment::assignment_status(&mut conn, &repo, 1)
        .await
        .unwrap()
        .expect("record exists");
    assert_eq!(after.status, TrackingStatus::InProgress);
    assert!(after.claimed_at.is_some());
}

#[tokio::test]
async fn complete_and_fail_set_terminal_state() {
    let mut conn = aidp_test_utils::connection().await;
    let repo = aidp_test_utils::unique_repo("s3");

    assignment::enqueue(&mut conn, &task(AgentKind::Database, &repo, 5), 5.0)
        .await
        .unwrap();
    assignment::claim_next(&mut conn, AgentKind::Database)
        .await
        .unwrap();
    assignment::complete(&mut conn, &repo, 5, "migration applied")
        .await
        .unwrap();

    let record = assignment::assignment_status(&mut conn, &repo, 5)
        .await
        .unwrap()
        .expect("record exists");
    assert_eq!(record.status, TrackingStatus::Completed);
    assert_eq!(record.result_summary.as_deref(), Some("migration applied"));

    assignment::enqueue(&mut conn, &task(AgentKind::Database, &repo, 6), 6.0)
        .await
        .unwrap();
    assignment::claim_next(&mut conn, AgentKind::Database)
        .await
        .unwrap();
    assignment::fail(&mut conn, &repo, 6, "connection refused")
        .await
        .unwrap();

    let record = assignment::assignment_status(&mut conn, &repo, 6)
        .await
        .unwrap()
        .expect("record exists");
    assert_eq!(record.status, TrackingStatus::Failed);
    assert_eq!(record.error_text.as_deref(), Some("connection refused"));
}

#[tokio::test]
async fn peek_is_non_destructive() {
    let mut conn = aidp_test_utils::connection().await;
    let repo = aidp_test_utils::unique_repo("s4");

    assignment::enqueue(&mut conn, &task(AgentKind::Qa, &repo, 1), 1.0)
        .await
        .unwrap();
    assignment::enqueue(&mut conn, &task(AgentKind::Qa, &repo, 2), 2.0)
        .await
        .unwrap();

    let peeked = assignment::peek(&mut conn, AgentKind::Qa, 10).await.unwrap();
    let ours: Vec<_> = peeked.iter().filter(|t| t.repo == repo).collect();
    assert_eq!(ours.len(), 2);

    // queue_depth should still reflect both entries — peek did not remove them.
    let before = assignment::queue_depth(&mut conn, AgentKind::Qa).await.unwrap();
    assignment::claim_next(&mut conn, AgentKind::Qa).await.unwrap();
    let after = assignment::queue_depth(&mut conn, AgentKind::Qa).await.unwrap();
    assert_eq!(after, before - 1);
}
