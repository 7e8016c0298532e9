use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The fixed set of agent roles. Each owns exactly one priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ProductManager,
    ProjectManager,
    Backend,
    Frontend,
    Database,
    Devops,
    Qa,
}

impl AgentKind {
    /// All agent kinds, in the order the worker pool starts them.
    pub const ALL: [AgentKind; 7] = [
        AgentKind::ProductManager,
        AgentKind::ProjectManager,
        AgentKind::Backend,
        AgentKind::Frontend,
        AgentKind::Database,
        AgentKind::Devops,
        AgentKind::Qa,
    ];
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProductManager => "product_manager",
            Self::ProjectManager => "project_manager",
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Database => "database",
            Self::Devops => "devops",
            Self::Qa => "qa",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentKind {
    type Err = AgentKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_manager" => Ok(Self::ProductManager),
            "project_manager" => Ok(Self::ProjectManager),
            "backend" => Ok(Self::Backend),
            "frontend" => Ok(Self::Frontend),
            "database" => Ok(Self::Database),
            "devops" => Ok(Self::Devops),
            "qa" => Ok(Self::Qa),
            other => Err(AgentKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AgentKind`] string.
#[derive(Debug, Clone)]
pub struct AgentKindParseError(pub String);

impl fmt::Display for AgentKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent kind: {:?}", self.0)
    }
}

impl std::error::Error for AgentKindParseError {}

// ---------------------------------------------------------------------------

/// The kind of work a [`Task`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ImplementFeature,
    FixBug,
    WriteTests,
    Refactor,
    ReviewPr,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ImplementFeature => "implement_feature",
            Self::FixBug => "fix_bug",
            Self::WriteTests => "write_tests",
            Self::Refactor => "refactor",
            Self::ReviewPr => "review_pr",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implement_feature" => Ok(Self::ImplementFeature),
            "fix_bug" => Ok(Self::FixBug),
            "write_tests" => Ok(Self::WriteTests),
            "refactor" => Ok(Self::Refactor),
            "review_pr" => Ok(Self::ReviewPr),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle state of a [`TrackingRecord`].
///
/// Transitions: `Pending -> InProgress -> {Completed, Failed}`. There is no
/// path back to `Pending`; re-delivery of an already-claimed task leaves the
/// record in `InProgress` with an updated claim timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TrackingStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn is_valid_transition(from: TrackingStatus, to: TrackingStatus) -> bool {
        use TrackingStatus::*;
        matches!(
            (from, to),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TrackingStatus {
    type Err = TrackingStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TrackingStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TrackingStatus`] string.
#[derive(Debug, Clone)]
pub struct TrackingStatusParseError(pub String);

impl fmt::Display for TrackingStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tracking status: {:?}", self.0)
    }
}

impl std::error::Error for TrackingStatusParseError {}

// ---------------------------------------------------------------------------

/// Observable state of a single worker goroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Polling,
    Working,
    Error,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Working => "working",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkerState {
    type Err = WorkerStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "polling" => Ok(Self::Polling),
            "working" => Ok(Self::Working),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            other => Err(WorkerStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkerState`] string.
#[derive(Debug, Clone)]
pub struct WorkerStateParseError(pub String);

impl fmt::Display for WorkerStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worker state: {:?}", self.0)
    }
}

impl std::error::Error for WorkerStateParseError {}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A unit of work addressed to a specific [`AgentKind`].
///
/// Immutable once enqueued -- the serialized form is the canonical identity
/// used for priority-queue ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub repo: String,
    pub issue: u64,
    /// Present only for `review_pr` tasks handed to the QA agent.
    pub pr_number: Option<u64>,
    pub agent_kind: AgentKind,
    pub workspace_path: String,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    /// The key identifying this task's tracking record: `(repo, issue)`.
    pub fn tracking_key(&self) -> (String, u64) {
        (self.repo.clone(), self.issue)
    }
}

/// The authoritative, mutable state of a `(repo, issue)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub repo: String,
    pub issue: u64,
    pub agent_kind: AgentKind,
    pub status: TrackingStatus,
    pub enqueued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// First 1KB of the task's success summary, if completed.
    pub result_summary: Option<String>,
    /// First 1KB of the failure text, if failed.
    pub error_text: Option<String>,
}

/// Bound applied to summary/error text stored on a [`TrackingRecord`].
pub const TRACKING_TEXT_TRUNCATE_BYTES: usize = 1024;

/// TTL applied to a tracking record from its last write.
pub const TRACKING_RECORD_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Truncate `s` to at most `max_bytes` bytes on a UTF-8 character boundary.
pub fn truncate_text(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}

/// A point-in-time view of one worker goroutine, published for the pipeline
/// monitor's stall detector and the CLI's `worker status` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub agent_kind: AgentKind,
    pub state: WorkerState,
    /// Set only while `state == Working`.
    pub current_task_started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_kind_display_roundtrip() {
        for v in AgentKind::ALL {
            let s = v.to_string();
            let parsed: AgentKind = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn agent_kind_invalid() {
        assert!("bogus".parse::<AgentKind>().is_err());
    }

    #[test]
    fn task_kind_display_roundtrip() {
        let variants = [
            TaskKind::ImplementFeature,
            TaskKind::FixBug,
            TaskKind::WriteTests,
            TaskKind::Refactor,
            TaskKind::ReviewPr,
        ];
        for v in variants {
            let s = v.to_string();
            let parsed: TaskKind = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn task_kind_invalid() {
        assert!("nope".parse::<TaskKind>().is_err());
    }

    #[test]
    fn tracking_status_display_roundtrip() {
        let variants = [
            TrackingStatus::Pending,
            TrackingStatus::InProgress,
            TrackingStatus::Completed,
            TrackingStatus::Failed,
        ];
        for v in variants {
            let s = v.to_string();
            let parsed: TrackingStatus = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn tracking_status_invalid() {
        assert!("unknown".parse::<TrackingStatus>().is_err());
    }

    #[test]
    fn tracking_status_transitions() {
        use TrackingStatus::*;
        assert!(TrackingStatus::is_valid_transition(Pending, InProgress));
        assert!(TrackingStatus::is_valid_transition(InProgress, Completed));
        assert!(TrackingStatus::is_valid_transition(InProgress, Failed));
        assert!(!TrackingStatus::is_valid_transition(Pending, Completed));
        assert!(!TrackingStatus::is_valid_transition(Completed, InProgress));
        assert!(!TrackingStatus::is_valid_transition(Failed, InProgress));
    }

    #[test]
    fn worker_state_display_roundtrip() {
        let variants = [
            WorkerState::Idle,
            WorkerState::Polling,
            WorkerState::Working,
            WorkerState::Error,
            WorkerState::Stopped,
        ];
        for v in variants {
            let s = v.to_string();
            let parsed: WorkerState = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn worker_state_invalid() {
        assert!("sleeping".parse::<WorkerState>().is_err());
    }

    #[test]
    fn truncate_text_respects_char_boundary() {
        let s = "a".repeat(10) + "é" + &"b".repeat(10);
        let truncated = truncate_text(&s, 11);
        assert!(truncated.is_char_boundary(truncated.len()));
        assert!(truncated.len() <= 11);
    }

    #[test]
    fn truncate_text_noop_when_short() {
        assert_eq!(truncate_text("short", 1024), "short");
    }
}
