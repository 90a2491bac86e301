//! Domain model: workers, tasks, columns, cards, comments, and the event
//! envelope published whenever any of them change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLivenessState {
    Online,
    Stale,
    Offline,
}

/// A registered worker process. At most one row exists per `user_id`;
/// re-registration upserts in place rather than creating a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hostname: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: u32,
    pub liveness: WorkerLivenessState,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// Mirrors the task lifecycle: pending -> claimed -> running -> {completed,
    /// failed}, with cancellation reachable from any non-terminal state.
    /// `claimed -> {completed, failed}` is also valid directly: tasks that
    /// never emit a `progress` report (every `jira_*`/`gitlab_*`/`board_plan`/
    /// `card_gen` task, and any `agent_run` whose subprocess exits before the
    /// first progress flush) complete or fail straight out of `claimed`.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, target),
            (Pending, Claimed)
                | (Claimed, Running)
                | (Claimed, Cancelled)
                | (Claimed, Completed)
                | (Claimed, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Pending, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AgentRun,
    JiraImport,
    JiraPush,
    JiraSync,
    GitlabLink,
    GitlabCreateProject,
    GitlabPush,
    BoardPlan,
    CardGen,
}

impl TaskKind {
    /// Worker-side dispatch category: agent subprocess vs. integration client.
    pub fn is_agent(&self) -> bool {
        matches!(self, TaskKind::AgentRun)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskKind,
    pub board_id: Uuid,
    pub card_id: Option<Uuid>,
    pub created_by: Uuid,
    pub assigned_to: Uuid,
    pub claimed_by_worker: Option<Uuid>,
    pub status: TaskStatus,
    pub priority: i32,

    /// Agent-run payload.
    pub agent_type: Option<String>,
    pub agent_model: Option<String>,
    pub prompt_text: Option<String>,
    /// Opaque structured bag for integration task kinds, JSON-encoded.
    pub payload: Option<String>,

    /// Automation routing, copied onto the task at creation so routing
    /// survives later column reconfiguration.
    pub source_column_id: Option<Uuid>,
    pub target_column_id: Option<Uuid>,
    pub failure_column_id: Option<Uuid>,
    pub loop_count: u32,
    pub max_loop_count: u32,

    pub error_summary: Option<String>,
    pub output_comment_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Column / Card / Comment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub auto_run: bool,
    pub agent_type: Option<String>,
    pub prompt_template: Option<String>,
    pub on_success_column_id: Option<Uuid>,
    pub on_failure_column_id: Option<Uuid>,
    pub max_loop_count: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_run: false,
            agent_type: None,
            prompt_template: None,
            on_success_column_id: None,
            on_failure_column_id: None,
            max_loop_count: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: Uuid,
    pub board_id: Uuid,
    pub name: String,
    pub position: i32,
    pub automation: AutomationConfig,
}

/// Agent-automation status surfaced on a card, mirrored into `agent_status`
/// for the board UI. Empty string means "no automation in flight."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAgentStatus {
    None,
    Pending,
    Running,
    Completed,
    Failed,
}

impl CardAgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardAgentStatus::None => "",
            CardAgentStatus::Pending => "pending",
            CardAgentStatus::Running => "running",
            CardAgentStatus::Completed => "completed",
            CardAgentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => CardAgentStatus::Pending,
            "running" => CardAgentStatus::Running,
            "completed" => CardAgentStatus::Completed,
            "failed" => CardAgentStatus::Failed,
            _ => CardAgentStatus::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub board_id: Uuid,
    pub column_id: Uuid,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub priority: i32,
    pub assignee_id: Option<Uuid>,
    pub agent_status: CardAgentStatus,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub card_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub is_agent_output: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Event — stream envelope (spec §6 stream event tags)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum Event {
    TaskCreated(Box<Task>),
    TaskClaimed { task_id: Uuid, worker_id: Uuid },
    TaskProgress { task_id: Uuid, progress: String },
    TaskCompleted { task_id: Uuid, result: Option<String> },
    TaskFailed { task_id: Uuid, reason: String },
    TaskCancelled { task_id: Uuid },
    TaskRoutingSkipped { task_id: Uuid, card_id: Uuid, reason: String },
    WorkerOnline { worker_id: Uuid },
    WorkerStale { worker_id: Uuid },
    WorkerOffline { worker_id: Uuid },
    CardMoved { card_id: Uuid, from_column_id: Uuid, to_column_id: Uuid },
    CardUpdated { card_id: Uuid },
    Heartbeat,
}

impl Event {
    /// Topic this event is published under — either a board-scoped topic or
    /// the global catch-all, mirroring `EventBus`'s topic keys.
    pub fn board_topic(board_id: Uuid) -> String {
        format!("board:{board_id}")
    }

    pub fn user_topic(user_id: Uuid) -> String {
        format!("user:{user_id}")
    }

    pub const GLOBAL_TOPIC: &'static str = "global";
}

/// Implemented by anything that can fan events out to subscribers — lets
/// `cq-automation` publish without depending on `cq-server`'s `EventBus` type.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, event: Event);
}
