//! Transactional persistence for workers, tasks, columns, cards and comments.
//!
//! Backed by SQLite (WAL mode) through `tokio_rusqlite`, spawning each query
//! as a blocking closure onto the connection's dedicated thread. Claim and
//! transition are implemented as
//! single conditional `UPDATE` statements so two callers racing for the same
//! row never both "win" — exactly one `UPDATE` affects a row, the other
//! observes zero rows changed and maps that to `CoreError::Conflict`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{
    AutomationConfig, Card, CardAgentStatus, Column, Comment, Task, TaskKind, TaskStatus, Worker,
    WorkerLivenessState,
};

/// Retry policy for transient `SQLITE_BUSY` contention on writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 10ms, 20ms, 40ms, 80ms, 160ms — capped exponential backoff, 5 retries.
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(160),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1 << attempt.min(31));
        scaled.min(self.max_delay)
    }
}

pub struct Store {
    conn: Connection,
    retry: RetryPolicy,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self, CoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn, retry };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory(retry: RetryPolicy) -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn, retry };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS workers (
                        id TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL UNIQUE,
                        hostname TEXT NOT NULL,
                        version TEXT NOT NULL,
                        capabilities TEXT NOT NULL,
                        max_concurrent_tasks INTEGER NOT NULL DEFAULT 1,
                        liveness TEXT NOT NULL,
                        registered_at TEXT NOT NULL,
                        last_heartbeat_at TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS columns (
                        id TEXT PRIMARY KEY,
                        board_id TEXT NOT NULL,
                        name TEXT NOT NULL,
                        position INTEGER NOT NULL,
                        automation TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS cards (
                        id TEXT PRIMARY KEY,
                        board_id TEXT NOT NULL,
                        column_id TEXT NOT NULL,
                        title TEXT NOT NULL,
                        description TEXT NOT NULL,
                        labels TEXT NOT NULL,
                        priority INTEGER NOT NULL DEFAULT 0,
                        assignee_id TEXT,
                        agent_status TEXT NOT NULL DEFAULT '',
                        position INTEGER NOT NULL,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS comments (
                        id TEXT PRIMARY KEY,
                        card_id TEXT NOT NULL,
                        user_id TEXT NOT NULL,
                        content TEXT NOT NULL,
                        is_agent_output INTEGER NOT NULL DEFAULT 0,
                        created_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_comments_card ON comments(card_id);

                    CREATE TABLE IF NOT EXISTS tasks (
                        id TEXT PRIMARY KEY,
                        task_type TEXT NOT NULL,
                        board_id TEXT NOT NULL,
                        card_id TEXT,
                        created_by TEXT NOT NULL,
                        assigned_to TEXT NOT NULL,
                        claimed_by_worker TEXT,
                        status TEXT NOT NULL,
                        priority INTEGER NOT NULL DEFAULT 0,
                        agent_type TEXT,
                        agent_model TEXT,
                        prompt_text TEXT,
                        payload TEXT,
                        source_column_id TEXT,
                        target_column_id TEXT,
                        failure_column_id TEXT,
                        loop_count INTEGER NOT NULL DEFAULT 0,
                        max_loop_count INTEGER NOT NULL DEFAULT 0,
                        error_summary TEXT,
                        output_comment_id TEXT,
                        created_at TEXT NOT NULL,
                        claimed_at TEXT,
                        started_at TEXT,
                        completed_at TEXT,
                        updated_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
                    CREATE INDEX IF NOT EXISTS idx_tasks_card ON tasks(card_id);
                    CREATE INDEX IF NOT EXISTS idx_tasks_worker ON tasks(claimed_by_worker);
                    "#,
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn with_retry<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: Fn(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static + Clone,
        T: Send + 'static,
    {
        let mut attempt = 0;
        loop {
            let f = f.clone();
            match self.conn.call(move |conn| f(conn)).await {
                Ok(v) => return Ok(v),
                Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy
                        && attempt < self.retry.max_retries =>
                {
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // -- workers -------------------------------------------------------

    /// Upsert by `user_id` (not `id`): re-registering the same user updates
    /// the existing worker row in place rather than creating a second one.
    pub async fn register_worker(&self, worker: Worker) -> Result<Worker, CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "INSERT INTO workers (id, user_id, hostname, version, capabilities, max_concurrent_tasks, liveness, registered_at, last_heartbeat_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(user_id) DO UPDATE SET
                    hostname = excluded.hostname,
                    version = excluded.version,
                    capabilities = excluded.capabilities,
                    max_concurrent_tasks = excluded.max_concurrent_tasks,
                    liveness = excluded.liveness,
                    last_heartbeat_at = excluded.last_heartbeat_at",
                params![
                    worker.id.to_string(),
                    worker.user_id.to_string(),
                    worker.hostname,
                    worker.version,
                    serde_json::to_string(&worker.capabilities).unwrap(),
                    worker.max_concurrent_tasks,
                    liveness_to_sql(worker.liveness),
                    worker.registered_at.to_rfc3339(),
                    worker.last_heartbeat_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;
        self.get_worker_by_user(worker.user_id).await
    }

    pub async fn heartbeat_worker(&self, worker_id: Uuid, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let affected = self
            .with_retry(move |conn| {
                conn.execute(
                    "UPDATE workers SET last_heartbeat_at = ?1, liveness = 'online' WHERE id = ?2",
                    params![at.to_rfc3339(), worker_id.to_string()],
                )
            })
            .await?;
        Ok(affected > 0)
    }

    pub async fn set_worker_liveness(
        &self,
        worker_id: Uuid,
        liveness: WorkerLivenessState,
    ) -> Result<(), CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "UPDATE workers SET liveness = ?1 WHERE id = ?2",
                params![liveness_to_sql(liveness), worker_id.to_string()],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>, CoreError> {
        self.with_retry(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, hostname, version, capabilities, max_concurrent_tasks, liveness, registered_at, last_heartbeat_at FROM workers",
            )?;
            let rows = stmt.query_map([], row_to_worker)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    pub async fn get_worker(&self, id: Uuid) -> Result<Worker, CoreError> {
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT id, user_id, hostname, version, capabilities, max_concurrent_tasks, liveness, registered_at, last_heartbeat_at FROM workers WHERE id = ?1",
                params![id.to_string()],
                row_to_worker,
            )
            .optional()
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("worker {id}")))
    }

    pub async fn get_worker_by_user(&self, user_id: Uuid) -> Result<Worker, CoreError> {
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT id, user_id, hostname, version, capabilities, max_concurrent_tasks, liveness, registered_at, last_heartbeat_at FROM workers WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_worker,
            )
            .optional()
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("worker for user {user_id}")))
    }

    // -- tasks -----------------------------------------------------------

    const TASK_COLUMNS: &'static str = "id, task_type, board_id, card_id, created_by, assigned_to,
        claimed_by_worker, status, priority, agent_type, agent_model, prompt_text, payload,
        source_column_id, target_column_id, failure_column_id, loop_count, max_loop_count,
        error_summary, output_comment_id, created_at, claimed_at, started_at, completed_at, updated_at";

    pub async fn create_task(&self, task: Task) -> Result<(), CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, task_type, board_id, card_id, created_by, assigned_to,
                    claimed_by_worker, status, priority, agent_type, agent_model, prompt_text, payload,
                    source_column_id, target_column_id, failure_column_id, loop_count, max_loop_count,
                    error_summary, output_comment_id, created_at, claimed_at, started_at, completed_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25)",
                params![
                    task.id.to_string(),
                    kind_to_sql(task.task_type),
                    task.board_id.to_string(),
                    task.card_id.map(|u| u.to_string()),
                    task.created_by.to_string(),
                    task.assigned_to.to_string(),
                    task.claimed_by_worker.map(|u| u.to_string()),
                    status_to_sql(task.status),
                    task.priority,
                    task.agent_type,
                    task.agent_model,
                    task.prompt_text,
                    task.payload,
                    task.source_column_id.map(|u| u.to_string()),
                    task.target_column_id.map(|u| u.to_string()),
                    task.failure_column_id.map(|u| u.to_string()),
                    task.loop_count,
                    task.max_loop_count,
                    task.error_summary,
                    task.output_comment_id.map(|u| u.to_string()),
                    task.created_at.to_rfc3339(),
                    task.claimed_at.map(|t| t.to_rfc3339()),
                    task.started_at.map(|t| t.to_rfc3339()),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", Self::TASK_COLUMNS);
        self.with_retry(move |conn| {
            conn.query_row(&sql, params![id.to_string()], row_to_task).optional()
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    pub async fn list_tasks(
        &self,
        board_id: Option<Uuid>,
        status: Option<TaskStatus>,
        card_id: Option<Uuid>,
    ) -> Result<Vec<Task>, CoreError> {
        let base = format!("SELECT {} FROM tasks WHERE 1=1", Self::TASK_COLUMNS);
        self.with_retry(move |conn| {
            let mut sql = base.clone();
            let mut bound: Vec<String> = Vec::new();
            if let Some(b) = board_id {
                sql.push_str(" AND board_id = ?");
                bound.push(b.to_string());
            }
            if let Some(s) = status {
                sql.push_str(" AND status = ?");
                bound.push(status_to_sql(s).to_string());
            }
            if let Some(c) = card_id {
                sql.push_str(" AND card_id = ?");
                bound.push(c.to_string());
            }
            sql.push_str(" ORDER BY created_at ASC");
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> =
                bound.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(params.as_slice(), row_to_task)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    /// Atomically claim a pending task for `worker_id`.
    ///
    /// Implemented as a single conditional `UPDATE`: only a row still in
    /// `pending` status is affected, so two workers racing on the same task
    /// never both succeed.
    pub async fn claim_task(&self, task_id: Uuid, worker_id: Uuid, at: DateTime<Utc>) -> Result<Task, CoreError> {
        let affected = self
            .with_retry(move |conn| {
                conn.execute(
                    "UPDATE tasks SET status = 'claimed', claimed_by_worker = ?1, claimed_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND status = 'pending'",
                    params![worker_id.to_string(), at.to_rfc3339(), task_id.to_string()],
                )
            })
            .await?;
        if affected == 0 {
            return Err(CoreError::Conflict(format!("task {task_id} already claimed or not pending")));
        }
        self.get_task(task_id).await
    }

    /// List pending tasks assigned to `user_id`, oldest first, up to `limit`.
    pub async fn list_pending_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<Task>, CoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE status = 'pending' AND assigned_to = ?1 ORDER BY created_at ASC LIMIT ?2",
            Self::TASK_COLUMNS
        );
        self.with_retry(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id.to_string(), limit], row_to_task)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    /// Atomically move a task between two statuses, applying the given field
    /// updates only if the row is still in `expected`. `complete`/`fail` on an
    /// already-terminal task is treated as a no-op success by the caller
    /// rather than surfaced as `Conflict` — see `TaskService`.
    #[allow(clippy::too_many_arguments)]
    pub async fn transition_task(
        &self,
        task_id: Uuid,
        expected: TaskStatus,
        target: TaskStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error_summary: Option<String>,
        output_comment_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Task, CoreError> {
        if !expected.can_transition_to(target) {
            return Err(CoreError::Conflict(format!(
                "invalid transition {expected:?} -> {target:?}"
            )));
        }
        let affected = self
            .with_retry(move |conn| {
                conn.execute(
                    "UPDATE tasks SET status = ?1,
                        started_at = COALESCE(started_at, ?2),
                        completed_at = COALESCE(?3, completed_at),
                        error_summary = COALESCE(?4, error_summary),
                        output_comment_id = COALESCE(?5, output_comment_id),
                        updated_at = ?6
                     WHERE id = ?7 AND status = ?8",
                    params![
                        status_to_sql(target),
                        started_at.map(|t| t.to_rfc3339()),
                        completed_at.map(|t| t.to_rfc3339()),
                        error_summary,
                        output_comment_id.map(|u| u.to_string()),
                        at.to_rfc3339(),
                        task_id.to_string(),
                        status_to_sql(expected),
                    ],
                )
            })
            .await?;
        if affected == 0 {
            return Err(CoreError::Conflict(format!(
                "task {task_id} not in expected state {expected:?}"
            )));
        }
        self.get_task(task_id).await
    }

    pub async fn tasks_held_by(&self, worker_id: Uuid) -> Result<Vec<Task>, CoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE claimed_by_worker = ?1 AND status IN ('claimed', 'running')",
            Self::TASK_COLUMNS
        );
        self.with_retry(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![worker_id.to_string()], row_to_task)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    /// Number of prior terminal tasks on a given (card, column) pair — the
    /// automation engine's loop counter.
    pub async fn terminal_task_count(&self, card_id: Uuid, column_id: Uuid) -> Result<u32, CoreError> {
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE card_id = ?1 AND source_column_id = ?2
                    AND status IN ('completed', 'failed', 'cancelled')",
                params![card_id.to_string(), column_id.to_string()],
                |row| row.get(0),
            )
        })
        .await
    }

    pub async fn purge_terminal_tasks_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < ?1",
                params![cutoff.to_rfc3339()],
            )
        })
        .await
    }

    // -- columns / cards / comments --------------------------------------

    pub async fn upsert_column(&self, column: Column) -> Result<(), CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "INSERT INTO columns (id, board_id, name, position, automation)
                 VALUES (?1,?2,?3,?4,?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, position = excluded.position, automation = excluded.automation",
                params![
                    column.id.to_string(),
                    column.board_id.to_string(),
                    column.name,
                    column.position,
                    serde_json::to_string(&column.automation).unwrap(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_column(&self, id: Uuid) -> Result<Column, CoreError> {
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT id, board_id, name, position, automation FROM columns WHERE id = ?1",
                params![id.to_string()],
                row_to_column,
            )
            .optional()
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("column {id}")))
    }

    pub async fn upsert_card(&self, card: Card) -> Result<(), CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "INSERT INTO cards (id, board_id, column_id, title, description, labels, priority,
                    assignee_id, agent_status, position, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                 ON CONFLICT(id) DO UPDATE SET
                    column_id = excluded.column_id, title = excluded.title,
                    description = excluded.description, labels = excluded.labels,
                    priority = excluded.priority, assignee_id = excluded.assignee_id,
                    agent_status = excluded.agent_status, position = excluded.position,
                    updated_at = excluded.updated_at",
                params![
                    card.id.to_string(),
                    card.board_id.to_string(),
                    card.column_id.to_string(),
                    card.title,
                    card.description,
                    serde_json::to_string(&card.labels).unwrap(),
                    card.priority,
                    card.assignee_id.map(|u| u.to_string()),
                    card.agent_status.as_str(),
                    card.position,
                    card.created_at.to_rfc3339(),
                    card.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_card(&self, id: Uuid) -> Result<Card, CoreError> {
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT id, board_id, column_id, title, description, labels, priority, assignee_id,
                    agent_status, position, created_at, updated_at FROM cards WHERE id = ?1",
                params![id.to_string()],
                row_to_card,
            )
            .optional()
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("card {id}")))
    }

    pub async fn set_card_agent_status(&self, card_id: Uuid, status: CardAgentStatus, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "UPDATE cards SET agent_status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), at.to_rfc3339(), card_id.to_string()],
            )
        })
        .await?;
        Ok(())
    }

    /// Conditional move: only succeeds if the card is still in `from_column`,
    /// used by the automation engine's concurrent-move detection.
    pub async fn move_card(&self, card_id: Uuid, from_column: Uuid, to_column: Uuid, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let affected = self
            .with_retry(move |conn| {
                conn.execute(
                    "UPDATE cards SET column_id = ?1, updated_at = ?2 WHERE id = ?3 AND column_id = ?4",
                    params![to_column.to_string(), at.to_rfc3339(), card_id.to_string(), from_column.to_string()],
                )
            })
            .await?;
        Ok(affected > 0)
    }

    pub async fn add_comment(&self, comment: Comment) -> Result<(), CoreError> {
        self.with_retry(move |conn| {
            conn.execute(
                "INSERT INTO comments (id, card_id, user_id, content, is_agent_output, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    comment.id.to_string(),
                    comment.card_id.to_string(),
                    comment.user_id.to_string(),
                    comment.content,
                    comment.is_agent_output,
                    comment.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_comments(&self, card_id: Uuid) -> Result<Vec<Comment>, CoreError> {
        self.with_retry(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, card_id, user_id, content, is_agent_output, created_at FROM comments WHERE card_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![card_id.to_string()], row_to_comment)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    /// Most recent agent-output comment on a card, if any — used by the
    /// automation engine's `{last_agent_output}` prompt variable.
    pub async fn last_agent_output_comment(&self, card_id: Uuid) -> Result<Option<Comment>, CoreError> {
        self.with_retry(move |conn| {
            conn.query_row(
                "SELECT id, card_id, user_id, content, is_agent_output, created_at FROM comments
                 WHERE card_id = ?1 AND is_agent_output = 1 ORDER BY created_at DESC LIMIT 1",
                params![card_id.to_string()],
                row_to_comment,
            )
            .optional()
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// enum <-> sql helpers
// ---------------------------------------------------------------------------

fn status_to_sql(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Claimed => "claimed",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn status_from_sql(s: &str) -> rusqlite::Result<TaskStatus> {
    Ok(match s {
        "pending" => TaskStatus::Pending,
        "claimed" => TaskStatus::Claimed,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown task status {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    })
}

fn kind_to_sql(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::AgentRun => "agent_run",
        TaskKind::JiraImport => "jira_import",
        TaskKind::JiraPush => "jira_push",
        TaskKind::JiraSync => "jira_sync",
        TaskKind::GitlabLink => "gitlab_link",
        TaskKind::GitlabCreateProject => "gitlab_create_project",
        TaskKind::GitlabPush => "gitlab_push",
        TaskKind::BoardPlan => "board_plan",
        TaskKind::CardGen => "card_gen",
    }
}

fn kind_from_sql(s: &str) -> rusqlite::Result<TaskKind> {
    Ok(match s {
        "agent_run" => TaskKind::AgentRun,
        "jira_import" => TaskKind::JiraImport,
        "jira_push" => TaskKind::JiraPush,
        "jira_sync" => TaskKind::JiraSync,
        "gitlab_link" => TaskKind::GitlabLink,
        "gitlab_create_project" => TaskKind::GitlabCreateProject,
        "gitlab_push" => TaskKind::GitlabPush,
        "board_plan" => TaskKind::BoardPlan,
        "card_gen" => TaskKind::CardGen,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown task kind {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    })
}

fn liveness_to_sql(liveness: WorkerLivenessState) -> &'static str {
    match liveness {
        WorkerLivenessState::Online => "online",
        WorkerLivenessState::Stale => "stale",
        WorkerLivenessState::Offline => "offline",
    }
}

fn liveness_from_sql(s: &str) -> rusqlite::Result<WorkerLivenessState> {
    Ok(match s {
        "online" => WorkerLivenessState::Online,
        "stale" => WorkerLivenessState::Stale,
        "offline" => WorkerLivenessState::Offline,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown liveness {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    })
}

fn parse_dt(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

fn parse_opt_uuid(s: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    s.map(parse_uuid).transpose()
}

fn row_to_worker(row: &Row) -> rusqlite::Result<Worker> {
    let caps_json: String = row.get(4)?;
    Ok(Worker {
        id: parse_uuid(row.get(0)?)?,
        user_id: parse_uuid(row.get(1)?)?,
        hostname: row.get(2)?,
        version: row.get(3)?,
        capabilities: serde_json::from_str(&caps_json).unwrap_or_default(),
        max_concurrent_tasks: row.get(5)?,
        liveness: liveness_from_sql(&row.get::<_, String>(6)?)?,
        registered_at: parse_dt(row.get(7)?)?,
        last_heartbeat_at: parse_dt(row.get(8)?)?,
    })
}

fn row_to_column(row: &Row) -> rusqlite::Result<Column> {
    let automation_json: String = row.get(4)?;
    Ok(Column {
        id: parse_uuid(row.get(0)?)?,
        board_id: parse_uuid(row.get(1)?)?,
        name: row.get(2)?,
        position: row.get(3)?,
        automation: serde_json::from_str(&automation_json).unwrap_or_else(|_| AutomationConfig::default()),
    })
}

fn row_to_card(row: &Row) -> rusqlite::Result<Card> {
    let labels_json: String = row.get(5)?;
    let assignee_id: Option<String> = row.get(7)?;
    let agent_status: String = row.get(8)?;
    Ok(Card {
        id: parse_uuid(row.get(0)?)?,
        board_id: parse_uuid(row.get(1)?)?,
        column_id: parse_uuid(row.get(2)?)?,
        title: row.get(3)?,
        description: row.get(4)?,
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        priority: row.get(6)?,
        assignee_id: parse_opt_uuid(assignee_id)?,
        agent_status: CardAgentStatus::from_str(&agent_status),
        position: row.get(9)?,
        created_at: parse_dt(row.get(10)?)?,
        updated_at: parse_dt(row.get(11)?)?,
    })
}

fn row_to_comment(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: parse_uuid(row.get(0)?)?,
        card_id: parse_uuid(row.get(1)?)?,
        user_id: parse_uuid(row.get(2)?)?,
        content: row.get(3)?,
        is_agent_output: row.get(4)?,
        created_at: parse_dt(row.get(5)?)?,
    })
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let card_id: Option<String> = row.get(3)?;
    let claimed_by_worker: Option<String> = row.get(6)?;
    let source_column_id: Option<String> = row.get(13)?;
    let target_column_id: Option<String> = row.get(14)?;
    let failure_column_id: Option<String> = row.get(15)?;
    let output_comment_id: Option<String> = row.get(19)?;
    let claimed_at: Option<String> = row.get(21)?;
    let started_at: Option<String> = row.get(22)?;
    let completed_at: Option<String> = row.get(23)?;
    Ok(Task {
        id: parse_uuid(row.get(0)?)?,
        task_type: kind_from_sql(&row.get::<_, String>(1)?)?,
        board_id: parse_uuid(row.get(2)?)?,
        card_id: parse_opt_uuid(card_id)?,
        created_by: parse_uuid(row.get(4)?)?,
        assigned_to: parse_uuid(row.get(5)?)?,
        claimed_by_worker: parse_opt_uuid(claimed_by_worker)?,
        status: status_from_sql(&row.get::<_, String>(7)?)?,
        priority: row.get(8)?,
        agent_type: row.get(9)?,
        agent_model: row.get(10)?,
        prompt_text: row.get(11)?,
        payload: row.get(12)?,
        source_column_id: parse_opt_uuid(source_column_id)?,
        target_column_id: parse_opt_uuid(target_column_id)?,
        failure_column_id: parse_opt_uuid(failure_column_id)?,
        loop_count: row.get(16)?,
        max_loop_count: row.get(17)?,
        error_summary: row.get(18)?,
        output_comment_id: parse_opt_uuid(output_comment_id)?,
        created_at: parse_dt(row.get(20)?)?,
        claimed_at: claimed_at.map(parse_dt).transpose()?,
        started_at: started_at.map(parse_dt).transpose()?,
        completed_at: completed_at.map(parse_dt).transpose()?,
        updated_at: parse_dt(row.get(24)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn sample_task(card_id: Uuid, board_id: Uuid) -> Task {
        let user = Uuid::new_v4();
        Task {
            id: Uuid::new_v4(),
            task_type: TaskKind::AgentRun,
            board_id,
            card_id: Some(card_id),
            created_by: user,
            assigned_to: user,
            claimed_by_worker: None,
            status: TaskStatus::Pending,
            priority: 0,
            agent_type: Some("coder".into()),
            agent_model: None,
            prompt_text: Some("do the thing".into()),
            payload: None,
            source_column_id: Some(Uuid::new_v4()),
            target_column_id: None,
            failure_column_id: None,
            loop_count: 0,
            max_loop_count: 5,
            error_summary: None,
            output_comment_id: None,
            created_at: now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_under_race() {
        let store = Store::open_in_memory(RetryPolicy::default()).await.unwrap();
        let card_id = Uuid::new_v4();
        let board_id = Uuid::new_v4();
        let task = sample_task(card_id, board_id);
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let worker_a = Uuid::new_v4();
        let worker_b = Uuid::new_v4();

        let won_a = store.claim_task(task_id, worker_a, now()).await;
        let won_b = store.claim_task(task_id, worker_b, now()).await;

        assert!(won_a.is_ok());
        assert!(matches!(won_b, Err(CoreError::Conflict(_))));

        let task = store.get_task(task_id).await.unwrap();
        assert_eq!(task.claimed_by_worker, Some(worker_a));
        assert_eq!(task.status, TaskStatus::Claimed);
    }

    #[tokio::test]
    async fn transition_rejects_stale_expected_state() {
        let store = Store::open_in_memory(RetryPolicy::default()).await.unwrap();
        let task = sample_task(Uuid::new_v4(), Uuid::new_v4());
        let task_id = task.id;
        store.create_task(task).await.unwrap();
        store.claim_task(task_id, Uuid::new_v4(), now()).await.unwrap();

        // task is now `claimed`, not `pending` — transitioning from `pending` must fail.
        let err = store
            .transition_task(task_id, TaskStatus::Pending, TaskStatus::Claimed, None, None, None, None, now())
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn move_card_fails_when_column_already_changed() {
        let store = Store::open_in_memory(RetryPolicy::default()).await.unwrap();
        let board_id = Uuid::new_v4();
        let col_a = Uuid::new_v4();
        let col_b = Uuid::new_v4();
        let col_c = Uuid::new_v4();
        let card = Card {
            id: Uuid::new_v4(),
            board_id,
            column_id: col_a,
            title: "t".into(),
            description: "".into(),
            labels: vec![],
            priority: 0,
            assignee_id: None,
            agent_status: CardAgentStatus::None,
            position: 0,
            created_at: now(),
            updated_at: now(),
        };
        let card_id = card.id;
        store.upsert_card(card).await.unwrap();

        // Someone else already moved it to col_c before we got here.
        assert!(store.move_card(card_id, col_a, col_c, now()).await.unwrap());
        // Our stale "move from col_a to col_b" now finds the card in col_c, not col_a.
        assert!(!store.move_card(card_id, col_a, col_b, now()).await.unwrap());
    }

    #[tokio::test]
    async fn register_worker_upserts_by_user_id() {
        let store = Store::open_in_memory(RetryPolicy::default()).await.unwrap();
        let user_id = Uuid::new_v4();
        let w1 = Worker {
            id: Uuid::new_v4(),
            user_id,
            hostname: "box-a".into(),
            version: "1.0".into(),
            capabilities: vec!["agent".into()],
            max_concurrent_tasks: 2,
            liveness: WorkerLivenessState::Online,
            registered_at: now(),
            last_heartbeat_at: now(),
        };
        let first = store.register_worker(w1).await.unwrap();

        let w2 = Worker {
            id: Uuid::new_v4(),
            user_id,
            hostname: "box-b".into(),
            version: "1.1".into(),
            capabilities: vec!["agent".into(), "jira".into()],
            max_concurrent_tasks: 3,
            liveness: WorkerLivenessState::Online,
            registered_at: now(),
            last_heartbeat_at: now(),
        };
        let second = store.register_worker(w2).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.hostname, "box-b");
        assert_eq!(store.list_workers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_task_count_scopes_to_card_and_column() {
        let store = Store::open_in_memory(RetryPolicy::default()).await.unwrap();
        let card_id = Uuid::new_v4();
        let board_id = Uuid::new_v4();
        let column_id = Uuid::new_v4();

        let mut t1 = sample_task(card_id, board_id);
        t1.source_column_id = Some(column_id);
        let t1_id = t1.id;
        store.create_task(t1).await.unwrap();
        store.claim_task(t1_id, Uuid::new_v4(), now()).await.unwrap();
        store
            .transition_task(t1_id, TaskStatus::Claimed, TaskStatus::Running, Some(now()), None, None, None, now())
            .await
            .unwrap();
        store
            .transition_task(t1_id, TaskStatus::Running, TaskStatus::Completed, None, Some(now()), None, None, now())
            .await
            .unwrap();

        assert_eq!(store.terminal_task_count(card_id, column_id).await.unwrap(), 1);
    }
}
