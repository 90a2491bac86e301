//! Task lifecycle operations: create, list, cancel, claim, progress,
//! complete, fail. Delegates atomicity to `Store`; this layer adds ownership
//! checks, event publication, and the REJECTED|FAILED output reinterpretation.

use std::sync::Arc;

use chrono::Utc;
use cq_core::error::CoreError;
use cq_core::store::Store;
use cq_core::types::{CardAgentStatus, Comment, Event, EventPublisher, Task, TaskStatus};
use regex::Regex;
use uuid::Uuid;

use crate::error::Result;

/// What a terminal transition means for automation routing. Decoupled from
/// the task's persisted `status` — a worker-reported `complete` whose output
/// matches the rejection regex still records `status = completed`, but is
/// routed as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOutcome {
    Success,
    Failure,
}

pub struct TaskService {
    store: Arc<Store>,
    bus: Arc<dyn EventPublisher>,
    rejection_re: Regex,
}

impl TaskService {
    pub fn new(store: Arc<Store>, bus: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            bus,
            // first line, case-insensitive, word-boundary match.
            rejection_re: Regex::new(r"(?i)\b(REJECTED|FAILED)\b").unwrap(),
        }
    }

    fn publish(&self, board_id: Uuid, event: Event) {
        self.bus.publish(&Event::board_topic(board_id), event);
    }

    pub async fn create(&self, task: Task) -> Result<Task> {
        self.store.create_task(task.clone()).await?;
        self.publish(task.board_id, Event::TaskCreated(Box::new(task.clone())));
        Ok(task)
    }

    pub async fn list(
        &self,
        board_id: Option<Uuid>,
        status: Option<TaskStatus>,
        card_id: Option<Uuid>,
    ) -> Result<Vec<Task>> {
        self.store.list_tasks(board_id, status, card_id).await
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        let updated = self
            .store
            .transition_task(task_id, task.status, TaskStatus::Cancelled, None, Some(Utc::now()), None, None, Utc::now())
            .await?;
        self.publish(updated.board_id, Event::TaskCancelled { task_id });
        Ok(updated)
    }

    pub async fn claim(&self, task_id: Uuid, worker_id: Uuid) -> Result<Task> {
        let task = self.store.claim_task(task_id, worker_id, Utc::now()).await?;
        self.publish(task.board_id, Event::TaskClaimed { task_id, worker_id });
        Ok(task)
    }

    fn check_owner(task: &Task, worker_id: Uuid) -> Result<()> {
        if task.claimed_by_worker != Some(worker_id) {
            return Err(CoreError::Forbidden(format!(
                "worker {worker_id} does not hold task {}",
                task.id
            )));
        }
        Ok(())
    }

    /// Idempotent: if status is `claimed`, transitions to `running` and sets
    /// `started_at`; repeated calls on an already-running task are no-ops
    /// beyond re-publishing progress text.
    pub async fn progress(&self, task_id: Uuid, worker_id: Uuid, text: String) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        Self::check_owner(&task, worker_id)?;

        let task = if task.status == TaskStatus::Claimed {
            self.store
                .transition_task(task_id, TaskStatus::Claimed, TaskStatus::Running, Some(Utc::now()), None, None, None, Utc::now())
                .await?
        } else {
            task
        };

        if task.status == TaskStatus::Running {
            self.store.set_card_agent_status_if_present(&task, CardAgentStatus::Running).await?;
            self.publish(task.board_id, Event::TaskProgress { task_id, progress: text });
        }
        Ok(task)
    }

    /// Report success. Returns the updated task and the routing outcome the
    /// automation engine should act on — `Failure` if `output_text`'s first
    /// line matches the REJECTED|FAILED marker, even though the worker
    /// reported completion.
    pub async fn complete(&self, task_id: Uuid, worker_id: Uuid, output_text: String) -> Result<(Task, RoutingOutcome)> {
        let task = self.store.get_task(task_id).await?;
        Self::check_owner(&task, worker_id)?;

        if task.status.is_terminal() {
            // Cancelled-task report: accepted as a no-op, output still attached.
            let comment_id = self.attach_output(&task, output_text.clone()).await?;
            let _ = comment_id;
            return Ok((task.clone(), self.routing_outcome(&output_text)));
        }

        let comment_id = self.attach_output(&task, output_text.clone()).await?;
        let updated = self
            .store
            .transition_task(
                task_id,
                task.status,
                TaskStatus::Completed,
                None,
                Some(Utc::now()),
                None,
                Some(comment_id),
                Utc::now(),
            )
            .await?;

        self.store.set_card_agent_status_if_present(&updated, CardAgentStatus::Completed).await?;
        self.publish(updated.board_id, Event::TaskCompleted { task_id, result: Some(output_text.clone()) });

        Ok((updated, self.routing_outcome(&output_text)))
    }

    pub async fn fail(&self, task_id: Uuid, worker_id: Uuid, error_summary: String, output_text: Option<String>) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        Self::check_owner(&task, worker_id)?;
        self.fail_inner(task, error_summary, output_text).await
    }

    /// Fail a task the registry sweeper found held by a worker that just went
    /// offline. Bypasses the owner check — the worker can no longer answer it.
    pub async fn fail_offline(&self, task_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        self.fail_inner(task, "worker offline".to_string(), None).await
    }

    async fn fail_inner(&self, task: Task, error_summary: String, output_text: Option<String>) -> Result<Task> {
        let task_id = task.id;
        if task.status.is_terminal() {
            if let Some(text) = output_text {
                self.attach_output(&task, text).await?;
            }
            return Ok(task);
        }

        let comment_id = match output_text {
            Some(text) => Some(self.attach_output(&task, text).await?),
            None => None,
        };

        let updated = self
            .store
            .transition_task(
                task_id,
                task.status,
                TaskStatus::Failed,
                None,
                Some(Utc::now()),
                Some(error_summary.clone()),
                comment_id,
                Utc::now(),
            )
            .await?;

        self.store.set_card_agent_status_if_present(&updated, CardAgentStatus::Failed).await?;
        self.publish(updated.board_id, Event::TaskFailed { task_id, reason: error_summary });
        Ok(updated)
    }

    fn routing_outcome(&self, output_text: &str) -> RoutingOutcome {
        let first_line = output_text.lines().next().unwrap_or("");
        if self.rejection_re.is_match(first_line) {
            RoutingOutcome::Failure
        } else {
            RoutingOutcome::Success
        }
    }

    async fn attach_output(&self, task: &Task, content: String) -> Result<Uuid> {
        let Some(card_id) = task.card_id else {
            return Ok(Uuid::nil());
        };
        let comment = Comment {
            id: Uuid::new_v4(),
            card_id,
            user_id: task.assigned_to,
            content,
            is_agent_output: true,
            created_at: Utc::now(),
        };
        let comment_id = comment.id;
        self.store.add_comment(comment).await?;
        Ok(comment_id)
    }
}

/// Small extension on `Store` kept local to this crate: mirror a task's
/// terminal status onto its card's `agent_status`, tolerating a missing card
/// (e.g. integration tasks not tied to a card).
#[async_trait::async_trait]
trait CardStatusMirror {
    async fn set_card_agent_status_if_present(&self, task: &Task, status: CardAgentStatus) -> Result<()>;
}

#[async_trait::async_trait]
impl CardStatusMirror for Store {
    async fn set_card_agent_status_if_present(&self, task: &Task, status: CardAgentStatus) -> Result<()> {
        let Some(card_id) = task.card_id else {
            return Ok(());
        };
        match self.get_card(card_id).await {
            Ok(_) => self.set_card_agent_status(card_id, status, Utc::now()).await,
            Err(CoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_core::store::RetryPolicy;
    use cq_core::types::TaskKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        events: Mutex<Vec<Event>>,
    }
    impl EventPublisher for RecordingBus {
        fn publish(&self, _topic: &str, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn sample_task(board_id: Uuid, card_id: Uuid, assigned_to: Uuid) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            task_type: TaskKind::AgentRun,
            board_id,
            card_id: Some(card_id),
            created_by: assigned_to,
            assigned_to,
            claimed_by_worker: None,
            status: TaskStatus::Pending,
            priority: 0,
            agent_type: Some("coder".into()),
            agent_model: None,
            prompt_text: Some("do it".into()),
            payload: None,
            source_column_id: Some(Uuid::new_v4()),
            target_column_id: None,
            failure_column_id: None,
            loop_count: 0,
            max_loop_count: 5,
            error_summary: None,
            output_comment_id: None,
            created_at: now,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    async fn harness() -> (Arc<Store>, TaskService, Uuid, Uuid) {
        let store = Arc::new(Store::open_in_memory(RetryPolicy::default()).await.unwrap());
        let bus: Arc<dyn EventPublisher> = Arc::new(RecordingBus::default());
        let svc = TaskService::new(store.clone(), bus);
        (store, svc, Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn claim_by_wrong_worker_is_forbidden_on_progress() {
        let (store, svc, board_id, card_id) = harness().await;
        let task = sample_task(board_id, card_id, Uuid::new_v4());
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let worker = Uuid::new_v4();
        svc.claim(task_id, worker).await.unwrap();

        let other = Uuid::new_v4();
        let err = svc.progress(task_id, other, "hi".into()).await;
        assert!(matches!(err, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn complete_with_plain_output_routes_success() {
        let (store, svc, board_id, card_id) = harness().await;
        let task = sample_task(board_id, card_id, Uuid::new_v4());
        let task_id = task.id;
        store.create_task(task).await.unwrap();
        let worker = Uuid::new_v4();
        svc.claim(task_id, worker).await.unwrap();

        let (task, outcome) = svc.complete(task_id, worker, "Use OIDC+PKCE".into()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(outcome, RoutingOutcome::Success);
    }

    #[tokio::test]
    async fn complete_with_rejected_first_line_routes_failure() {
        let (store, svc, board_id, card_id) = harness().await;
        let task = sample_task(board_id, card_id, Uuid::new_v4());
        let task_id = task.id;
        store.create_task(task).await.unwrap();
        let worker = Uuid::new_v4();
        svc.claim(task_id, worker).await.unwrap();

        let (task, outcome) = svc
            .complete(task_id, worker, "REJECTED: missing tests\nmore detail".into())
            .await
            .unwrap();
        // worker-reported completion still records as completed...
        assert_eq!(task.status, TaskStatus::Completed);
        // ...but routes through the failure path.
        assert_eq!(outcome, RoutingOutcome::Failure);
    }

    #[tokio::test]
    async fn complete_on_already_cancelled_task_is_a_noop() {
        let (store, svc, board_id, card_id) = harness().await;
        let task = sample_task(board_id, card_id, Uuid::new_v4());
        let task_id = task.id;
        store.create_task(task).await.unwrap();
        let worker = Uuid::new_v4();
        svc.claim(task_id, worker).await.unwrap();
        svc.cancel(task_id).await.unwrap();

        let (task, _) = svc.complete(task_id, worker, "too late".into()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }
}
