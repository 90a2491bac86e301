//! Composition root tying task lifecycle transitions to automation routing.
//!
//! `TaskService` and `AutomationEngine` don't depend on each other — the
//! engine depends on the service (to create follow-up tasks), so the service
//! can't depend back on the engine without a cycle. `TaskCoordinator` is the
//! one place that holds both and sequences "transition, then route" the way
//! the task lifecycle operations are specified: complete/fail always hand off
//! to automation routing after the transition lands.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use cq_core::types::{Task, TaskStatus};

use crate::automation_engine::AutomationEngine;
use crate::error::Result;
use crate::task_service::TaskService;

pub struct TaskCoordinator {
    pub task_service: Arc<TaskService>,
    pub automation: Arc<AutomationEngine>,
}

impl TaskCoordinator {
    pub fn new(task_service: Arc<TaskService>, automation: Arc<AutomationEngine>) -> Self {
        Self { task_service, automation }
    }

    pub async fn create(&self, task: Task) -> Result<Task> {
        self.task_service.create(task).await
    }

    pub async fn list(
        &self,
        board_id: Option<Uuid>,
        status: Option<TaskStatus>,
        card_id: Option<Uuid>,
    ) -> Result<Vec<Task>> {
        self.task_service.list(board_id, status, card_id).await
    }

    pub async fn cancel(&self, task_id: Uuid) -> Result<Task> {
        self.task_service.cancel(task_id).await
    }

    pub async fn claim(&self, task_id: Uuid, worker_id: Uuid) -> Result<Task> {
        self.task_service.claim(task_id, worker_id).await
    }

    pub async fn progress(&self, task_id: Uuid, worker_id: Uuid, text: String) -> Result<Task> {
        self.task_service.progress(task_id, worker_id, text).await
    }

    /// Complete a task, then route the card. Automation errors are logged and
    /// do not roll back the completion — a completed task must not be undone
    /// by a downstream routing failure.
    pub async fn complete(&self, task_id: Uuid, worker_id: Uuid, output_text: String) -> Result<Task> {
        let (task, outcome) = self.task_service.complete(task_id, worker_id, output_text).await?;
        if let Err(e) = self.automation.on_terminal(&task, outcome).await {
            warn!(task_id = %task.id, error = %e, "automation routing failed after completion");
        }
        Ok(task)
    }

    pub async fn fail(
        &self,
        task_id: Uuid,
        worker_id: Uuid,
        error_summary: String,
        output_text: Option<String>,
    ) -> Result<Task> {
        let task = self.task_service.fail(task_id, worker_id, error_summary, output_text).await?;
        self.route_failure(&task).await;
        Ok(task)
    }

    /// Fail a task on behalf of the liveness sweeper (worker went offline).
    pub async fn fail_offline(&self, task_id: Uuid) -> Result<Task> {
        let task = self.task_service.fail_offline(task_id).await?;
        self.route_failure(&task).await;
        Ok(task)
    }

    async fn route_failure(&self, task: &Task) {
        use crate::task_service::RoutingOutcome;
        if let Err(e) = self.automation.on_terminal(task, RoutingOutcome::Failure).await {
            warn!(task_id = %task.id, error = %e, "automation routing failed after failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_core::store::{RetryPolicy, Store};
    use cq_core::types::{AutomationConfig, Card, CardAgentStatus, Column, Event, EventPublisher, TaskKind};
    use chrono::Utc;
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

    async fn harness() -> (Arc<Store>, Arc<RecordingBus>, TaskCoordinator) {
        let store = Arc::new(Store::open_in_memory(RetryPolicy::default()).await.unwrap());
        let bus = Arc::new(RecordingBus::default());
        let bus_dyn: Arc<dyn EventPublisher> = bus.clone();
        let task_service = Arc::new(TaskService::new(store.clone(), bus_dyn.clone()));
        let automation = Arc::new(AutomationEngine::new(store.clone(), bus_dyn, task_service.clone()));
        (store, bus, TaskCoordinator::new(task_service, automation))
    }

    #[tokio::test]
    async fn failing_a_task_moves_card_to_failure_column() {
        let (store, _bus, coordinator) = harness().await;
        let board_id = Uuid::new_v4();
        let failure_col = Uuid::new_v4();

        let automation_cfg = AutomationConfig {
            auto_run: true,
            agent_type: Some("coder".into()),
            prompt_template: None,
            on_success_column_id: None,
            on_failure_column_id: Some(failure_col),
            max_loop_count: 3,
        };
        let source_col = Column { id: Uuid::new_v4(), board_id, name: "Working".into(), position: 0, automation: automation_cfg };
        store.upsert_column(source_col.clone()).await.unwrap();
        store
            .upsert_column(Column { id: failure_col, board_id, name: "Needs Human".into(), position: 1, automation: AutomationConfig::default() })
            .await
            .unwrap();

        let now = Utc::now();
        let card = Card {
            id: Uuid::new_v4(),
            board_id,
            column_id: source_col.id,
            title: "Flaky build".into(),
            description: "".into(),
            labels: vec![],
            priority: 0,
            assignee_id: None,
            agent_status: CardAgentStatus::None,
            position: 0,
            created_at: now,
            updated_at: now,
        };
        store.upsert_card(card.clone()).await.unwrap();

        let actor = Uuid::new_v4();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: TaskKind::AgentRun,
            board_id,
            card_id: Some(card.id),
            created_by: actor,
            assigned_to: actor,
            claimed_by_worker: None,
            status: TaskStatus::Pending,
            priority: 0,
            agent_type: Some("coder".into()),
            agent_model: None,
            prompt_text: Some("go".into()),
            payload: None,
            source_column_id: Some(source_col.id),
            target_column_id: None,
            failure_column_id: Some(failure_col),
            loop_count: 0,
            max_loop_count: 3,
            error_summary: None,
            output_comment_id: None,
            created_at: now,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        let task_id = task.id;
        coordinator.create(task).await.unwrap();

        let worker = Uuid::new_v4();
        coordinator.claim(task_id, worker).await.unwrap();
        coordinator.fail(task_id, worker, "build broke".into(), None).await.unwrap();

        let card_after = store.get_card(card.id).await.unwrap();
        assert_eq!(card_after.column_id, failure_col);
    }
}
