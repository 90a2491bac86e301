//! Card-move trigger and terminal-task routing.
//!
//! `maybe_trigger_on_move` runs whenever a card enters a column; `on_terminal`
//! runs after a task finishes (successfully, by failure, or by reinterpreted
//! rejection) and decides whether to move the card and re-trigger.

use std::sync::Arc;

use chrono::Utc;
use cq_core::store::Store;
use cq_core::types::{Card, CardAgentStatus, Column, Event, EventPublisher, Task, TaskKind, TaskStatus};
use uuid::Uuid;

use crate::error::Result;
use crate::task_service::{RoutingOutcome, TaskService};
use crate::template::{self, DEFAULT_TEMPLATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationOutcome {
    /// A new task was created for the card.
    Triggered(Uuid),
    /// The column isn't automated, or the loop bound was hit.
    NotTriggered,
}

pub struct AutomationEngine {
    store: Arc<Store>,
    bus: Arc<dyn EventPublisher>,
    task_service: Arc<TaskService>,
}

impl AutomationEngine {
    pub fn new(store: Arc<Store>, bus: Arc<dyn EventPublisher>, task_service: Arc<TaskService>) -> Self {
        Self { store, bus, task_service }
    }

    /// Run the full card-move trigger. `actor` is the user who moved the card,
    /// used as the task's `assigned_to` fallback when the card has no assignee.
    pub async fn maybe_trigger_on_move(&self, card_id: Uuid, column_id: Uuid, actor: Uuid) -> Result<AutomationOutcome> {
        let column = self.store.get_column(column_id).await?;
        let card = self.store.get_card(card_id).await?;
        self.trigger_for(&card, &column, actor).await
    }

    async fn trigger_for(&self, card: &Card, column: &Column, actor: Uuid) -> Result<AutomationOutcome> {
        if !column.automation.auto_run || column.automation.agent_type.as_deref().unwrap_or("").is_empty() {
            return Ok(AutomationOutcome::NotTriggered);
        }

        let loop_count = self.store.terminal_task_count(card.id, column.id).await?;
        if loop_count >= column.automation.max_loop_count {
            self.store.set_card_agent_status(card.id, CardAgentStatus::None, Utc::now()).await?;
            return Ok(AutomationOutcome::NotTriggered);
        }

        let prompt = self.render_prompt(card, column).await?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: TaskKind::AgentRun,
            board_id: card.board_id,
            card_id: Some(card.id),
            created_by: actor,
            assigned_to: card.assignee_id.unwrap_or(actor),
            claimed_by_worker: None,
            status: TaskStatus::Pending,
            priority: card.priority,
            agent_type: column.automation.agent_type.clone(),
            agent_model: None,
            prompt_text: Some(prompt),
            payload: None,
            source_column_id: Some(column.id),
            target_column_id: column.automation.on_success_column_id,
            failure_column_id: column.automation.on_failure_column_id,
            loop_count,
            max_loop_count: column.automation.max_loop_count,
            error_summary: None,
            output_comment_id: None,
            created_at: now,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        let task_id = task.id;
        self.task_service.create(task).await?;
        self.store.set_card_agent_status(card.id, CardAgentStatus::Pending, now).await?;

        Ok(AutomationOutcome::Triggered(task_id))
    }

    async fn render_prompt(&self, card: &Card, column: &Column) -> Result<String> {
        let comments = self.store.list_comments(card.id).await?;
        let comments_text = comments
            .iter()
            .map(|c| format!("[{}] {}", c.created_at.to_rfc3339(), c.content))
            .collect::<Vec<_>>()
            .join("\n");
        let last_output = self
            .store
            .last_agent_output_comment(card.id)
            .await?
            .map(|c| c.content)
            .unwrap_or_default();

        // Board name isn't modeled as its own entity at this layer; the
        // board_id is the only handle the engine has, so it's rendered raw.
        let board_name = card.board_id.to_string();
        let vars = template::build_vars(card, column, &board_name, &comments_text, &last_output);

        let raw = column.automation.prompt_template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        Ok(template::render(raw, &vars))
    }

    /// Called after a task reaches a terminal outcome. Moves the card to the
    /// success or failure destination and, on success into an automated
    /// column, re-triggers — iteratively, not recursively, bounded by
    /// `max_loop_count` at each step.
    pub async fn on_terminal(&self, task: &Task, outcome: RoutingOutcome) -> Result<()> {
        let Some(card_id) = task.card_id else {
            return Ok(());
        };
        let Some(source_column_id) = task.source_column_id else {
            return Ok(());
        };

        let card = self.store.get_card(card_id).await?;
        if card.column_id != source_column_id {
            // Card moved out-of-band since this task started; don't hijack it.
            self.bus.publish(
                &Event::board_topic(task.board_id),
                Event::TaskRoutingSkipped {
                    task_id: task.id,
                    card_id,
                    reason: "card moved out of band before task terminated".into(),
                },
            );
            return Ok(());
        }

        let target = match outcome {
            RoutingOutcome::Success => task.target_column_id,
            RoutingOutcome::Failure => task.failure_column_id,
        };

        let Some(target_column_id) = target else {
            return Ok(());
        };

        let moved = self.store.move_card(card_id, source_column_id, target_column_id, Utc::now()).await?;
        if !moved {
            self.bus.publish(
                &Event::board_topic(task.board_id),
                Event::TaskRoutingSkipped {
                    task_id: task.id,
                    card_id,
                    reason: "card column changed concurrently with routing".into(),
                },
            );
            return Ok(());
        }
        self.bus.publish(
            &Event::board_topic(task.board_id),
            Event::CardMoved { card_id, from_column_id: source_column_id, to_column_id: target_column_id },
        );

        // Never auto-trigger on a failure destination — circuit breaker.
        if outcome == RoutingOutcome::Success {
            let target_column = self.store.get_column(target_column_id).await?;
            if target_column.automation.auto_run {
                let card = self.store.get_card(card_id).await?;
                self.trigger_for(&card, &target_column, task.assigned_to).await?;
            }
        }

        Ok(())
    }
}
