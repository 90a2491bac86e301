//! Conversions between the internal domain model and the wire DTOs in
//! `cq-api-types`.

use cq_api_types::TaskDto;
use cq_core::types::{Task, TaskKind, TaskStatus};

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Claimed => "claimed",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn kind_str(kind: TaskKind) -> &'static str {
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

pub fn task_to_dto(task: &Task) -> TaskDto {
    TaskDto {
        id: task.id,
        task_type: kind_str(task.task_type).to_string(),
        board_id: task.board_id,
        card_id: task.card_id,
        status: status_str(task.status).to_string(),
        priority: task.priority,
        agent_type: task.agent_type.clone(),
        agent_model: task.agent_model.clone(),
        prompt_text: task.prompt_text.clone(),
        payload: task.payload.clone(),
        claimed_by_worker: task.claimed_by_worker,
        loop_count: task.loop_count,
        max_loop_count: task.max_loop_count,
        created_at: task.created_at,
        updated_at: task.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn round_trips_status_and_kind_as_snake_case() {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: TaskKind::JiraImport,
            board_id: Uuid::new_v4(),
            card_id: None,
            created_by: Uuid::new_v4(),
            assigned_to: Uuid::new_v4(),
            claimed_by_worker: None,
            status: TaskStatus::Running,
            priority: 0,
            agent_type: None,
            agent_model: None,
            prompt_text: None,
            payload: Some("{}".into()),
            source_column_id: None,
            target_column_id: None,
            failure_column_id: None,
            loop_count: 0,
            max_loop_count: 1,
            error_summary: None,
            output_comment_id: None,
            created_at: now,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        let dto = task_to_dto(&task);
        assert_eq!(dto.task_type, "jira_import");
        assert_eq!(dto.status, "running");
    }
}
