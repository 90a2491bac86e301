//! Shared wire-format DTOs for the Worker Protocol HTTP surface — used by
//! both `cq-server`'s handlers and `cq-worker`'s HTTP client so request and
//! response shapes can't drift between the two ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

fn default_max_concurrent_tasks() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: Uuid,
    #[serde(default)]
    pub running_task_ids: Vec<Uuid>,
    #[serde(default)]
    pub load: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub cancel_task_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollQuery {
    pub worker_id: Uuid,
    #[serde(default = "default_poll_limit")]
    pub limit: u32,
}

fn default_poll_limit() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub tasks: Vec<TaskDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub worker_id: Uuid,
    pub progress: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: Uuid,
    pub output_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRequest {
    pub worker_id: Uuid,
    pub error_summary: String,
    #[serde(default)]
    pub output_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: Uuid,
    pub task_type: String,
    pub board_id: Uuid,
    pub card_id: Option<Uuid>,
    pub status: String,
    pub priority: i32,
    pub agent_type: Option<String>,
    pub agent_model: Option<String>,
    pub prompt_text: Option<String>,
    pub payload: Option<String>,
    pub claimed_by_worker: Option<Uuid>,
    pub loop_count: u32,
    pub max_loop_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
