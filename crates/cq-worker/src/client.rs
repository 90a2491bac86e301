//! HTTP client for the Worker Protocol, using the same DTOs `cq-server`
//! deserializes on the other end.

use cq_api_types::{
    ClaimRequest, CompleteRequest, FailRequest, HeartbeatRequest, HeartbeatResponse, PollResponse,
    ProgressRequest, RegisterRequest, RegisterResponse, TaskDto,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("authentication rejected by server: {0}")]
    Unauthorized(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: reqwest::StatusCode, body: String },
    #[error("failed to parse response: {0}")]
    Decode(String),
}

type Result<T> = std::result::Result<T, ClientError>;

pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WorkerClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse> {
        self.post("/workers/register", &req).await
    }

    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse> {
        self.post("/workers/heartbeat", &req).await
    }

    pub async fn poll(&self, worker_id: Uuid, limit: u32) -> Result<PollResponse> {
        let url = format!("{}/workers/tasks/poll?worker_id={worker_id}&limit={limit}", self.base_url);
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        Self::parse(resp).await
    }

    pub async fn claim(&self, task_id: Uuid, worker_id: Uuid) -> Result<TaskDto> {
        self.post(&format!("/workers/tasks/{task_id}/claim"), &ClaimRequest { worker_id }).await
    }

    pub async fn progress(&self, task_id: Uuid, worker_id: Uuid, progress: String) -> Result<TaskDto> {
        self.post(&format!("/workers/tasks/{task_id}/progress"), &ProgressRequest { worker_id, progress }).await
    }

    pub async fn complete(&self, task_id: Uuid, worker_id: Uuid, output_text: String) -> Result<TaskDto> {
        self.post(&format!("/workers/tasks/{task_id}/complete"), &CompleteRequest { worker_id, output_text }).await
    }

    pub async fn fail(&self, task_id: Uuid, worker_id: Uuid, error_summary: String, output_text: Option<String>) -> Result<TaskDto> {
        self.post(&format!("/workers/tasks/{task_id}/fail"), &FailRequest { worker_id, error_summary, output_text }).await
    }

    async fn post<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(&self, path: &str, body: &Req) -> Result<Resp> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.http.post(url).bearer_auth(&self.token).json(body).send().await?;
        Self::parse(resp).await
    }

    async fn parse<Resp: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<Resp> {
        let status = resp.status();
        let text = resp.text().await?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized(text));
        }
        if !status.is_success() {
            return Err(ClientError::Server { status, body: text });
        }
        serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
    }
}
