//! Poll/claim loop, heartbeat loop, and executor dispatch for a single
//! worker process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cq_api_types::{HeartbeatRequest, RegisterRequest, TaskDto};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use cq_harness::shutdown::ShutdownSignal;

use crate::client::{ClientError, WorkerClient};
use crate::executor::{run_agent, ExecOutcome};
use crate::integrations::run_integration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub hostname: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: u32,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub agent_cli: String,
}

struct RunningTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

pub struct WorkerRuntime {
    client: Arc<WorkerClient>,
    worker_id: Uuid,
    config: WorkerConfig,
    running: Arc<Mutex<HashMap<Uuid, RunningTask>>>,
}

impl WorkerRuntime {
    /// Register with the server and obtain a `worker_id`.
    pub async fn bootstrap(client: WorkerClient, config: WorkerConfig) -> std::result::Result<Self, ClientError> {
        let client = Arc::new(client);
        let resp = client
            .register(RegisterRequest {
                hostname: config.hostname.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                capabilities: config.capabilities.clone(),
                max_concurrent_tasks: config.max_concurrent_tasks,
            })
            .await?;

        info!(worker_id = %resp.worker_id, "registered with server");
        Ok(Self {
            client,
            worker_id: resp.worker_id,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Run the heartbeat and poll loops until `shutdown` fires, then cancel
    /// in-flight executions and report them as failed before returning.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        let heartbeat = self.heartbeat_loop(shutdown.clone());
        let poll = self.poll_loop(shutdown.clone());

        tokio::select! {
            _ = heartbeat => {}
            _ = poll => {}
        }

        self.drain_on_shutdown().await;
        Ok(())
    }

    async fn heartbeat_loop(&self, shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let running_task_ids: Vec<Uuid> = self.running.lock().await.keys().copied().collect();
                    let load = running_task_ids.len() as f32 / self.config.max_concurrent_tasks.max(1) as f32;
                    match self.client.heartbeat(HeartbeatRequest {
                        worker_id: self.worker_id,
                        running_task_ids,
                        load,
                    }).await {
                        Ok(resp) => {
                            for task_id in resp.cancel_task_ids {
                                if let Some(running) = self.running.lock().await.get_mut(&task_id) {
                                    if let Some(tx) = running.cancel.take() {
                                        let _ = tx.send(());
                                    }
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "heartbeat failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("heartbeat loop stopping");
                    break;
                }
            }
        }
    }

    async fn poll_loop(&self, shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let running = self.running.lock().await.len() as u32;
                    let capacity = self.config.max_concurrent_tasks.saturating_sub(running);
                    if capacity == 0 {
                        continue;
                    }
                    match self.client.poll(self.worker_id, capacity).await {
                        Ok(resp) => {
                            for task in resp.tasks {
                                self.try_claim_and_execute(task).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "poll failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("poll loop stopping, no further tasks will be claimed");
                    break;
                }
            }
        }
    }

    async fn try_claim_and_execute(&self, task: TaskDto) {
        let task_id = task.id;
        let claimed = match self.client.claim(task_id, self.worker_id).await {
            Ok(t) => t,
            Err(e) => {
                info!(task_id = %task_id, error = %e, "claim lost to another worker or rejected, skipping");
                return;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();

        let client = self.client.clone();
        let running = self.running.clone();
        let worker_id = self.worker_id;
        let agent_cli = self.config.agent_cli.clone();

        let handle = tokio::spawn(async move {
            let outcome = execute(&client, &agent_cli, &claimed, worker_id, cancel_rx).await;
            running.lock().await.remove(&task_id);
            report(&client, task_id, worker_id, outcome).await;
        });

        self.running.lock().await.insert(task_id, RunningTask { cancel: Some(cancel_tx), handle });
    }

    /// Cancel every in-flight execution, wait for each to unwind, and
    /// report `worker shutdown` as the failure reason.
    async fn drain_on_shutdown(&self) {
        let tasks: Vec<(Uuid, RunningTask)> = self.running.lock().await.drain().collect();
        for (task_id, mut running) in tasks {
            if let Some(tx) = running.cancel.take() {
                let _ = tx.send(());
            }
            let _ = tokio::time::timeout(Duration::from_secs(10), running.handle).await;
            if let Err(e) = self
                .client
                .fail(task_id, self.worker_id, "worker shutdown".to_string(), None)
                .await
            {
                warn!(task_id = %task_id, error = %e, "failed to report shutdown cancellation");
            }
        }
    }
}

enum Outcome {
    Completed(String),
    Failed { error_summary: String, output_text: Option<String> },
    Cancelled,
}

async fn execute(
    client: &Arc<WorkerClient>,
    agent_cli: &str,
    task: &TaskDto,
    worker_id: Uuid,
    cancel_rx: oneshot::Receiver<()>,
) -> Outcome {
    if task.task_type == "agent_run" {
        let prompt = task.prompt_text.clone().unwrap_or_default();
        let client_for_progress = client.clone();
        let task_id = task.id;
        let result = run_agent(
            agent_cli,
            &prompt,
            move |line| {
                let client = client_for_progress.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.progress(task_id, worker_id, line).await {
                        warn!(task_id = %task_id, error = %e, "failed to report progress");
                    }
                });
            },
            cancel_rx,
        )
        .await;

        match result {
            Ok(ExecOutcome::Completed { output_text }) => Outcome::Completed(output_text),
            Ok(ExecOutcome::Failed { error_summary, output_text }) => Outcome::Failed { error_summary, output_text },
            Ok(ExecOutcome::Cancelled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed { error_summary: e.to_string(), output_text: None },
        }
    } else {
        match run_integration(task).await {
            Ok(outcome) => Outcome::Completed(outcome.output_text),
            Err(e) => Outcome::Failed { error_summary: e.to_string(), output_text: None },
        }
    }
}

async fn report(client: &Arc<WorkerClient>, task_id: Uuid, worker_id: Uuid, outcome: Outcome) {
    let result = match outcome {
        Outcome::Completed(output_text) => client.complete(task_id, worker_id, output_text).await.map(|_| ()),
        Outcome::Failed { error_summary, output_text } => {
            client.fail(task_id, worker_id, error_summary, output_text).await.map(|_| ())
        }
        // Cancellation is cooperative: the server already marked the task
        // cancelled when it told us to via heartbeat. Nothing to report.
        Outcome::Cancelled => return,
    };
    if let Err(e) = result {
        error!(task_id = %task_id, error = %e, "failed to report task outcome");
    }
}
