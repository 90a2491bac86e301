//! Worker registration, heartbeat ingestion, and the liveness sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cq_core::error::CoreError;
use cq_core::store::Store;
use cq_core::types::{Event, EventPublisher, TaskStatus, Worker, WorkerLivenessState};
use cq_harness::shutdown::ShutdownSignal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::TaskCoordinator;
use crate::error::Result;

/// Heartbeat age thresholds (spec-level constants, not tunables).
pub const STALE_AFTER_SECS: i64 = 90;
pub const OFFLINE_AFTER_SECS: i64 = 300;

pub struct WorkerRegistry {
    store: Arc<Store>,
    bus: Arc<dyn EventPublisher>,
    stale_after_secs: i64,
    offline_after_secs: i64,
}

impl WorkerRegistry {
    pub fn new(store: Arc<Store>, bus: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            bus,
            stale_after_secs: STALE_AFTER_SECS,
            offline_after_secs: OFFLINE_AFTER_SECS,
        }
    }

    pub fn with_thresholds(mut self, stale_after_secs: i64, offline_after_secs: i64) -> Self {
        self.stale_after_secs = stale_after_secs;
        self.offline_after_secs = offline_after_secs;
        self
    }

    /// Register (or re-register) a worker. Upserts by `user_id`; re-registering
    /// the same user never creates a second row. Publishes `worker_online` on
    /// first transition from a non-online state.
    pub async fn register(
        &self,
        user_id: Uuid,
        hostname: String,
        version: String,
        capabilities: Vec<String>,
        max_concurrent_tasks: u32,
    ) -> Result<Worker> {
        let now = Utc::now();
        let was_online = matches!(
            self.store.get_worker_by_user(user_id).await,
            Ok(w) if w.liveness == WorkerLivenessState::Online
        );

        let worker = Worker {
            id: Uuid::new_v4(),
            user_id,
            hostname,
            version,
            capabilities,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            liveness: WorkerLivenessState::Online,
            registered_at: now,
            last_heartbeat_at: now,
        };
        let worker = self.store.register_worker(worker).await?;

        if !was_online {
            self.bus.publish(Event::GLOBAL_TOPIC, Event::WorkerOnline { worker_id: worker.id });
        }
        Ok(worker)
    }

    /// Ingest a heartbeat. Returns the subset of `running_task_ids` that the
    /// server has since marked `cancelled` — the worker must kill those locally.
    pub async fn heartbeat(&self, worker_id: Uuid, running_task_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let updated = self.store.heartbeat_worker(worker_id, Utc::now()).await?;
        if !updated {
            return Err(CoreError::NotFound(format!("worker {worker_id}")));
        }

        let mut cancel_ids = Vec::new();
        for &task_id in running_task_ids {
            if let Ok(task) = self.store.get_task(task_id).await {
                if task.status == TaskStatus::Cancelled {
                    cancel_ids.push(task_id);
                }
            }
        }
        Ok(cancel_ids)
    }

    /// Run the liveness sweeper until shutdown is triggered. Intended to be
    /// spawned as a background task by the daemon.
    pub async fn run_sweeper(
        self: Arc<Self>,
        coordinator: Arc<TaskCoordinator>,
        tick: Duration,
        shutdown: ShutdownSignal,
    ) {
        let mut interval = tokio::time::interval(tick);
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once(&coordinator).await {
                        warn!(error = %e, "liveness sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("worker liveness sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// One sweep pass: classify workers by heartbeat age and fail out tasks
    /// held by workers that just went offline.
    pub async fn sweep_once(&self, coordinator: &TaskCoordinator) -> Result<()> {
        let now = Utc::now();
        for worker in self.store.list_workers().await? {
            let age = (now - worker.last_heartbeat_at).num_seconds();
            match worker.liveness {
                WorkerLivenessState::Online if age > self.stale_after_secs => {
                    self.store.set_worker_liveness(worker.id, WorkerLivenessState::Stale).await?;
                    self.bus.publish(Event::GLOBAL_TOPIC, Event::WorkerStale { worker_id: worker.id });
                }
                WorkerLivenessState::Stale if age > self.offline_after_secs => {
                    self.store.set_worker_liveness(worker.id, WorkerLivenessState::Offline).await?;
                    self.bus.publish(Event::GLOBAL_TOPIC, Event::WorkerOffline { worker_id: worker.id });

                    for task in self.store.tasks_held_by(worker.id).await? {
                        coordinator.fail_offline(task.id).await?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_service::TaskService;
    use cq_core::store::RetryPolicy;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        events: Mutex<Vec<(String, Event)>>,
    }
    impl EventPublisher for RecordingBus {
        fn publish(&self, topic: &str, event: Event) {
            self.events.lock().unwrap().push((topic.to_string(), event));
        }
    }

    async fn harness() -> (Arc<Store>, Arc<RecordingBus>, WorkerRegistry) {
        let store = Arc::new(Store::open_in_memory(RetryPolicy::default()).await.unwrap());
        let bus = Arc::new(RecordingBus::default());
        let registry = WorkerRegistry::new(store.clone(), bus.clone() as Arc<dyn EventPublisher>);
        (store, bus, registry)
    }

    #[tokio::test]
    async fn reregistering_same_user_does_not_duplicate() {
        let (store, _bus, registry) = harness().await;
        let user_id = Uuid::new_v4();
        let first = registry.register(user_id, "box".into(), "1.0".into(), vec![], 1).await.unwrap();
        let second = registry.register(user_id, "box".into(), "1.1".into(), vec![], 2).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_workers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_publishes_worker_online_once() {
        let (_store, bus, registry) = harness().await;
        let user_id = Uuid::new_v4();
        registry.register(user_id, "box".into(), "1.0".into(), vec![], 1).await.unwrap();
        registry.register(user_id, "box".into(), "1.0".into(), vec![], 1).await.unwrap();
        let events = bus.events.lock().unwrap();
        let online_count = events.iter().filter(|(_, e)| matches!(e, Event::WorkerOnline { .. })).count();
        assert_eq!(online_count, 1);
    }

    #[tokio::test]
    async fn sweep_transitions_stale_then_offline() {
        let (store, bus, registry) = harness().await;
        let user_id = Uuid::new_v4();
        let worker = registry.register(user_id, "box".into(), "1.0".into(), vec![], 1).await.unwrap();

        // Force an old heartbeat directly, bypassing the public API.
        let old = Utc::now() - chrono::Duration::seconds(100);
        store.heartbeat_worker(worker.id, old).await.unwrap();

        let bus2: Arc<dyn EventPublisher> = bus.clone();
        let task_service = Arc::new(TaskService::new(store.clone(), bus2.clone()));
        let automation = Arc::new(crate::automation_engine::AutomationEngine::new(store.clone(), bus2, task_service.clone()));
        let coordinator = TaskCoordinator::new(task_service, automation);
        registry.sweep_once(&coordinator).await.unwrap();

        let w = store.get_worker(worker.id).await.unwrap();
        assert_eq!(w.liveness, WorkerLivenessState::Stale);
    }
}
