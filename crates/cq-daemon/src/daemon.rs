use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};

use cq_automation::registry::WorkerRegistry;
use cq_automation::task_service::TaskService;
use cq_automation::{AutomationEngine, TaskCoordinator};
use cq_core::config::Config;
use cq_core::store::{RetryPolicy, Store};
use cq_core::types::EventPublisher;
use cq_harness::shutdown::ShutdownSignal;
use cq_server::event_bus::EventBus;
use cq_server::{api_router, ApiState};

/// The standalone server process.
///
/// Owns the store, event bus, and task-dispatch services, and runs the
/// HTTP API plus the background liveness sweeper and TTL cleanup loop
/// until shutdown is triggered.
pub struct Daemon {
    config: Config,
    state: Arc<ApiState>,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Open the store (creating the sqlite file if needed) and wire the
    /// task-dispatch services.
    pub async fn new(config: Config) -> Result<Self> {
        let retry = RetryPolicy {
            max_retries: config.store.max_retries,
            base_delay: Duration::from_millis(config.store.base_delay_ms),
            max_delay: Duration::from_millis(config.store.max_delay_ms),
        };
        let store = Arc::new(
            Store::open(&config.store.sqlite_path, retry)
                .await
                .context("failed to open store")?,
        );

        let bus = EventBus::new(config.eventbus.subscriber_queue_capacity);
        let bus_dyn: Arc<dyn EventPublisher> = Arc::new(bus.clone());

        let task_service = Arc::new(TaskService::new(store.clone(), bus_dyn.clone()));
        let automation = Arc::new(AutomationEngine::new(
            store.clone(),
            bus_dyn.clone(),
            task_service.clone(),
        ));
        let coordinator = Arc::new(TaskCoordinator::new(task_service, automation));
        let registry = Arc::new(
            WorkerRegistry::new(store.clone(), bus_dyn)
                .with_thresholds(config.registry.stale_after_secs as i64, config.registry.offline_after_secs as i64),
        );

        let state = Arc::new(ApiState::new(
            store,
            bus,
            registry,
            coordinator,
            Arc::new(config.clone()),
        ));

        Ok(Self {
            config,
            state,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api_state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// Run the HTTP server on a pre-bound listener, and the sweeper/TTL
    /// loops inline, until shutdown is triggered.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let router = api_router(self.state.clone());
        let bind_addr = listener.local_addr()?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let api_handle = tokio::spawn(async move {
            let server = axum::serve(listener, router);
            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "API server error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("API server shutting down");
                }
            }
        });
        info!(%bind_addr, "API server listening");

        self.spawn_background_loops();

        let _ = api_handle.await;
        info!("daemon stopped");
        Ok(())
    }

    fn spawn_background_loops(&self) {
        let sweep_tick = Duration::from_secs(self.config.registry.sweep_interval_secs);
        tokio::spawn(
            self.state
                .registry
                .clone()
                .run_sweeper(self.state.coordinator.clone(), sweep_tick, self.shutdown.clone()),
        );

        let ttl_secs = self.config.store.retention_ttl_secs;
        if ttl_secs > 0 {
            let store = self.state.store.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                run_ttl_cleanup(store, ttl_secs, shutdown).await;
            });
        }
    }
}

async fn run_ttl_cleanup(store: Arc<Store>, ttl_secs: u64, shutdown: ShutdownSignal) {
    let mut interval = tokio::time::interval(Duration::from_secs(ttl_secs.min(3600).max(60)));
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let cutoff = Utc::now() - chrono::Duration::seconds(ttl_secs as i64);
                match store.purge_terminal_tasks_older_than(cutoff).await {
                    Ok(purged) if purged > 0 => info!(purged, "purged expired terminal tasks"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "terminal task purge failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("ttl cleanup loop shutting down");
                break;
            }
        }
    }
}
