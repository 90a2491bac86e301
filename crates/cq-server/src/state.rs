//! Shared application state for all HTTP handlers.

use std::sync::Arc;

use cq_automation::registry::WorkerRegistry;
use cq_automation::TaskCoordinator;
use cq_core::config::Config;
use cq_core::store::Store;
use cq_harness::rate_limiter::{RateLimitConfig, RateLimiter};

use crate::event_bus::EventBus;

pub struct ApiState {
    pub store: Arc<Store>,
    pub bus: EventBus,
    pub registry: Arc<WorkerRegistry>,
    pub coordinator: Arc<TaskCoordinator>,
    /// One token per worker, per second — enforces the poll endpoint's
    /// 1 request/second/worker ceiling.
    pub poll_limiter: RateLimiter,
    pub config: Arc<Config>,
}

impl ApiState {
    pub fn new(
        store: Arc<Store>,
        bus: EventBus,
        registry: Arc<WorkerRegistry>,
        coordinator: Arc<TaskCoordinator>,
        config: Arc<Config>,
    ) -> Self {
        let poll_limiter = RateLimiter::new(RateLimitConfig::per_second(
            config.worker_protocol.poll_rate_per_second,
        ));
        Self {
            store,
            bus,
            registry,
            coordinator,
            poll_limiter,
            config,
        }
    }
}
