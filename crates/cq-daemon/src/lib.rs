//! Background daemon for the task dispatch core.
//!
//! Wires the Store, EventBus, WorkerRegistry, TaskService and
//! AutomationEngine together behind the `cq-server` HTTP router, and runs
//! the liveness sweeper and terminal-task TTL cleanup as background tasks.

pub mod daemon;
