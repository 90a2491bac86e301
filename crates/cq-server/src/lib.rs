//! HTTP edge for the task dispatch core.
//!
//! Exposes the Worker Protocol (register, heartbeat, poll, claim, progress,
//! complete, fail), the board-facing task list/cancel endpoints, and the
//! long-lived event stream, all backed by [`cq_core::store::Store`] and
//! routed through [`cq_automation`]'s task service, automation engine, and
//! worker registry.
//!
//! Key modules:
//! - [`router`] — the assembled Axum router
//! - [`state`] — shared `ApiState`
//! - [`event_bus`] — pub/sub fan-out to stream subscribers
//! - [`auth`] — bearer-token user extraction
//! - [`workers`] / [`tasks`] / [`stream`] — handlers

pub mod api_error;
pub mod auth;
pub mod dto;
pub mod event_bus;
pub mod router;
pub mod state;
pub mod stream;
pub mod tasks;
pub mod workers;

pub use router::api_router;
pub use state::ApiState;
