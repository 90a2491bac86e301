//! Error taxonomy for the task service and automation engine — a thin
//! re-export of `cq_core::error::CoreError`, the only error shape these
//! services produce.

pub use cq_core::error::CoreError as AutomationError;

pub type Result<T> = std::result::Result<T, AutomationError>;
