//! Crate-wide error taxonomy shared by the store and domain services.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for CoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}
