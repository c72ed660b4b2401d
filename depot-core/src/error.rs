use thiserror::Error;

/// Common result type for core operations.
pub type Result<T> = std::result::Result<T, DepotError>;

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("invalid artifact name: {0}")]
    InvalidName(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}
