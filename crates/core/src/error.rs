use thiserror::Error;

pub type GrowthResult<T> = Result<T, GrowthError>;

#[derive(Error, Debug)]
pub enum GrowthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Message send error: {0}")]
    Send(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
