use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum CicdError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,

    #[error("failure record not found: run {0}")]
    FailureNotFound(u64),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Core(#[from] specweave_core::SpecweaveError),
}

pub type Result<T> = std::result::Result<T, CicdError>;
