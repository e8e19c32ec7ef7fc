use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecweaveError {
    #[error("lock {path} not acquired within {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("GitHub token is required: set GITHUB_TOKEN or cicd.github.token")]
    MissingToken,

    #[error(
        "GitHub repository is required: set GITHUB_OWNER and GITHUB_REPO \
         or cicd.github.owner and cicd.github.repo"
    )]
    MissingRepository,

    #[error("poll interval {0}ms is below the 10000ms minimum")]
    PollIntervalTooLow(u64),

    #[error("at least one notification channel is required")]
    NoChannels,

    #[error("unknown notification channel '{0}': expected console, file or webhook")]
    UnknownChannel(String),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpecweaveError {
    /// True for errors raised while resolving or validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SpecweaveError::MissingToken
                | SpecweaveError::MissingRepository
                | SpecweaveError::PollIntervalTooLow(_)
                | SpecweaveError::NoChannels
                | SpecweaveError::UnknownChannel(_)
                | SpecweaveError::InvalidEnv { .. }
                | SpecweaveError::ConfigParse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SpecweaveError>;
