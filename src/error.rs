use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network failure or a non-2xx answer from the portal.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The portal answered but the body lacked something we rely on.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
