//! Error types shared by connectors, the backup manager and the runner.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GsbtError {
    /// Invalid or incomplete configuration (missing remote path, unknown
    /// connector type, no authentication method). Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport dial, TLS negotiation or login failure.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    #[error("List error: {0}")]
    List(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("rate limited by Nitrado API (retry after: {retry_after})")]
    RateLimited { retry_after: String },

    #[error("Nitrado API error: {0}")]
    Api(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GsbtError {
    /// Wraps a failure from a blocking worker (poisoned lock, panicked task).
    pub fn worker(context: &str, err: impl std::fmt::Display) -> Self {
        GsbtError::Connection(format!("{}: {}", context, err))
    }
}

impl From<tokio::task::JoinError> for GsbtError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            GsbtError::Cancelled
        } else {
            GsbtError::worker("blocking task failed", err)
        }
    }
}

pub type Result<T> = std::result::Result<T, GsbtError>;
