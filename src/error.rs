use std::path::PathBuf;

/// Error type for library operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("job {0:?} has no log URL")]
    MissingLog(String),
    #[error("invalid focus triple {0:?} (expected MxNxK)")]
    InvalidFocus(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("cannot read {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
