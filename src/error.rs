use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to parse feed: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed {url} answered with HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("Article not retrievable: {0}")]
    NotRetrievable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unrecognized source: {0}")]
    UnrecognizedSource(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Found {count} stored entities for key {key:?}")]
    DuplicateEntity { key: String, count: usize },

    #[error("Timed out waiting for lock {0}")]
    LockTimeout(String),

    #[error("Lease on lock {0} expired before the write")]
    LockLost(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the failed job may succeed when the scheduler runs it again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Http(_)
            | AppError::Io(_)
            | AppError::LockTimeout(_)
            | AppError::LockLost(_) => true,
            AppError::FetchStatus { status, .. } => *status >= 500 || *status == 429,
            AppError::Sqlite(e) => is_busy(e),
            AppError::Database(tokio_rusqlite::Error::Rusqlite(e)) => is_busy(e),
            AppError::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
            _ => false,
        }
    }

    /// Whether the article page was simply missing (HTTP 404 and alike).
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::NotFound(_) => true,
            AppError::NotRetrievable(msg) => msg.contains("404"),
            AppError::Http(e) => e.status().is_some_and(|s| s.as_u16() == 404),
            _ => false,
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub type Result<T> = std::result::Result<T, AppError>;
