use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the sync engine.
///
/// | Variant | Retryable | Notes |
/// |---------|-----------|-------|
/// | `NotFound` | No | Empty default for collection keys, surfaced otherwise |
/// | `Decode` | No | Self-healed for the allow-listed set keys |
/// | `Encode` | No | Caller bug |
/// | `RemoteTransient` / `RateLimited` / `Timeout` | Yes | Absorbed by the retry policy |
/// | `Conflict` | Yes | Change tag moved under us |
/// | `MaxRetriesExceeded` | No | Terminal, budget spent |
/// | `ChunkIncomplete` | No | Whole reconstruction discarded |
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Failed to decode value for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Remote store error: {0}")]
    RemoteTransient(String),

    #[error("Remote store rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Record changed on the server")]
    Conflict,

    #[error("Remote store rejected request: {0}")]
    Remote(String),

    #[error("Max retries exceeded for {record_id} after {attempts} attempts")]
    MaxRetriesExceeded { record_id: String, attempts: usize },

    #[error("Chunked transfer of {key} incomplete, failed chunks: {failed:?}")]
    ChunkIncomplete { key: String, failed: Vec<usize> },

    #[error("Remote sync is not configured")]
    RemoteUnavailable,

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn decode(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            key: key.into(),
            source,
        }
    }

    pub fn encode(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Encode {
            key: key.into(),
            source,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Whether the retry policy may absorb this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteTransient(_) | Self::RateLimited { .. } | Self::Timeout(_) | Self::Conflict
        )
    }
}
