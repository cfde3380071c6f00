//! Remote key-value record service.
//!
//! Records carry opaque serialized fields plus a server-assigned change tag
//! used for conditional writes.

mod deadline;
mod http;
mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SyncError;
use crate::BoxFuture;

pub use deadline::DeadlineRemote;
pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record changed since it was fetched")]
    Conflict,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(id) => SyncError::not_found(id),
            RemoteError::Conflict => SyncError::Conflict,
            RemoteError::RateLimited { retry_after } => SyncError::RateLimited { retry_after },
            RemoteError::Transient(msg) => SyncError::RemoteTransient(msg),
            RemoteError::Timeout(deadline) => SyncError::Timeout(deadline),
            RemoteError::Other(msg) => SyncError::Remote(msg),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_tag: Option<String>,
}

impl RemoteRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Unconditional write.
    Overwrite,
    /// Fails with [`RemoteError::Conflict`] unless the server's change tag still
    /// equals the record's. A record without a tag may only be created.
    IfUnchanged,
}

pub trait RemoteStore: Send + Sync {
    /// `Ok(None)` when the record does not exist.
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, RemoteResult<Option<RemoteRecord>>>;

    /// Returns the stored record with its new change tag.
    fn save(&self, record: RemoteRecord, mode: SaveMode) -> BoxFuture<'_, RemoteResult<RemoteRecord>>;

    /// Registers this device for server-push change hints.
    fn register_for_changes(&self) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_maps_to_sync_error() {
        assert!(matches!(SyncError::from(RemoteError::Conflict), SyncError::Conflict));
        assert!(matches!(
            SyncError::from(RemoteError::NotFound("userData".into())),
            SyncError::NotFound { .. }
        ));
        assert!(SyncError::from(RemoteError::Transient("reset".into())).is_retryable());
        assert!(!SyncError::from(RemoteError::Other("HTTP 400".into())).is_retryable());
    }

    #[test]
    fn test_record_fields() {
        let mut record = RemoteRecord::new("userData");
        assert!(record.field("readItems").is_none());
        record.set_field("readItems", "[]");
        assert_eq!(record.field("readItems"), Some("[]"));
    }
}
