use std::sync::Arc;
use std::time::Duration;

use crate::BoxFuture;

use super::{RemoteError, RemoteRecord, RemoteResult, RemoteStore, SaveMode};

/// Bounds every call on the wrapped store by a fixed deadline.
///
/// A caller that times out stops waiting; the inner call is dropped but any
/// request already on the wire may still land server-side.
pub struct DeadlineRemote {
    inner: Arc<dyn RemoteStore>,
    deadline: Duration,
}

impl DeadlineRemote {
    pub fn new(inner: Arc<dyn RemoteStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

impl RemoteStore for DeadlineRemote {
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, RemoteResult<Option<RemoteRecord>>> {
        Box::pin(async move {
            tokio::time::timeout(self.deadline, self.inner.fetch(record_id))
                .await
                .map_err(|_| RemoteError::Timeout(self.deadline))?
        })
    }

    fn save(&self, record: RemoteRecord, mode: SaveMode) -> BoxFuture<'_, RemoteResult<RemoteRecord>> {
        Box::pin(async move {
            tokio::time::timeout(self.deadline, self.inner.save(record, mode))
                .await
                .map_err(|_| RemoteError::Timeout(self.deadline))?
        })
    }

    fn register_for_changes(&self) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            tokio::time::timeout(self.deadline, self.inner.register_for_changes())
                .await
                .map_err(|_| RemoteError::Timeout(self.deadline))?
        })
    }
}
