use chrono::{DateTime, Utc};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    Synced,
    Syncing,
    Failed,
    Offline,
    /// Nothing has been confirmed remotely yet.
    #[default]
    Pending,
}

/// What a sync indicator needs to render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub pending_operations: usize,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub(crate) fn begin(&mut self) {
        self.pending_operations += 1;
        self.state = SyncState::Syncing;
    }

    pub(crate) fn succeed(&mut self) {
        self.pending_operations = self.pending_operations.saturating_sub(1);
        self.last_successful_sync = Some(Utc::now());
        self.last_error = None;
        if self.pending_operations == 0 {
            self.state = SyncState::Synced;
        }
    }

    pub(crate) fn fail(&mut self, err: &SyncError) {
        self.pending_operations = self.pending_operations.saturating_sub(1);
        self.last_error = Some(err.to_string());
        self.state = match err {
            SyncError::Timeout(_) | SyncError::RemoteTransient(_) | SyncError::Http(_) => {
                SyncState::Offline
            }
            _ => SyncState::Failed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Pending);

        status.begin();
        status.begin();
        assert_eq!(status.state, SyncState::Syncing);
        status.succeed();
        assert_eq!(status.state, SyncState::Syncing);
        status.succeed();
        assert_eq!(status.state, SyncState::Synced);
        assert!(status.last_successful_sync.is_some());

        status.begin();
        status.fail(&SyncError::RemoteTransient("offline".into()));
        assert_eq!(status.state, SyncState::Offline);
        assert_eq!(status.pending_operations, 0);

        status.begin();
        status.fail(&SyncError::Conflict);
        assert_eq!(status.state, SyncState::Failed);
        assert!(status.last_error.is_some());
    }
}
