//! Fire-and-forget change notifications.
//!
//! Delivery is at most once per publish and nothing is queued for slow
//! subscribers beyond the channel capacity, so handlers should re-read
//! authoritative state instead of trusting the event.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::sync::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ReadItemsChanged,
    BookmarksChanged,
    HeartsChanged,
    FoldersChanged,
    FeedsChanged,
    /// A server-push hint arrived and a reconciliation pull ran.
    RemoteChanged,
    KeyChanged(String),
}

impl SyncEvent {
    pub fn for_key(key: &str) -> Self {
        match key {
            keys::READ_ITEMS => Self::ReadItemsChanged,
            keys::BOOKMARKED_ITEMS => Self::BookmarksChanged,
            keys::HEARTED_ITEMS => Self::HeartsChanged,
            keys::FEED_FOLDERS => Self::FoldersChanged,
            keys::RSS_FEEDS => Self::FeedsChanged,
            other => Self::KeyChanged(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ReadItemsChanged => "readItemsChanged",
            Self::BookmarksChanged => "bookmarksChanged",
            Self::HeartsChanged => "heartsChanged",
            Self::FoldersChanged => "foldersChanged",
            Self::FeedsChanged => "feedsChanged",
            Self::RemoteChanged => "remoteChanged",
            Self::KeyChanged(key) => key,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SyncEvent) {
        tracing::debug!("Publishing {}", event.name());
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Runs `handler` for every event named `name` until the bus is dropped.
    pub fn subscribe_to<F>(&self, name: &str, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.name() == name => handler(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("{} subscriber skipped {} events", name, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
