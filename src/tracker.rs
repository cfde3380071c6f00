//! In-memory caches of link sets backed by the coordinator.
//!
//! Each mutation updates the cache first, fires a change event and then saves
//! the full set. Save errors are returned to the caller and never retried
//! here; retries belong to the policy under the coordinator.
//!
//! Merging is a union, so a link removed here comes back if another replica
//! still holds it.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::link::normalize_link;
use crate::models::ReadHistory;
use crate::sync::keys::{BOOKMARKED_ITEMS, HEARTED_ITEMS, READ_HISTORY, READ_ITEMS};
use crate::sync::SyncCoordinator;

pub struct LinkSetTracker {
    coordinator: Arc<SyncCoordinator>,
    key: &'static str,
    links: RwLock<HashSet<String>>,
}

impl LinkSetTracker {
    pub async fn load(coordinator: Arc<SyncCoordinator>, key: &'static str) -> Result<Self> {
        let stored: Vec<String> = coordinator.load(key).await?;
        let links = stored.iter().map(|l| normalize_link(l)).collect();
        Ok(Self {
            coordinator,
            key,
            links: RwLock::new(links),
        })
    }

    pub async fn bookmarks(coordinator: Arc<SyncCoordinator>) -> Result<Self> {
        Self::load(coordinator, BOOKMARKED_ITEMS).await
    }

    pub async fn hearts(coordinator: Arc<SyncCoordinator>) -> Result<Self> {
        Self::load(coordinator, HEARTED_ITEMS).await
    }

    pub fn key(&self) -> &str {
        self.key
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.links.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.links.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, link: &str) -> bool {
        self.read().contains(&normalize_link(link))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn links(&self) -> BTreeSet<String> {
        self.read().iter().cloned().collect()
    }

    pub async fn insert(&self, link: &str) -> Result<()> {
        self.insert_many([link]).await
    }

    pub async fn insert_many<I, S>(&self, links: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut set = self.write();
            set.extend(links.into_iter().map(|l| normalize_link(l.as_ref())));
        }
        self.changed().await
    }

    pub async fn remove(&self, link: &str) -> Result<()> {
        self.write().remove(&normalize_link(link));
        self.changed().await
    }

    pub async fn reset(&self) -> Result<()> {
        self.write().clear();
        self.changed().await
    }

    /// Re-reads the authoritative set, e.g. after a change notification.
    pub async fn reload(&self) -> Result<()> {
        let stored: Vec<String> = self.coordinator.load(self.key).await?;
        *self.write() = stored.iter().map(|l| normalize_link(l)).collect();
        Ok(())
    }

    async fn changed(&self) -> Result<()> {
        let snapshot = self.links();
        self.coordinator.events().publish(SyncEvent::for_key(self.key));
        self.coordinator.save(&snapshot, self.key).await
    }
}

/// Tracks which articles were read, plus when.
pub struct ReadStatusTracker {
    links: LinkSetTracker,
    history: Mutex<ReadHistory>,
}

impl ReadStatusTracker {
    pub async fn load(coordinator: Arc<SyncCoordinator>) -> Result<Self> {
        let history = match coordinator.load_local::<ReadHistory>(READ_HISTORY).await {
            Ok(history) => history,
            Err(SyncError::NotFound { .. }) => ReadHistory::default(),
            Err(e) => {
                tracing::warn!("Starting with empty read history: {}", e);
                ReadHistory::default()
            }
        };
        let links = LinkSetTracker::load(coordinator, READ_ITEMS).await?;

        Ok(Self {
            links,
            history: Mutex::new(history),
        })
    }

    fn history(&self) -> MutexGuard<'_, ReadHistory> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_read(&self, link: &str) -> bool {
        self.links.contains(link)
    }

    pub fn read_count(&self) -> usize {
        self.links.len()
    }

    pub fn read_links(&self) -> BTreeSet<String> {
        self.links.links()
    }

    pub fn read_at(&self, link: &str) -> Option<chrono::DateTime<Utc>> {
        self.history().read_at(link)
    }

    pub async fn mark_read(&self, link: &str) -> Result<()> {
        self.mark_many_read([link]).await
    }

    pub async fn mark_many_read<I, S>(&self, links: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let links: Vec<String> = links.into_iter().map(|l| l.as_ref().to_string()).collect();
        self.record_history(&links);
        let result = self.links.insert_many(&links).await;
        self.persist_history().await;
        result
    }

    /// Marks every link of the current article list as read.
    pub async fn mark_all_as_read<I, S>(&self, all_links: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mark_many_read(all_links).await
    }

    pub async fn mark_unread(&self, link: &str) -> Result<()> {
        self.links.remove(link).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.history().clear();
        let result = self.links.reset().await;
        self.persist_history().await;
        result
    }

    pub async fn reload(&self) -> Result<()> {
        self.links.reload().await
    }

    fn record_history(&self, links: &[String]) {
        let now = Utc::now();
        let mut history = self.history();
        for link in links {
            history.record(link, now);
        }
        let pruned = history.prune(now);
        if pruned > 0 {
            tracing::debug!("Pruned {} read history entries", pruned);
        }
    }

    async fn persist_history(&self) {
        let snapshot = self.history().clone();
        if let Err(e) = self.links.coordinator.save_local(&snapshot, READ_HISTORY).await {
            tracing::warn!("Failed to persist read history: {}", e);
        }
    }
}
