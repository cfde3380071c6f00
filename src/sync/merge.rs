//! Replica merge rules.
//!
//! Every rule is a union, so merges commute and re-applying one is a no-op.

use std::collections::{BTreeSet, HashMap};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::link::normalize_link;
use crate::models::{FeedRecord, Folder};

use super::keys;

/// How two replicas of a logical key are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    StringSet,
    FolderList,
    FeedList,
    /// No merge; the local value is pushed as is.
    Opaque,
}

impl MergeKind {
    pub fn for_key(key: &str) -> Self {
        match key {
            keys::READ_ITEMS | keys::BOOKMARKED_ITEMS | keys::HEARTED_ITEMS => Self::StringSet,
            keys::FEED_FOLDERS => Self::FolderList,
            keys::RSS_FEEDS => Self::FeedList,
            _ => Self::Opaque,
        }
    }

    /// Collection keys read as empty when nothing is stored.
    pub fn is_collection(self) -> bool {
        self != Self::Opaque
    }
}

pub fn merge_link_sets<'a, L, R>(local: L, remote: R) -> BTreeSet<String>
where
    L: IntoIterator<Item = &'a String>,
    R: IntoIterator<Item = &'a String>,
{
    local
        .into_iter()
        .chain(remote)
        .map(|link| normalize_link(link))
        .collect()
}

/// Merges folder lists by id.
///
/// For an id on both sides the feed URLs are unioned and the remote name is
/// kept. Remote-only folders are inserted unchanged.
pub fn merge_folders(local: Vec<Folder>, remote: Vec<Folder>) -> Vec<Folder> {
    let mut merged = local;
    let mut by_id: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id.clone(), i))
        .collect();

    for folder in remote {
        match by_id.get(&folder.id) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.feed_urls = merge_link_sets(&existing.feed_urls, &folder.feed_urls);
                existing.name = folder.name;
            }
            None => {
                by_id.insert(folder.id.clone(), merged.len());
                merged.push(folder);
            }
        }
    }

    merged
}

/// Merges subscription lists by normalized URL, sorted by title.
///
/// When both sides carry the same feed the more recently updated record is
/// kept, the remote one on a tie.
pub fn merge_feed_lists(local: Vec<FeedRecord>, remote: Vec<FeedRecord>) -> Vec<FeedRecord> {
    let mut by_url: HashMap<String, FeedRecord> = HashMap::new();

    for feed in local.into_iter().chain(remote) {
        let url = normalize_link(&feed.url);
        match by_url.get(&url) {
            Some(existing) if existing.last_updated > feed.last_updated => {}
            _ => {
                by_url.insert(url, feed);
            }
        }
    }

    let mut merged: Vec<FeedRecord> = by_url.into_values().collect();
    merged.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.url.cmp(&b.url)));
    merged
}

fn typed<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|e| SyncError::decode(key, e))
}

fn untyped<T: Serialize>(key: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| SyncError::encode(key, e))
}

/// Merges two encoded replicas of `key` according to `kind`.
pub fn merge_values(kind: MergeKind, key: &str, local: &Value, remote: &Value) -> Result<Value> {
    match kind {
        MergeKind::StringSet => {
            let local: Vec<String> = typed(key, local)?;
            let remote: Vec<String> = typed(key, remote)?;
            untyped(key, &merge_link_sets(&local, &remote))
        }
        MergeKind::FolderList => {
            let local: Vec<Folder> = typed(key, local)?;
            let remote: Vec<Folder> = typed(key, remote)?;
            untyped(key, &merge_folders(local, remote))
        }
        MergeKind::FeedList => {
            let local: Vec<FeedRecord> = typed(key, local)?;
            let remote: Vec<FeedRecord> = typed(key, remote)?;
            untyped(key, &merge_feed_lists(local, remote))
        }
        MergeKind::Opaque => Ok(local.clone()),
    }
}
