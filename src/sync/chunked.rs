//! Splitting oversized collections across bounded remote records.
//!
//! The remote store can reject records as too large well below its advertised
//! ceiling, so large collections are written as a metadata record plus one
//! record per chunk:
//!
//! ```text
//! readItems_metadata   {totalItems, chunkCount, lastUpdated, deviceId}
//! readItems_chunk_0    {data, itemCount, chunkIndex, lastUpdated, deviceId}
//! readItems_chunk_1    ...
//! ```
//!
//! The metadata record is authoritative for how many chunks exist. Every chunk
//! carries the `lastUpdated` and `deviceId` of the save that wrote it, and a
//! load only accepts chunks stamped with the current metadata's pair. Chunks
//! left over from an interrupted or concurrent save fail the load instead of
//! being stitched in. Chunk records past `chunkCount` are never read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::models::{Chunk, ChunkMetadata};
use crate::remote::{RemoteRecord, RemoteStore, SaveMode};

use super::codec;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

pub fn metadata_record_id(key: &str) -> String {
    format!("{key}_metadata")
}

pub fn chunk_record_id(key: &str, index: usize) -> String {
    format!("{key}_chunk_{index}")
}

/// Stored in the shared record's field in place of a collection that was
/// written in chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChunkPointer {
    pub chunk_count: usize,
    pub chunked_at: DateTime<Utc>,
}

impl ChunkPointer {
    /// Collections encode as arrays, so only an object can be a pointer.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.trim_start().starts_with('{') {
            return None;
        }
        serde_json::from_str(text).ok()
    }
}

impl From<&ChunkMetadata> for ChunkPointer {
    fn from(metadata: &ChunkMetadata) -> Self {
        Self {
            chunk_count: metadata.chunk_count,
            chunked_at: metadata.last_updated,
        }
    }
}

pub struct ChunkedTransfer {
    remote: Arc<dyn RemoteStore>,
    device_id: String,
    chunk_size: usize,
    max_concurrent: Option<usize>,
}

impl ChunkedTransfer {
    pub fn new(remote: Arc<dyn RemoteStore>, device_id: impl Into<String>) -> Self {
        Self {
            remote,
            device_id: device_id.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Caps simultaneous chunk requests. Unbounded by default.
    pub fn with_max_concurrent(mut self, max_concurrent: Option<usize>) -> Self {
        self.max_concurrent = max_concurrent.map(|n| n.max(1));
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn concurrency(&self, chunk_count: usize) -> usize {
        self.max_concurrent.unwrap_or(chunk_count).max(1)
    }

    /// Writes `items` as metadata plus `ceil(len / chunk_size)` chunk records.
    ///
    /// Succeeds only when every chunk write succeeds. A failure leaves the
    /// collection in an unknown state and the whole save should be retried.
    pub async fn save_in_chunks<T>(&self, key: &str, items: &[T]) -> Result<ChunkMetadata>
    where
        T: Serialize + Clone,
    {
        let now = Utc::now();
        let chunks = Chunk::partition(items, self.chunk_size);
        let metadata = ChunkMetadata {
            total_items: items.len(),
            chunk_count: chunks.len(),
            last_updated: now,
            device_id: self.device_id.clone(),
        };

        self.remote
            .save(metadata_record(key, &metadata)?, SaveMode::Overwrite)
            .await?;

        let records = chunks
            .iter()
            .map(|chunk| chunk_record(key, chunk, now, &self.device_id))
            .collect::<Result<Vec<_>>>()?;

        let failed: Vec<usize> = stream::iter(records.into_iter().enumerate())
            .map(|(index, record)| async move {
                match self.remote.save(record, SaveMode::Overwrite).await {
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!("Chunk {} of {} failed: {}", index, key, e);
                        Some(index)
                    }
                }
            })
            .buffer_unordered(self.concurrency(metadata.chunk_count))
            .filter_map(|failed| async move { failed })
            .collect()
            .await;

        if !failed.is_empty() {
            let mut failed = failed;
            failed.sort_unstable();
            tracing::warn!("Chunked save of {} lost {} chunk writes", key, failed.len());
            return Err(SyncError::ChunkIncomplete {
                key: key.to_string(),
                failed,
            });
        }

        tracing::info!(
            "Saved {} items of {} in {} chunks",
            metadata.total_items,
            key,
            metadata.chunk_count
        );
        Ok(metadata)
    }

    pub async fn load_metadata(&self, key: &str) -> Result<Option<ChunkMetadata>> {
        let record_id = metadata_record_id(key);
        let Some(record) = self.remote.fetch(&record_id).await? else {
            return Ok(None);
        };

        let field = |name: &str| -> Result<serde_json::Value> {
            codec::decode_field(&record, name)?.ok_or_else(|| SyncError::not_found(format!("{record_id}.{name}")))
        };

        let metadata = serde_json::json!({
            "totalItems": field("totalItems")?,
            "chunkCount": field("chunkCount")?,
            "lastUpdated": field("lastUpdated")?,
            "deviceId": field("deviceId")?,
        });
        let metadata = ChunkMetadata::deserialize(&metadata)
            .map_err(|e| SyncError::decode(record_id.clone(), e))?;
        Ok(Some(metadata))
    }

    /// Reassembles a chunked collection in index order.
    ///
    /// No metadata means nothing was ever chunked and yields an empty list.
    /// If any chunk is missing or undecodable the whole load fails; a partial
    /// collection is never returned.
    pub async fn load_from_chunks<T>(&self, key: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let Some(metadata) = self.load_metadata(key).await? else {
            return Ok(Vec::new());
        };

        let expected = &metadata;
        let results: Vec<(usize, Result<Vec<T>>)> = stream::iter(0..metadata.chunk_count)
            .map(|index| async move { (index, self.fetch_chunk::<T>(key, index, expected).await) })
            .buffered(self.concurrency(metadata.chunk_count))
            .collect()
            .await;

        let mut items = Vec::with_capacity(metadata.total_items);
        let mut failed = Vec::new();
        for (index, result) in results {
            match result {
                Ok(chunk) => items.extend(chunk),
                Err(e) => {
                    tracing::warn!("Chunk {} of {} unavailable: {}", index, key, e);
                    failed.push(index);
                }
            }
        }

        if !failed.is_empty() {
            return Err(SyncError::ChunkIncomplete {
                key: key.to_string(),
                failed,
            });
        }

        if items.len() != metadata.total_items {
            tracing::warn!(
                "{} reassembled {} items, metadata says {}",
                key,
                items.len(),
                metadata.total_items
            );
            return Err(SyncError::ChunkIncomplete {
                key: key.to_string(),
                failed: (0..metadata.chunk_count).collect(),
            });
        }
        Ok(items)
    }

    /// Fetches chunk `index` and checks it was written by the save that
    /// `metadata` describes.
    async fn fetch_chunk<T: DeserializeOwned>(
        &self,
        key: &str,
        index: usize,
        metadata: &ChunkMetadata,
    ) -> Result<Vec<T>> {
        let record_id = chunk_record_id(key, index);
        let record = self
            .remote
            .fetch(&record_id)
            .await?
            .ok_or_else(|| SyncError::not_found(record_id.clone()))?;

        let stored_index: Option<usize> = codec::decode_field(&record, "chunkIndex")?;
        let written_at: Option<DateTime<Utc>> = codec::decode_field(&record, "lastUpdated")?;
        let written_by: Option<String> = codec::decode_field(&record, "deviceId")?;
        let current = stored_index == Some(index)
            && written_at == Some(metadata.last_updated)
            && written_by.as_deref() == Some(metadata.device_id.as_str());
        if !current {
            tracing::debug!("{} belongs to another save of {}", record_id, key);
            return Err(SyncError::ChunkIncomplete {
                key: key.to_string(),
                failed: vec![index],
            });
        }

        let items: Vec<T> = codec::decode_field(&record, "data")?
            .ok_or_else(|| SyncError::not_found(format!("{record_id}.data")))?;
        let item_count: Option<usize> = codec::decode_field(&record, "itemCount")?;
        if item_count != Some(items.len()) {
            return Err(SyncError::ChunkIncomplete {
                key: key.to_string(),
                failed: vec![index],
            });
        }
        Ok(items)
    }
}

fn metadata_record(key: &str, metadata: &ChunkMetadata) -> Result<RemoteRecord> {
    let mut record = RemoteRecord::new(metadata_record_id(key));
    record.set_field("totalItems", codec::encode(key, &metadata.total_items)?);
    record.set_field("chunkCount", codec::encode(key, &metadata.chunk_count)?);
    record.set_field("lastUpdated", codec::encode(key, &metadata.last_updated)?);
    record.set_field("deviceId", codec::encode(key, &metadata.device_id)?);
    Ok(record)
}

fn chunk_record<T: Serialize>(
    key: &str,
    chunk: &Chunk<T>,
    now: DateTime<Utc>,
    device_id: &str,
) -> Result<RemoteRecord> {
    let mut record = RemoteRecord::new(chunk_record_id(key, chunk.index));
    record.set_field("data", codec::encode(key, &chunk.items)?);
    record.set_field("itemCount", codec::encode(key, &chunk.item_count())?);
    record.set_field("chunkIndex", codec::encode(key, &chunk.index)?);
    record.set_field("lastUpdated", codec::encode(key, &now)?);
    record.set_field("deviceId", codec::encode(key, device_id)?);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;

    fn links(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://a.com/{i}")).collect()
    }

    fn transfer(remote: &Arc<MemoryRemoteStore>, chunk_size: usize) -> ChunkedTransfer {
        ChunkedTransfer::new(remote.clone(), "device-1").with_chunk_size(chunk_size)
    }

    #[tokio::test]
    async fn test_2500_items_make_three_chunks() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 1000);

        let metadata = chunked.save_in_chunks("readItems", &links(2500)).await.unwrap();
        assert_eq!(metadata.chunk_count, 3);
        assert_eq!(metadata.total_items, 2500);
        assert_eq!(metadata.device_id, "device-1");

        let counts: Vec<String> = (0..3)
            .map(|i| remote.field(&chunk_record_id("readItems", i), "itemCount").unwrap())
            .collect();
        assert_eq!(counts, vec!["1000", "1000", "500"]);
        assert_eq!(remote.save_count(), 4);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 7).with_max_concurrent(Some(2));
        let items = links(50);

        chunked.save_in_chunks("heartedItems", &items).await.unwrap();
        let loaded: Vec<String> = chunked.load_from_chunks("heartedItems").await.unwrap();
        assert_eq!(loaded, items);
    }

    #[tokio::test]
    async fn test_missing_metadata_is_empty() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let loaded: Vec<String> = transfer(&remote, 10).load_from_chunks("readItems").await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_write_fails_save() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_saves_for(&chunk_record_id("readItems", 1));

        let err = transfer(&remote, 10)
            .save_in_chunks("readItems", &links(30))
            .await
            .unwrap_err();
        match err {
            SyncError::ChunkIncomplete { failed, .. } => assert_eq!(failed, vec![1]),
            other => panic!("unexpected error: {other}"),
        }
        // The other chunks were still attempted.
        assert_eq!(remote.save_count(), 4);
    }

    #[tokio::test]
    async fn test_missing_chunk_discards_everything() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 10);
        chunked.save_in_chunks("readItems", &links(30)).await.unwrap();
        remote.remove_record(&chunk_record_id("readItems", 2));

        let err = chunked.load_from_chunks::<String>("readItems").await.unwrap_err();
        assert!(matches!(err, SyncError::ChunkIncomplete { ref failed, .. } if failed == &vec![2]));
    }

    #[tokio::test]
    async fn test_undecodable_chunk_discards_everything() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 10);
        chunked.save_in_chunks("readItems", &links(20)).await.unwrap();
        remote.put_field(&chunk_record_id("readItems", 0), "data", "[not json");

        let err = chunked.load_from_chunks::<String>("readItems").await.unwrap_err();
        assert!(matches!(err, SyncError::ChunkIncomplete { .. }));
    }

    #[tokio::test]
    async fn test_shrinking_collection_ignores_stale_chunks() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 10);
        chunked.save_in_chunks("readItems", &links(40)).await.unwrap();
        chunked.save_in_chunks("readItems", &links(15)).await.unwrap();

        let loaded: Vec<String> = chunked.load_from_chunks("readItems").await.unwrap();
        assert_eq!(loaded, links(15));
        assert!(remote.record(&chunk_record_id("readItems", 3)).is_some());
    }

    #[tokio::test]
    async fn test_interrupted_save_never_mixes_old_chunks() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 10);
        let old: Vec<String> = (0..25).map(|i| format!("old{i}")).collect();
        chunked.save_in_chunks("readItems", &old).await.unwrap();

        remote.fail_saves_for(&chunk_record_id("readItems", 2));
        let new: Vec<String> = (0..30).map(|i| format!("new{i}")).collect();
        assert!(chunked.save_in_chunks("readItems", &new).await.is_err());
        remote.clear_failures();

        let err = chunked.load_from_chunks::<String>("readItems").await.unwrap_err();
        assert!(matches!(err, SyncError::ChunkIncomplete { ref failed, .. } if failed == &vec![2]));
    }

    #[tokio::test]
    async fn test_chunks_from_another_device_are_rejected() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let phone = ChunkedTransfer::new(remote.clone(), "phone").with_chunk_size(10);
        let laptop = ChunkedTransfer::new(remote.clone(), "laptop").with_chunk_size(10);
        phone.save_in_chunks("bookmarkedItems", &links(20)).await.unwrap();

        remote.fail_saves_for(&chunk_record_id("bookmarkedItems", 1));
        assert!(laptop.save_in_chunks("bookmarkedItems", &links(20)).await.is_err());
        remote.clear_failures();

        let err = phone.load_from_chunks::<String>("bookmarkedItems").await.unwrap_err();
        assert!(matches!(err, SyncError::ChunkIncomplete { ref failed, .. } if failed == &vec![1]));
    }

    #[tokio::test]
    async fn test_item_count_mismatch_rejects_chunk() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 10);
        chunked.save_in_chunks("readItems", &links(20)).await.unwrap();
        remote.put_field(&chunk_record_id("readItems", 0), "itemCount", "3");

        let err = chunked.load_from_chunks::<String>("readItems").await.unwrap_err();
        assert!(matches!(err, SyncError::ChunkIncomplete { ref failed, .. } if failed == &vec![0]));
    }

    #[tokio::test]
    async fn test_total_mismatch_fails_load() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let chunked = transfer(&remote, 10);
        chunked.save_in_chunks("readItems", &links(20)).await.unwrap();
        remote.put_field(&metadata_record_id("readItems"), "totalItems", "25");

        let err = chunked.load_from_chunks::<String>("readItems").await.unwrap_err();
        assert!(matches!(err, SyncError::ChunkIncomplete { ref failed, .. } if failed == &vec![0, 1]));
    }

    #[test]
    fn test_pointer_only_parses_objects() {
        assert!(ChunkPointer::parse("[\"https://a.com\"]").is_none());
        assert!(ChunkPointer::parse("{\"other\":1}").is_none());
        let pointer = ChunkPointer::parse(r#"{"chunkCount":3,"chunkedAt":"2026-10-14T00:00:00Z"}"#).unwrap();
        assert_eq!(pointer.chunk_count, 3);
    }
}
