use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative descriptor of a chunked collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub total_items: usize,
    pub chunk_count: usize,
    pub last_updated: DateTime<Utc>,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Splits `items` into contiguous chunks of at most `chunk_size`.
    pub fn partition(items: &[T], chunk_size: usize) -> Vec<Chunk<T>>
    where
        T: Clone,
    {
        items
            .chunks(chunk_size.max(1))
            .enumerate()
            .map(|(index, slice)| Chunk {
                index,
                items: slice.to_vec(),
            })
            .collect()
    }
}
