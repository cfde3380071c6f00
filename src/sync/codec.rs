use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::remote::RemoteRecord;

pub fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SyncError::encode(key, e))
}

pub fn decode<T: DeserializeOwned>(key: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| SyncError::decode(key, e))
}

pub fn decode_bytes<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| SyncError::decode(key, e))
}

/// `Ok(None)` when the record has no such field.
pub fn decode_field<T: DeserializeOwned>(record: &RemoteRecord, field: &str) -> Result<Option<T>> {
    record
        .field(field)
        .map(|text| decode(&format!("{}.{}", record.id, field), text))
        .transpose()
}
