//! Shared helpers for integration tests.
//!
//! A "device" is a coordinator with its own in-memory local store, attached to
//! a remote store that several devices may share.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use speedy_sync::sync::SyncOptions;
use speedy_sync::{LocalStore, MemoryRemoteStore, MemoryStore, StorageMode, SyncCoordinator};

pub struct Device {
    pub local: Arc<MemoryStore>,
    pub sync: Arc<SyncCoordinator>,
}

impl Device {
    pub async fn local_text(&self, key: &str) -> Option<String> {
        self.local
            .get(key)
            .await
            .unwrap()
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }
}

pub fn options(device_id: &str) -> SyncOptions {
    SyncOptions {
        device_id: device_id.to_string(),
        request_timeout: Duration::from_secs(5),
        ..SyncOptions::default()
    }
}

pub async fn device(remote: &Arc<MemoryRemoteStore>, options: SyncOptions) -> Device {
    let local = Arc::new(MemoryStore::new());
    let sync = SyncCoordinator::with_remote(local.clone(), remote.clone(), options);
    sync.set_storage_mode(StorageMode::Remote).await.unwrap();
    Device {
        local,
        sync: Arc::new(sync),
    }
}

pub fn links(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
