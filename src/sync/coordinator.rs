use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::{Config, StorageMode};
use crate::db::{LocalStore, Repository};
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::remote::{DeadlineRemote, HttpRemoteStore, RemoteRecord, RemoteStore};

use super::chunked::{ChunkPointer, ChunkedTransfer, DEFAULT_CHUNK_SIZE};
use super::codec;
use super::keys::{self, SHARED_RECORD_ID, SYNCED_KEYS};
use super::merge::{self, MergeKind};
use super::retry::RetryPolicy;
use super::status::SyncStatus;

/// Remote-leg settings for a coordinator.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub device_id: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub chunk_size: usize,
    /// Encoded collections larger than this are written in chunks.
    pub chunk_threshold_bytes: usize,
    pub max_concurrent_chunk_ops: Option<usize>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            request_timeout: Duration::from_secs(45),
            retry: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_threshold_bytes: 500_000,
            max_concurrent_chunk_ops: None,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_id: config.device_id.clone(),
            request_timeout: config.request_timeout(),
            retry: config.retry_policy(),
            chunk_size: config.chunk_size,
            chunk_threshold_bytes: config.chunk_threshold_bytes,
            max_concurrent_chunk_ops: config.max_concurrent_chunk_ops,
        }
    }
}

struct RemoteLeg {
    store: Arc<dyn RemoteStore>,
    chunked: ChunkedTransfer,
}

/// Outcome of a whole-collection pass over every synced key.
#[derive(Debug, Default, PartialEq)]
pub struct ResyncReport {
    pub updated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ResyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Save/load front for every persisted collection.
///
/// Writes hit the local store before any remote work starts, so a local read
/// right after `save` always observes the value whatever the remote outcome.
/// With remote sync on, the key is then fetched, merged and pushed back.
pub struct SyncCoordinator {
    local: Arc<dyn LocalStore>,
    remote: Option<RemoteLeg>,
    mode: RwLock<StorageMode>,
    registered: AtomicBool,
    retry: RetryPolicy,
    chunk_threshold_bytes: usize,
    status: watch::Sender<SyncStatus>,
    events: EventBus,
}

impl SyncCoordinator {
    pub fn local_only(local: Arc<dyn LocalStore>) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            local,
            remote: None,
            mode: RwLock::new(StorageMode::Local),
            registered: AtomicBool::new(false),
            retry: RetryPolicy::default(),
            chunk_threshold_bytes: usize::MAX,
            status,
            events: EventBus::default(),
        }
    }

    /// Starts in local mode; call [`set_storage_mode`](Self::set_storage_mode)
    /// to turn the remote leg on.
    pub fn with_remote(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        options: SyncOptions,
    ) -> Self {
        let store: Arc<dyn RemoteStore> =
            Arc::new(DeadlineRemote::new(remote, options.request_timeout));
        let chunked = ChunkedTransfer::new(store.clone(), options.device_id)
            .with_chunk_size(options.chunk_size)
            .with_max_concurrent(options.max_concurrent_chunk_ops);

        let mut coordinator = Self::local_only(local);
        coordinator.remote = Some(RemoteLeg { store, chunked });
        coordinator.retry = options.retry;
        coordinator.chunk_threshold_bytes = options.chunk_threshold_bytes;
        coordinator
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let local: Arc<dyn LocalStore> = Arc::new(Repository::new(&config.db_path).await?);

        let coordinator = match &config.remote_url {
            Some(url) => {
                let remote = HttpRemoteStore::new(
                    url,
                    config.remote_token.clone(),
                    config.device_id.clone(),
                    config.request_timeout(),
                )?;
                Self::with_remote(local, Arc::new(remote), SyncOptions::from_config(config))
            }
            None => Self::local_only(local),
        };

        coordinator.set_storage_mode(config.storage_mode).await?;
        Ok(coordinator)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn storage_mode(&self) -> StorageMode {
        *self.mode.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swaps the storage mode. The first switch to remote registers this
    /// device for change notifications.
    pub async fn set_storage_mode(&self, mode: StorageMode) -> Result<()> {
        if mode == StorageMode::Remote && self.remote.is_none() {
            return Err(SyncError::RemoteUnavailable);
        }

        let previous = {
            let mut current = self.mode.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, mode)
        };
        tracing::info!("Storage mode {:?} -> {:?}", previous, mode);

        if mode == StorageMode::Remote && !self.registered.swap(true, Ordering::SeqCst) {
            if let Some(remote) = &self.remote {
                if let Err(e) = remote.store.register_for_changes().await {
                    tracing::warn!("Change notification registration failed: {}", e);
                    self.registered.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    fn active_remote(&self) -> Option<&RemoteLeg> {
        match self.storage_mode() {
            StorageMode::Remote => self.remote.as_ref(),
            StorageMode::Local => None,
        }
    }

    /// Persists `value` under `key`, merging with the remote copy when remote
    /// sync is on.
    ///
    /// The local write has completed before this returns any remote error.
    pub async fn save<T>(&self, value: &T, key: &str) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(key, value)?;
        self.local.set(key, encoded.clone().into_bytes()).await?;

        let Some(remote) = self.active_remote() else {
            return Ok(());
        };

        self.track(self.push_merged(remote, key, encoded)).await
    }

    /// Persists `value` and pushes it without merging, so removals stick.
    pub async fn save_replacing<T>(&self, value: &T, key: &str) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(key, value)?;
        self.local.set(key, encoded.clone().into_bytes()).await?;

        let Some(remote) = self.active_remote() else {
            return Ok(());
        };

        self.track(self.push(remote, key, &encoded)).await
    }

    /// Writes the local store only, whatever the storage mode.
    pub async fn save_local<T>(&self, value: &T, key: &str) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::encode(key, value)?;
        self.local.set(key, encoded.into_bytes()).await
    }

    /// Loads `key`, preferring the remote copy when remote sync is on.
    ///
    /// Missing collection keys read as empty. Undecodable values under the
    /// self-healing keys are reset to empty on both sides.
    pub async fn load<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let Some(remote) = self.active_remote() else {
            return self.load_local(key).await;
        };

        let kind = MergeKind::for_key(key);
        let fetched = self
            .track(async {
                let record = remote.store.fetch(SHARED_RECORD_ID).await?;
                self.remote_value(remote, record.as_ref(), key).await
            })
            .await;

        let remote_value = match fetched {
            Ok(Some(value)) => value,
            // Nothing remote yet: the local replica, or empty for collections.
            Ok(None) => return self.load_local(key).await,
            Err(err @ SyncError::Decode { .. }) => return self.heal_or_fail(key, err).await,
            Err(err) => return Err(err),
        };

        let value = if kind.is_collection() {
            match self.local_value(key).await? {
                Some(local) => match merge::merge_values(kind, key, &local, &remote_value) {
                    Ok(merged) => merged,
                    Err(e) => {
                        tracing::warn!("Local {} unmergeable, using remote value: {}", key, e);
                        remote_value
                    }
                },
                None => remote_value,
            }
        } else {
            remote_value
        };

        match T::deserialize(&value) {
            Ok(typed) => {
                let encoded = codec::encode(key, &value)?;
                self.local.set(key, encoded.into_bytes()).await?;
                Ok(typed)
            }
            Err(e) => self.heal_or_fail(key, SyncError::decode(key, e)).await,
        }
    }

    /// Loads `key` from the local store only.
    pub async fn load_local<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        match self.local.get(key).await? {
            Some(bytes) => match codec::decode_bytes(key, &bytes) {
                Ok(value) => Ok(value),
                Err(err) => self.heal_or_fail(key, err).await,
            },
            None if MergeKind::for_key(key).is_collection() => Ok(T::default()),
            None => Err(SyncError::not_found(key)),
        }
    }

    /// Pulls every synced key and folds the remote copy into the local one.
    ///
    /// Change notifications carry no payload; this is the whole response.
    pub async fn handle_remote_change(&self) -> Result<ResyncReport> {
        let remote = self.active_remote().ok_or(SyncError::RemoteUnavailable)?;
        let record = self
            .track(async { Ok::<_, SyncError>(remote.store.fetch(SHARED_RECORD_ID).await?) })
            .await?;

        let mut report = ResyncReport::default();
        for key in SYNCED_KEYS {
            let kind = MergeKind::for_key(key);
            let pulled = async {
                let Some(remote_value) = self.remote_value(remote, record.as_ref(), key).await? else {
                    return Ok(false);
                };
                let local = self.local_value(key).await?;
                let merged = match &local {
                    Some(local) => merge::merge_values(kind, key, local, &remote_value)?,
                    None => remote_value,
                };
                if local.as_ref() == Some(&merged) {
                    return Ok(false);
                }
                self.local
                    .set(key, codec::encode(key, &merged)?.into_bytes())
                    .await?;
                Ok::<bool, SyncError>(true)
            };

            match pulled.await {
                Ok(true) => {
                    self.events.publish(SyncEvent::for_key(key));
                    report.updated.push(key.to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Reconciling {} failed: {}", key, e);
                    report.failed.push((key.to_string(), e.to_string()));
                }
            }
        }

        self.events.publish(SyncEvent::RemoteChanged);
        tracing::info!("Reconciled {} keys after change notification", report.updated.len());
        Ok(report)
    }

    /// Merges local and remote for every synced key and writes the result to
    /// both sides.
    pub async fn force_full_resync(&self) -> Result<ResyncReport> {
        let remote = self.active_remote().ok_or(SyncError::RemoteUnavailable)?;
        let record = self
            .track(async { Ok::<_, SyncError>(remote.store.fetch(SHARED_RECORD_ID).await?) })
            .await?;

        let mut report = ResyncReport::default();
        for key in SYNCED_KEYS {
            let kind = MergeKind::for_key(key);
            let resynced = async {
                let local = self.local_value(key).await?.unwrap_or_else(|| Value::Array(Vec::new()));
                let remote_value = match self.remote_value(remote, record.as_ref(), key).await {
                    Ok(value) => value.unwrap_or_else(|| Value::Array(Vec::new())),
                    Err(e @ SyncError::Decode { .. }) => {
                        tracing::warn!("Discarding undecodable remote {}: {}", key, e);
                        Value::Array(Vec::new())
                    }
                    Err(e) => return Err(e),
                };
                let merged = merge::merge_values(kind, key, &local, &remote_value)?;
                let encoded = codec::encode(key, &merged)?;
                self.local.set(key, encoded.clone().into_bytes()).await?;
                self.track(self.push(remote, key, &encoded)).await
            };

            match resynced.await {
                Ok(()) => {
                    self.events.publish(SyncEvent::for_key(key));
                    report.updated.push(key.to_string());
                }
                Err(e) => {
                    tracing::error!("Resync of {} failed: {}", key, e);
                    report.failed.push((key.to_string(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "Full resync finished: {} updated, {} failed",
            report.updated.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Writes the field of a dedicated record with the retry policy, for
    /// records outside the shared one.
    pub(crate) async fn push_record_field(&self, record_id: &str, field: &str, encoded: &str) -> Result<bool> {
        let Some(remote) = self.active_remote() else {
            return Ok(false);
        };
        self.track(async {
            self.retry
                .save_with_retry(remote.store.as_ref(), record_id, field, encoded)
                .await
                .map(|_| true)
        })
        .await
    }

    pub(crate) async fn fetch_record(&self, record_id: &str) -> Result<Option<RemoteRecord>> {
        let Some(remote) = self.active_remote() else {
            return Ok(None);
        };
        self.track(async { Ok::<_, SyncError>(remote.store.fetch(record_id).await?) })
            .await
    }

    pub(crate) fn local(&self) -> &dyn LocalStore {
        self.local.as_ref()
    }

    async fn push_merged(&self, remote: &RemoteLeg, key: &str, encoded: String) -> Result<()> {
        let kind = MergeKind::for_key(key);
        if !kind.is_collection() {
            return self.push(remote, key, &encoded).await;
        }

        let fetched = match remote.store.fetch(SHARED_RECORD_ID).await {
            Ok(record) => self.remote_value(remote, record.as_ref(), key).await,
            Err(e) => Err(e.into()),
        };

        match fetched {
            Ok(Some(remote_value)) => {
                let local_value: Value = codec::decode(key, &encoded)?;
                match merge::merge_values(kind, key, &local_value, &remote_value) {
                    Ok(merged) => {
                        let merged = codec::encode(key, &merged)?;
                        if merged != encoded {
                            self.local.set(key, merged.clone().into_bytes()).await?;
                        }
                        self.push(remote, key, &merged).await
                    }
                    Err(e) => {
                        tracing::warn!("Remote {} unmergeable, pushing local value: {}", key, e);
                        self.push(remote, key, &encoded).await
                    }
                }
            }
            Ok(None) => self.push(remote, key, &encoded).await,
            Err(e) => {
                tracing::warn!("Fetching remote {} failed, pushing local value: {}", key, e);
                self.push(remote, key, &encoded).await
            }
        }
    }

    async fn push(&self, remote: &RemoteLeg, key: &str, encoded: &str) -> Result<()> {
        let store = remote.store.as_ref();

        if encoded.len() > self.chunk_threshold_bytes && MergeKind::for_key(key).is_collection() {
            let items: Vec<Value> = codec::decode(key, encoded)?;
            let metadata = remote.chunked.save_in_chunks(key, &items).await?;
            let pointer = codec::encode(key, &ChunkPointer::from(&metadata))?;
            self.retry
                .save_with_retry(store, SHARED_RECORD_ID, key, &pointer)
                .await?;
        } else {
            self.retry
                .save_with_retry(store, SHARED_RECORD_ID, key, encoded)
                .await?;
        }

        tracing::debug!("Pushed {} ({} bytes)", key, encoded.len());
        Ok(())
    }

    /// The remote value of `key` inside the shared record, following a chunk
    /// pointer if one is stored there.
    async fn remote_value(
        &self,
        remote: &RemoteLeg,
        record: Option<&RemoteRecord>,
        key: &str,
    ) -> Result<Option<Value>> {
        let Some(text) = record.and_then(|r| r.field(key)) else {
            return Ok(None);
        };

        if MergeKind::for_key(key).is_collection() {
            if let Some(pointer) = ChunkPointer::parse(text) {
                tracing::debug!("{} stored in {} chunks", key, pointer.chunk_count);
                let items: Vec<Value> = remote.chunked.load_from_chunks(key).await?;
                return Ok(Some(Value::Array(items)));
            }
        }

        Ok(Some(codec::decode(key, text)?))
    }

    /// The local value of `key`, `None` when absent or undecodable.
    async fn local_value(&self, key: &str) -> Result<Option<Value>> {
        let Some(bytes) = self.local.get(key).await? else {
            return Ok(None);
        };
        match codec::decode_bytes(key, &bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Ignoring undecodable local {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Resets a self-healing key to empty on both sides and returns the empty
    /// value. This discards whatever was stored. Other keys return `err`.
    async fn heal_or_fail<T>(&self, key: &str, err: SyncError) -> Result<T>
    where
        T: Serialize + Default,
    {
        if !keys::is_self_healing(key) {
            return Err(err);
        }

        tracing::warn!("Resetting {} to empty after decode failure: {}", key, err);
        let empty = T::default();
        let encoded = codec::encode(key, &empty)?;
        self.local.set(key, encoded.clone().into_bytes()).await?;

        if let Some(remote) = self.active_remote() {
            if let Err(e) = self
                .track(self.retry.save_with_retry(remote.store.as_ref(), SHARED_RECORD_ID, key, &encoded))
                .await
            {
                tracing::error!("Failed to reset remote {}: {}", key, e);
            }
        }

        self.events.publish(SyncEvent::for_key(key));
        Ok(empty)
    }

    /// Runs one remote operation while keeping the status surface current.
    async fn track<F, R>(&self, operation: F) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        self.status.send_modify(SyncStatus::begin);
        let result = operation.await;
        match &result {
            Ok(_) => self.status.send_modify(SyncStatus::succeed),
            Err(e) => self.status.send_modify(|status| status.fail(e)),
        }
        result
    }
}
