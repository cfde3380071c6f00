use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::BoxFuture;

use super::{RemoteError, RemoteRecord, RemoteResult, RemoteStore, SaveMode};

#[derive(Default)]
struct State {
    records: HashMap<String, RemoteRecord>,
    version: u64,
    latency: Option<Duration>,
    /// Conditional saves still to be rejected regardless of tag.
    forced_conflicts: usize,
    /// Writes from another device that land just before the next save to a record.
    foreign_writes: Vec<(String, String, String)>,
    rate_limited_saves: usize,
    rate_limit_retry_after: Option<Duration>,
    failing_fetches: HashSet<String>,
    failed_fetches_remaining: usize,
    failing_saves: HashSet<String>,
}

/// In-process remote record service with versioned records.
///
/// Counts every call and supports fault injection so the retry and chunk
/// paths can be driven deterministically.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    fetches: AtomicUsize,
    saves: AtomicUsize,
    registrations: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, record_id: &str) -> Option<RemoteRecord> {
        self.state().records.get(record_id).cloned()
    }

    pub fn field(&self, record_id: &str, field: &str) -> Option<String> {
        self.state()
            .records
            .get(record_id)
            .and_then(|r| r.field(field))
            .map(str::to_string)
    }

    pub fn record_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Writes a raw field value as if another device had saved it.
    pub fn put_field(&self, record_id: &str, field: &str, value: &str) {
        let mut state = self.state();
        Self::apply_write(&mut state, record_id, field, value);
    }

    pub fn remove_record(&self, record_id: &str) {
        self.state().records.remove(record_id);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    pub fn force_conflicts(&self, count: usize) {
        self.state().forced_conflicts = count;
    }

    /// The next save to `record_id` is preceded by this write, moving the
    /// change tag under the saver.
    pub fn inject_foreign_write(&self, record_id: &str, field: &str, value: &str) {
        self.state()
            .foreign_writes
            .push((record_id.to_string(), field.to_string(), value.to_string()));
    }

    pub fn rate_limit_saves(&self, count: usize, retry_after: Option<Duration>) {
        let mut state = self.state();
        state.rate_limited_saves = count;
        state.rate_limit_retry_after = retry_after;
    }

    pub fn fail_fetches_for(&self, record_id: &str) {
        self.state().failing_fetches.insert(record_id.to_string());
    }

    /// The next `count` fetches of any record fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.state().failed_fetches_remaining = count;
    }

    pub fn fail_saves_for(&self, record_id: &str) {
        self.state().failing_saves.insert(record_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_fetches.clear();
        state.failing_saves.clear();
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    fn apply_write(state: &mut State, record_id: &str, field: &str, value: &str) {
        state.version += 1;
        let tag = format!("v{}", state.version);
        let record = state
            .records
            .entry(record_id.to_string())
            .or_insert_with(|| RemoteRecord::new(record_id));
        record.set_field(field, value);
        record.change_tag = Some(tag);
    }

    fn latency(&self) -> Option<Duration> {
        self.state().latency
    }

    fn do_fetch(&self, record_id: &str) -> RemoteResult<Option<RemoteRecord>> {
        let mut state = self.state();
        if state.failed_fetches_remaining > 0 {
            state.failed_fetches_remaining -= 1;
            return Err(RemoteError::Transient(format!("fetch of {record_id} failed")));
        }
        if state.failing_fetches.contains(record_id) {
            return Err(RemoteError::Transient(format!("fetch of {record_id} failed")));
        }
        Ok(state.records.get(record_id).cloned())
    }

    fn do_save(&self, mut record: RemoteRecord, mode: SaveMode) -> RemoteResult<RemoteRecord> {
        let mut state = self.state();

        if state.rate_limited_saves > 0 {
            state.rate_limited_saves -= 1;
            return Err(RemoteError::RateLimited {
                retry_after: state.rate_limit_retry_after,
            });
        }
        if state.failing_saves.contains(&record.id) {
            return Err(RemoteError::Transient(format!("save of {} failed", record.id)));
        }

        let (pending, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.foreign_writes)
            .into_iter()
            .partition(|(id, _, _)| *id == record.id);
        state.foreign_writes = rest;
        for (id, field, value) in pending {
            Self::apply_write(&mut state, &id, &field, &value);
        }

        if mode == SaveMode::IfUnchanged {
            if state.forced_conflicts > 0 {
                state.forced_conflicts -= 1;
                return Err(RemoteError::Conflict);
            }
            let current = state
                .records
                .get(&record.id)
                .and_then(|r| r.change_tag.clone());
            if current != record.change_tag {
                return Err(RemoteError::Conflict);
            }
        }

        state.version += 1;
        record.change_tag = Some(format!("v{}", state.version));
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, RemoteResult<Option<RemoteRecord>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match self.latency() {
                Some(latency) => tokio::time::sleep(latency).await,
                None => tokio::task::yield_now().await,
            }
            self.do_fetch(record_id)
        })
    }

    fn save(&self, record: RemoteRecord, mode: SaveMode) -> BoxFuture<'_, RemoteResult<RemoteRecord>> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match self.latency() {
                Some(latency) => tokio::time::sleep(latency).await,
                None => tokio::task::yield_now().await,
            }
            self.do_save(record, mode)
        })
    }

    fn register_for_changes(&self) -> BoxFuture<'_, RemoteResult<()>> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
