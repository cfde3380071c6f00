//! # speedy-sync
//!
//! Local-first synchronization of reader state (read, bookmarked and hearted
//! article links, feed folders, the subscription list) between an on-device
//! store and a size-limited, eventually consistent remote record service.
//!
//! ```text
//!   mutation ──► SyncCoordinator ──► LocalStore (immediate, always visible)
//!                     │
//!                     └─► fetch remote ─► merge ─► RetryPolicy ─► RemoteStore
//!                                                   └─► ChunkedTransfer (oversized)
//! ```
//!
//! Local writes complete before any remote leg starts. Remote legs are best
//! effort and converge because every set merge is a plain union.

use std::future::Future;
use std::pin::Pin;

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod link;
pub mod models;
pub mod remote;
pub mod sync;
pub mod tracker;

pub use config::{Config, StorageMode};
pub use db::{LocalStore, MemoryStore, Repository};
pub use error::{Result, SyncError};
pub use events::{EventBus, SyncEvent};
pub use link::normalize_link;
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteError, RemoteRecord, RemoteStore, SaveMode};
pub use sync::{
    ChunkedTransfer, MergeKind, ResyncReport, RetryPolicy, SyncCoordinator, SyncState, SyncStatus,
};
pub use tracker::{LinkSetTracker, ReadStatusTracker};

/// Boxed future returned by the store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
