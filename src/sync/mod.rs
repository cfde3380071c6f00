mod articles;
pub mod chunked;
mod codec;
mod coordinator;
mod folders;
pub mod keys;
pub mod merge;
mod retry;
mod status;

pub use chunked::{ChunkPointer, ChunkedTransfer};
pub use coordinator::{ResyncReport, SyncCoordinator, SyncOptions};
pub use merge::{merge_feed_lists, merge_folders, merge_link_sets, MergeKind};
pub use retry::{BackoffConfig, RetryPolicy};
pub use status::{SyncState, SyncStatus};
