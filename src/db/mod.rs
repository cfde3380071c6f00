mod memory;
mod repository;
mod schema;

pub use memory::MemoryStore;
pub use repository::Repository;

use crate::error::Result;
use crate::BoxFuture;

/// Durable key to bytes store on this device.
///
/// Any component may read or write any key. Only the coordinator's merge
/// path is safe against read-modify-write races on a shared key.
pub trait LocalStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<()>>;
}
