// ─── Persistent Storage ───
// Partitioned key-value store consumed by the cache and chain resolvers.

mod disk;
mod memory;

use async_trait::async_trait;

use crate::core::error::SyncResult;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Cached data files and `_BASE` markers.
pub const FILES_PARTITION: &str = "files";
/// Preload bookkeeping left by the runtime's package loader.
pub const PRELOAD_METADATA_PARTITION: &str = "preload-metadata";
pub const PRELOAD_PACKAGES_PARTITION: &str = "preload-packages";

/// Asynchronous partitioned key-value store.
///
/// Values are opaque bytes. A missing key is `Ok(None)`, never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, partition: &str, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn set(&self, partition: &str, key: &str, value: Vec<u8>) -> SyncResult<()>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, partition: &str, key: &str) -> SyncResult<()>;

    async fn keys(&self, partition: &str) -> SyncResult<Vec<String>>;

    async fn clear(&self, partition: &str) -> SyncResult<()>;
}

/// Store key for `file` at `version`, shared with the server's URL layout.
pub fn composite_key(file: &str, version: &str) -> String {
    format!("data/{}/{}", version, strip_leading_separators(file))
}

pub fn strip_leading_separators(file: &str) -> &str {
    file.trim_start_matches('/')
}
