//! Artifact storage backends
//!
//! The pipeline only sees [`StorageBackend`]. `put` returns an opaque
//! location handle which is later passed back to `get` and `delete`.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::Result;

/// Durable artifact put/get/delete by key
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `data` under `key`, returning the location handle
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<String>;

    async fn get(&self, location: &str) -> Result<Vec<u8>>;

    /// Remove an artifact. Deleting a missing artifact is not an error.
    async fn delete(&self, location: &str) -> Result<()>;

    async fn exists(&self, location: &str) -> Result<bool>;
}
