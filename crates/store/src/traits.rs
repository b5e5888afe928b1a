//! Content store trait definitions.

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Object store abstraction for content-addressed blobs.
///
/// Keys are content-derived, so concurrent writers of the same key always
/// carry identical bytes and last-writer-wins is safe.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &str) -> StoreResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Put an object only if it doesn't exist. Returns whether a write
    /// happened.
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StoreResult<bool>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// List object keys with a prefix.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Static identifier for the backend type ("s3", "filesystem"). Used
    /// for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity at startup.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}
