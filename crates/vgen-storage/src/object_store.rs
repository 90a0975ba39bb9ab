//! The object storage seam.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Durable storage that hands back public URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy the object at `source_url` to `key`. Returns the canonical URL.
    async fn put_from_url(
        &self,
        source_url: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Store `data` at `key`. Returns the canonical URL.
    async fn put_bytes(&self, data: Vec<u8>, key: &str, content_type: &str)
        -> StorageResult<String>;

    /// Whether the bucket is reachable.
    async fn health_check(&self) -> bool;
}
