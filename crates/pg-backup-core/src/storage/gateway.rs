//! Object store gateway trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::Result;

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    /// Full object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub last_modified: DateTime<Utc>,
    /// ETag or content hash (if available)
    pub e_tag: Option<String>,
}

impl From<object_store::ObjectMeta> for ObjectMetadata {
    fn from(meta: object_store::ObjectMeta) -> Self {
        Self {
            key: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: meta.last_modified,
            e_tag: meta.e_tag,
        }
    }
}

/// Trait for the bucket holding snapshots
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// Name of the bucket this gateway addresses
    fn bucket(&self) -> &str;

    /// HEAD the bucket
    async fn bucket_exists(&self) -> Result<bool>;

    /// Create the bucket
    async fn create_bucket(&self) -> Result<()>;

    /// Create the bucket when it does not exist yet.
    ///
    /// Check-then-create is not atomic; bucket lifecycle is left to the
    /// operator, so nothing else in this process races it.
    async fn ensure_bucket(&self) -> Result<()> {
        if !self.bucket_exists().await? {
            self.create_bucket().await?;
            info!("Created bucket: {}", self.bucket());
        }
        Ok(())
    }

    /// Stream a local file to `key`
    async fn upload(&self, local_path: &Path, key: &str) -> Result<ObjectMetadata>;

    /// Fetch object metadata; `StorageError::NotFound` when absent
    async fn head(&self, key: &str) -> Result<ObjectMetadata>;

    /// Every object whose key starts with `prefix`. Pages are fetched
    /// lazily; the stream can only be restarted by calling `list` again.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMetadata>>;

    /// Stream the object at `key` into a local file
    async fn download(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Delete the object at `key`
    async fn delete(&self, key: &str) -> Result<()>;
}
