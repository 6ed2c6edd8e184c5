//! In-memory gateway for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::objects::ObjectOps;
use super::{ObjectMetadata, ObjectStoreGateway};
use crate::error::StorageError;
use crate::{Error, Result};

/// In-memory gateway using object_store
///
/// Keeps no data between runs. Bucket existence and per-key delete
/// failures can be scripted so workflows can be exercised without S3.
pub struct MemoryGateway {
    bucket: String,
    bucket_exists: AtomicBool,
    objects: ObjectOps,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryGateway {
    /// Create a gateway whose bucket already exists
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            bucket_exists: AtomicBool::new(true),
            objects: ObjectOps::new(Arc::new(InMemory::new())),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    /// Create a gateway whose bucket has not been created yet
    pub fn without_bucket(bucket: impl Into<String>) -> Self {
        let gateway = Self::new(bucket);
        gateway.bucket_exists.store(false, Ordering::SeqCst);
        gateway
    }

    /// Store an object directly
    pub async fn put_bytes(&self, key: &str, data: impl Into<Bytes>) -> Result<()> {
        self.objects.put_bytes(key, data.into()).await
    }

    /// Make every later delete of `key` fail
    pub fn fail_deletes_for(&self, key: &str) {
        self.failing_deletes.lock().insert(key.to_string());
    }

    fn require_bucket(&self) -> Result<()> {
        if self.bucket_exists.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Storage(StorageError::Bucket {
                bucket: self.bucket.clone(),
                message: "bucket does not exist".to_string(),
            }))
        }
    }
}

#[async_trait]
impl ObjectStoreGateway for MemoryGateway {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        Ok(self.bucket_exists.load(Ordering::SeqCst))
    }

    async fn create_bucket(&self) -> Result<()> {
        self.bucket_exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<ObjectMetadata> {
        self.require_bucket()?;
        self.objects.upload(local_path, key).await
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        self.require_bucket()?;
        self.objects.head(key).await
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMetadata>> {
        self.objects.list(prefix)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        self.require_bucket()?;
        self.objects.download(key, local_path).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.failing_deletes.lock().contains(key) {
            return Err(Error::Storage(StorageError::Delete {
                key: key.to_string(),
                message: "access denied".to_string(),
            }));
        }
        self.objects.delete(key).await
    }
}
