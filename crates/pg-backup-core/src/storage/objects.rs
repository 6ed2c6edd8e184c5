//! Object operations shared by every gateway, built on object_store.

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, WriteMultipart};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::ObjectMetadata;
use crate::error::StorageError;
use crate::{Error, Result};

/// Read size per upload chunk; WriteMultipart buffers these into parts
const UPLOAD_READ_BYTES: usize = 1024 * 1024;

/// Parts allowed in flight during an upload
const UPLOAD_MAX_CONCURRENCY: usize = 4;

pub(crate) struct ObjectOps {
    store: Arc<dyn ObjectStore>,
}

impl ObjectOps {
    pub(crate) fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub(crate) async fn upload(
        &self,
        local_path: &std::path::Path,
        key: &str,
    ) -> Result<ObjectMetadata> {
        let path = Path::from(key);
        debug!("PUT (multipart): {} <- {}", path, local_path.display());

        let upload_error = |message: String| {
            Error::Storage(StorageError::Upload {
                key: key.to_string(),
                message,
            })
        };

        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| upload_error(format!("cannot open {}: {}", local_path.display(), e)))?;

        let upload = self
            .store
            .put_multipart(&path)
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        let mut writer = WriteMultipart::new(upload);

        if let Err(message) = fill(&mut writer, &mut file).await {
            // Nothing becomes visible under the key until completion
            let _ = writer.abort().await;
            return Err(upload_error(message));
        }

        writer
            .finish()
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        self.head(key).await
    }

    pub(crate) async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let path = Path::from(key);
        debug!("HEAD: {}", path);

        let meta = self.store.head(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                Error::Storage(StorageError::NotFound(key.to_string()))
            }
            _ => Error::Storage(StorageError::Backend(format!("HEAD failed: {}", e))),
        })?;

        Ok(meta.into())
    }

    pub(crate) fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMetadata>> {
        // object_store lists whole path segments; list from the last
        // delimiter and filter so that "pg-" style prefixes also work
        let dir = prefix.rfind('/').map(|i| Path::from(&prefix[..i]));
        debug!("LIST: {:?} (prefix {:?})", dir, prefix);

        self.store
            .list(dir.as_ref())
            .map_err(|e| Error::Storage(StorageError::Backend(format!("LIST failed: {}", e))))
            .try_filter(move |meta| futures::future::ready(meta.location.as_ref().starts_with(prefix)))
            .map_ok(ObjectMetadata::from)
            .boxed()
    }

    pub(crate) async fn download(&self, key: &str, local_path: &std::path::Path) -> Result<()> {
        let path = Path::from(key);
        debug!("GET: {} -> {}", path, local_path.display());

        let download_error = |message: String| {
            Error::Storage(StorageError::Download {
                key: key.to_string(),
                message,
            })
        };

        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => download_error("object not found".to_string()),
            _ => download_error(e.to_string()),
        })?;

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| download_error(format!("cannot create {}: {}", local_path.display(), e)))?;

        let mut stream = result.into_stream();
        let copied: std::result::Result<(), String> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| e.to_string())?;
                file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            }
            file.flush().await.map_err(|e| e.to_string())
        }
        .await;

        if let Err(message) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(local_path).await;
            return Err(download_error(message));
        }

        Ok(())
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        debug!("DELETE: {}", path);

        self.store.delete(&path).await.map_err(|e| {
            Error::Storage(StorageError::Delete {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
    }

    pub(crate) async fn put_bytes(&self, key: &str, data: bytes::Bytes) -> Result<()> {
        self.store
            .put(&Path::from(key), data.into())
            .await
            .map_err(|e| {
                Error::Storage(StorageError::Upload {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })?;
        Ok(())
    }
}

async fn fill(
    writer: &mut WriteMultipart,
    file: &mut tokio::fs::File,
) -> std::result::Result<(), String> {
    let mut buf = vec![0u8; UPLOAD_READ_BYTES];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| e.to_string())?;
        if n == 0 {
            return Ok(());
        }
        writer
            .wait_for_capacity(UPLOAD_MAX_CONCURRENCY)
            .await
            .map_err(|e| e.to_string())?;
        writer.write(&buf[..n]);
    }
}
