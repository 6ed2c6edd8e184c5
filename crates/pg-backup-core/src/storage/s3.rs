//! S3-compatible gateway.
//!
//! Object traffic goes through object_store, which has no notion of bucket
//! lifecycle; the HEAD/CREATE bucket calls use the AWS SDK client configured
//! with the same endpoint and static credentials.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use futures::stream::BoxStream;
use object_store::aws::AmazonS3Builder;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::objects::ObjectOps;
use super::{ObjectMetadata, ObjectStoreGateway};
use crate::config::ObjectStoreConfig;
use crate::error::StorageError;
use crate::{Error, Result};

/// Region whose buckets must be created without a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// S3 gateway
pub struct S3Gateway {
    bucket: String,
    region: String,
    objects: ObjectOps,
    client: aws_sdk_s3::Client,
}

impl S3Gateway {
    /// Create a new S3 gateway
    pub fn new(config: &ObjectStoreConfig) -> Result<Self> {
        // Path-style requests: MinIO and Ceph RGW do not serve
        // virtual-hosted buckets by default
        let store = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_endpoint(&config.endpoint)
            .with_virtual_hosted_style_request(false)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_allow_http(config.allow_http())
            .build()
            .map_err(|e| {
                Error::Storage(StorageError::Backend(format!(
                    "Failed to create S3 client: {}",
                    e
                )))
            })?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "pg-backup-static",
        );
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        info!(
            "Created S3 gateway for bucket: {}, prefix: {:?}",
            config.bucket, config.prefix
        );

        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            objects: ObjectOps::new(Arc::new(store)),
            client: aws_sdk_s3::Client::from_conf(sdk_config),
        })
    }

    fn bucket_error(&self, message: String) -> Error {
        Error::Storage(StorageError::Bucket {
            bucket: self.bucket.clone(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStoreGateway for S3Gateway {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        debug!("S3 HEAD bucket: {}", self.bucket);

        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(self.bucket_error(format!(
                        "HEAD failed: {}",
                        DisplayErrorContext(&err)
                    )))
                }
            }
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        debug!("S3 CREATE bucket: {}", self.bucket);

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request.send().await.map_err(|err| {
            self.bucket_error(format!("CREATE failed: {}", DisplayErrorContext(&err)))
        })?;

        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<ObjectMetadata> {
        self.objects.upload(local_path, key).await
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        self.objects.head(key).await
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMetadata>> {
        self.objects.list(prefix)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        self.objects.download(key, local_path).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.delete(key).await
    }
}
