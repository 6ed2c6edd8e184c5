//! Object store access.
//!
//! Snapshots live in a single bucket of an S3-compatible store (AWS S3,
//! MinIO, Ceph RGW). The [`ObjectStoreGateway`] trait is the only way the
//! workflows touch the store:
//!
//! - **S3**: production gateway
//! - **Memory**: in-memory gateway (for testing)

mod gateway;
mod memory;
mod objects;
mod s3;

pub use gateway::{ObjectMetadata, ObjectStoreGateway};
pub use memory::MemoryGateway;
pub use s3::S3Gateway;

use crate::config::ObjectStoreConfig;
use crate::Result;
use std::sync::Arc;

/// Create the production gateway from configuration.
pub fn create_gateway(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStoreGateway>> {
    Ok(Arc::new(S3Gateway::new(config)?))
}
