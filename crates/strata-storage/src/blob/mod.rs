//! Blob store abstraction for log files.
//!
//! A narrow, S3-shaped interface: keys are opaque UTF-8 strings, values are
//! whole blobs. The control plane only ever reads, writes, and lists; it
//! never mutates a blob in place.

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::{BlobOp, MemoryBlobStore};

use async_trait::async_trait;
use bytes::Bytes;

use strata_core::MetaResult;

/// Blob store contract.
///
/// All implementations must be thread-safe and support concurrent
/// operations.
///
/// # Error Handling
///
/// - `MetaError::NotFound` - blob does not exist (read; delete is idempotent)
/// - `MetaError::Storage` - backend-specific failure
/// - `MetaError::IoError` - filesystem failure (local backend only)
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Root prefix all keys of this store live under.
    fn root_path(&self) -> &str;

    /// Reads a whole blob.
    ///
    /// # Errors
    ///
    /// - `MetaError::NotFound` if the blob does not exist
    async fn read(&self, key: &str) -> MetaResult<Bytes>;

    /// Writes a whole blob, overwriting any existing one.
    ///
    /// # Errors
    ///
    /// - `MetaError::Parameter` if the key is empty
    async fn write(&self, key: &str, data: Bytes) -> MetaResult<()>;

    /// Whether a blob exists at the key.
    async fn exists(&self, key: &str) -> MetaResult<bool>;

    /// Deletes a blob. Missing blobs are a no-op.
    async fn delete(&self, key: &str) -> MetaResult<()>;

    /// Lists every key under a prefix.
    async fn list(&self, prefix: &str) -> MetaResult<Vec<String>>;
}
