//! In-memory blob store for testing
//!
//! Backs the completer's copy path in tests and supports scripted failure
//! injection to exercise abort semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use strata_core::{MetaError, MetaResult};

use super::BlobStore;

/// Operations a [`MemoryBlobStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobOp {
    Read,
    Write,
    Delete,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Bytes>,
    fail_next: Vec<BlobOp>,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    root: String,
    inner: Mutex<Inner>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Makes the next invocation of `op` fail with a storage error.
    pub fn fail_next(&self, op: BlobOp) {
        self.inner.lock().fail_next.push(op);
    }

    /// Number of blobs currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    /// Whether the store holds no blobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(&self, op: BlobOp) -> bool {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.fail_next.iter().position(|o| *o == op) {
            inner.fail_next.remove(idx);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn root_path(&self) -> &str {
        &self.root
    }

    async fn read(&self, key: &str) -> MetaResult<Bytes> {
        if self.take_failure(BlobOp::Read) {
            return Err(MetaError::Storage(format!("injected read failure: {key}")));
        }
        self.inner
            .lock()
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| MetaError::not_found("blob", key))
    }

    async fn write(&self, key: &str, data: Bytes) -> MetaResult<()> {
        if key.is_empty() {
            return Err(MetaError::Parameter("blob key cannot be empty".to_string()));
        }
        if self.take_failure(BlobOp::Write) {
            return Err(MetaError::Storage(format!("injected write failure: {key}")));
        }
        self.inner.lock().blobs.insert(key.to_string(), data);
        Ok(())
    }

    async fn exists(&self, key: &str) -> MetaResult<bool> {
        Ok(self.inner.lock().blobs.contains_key(key))
    }

    async fn delete(&self, key: &str) -> MetaResult<()> {
        if self.take_failure(BlobOp::Delete) {
            return Err(MetaError::Storage(format!("injected delete failure: {key}")));
        }
        self.inner.lock().blobs.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> MetaResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let store = MemoryBlobStore::new("files");
        store.write("k", Bytes::from("v")).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), Bytes::from("v"));
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let store = MemoryBlobStore::new("files");
        store.write("k", Bytes::from("v")).await.unwrap();

        store.fail_next(BlobOp::Read);
        assert!(matches!(
            store.read("k").await,
            Err(MetaError::Storage(_))
        ));
        assert_eq!(store.read("k").await.unwrap(), Bytes::from("v"));
    }
}
