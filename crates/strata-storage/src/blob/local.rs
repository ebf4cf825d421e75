//! Local filesystem implementation of BlobStore
//!
//! Stores blobs as files under a base directory, with the key as the
//! relative path. Intended for tests and single-node deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use strata_core::{MetaError, MetaResult};

use super::BlobStore;

/// Local filesystem blob store.
pub struct LocalBlobStore {
    base_dir: PathBuf,
    root: String,
}

impl LocalBlobStore {
    /// Creates a store rooted at `base_dir`, creating the directory when it
    /// does not exist. `root` is the logical prefix reported by
    /// [`BlobStore::root_path`] and prepended to every key on disk.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::IoError` when directory creation fails.
    pub async fn new(base_dir: impl AsRef<Path>, root: impl Into<String>) -> MetaResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            root: root.into(),
        })
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn list_recursive<'a>(
        &'a self,
        dir: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = MetaResult<Vec<PathBuf>>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut results = Vec::new();
            let mut read_dir = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await?;
                if metadata.is_file() {
                    results.push(path);
                } else if metadata.is_dir() {
                    let mut sub = self.list_recursive(&path).await?;
                    results.append(&mut sub);
                }
            }
            Ok(results)
        })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn root_path(&self) -> &str {
        &self.root
    }

    async fn read(&self, key: &str) -> MetaResult<Bytes> {
        let path = self.full_path(key);
        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MetaError::not_found("blob", key)
            } else {
                MetaError::from(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &str, data: Bytes) -> MetaResult<()> {
        if key.is_empty() {
            return Err(MetaError::Parameter("blob key cannot be empty".to_string()));
        }
        let path = self.full_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> MetaResult<bool> {
        Ok(tokio::fs::try_exists(self.full_path(key)).await.unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> MetaResult<()> {
        let path = self.full_path(key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> MetaResult<Vec<String>> {
        let prefix_path = self.full_path(prefix);
        if !tokio::fs::try_exists(&prefix_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let metadata = tokio::fs::metadata(&prefix_path).await?;
        let files = if metadata.is_file() {
            vec![prefix_path]
        } else {
            self.list_recursive(&prefix_path).await?
        };

        let mut keys = Vec::with_capacity(files.len());
        for path in files {
            if let Some(key) = path
                .strip_prefix(&self.base_dir)
                .ok()
                .and_then(|p| p.to_str())
            {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "files").await.unwrap();

        let data = Bytes::from("tombstones");
        store.write("delta_log/1/2/3/0/7", data.clone()).await.unwrap();
        let read = store.read("delta_log/1/2/3/0/7").await.unwrap();
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_missing_read_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "files").await.unwrap();

        let err = store.read("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "files").await.unwrap();

        store.write("a", Bytes::from("x")).await.unwrap();
        store.delete("a").await.unwrap();
        assert!(!store.exists("a").await.unwrap());
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "files").await.unwrap();

        store.write("delta_log/1/a", Bytes::from("1")).await.unwrap();
        store.write("delta_log/1/b", Bytes::from("2")).await.unwrap();
        store.write("insert_log/1/c", Bytes::from("3")).await.unwrap();

        let keys = store.list("delta_log").await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "files").await.unwrap();
        assert!(matches!(
            store.write("", Bytes::from("x")).await,
            Err(MetaError::Parameter(_))
        ));
    }
}
