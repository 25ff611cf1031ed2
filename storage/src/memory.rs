use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Storage driver that stores files in memory.
///
/// Paths are plain keys, so "directories" exist only as long as some file
/// lives beneath them.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new bucket in the storage.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.insert(bucket, HashMap::new());
    }

    fn missing_bucket(&self, bucket: &str) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Bucket not found: {bucket}"),
            ),
        )
        .bucket(bucket)
        .context("bucket not found")
        .build()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        Ok(bucket_map
            .get(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        bucket_map
            .remove(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?;

        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(local, &mut buf)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        buf.shutdown()
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        let mut buf = bucket_map
            .get(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, remote.as_str()))?
            .as_ref();

        tokio::io::copy(&mut buf, local)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;

        let mut paths: Vec<String> = bucket_map
            .keys()
            .filter(|path| prefix.map_or(true, |prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect();

        if let Some(prefix) = prefix {
            if paths.is_empty() {
                return Err(StorageError::not_found(self.name(), bucket, prefix.as_str()));
            }
        }

        paths.sort();
        Ok(paths)
    }
}
