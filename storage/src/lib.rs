//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[cfg(feature = "tmp")]
#[doc(inline)]
pub use temp::TempDriver;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Storage backend selection, as it appears in configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Volatile in-process storage with a single bucket.
    Memory {
        /// Bucket to create up front.
        bucket: String,
    },

    /// Files under a local directory.
    #[cfg(feature = "local")]
    Local {
        /// Root directory; each bucket is a directory beneath it.
        path: Utf8PathBuf,
    },

    /// Files under a fresh temporary directory, removed on drop.
    #[cfg(feature = "tmp")]
    Temp,
}

impl StorageConfig {
    /// Build the configured storage backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "tmp")]
            StorageConfig::Temp => TempDriver::new()
                .map_err(|err| StorageError::from_io("temp", err))?
                .into(),
        };
        Ok(client)
    }
}

use tokio::io;

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable, driver-erased handle to a storage backend.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle bound to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }

    /// Get the metadata for a file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, remote).await
    }

    /// Download a file into a writer.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {bucket}/{remote}");
        self.driver.download(bucket, remote, writer).await?;
        Ok(())
    }

    /// Upload a file from a reader.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {bucket}/{remote}");
        self.driver.upload(bucket, remote, reader).await?;
        Ok(())
    }

    /// List every file beneath a prefix.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket))]
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list(bucket, prefix).await
    }

    /// Delete a file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, path).await
    }
}

/// A storage handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket name.
    pub bucket: String,
    driver: Arc<dyn Driver + Send + Sync + 'static>,
}

impl StorageBucket {
    /// The name of the underlying driver.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Get the metadata for a file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    /// Download a file into a writer.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await?;
        Ok(())
    }

    /// Upload a file from a reader.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await?;
        Ok(())
    }

    /// Read a whole file into memory.
    pub async fn get(&self, remote: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let mut data = Vec::new();
        self.download(remote, &mut data).await?;
        Ok(data)
    }

    /// Write a whole file from memory, replacing any previous contents.
    pub async fn put(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = io::BufReader::new(data);
        self.upload(remote, &mut reader).await
    }

    /// List every file beneath a prefix.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Delete a file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }
}
