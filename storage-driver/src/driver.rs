use std::{fmt, ops::Deref, sync::Arc};

use tokio::io;

use crate::error::StorageError;
use camino::Utf8Path;
use chrono::{DateTime, Utc};

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// File object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides raw byte access to opaque paths in a bucket.
///
/// Every failure is a [`StorageError`] carrying a kind. Drivers must report
/// missing paths with [`crate::StorageErrorKind::NotFound`], including listing
/// a prefix that has nothing beneath it.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Delete a single file from the storage, by path.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Upload a file to the storage, using a reader stream to provide the contents.
    ///
    /// Uploading to an existing path replaces its contents.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Download a file from storage, into a writer stream.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// List every file beneath a prefix, recursively.
    ///
    /// Returned paths are full paths within the bucket. Without a prefix,
    /// every file in the bucket is listed.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }
}

#[async_trait::async_trait]
impl<D> Driver for &D
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        (**self).delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        (**self).metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        (**self).upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        (**self).download(bucket, remote, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        (**self).list(bucket, prefix).await
    }
}
