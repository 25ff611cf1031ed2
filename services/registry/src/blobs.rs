//! Global, deduplicated blob storage

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use futures::stream::{self, BoxStream, StreamExt};
use storage::StorageBucket;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::Descriptor;
use crate::paths::PathMapper;

/// Media type recorded for blobs written without a more specific type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Stream every file under `root`, parsing each path relative to `root`.
///
/// The recursive listing is fetched in one call when the stream is first
/// polled and buffered, so nothing is yielded before the whole listing is in
/// memory. Paths the parser ignores are skipped. A listing failure, including
/// a missing `root`, is yielded as the stream's only item.
pub(crate) fn walk<'a, T, F>(
    bucket: &'a StorageBucket,
    root: Utf8PathBuf,
    parse: F,
) -> BoxStream<'a, RegistryResult<T>>
where
    T: Send + 'a,
    F: Fn(&Utf8Path) -> Option<RegistryResult<T>> + Send + 'a,
{
    stream::once(async move {
        let items: Vec<RegistryResult<T>> = match bucket.list(Some(root.as_path())).await {
            Ok(paths) => paths
                .iter()
                .filter_map(|path| {
                    let relative = Utf8Path::new(path).strip_prefix(&root).ok()?;
                    parse(relative)
                })
                .collect(),
            Err(err) => vec![Err(err.into())],
        };
        stream::iter(items)
    })
    .flatten()
    .boxed()
}

/// Drop a storage not-found error from a walk, turning a missing root into
/// an empty stream.
pub(crate) fn skip_missing<'a, T: Send + 'a>(
    items: BoxStream<'a, RegistryResult<T>>,
) -> BoxStream<'a, RegistryResult<T>> {
    items
        .filter(|item| {
            let missing = matches!(item, Err(err) if err.is_not_found());
            futures::future::ready(!missing)
        })
        .boxed()
}

/// Stream the digest of every blob stored under `paths`.
///
/// An empty blob area yields nothing. A malformed blob path is an error.
pub(crate) fn enumerate_blobs<'a>(
    bucket: &'a StorageBucket,
    paths: &PathMapper,
) -> BoxStream<'a, RegistryResult<Digest>> {
    skip_missing(walk(bucket, paths.blobs_root(), PathMapper::parse_blob_path))
}

/// The global blob area: content stored once per distinct digest.
#[derive(Debug, Clone)]
pub struct BlobStore {
    bucket: StorageBucket,
    paths: PathMapper,
}

impl BlobStore {
    /// Create a blob store over a bucket.
    pub fn new(bucket: StorageBucket, paths: PathMapper) -> Self {
        Self { bucket, paths }
    }

    pub(crate) fn bucket(&self) -> &StorageBucket {
        &self.bucket
    }

    pub(crate) fn paths(&self) -> &PathMapper {
        &self.paths
    }

    /// Describe a stored blob.
    #[tracing::instrument(skip(self, digest), fields(%digest))]
    pub async fn stat(&self, digest: &Digest) -> RegistryResult<Descriptor> {
        let path = self.paths.blob_data(digest);
        match self.bucket.metadata(&path).await {
            Ok(metadata) => Ok(Descriptor::new(OCTET_STREAM, digest.clone(), metadata.size)),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobNotFound(digest.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Check if a blob exists.
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        match self.stat(digest).await {
            Ok(_) => Ok(true),
            Err(RegistryError::BlobNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read a blob's content.
    #[tracing::instrument(skip(self, digest), fields(%digest))]
    pub async fn get(&self, digest: &Digest) -> RegistryResult<Bytes> {
        let path = self.paths.blob_data(digest);
        match self.bucket.get(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobNotFound(digest.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Store content under its SHA-256 digest.
    ///
    /// Writing content that is already stored is a no-op.
    pub async fn put(&self, media_type: &str, content: &[u8]) -> RegistryResult<Descriptor> {
        let digest = Digest::sha256(content);
        self.write(media_type, digest, content).await
    }

    /// Store content, rejecting it unless it hashes to `expected`.
    pub async fn put_verified(
        &self,
        media_type: &str,
        expected: &Digest,
        content: &[u8],
    ) -> RegistryResult<Descriptor> {
        expected.verify(content)?;
        self.write(media_type, expected.clone(), content).await
    }

    #[tracing::instrument(skip(self, digest, content), fields(%digest, size = content.len()))]
    async fn write(
        &self,
        media_type: &str,
        digest: Digest,
        content: &[u8],
    ) -> RegistryResult<Descriptor> {
        let descriptor = Descriptor::new(media_type, digest, content.len() as u64);
        if self.exists(&descriptor.digest).await? {
            tracing::trace!("blob already stored");
            return Ok(descriptor);
        }

        let path = self.paths.blob_data(&descriptor.digest);
        self.bucket.put(&path, content).await?;
        tracing::debug!("stored blob");
        Ok(descriptor)
    }

    /// Stream the digest of every stored blob, in storage order.
    ///
    /// An empty store yields nothing. Paths under the blob root that look like
    /// blob data but do not hold a valid digest are yielded as errors.
    pub fn enumerate(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        enumerate_blobs(&self.bucket, &self.paths)
    }
}
