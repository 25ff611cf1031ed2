//! Repository-scoped access to global blobs through link files

use bytes::Bytes;
use camino::Utf8PathBuf;
use futures::stream::BoxStream;

use crate::blobs::{BlobStore, walk};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::Descriptor;
use crate::paths::{LinkKind, PathMapper};
use crate::repository::RepositoryName;

/// A view of the global blob store through one family of repository links.
///
/// Content is written once into the [`BlobStore`]; the repository records
/// ownership with a link file per digest holding only the digest's text.
/// Links for distinct digests live side by side, so writers under the same
/// link root never overwrite each other.
#[derive(Debug, Clone)]
pub struct LinkedBlobStore {
    blobs: BlobStore,
    repository: RepositoryName,
    kind: LinkKind,
}

impl LinkedBlobStore {
    /// Create a linked store for one repository and link kind.
    pub fn new(blobs: BlobStore, repository: RepositoryName, kind: LinkKind) -> Self {
        Self {
            blobs,
            repository,
            kind,
        }
    }

    /// The repository owning these links.
    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    /// The family of links this store manages.
    pub fn kind(&self) -> &LinkKind {
        &self.kind
    }

    fn link_path(&self, digest: &Digest) -> Utf8PathBuf {
        self.blobs
            .paths()
            .link_path(&self.repository, &self.kind, digest)
    }

    /// Store content globally and link it into the repository.
    #[tracing::instrument(skip(self, content), fields(repository = %self.repository, kind = ?self.kind))]
    pub async fn put(&self, media_type: &str, content: &[u8]) -> RegistryResult<Descriptor> {
        let descriptor = self.blobs.put(media_type, content).await?;
        self.link(&descriptor.digest).await?;
        Ok(descriptor)
    }

    /// Create or overwrite the link for a digest already in the blob store.
    pub async fn link(&self, digest: &Digest) -> RegistryResult<()> {
        let path = self.link_path(digest);
        self.blobs
            .bucket()
            .put(&path, digest.to_string().as_bytes())
            .await?;
        tracing::trace!(%digest, %path, "linked blob");
        Ok(())
    }

    /// Read the digest a link points to.
    ///
    /// A missing link is [`RegistryError::BlobNotFound`]. Link files that do
    /// not hold a digest are [`RegistryError::InvalidLink`].
    pub async fn resolve(&self, digest: &Digest) -> RegistryResult<Digest> {
        let path = self.link_path(digest);
        let content = match self.blobs.bucket().get(&path).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => {
                return Err(RegistryError::BlobNotFound(digest.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let invalid = |source| RegistryError::InvalidLink {
            path: path.to_string(),
            source: Box::new(source),
        };
        let text = String::from_utf8(content).map_err(|_| {
            invalid(RegistryError::MalformedDigest {
                digest: String::new(),
                reason: "link is not valid UTF-8",
            })
        })?;
        let target = Digest::parse(text.trim()).map_err(invalid)?;

        if &target != digest {
            tracing::warn!(requested = %digest, %target, "link points at a different digest");
        }
        Ok(target)
    }

    /// Describe the blob behind a link.
    pub async fn stat(&self, digest: &Digest) -> RegistryResult<Descriptor> {
        let target = self.resolve(digest).await?;
        self.blobs.stat(&target).await
    }

    /// Read the blob behind a link.
    pub async fn get(&self, digest: &Digest) -> RegistryResult<Bytes> {
        let target = self.resolve(digest).await?;
        self.blobs.get(&target).await
    }

    /// Whether the link exists and its blob is stored.
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        match self.stat(digest).await {
            Ok(_) => Ok(true),
            Err(RegistryError::BlobNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Remove the link. The blob itself is left for garbage collection.
    #[tracing::instrument(skip(self, digest), fields(repository = %self.repository, %digest))]
    pub async fn unlink(&self, digest: &Digest) -> RegistryResult<()> {
        let path = self.link_path(digest);
        match self.blobs.bucket().delete(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(RegistryError::BlobNotFound(digest.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Stream every linked digest.
    ///
    /// A missing link root surfaces as a storage not-found error, which
    /// callers may classify with [`RegistryError::is_not_found`].
    pub fn enumerate(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        walk(
            self.blobs.bucket(),
            self.blobs.paths().link_root(&self.repository, &self.kind),
            PathMapper::parse_link_path,
        )
    }
}
