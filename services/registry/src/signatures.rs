//! Detached signatures attached to manifest revisions

use bytes::Bytes;
use futures::StreamExt;

use crate::blobs::BlobStore;
use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::linked::LinkedBlobStore;
use crate::paths::LinkKind;
use crate::repository::RepositoryName;

const SIGNATURE_MEDIA_TYPE: &str = "application/json";

/// Signatures for the manifests of one repository.
///
/// Each signature is a blob linked beneath its manifest revision. Reads are
/// best effort: missing or unreadable links are logged and skipped.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    blobs: BlobStore,
    repository: RepositoryName,
}

impl SignatureStore {
    /// Create a signature store for a repository.
    pub fn new(blobs: BlobStore, repository: RepositoryName) -> Self {
        Self { blobs, repository }
    }

    fn linked(&self, revision: &Digest) -> LinkedBlobStore {
        LinkedBlobStore::new(
            self.blobs.clone(),
            self.repository.clone(),
            LinkKind::Signature {
                revision: revision.clone(),
            },
        )
    }

    /// Every readable signature for a manifest revision.
    ///
    /// A revision without signatures yields an empty list.
    #[tracing::instrument(skip(self, revision), fields(repository = %self.repository, %revision))]
    pub async fn get(&self, revision: &Digest) -> Vec<Bytes> {
        let linked = self.linked(revision);
        let mut signatures = Vec::new();
        let mut links = linked.enumerate();

        while let Some(link) = links.next().await {
            let digest = match link {
                Ok(digest) => digest,
                Err(err) if err.is_not_found() => {
                    tracing::trace!("no signatures");
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable signature link");
                    continue;
                }
            };

            match linked.get(&digest).await {
                Ok(signature) => signatures.push(signature),
                Err(err) => {
                    tracing::warn!(%digest, error = %err, "skipping unreadable signature");
                }
            }
        }

        signatures
    }

    /// Store signatures for a manifest revision alongside any already stored.
    ///
    /// Stops at the first signature that fails to store.
    pub async fn put<S: AsRef<[u8]>>(&self, revision: &Digest, signatures: &[S]) -> RegistryResult<()> {
        let linked = self.linked(revision);
        for signature in signatures {
            linked.put(SIGNATURE_MEDIA_TYPE, signature.as_ref()).await?;
        }
        Ok(())
    }
}
