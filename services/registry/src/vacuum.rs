//! Physical removal of unreferenced blobs

use storage::StorageBucket;

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::paths::PathMapper;

/// Deletes blobs from global storage.
///
/// Vacuum does not check references. Callers must only remove blobs that
/// nothing links to.
#[derive(Debug, Clone)]
pub struct Vacuum {
    bucket: StorageBucket,
    paths: PathMapper,
}

impl Vacuum {
    /// Create a vacuum over a bucket.
    pub fn new(bucket: StorageBucket, paths: PathMapper) -> Self {
        Self { bucket, paths }
    }

    /// Delete a blob's data and every other file stored in its directory.
    ///
    /// Removing a blob that is already gone succeeds.
    #[tracing::instrument(skip(self, digest), fields(%digest))]
    pub async fn remove_blob(&self, digest: &Digest) -> RegistryResult<()> {
        let dir = self.paths.blob_dir(digest);
        let files = match self.bucket.list(Some(dir.as_path())).await {
            Ok(files) => files,
            Err(err) if err.is_not_found() => {
                tracing::debug!("blob already removed");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        for file in files {
            match self.bucket.delete(camino::Utf8Path::new(&file)).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        tracing::debug!("deleted blob");
        Ok(())
    }
}
