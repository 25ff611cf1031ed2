//! Enumeration interfaces consumed by the garbage collector
//!
//! Every enumeration is a lazy stream. Consumers stop at the first error they
//! treat as fatal; there is no cursor, so restarting means enumerating again.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::manifest::Manifest;
use crate::repository::RepositoryName;

/// The set of repositories and global blobs in a registry.
#[async_trait]
pub trait Namespace: fmt::Debug + Send + Sync {
    /// Stream every repository name, unvalidated, in storage order.
    fn repositories(&self) -> BoxStream<'_, RegistryResult<String>>;

    /// Stream every digest in global blob storage.
    fn blobs(&self) -> BoxStream<'_, RegistryResult<Digest>>;

    /// Open a repository.
    async fn repository(&self, name: &RepositoryName) -> RegistryResult<Box<dyn Repository>>;
}

/// A handle on one repository.
#[async_trait]
pub trait Repository: fmt::Debug + Send + Sync {
    /// The repository name.
    fn name(&self) -> &RepositoryName;

    /// Open the repository's manifest service.
    async fn manifests(&self) -> RegistryResult<Box<dyn ManifestService>>;
}

/// The manifests of one repository.
#[async_trait]
pub trait ManifestService: fmt::Debug + Send + Sync {
    /// Stream every manifest digest.
    ///
    /// A repository whose manifest directory does not exist yields a storage
    /// not-found error.
    fn enumerate(&self) -> BoxStream<'_, RegistryResult<Digest>>;

    /// Fetch a manifest.
    async fn get(&self, digest: &Digest) -> RegistryResult<Box<dyn Manifest>>;
}
