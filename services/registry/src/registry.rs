//! Storage-backed registry namespace

use std::collections::BTreeSet;

use async_trait::async_trait;
use camino::Utf8Path;
use futures::stream::{self, BoxStream, StreamExt};
use storage::StorageBucket;

use crate::blobs::BlobStore;
use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::gc::GarbageCollector;
use crate::manifest::Manifest;
use crate::namespace::{ManifestService, Namespace, Repository};
use crate::paths::PathMapper;
use crate::repository::{ManifestStore, RepositoryName, RepositoryStore};
use crate::vacuum::Vacuum;

/// A registry laid out in one storage bucket.
#[derive(Debug, Clone)]
pub struct Registry {
    bucket: StorageBucket,
    paths: PathMapper,
}

impl Registry {
    /// Create a registry in a bucket, using the default layout root.
    pub fn new(bucket: StorageBucket) -> Self {
        Self::with_paths(bucket, PathMapper::default())
    }

    /// Create a registry in a bucket with a custom layout.
    pub fn with_paths(bucket: StorageBucket, paths: PathMapper) -> Self {
        Self { bucket, paths }
    }

    /// The storage layout.
    pub fn paths(&self) -> &PathMapper {
        &self.paths
    }

    /// The global blob store.
    pub fn blobs(&self) -> BlobStore {
        BlobStore::new(self.bucket.clone(), self.paths.clone())
    }

    /// Open a repository by name.
    pub fn repository(&self, name: RepositoryName) -> RepositoryStore {
        RepositoryStore::new(self.blobs(), name)
    }

    /// The blob deletion primitive for this registry.
    pub fn vacuum(&self) -> Vacuum {
        Vacuum::new(self.bucket.clone(), self.paths.clone())
    }

    /// A garbage collector over this registry.
    pub fn garbage_collector(&self) -> GarbageCollector<'_, Self> {
        GarbageCollector::new(self, self.vacuum())
    }

    /// Stream the name of every repository holding at least one link.
    ///
    /// Names are derived from paths, up to the first `_`-prefixed component,
    /// and are not validated. An empty registry yields nothing.
    pub fn repository_names(&self) -> BoxStream<'_, RegistryResult<String>> {
        stream::once(async move {
            let root = self.paths.repositories_root();
            let items: Vec<RegistryResult<String>> =
                match self.bucket.list(Some(root.as_path())).await {
                    Ok(files) => repository_names(&root, &files).into_iter().map(Ok).collect(),
                    Err(err) if err.is_not_found() => Vec::new(),
                    Err(err) => vec![Err(err.into())],
                };
            stream::iter(items)
        })
        .flatten()
        .boxed()
    }
}

fn repository_names(root: &Utf8Path, files: &[String]) -> BTreeSet<String> {
    files
        .iter()
        .filter_map(|file| {
            let relative = Utf8Path::new(file).strip_prefix(root).ok()?;
            let components: Vec<&str> = relative
                .iter()
                .take_while(|component| !component.starts_with('_'))
                .collect();
            if components.is_empty() || components.len() == relative.iter().count() {
                return None;
            }
            Some(components.join("/"))
        })
        .collect()
}

#[async_trait]
impl Namespace for Registry {
    fn repositories(&self) -> BoxStream<'_, RegistryResult<String>> {
        self.repository_names()
    }

    fn blobs(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        crate::blobs::enumerate_blobs(&self.bucket, &self.paths)
    }

    async fn repository(&self, name: &RepositoryName) -> RegistryResult<Box<dyn Repository>> {
        Ok(Box::new(Registry::repository(self, name.clone())))
    }
}

#[async_trait]
impl Repository for RepositoryStore {
    fn name(&self) -> &RepositoryName {
        RepositoryStore::name(self)
    }

    async fn manifests(&self) -> RegistryResult<Box<dyn ManifestService>> {
        Ok(Box::new(RepositoryStore::manifests(self)))
    }
}

#[async_trait]
impl ManifestService for ManifestStore {
    fn enumerate(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        ManifestStore::enumerate(self)
    }

    async fn get(&self, digest: &Digest) -> RegistryResult<Box<dyn Manifest>> {
        ManifestStore::get(self, digest).await
    }
}
