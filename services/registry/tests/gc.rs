//! End-to-end garbage collection over real storage drivers

use std::collections::BTreeSet;

use async_trait::async_trait;
use camino::Utf8Path;
use futures::TryStreamExt;
use futures::stream::{self, BoxStream, StreamExt};
use registry::{
    Digest, GcError, LinkKind, LinkedBlobStore, ManifestService, Namespace, OCTET_STREAM,
    Registry, RegistryError, RegistryResult, Repository, RepositoryName, RepositoryStore,
};
use serde_json::json;
use storage::{
    Driver, MemoryStorage, Metadata, Reader, Storage, StorageError, StorageErrorKind, TempDriver,
    Writer,
};

const BUCKET: &str = "registry";
const CONFIG_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const LAYER_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

fn memory() -> (Storage, Registry) {
    let storage: Storage = MemoryStorage::with_buckets(&[BUCKET]).into();
    let registry = Registry::new(storage.bucket(BUCKET));
    (storage, registry)
}

fn repo(registry: &Registry, name: &str) -> RepositoryStore {
    registry.repository(RepositoryName::parse(name).unwrap())
}

async fn snapshot(storage: &Storage) -> Vec<(String, Vec<u8>)> {
    let bucket = storage.bucket(BUCKET);
    let mut files = Vec::new();
    for path in storage.list(BUCKET, None).await.unwrap() {
        let content = bucket.get(Utf8Path::new(&path)).await.unwrap();
        files.push((path, content));
    }
    files
}

async fn stored_blobs(registry: &Registry) -> BTreeSet<Digest> {
    registry.blobs().enumerate().try_collect().await.unwrap()
}

/// An image: one config, some layers, and the manifest tying them together.
struct Image {
    manifest: Digest,
    config: Digest,
    layers: Vec<Digest>,
}

async fn push_image(repository: &RepositoryStore, name: &str, layers: &[&str]) -> Image {
    let blobs = repository.layers();
    let config = blobs
        .put(CONFIG_TYPE, format!("{{\"image\":\"{name}\"}}").as_bytes())
        .await
        .unwrap();

    let mut descriptors = Vec::new();
    for layer in layers {
        descriptors.push(blobs.put(LAYER_TYPE, layer.as_bytes()).await.unwrap());
    }

    let document = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": config,
        "layers": descriptors,
    });
    let manifest = repository
        .manifests()
        .put(&serde_json::to_vec(&document).unwrap())
        .await
        .unwrap();

    Image {
        manifest,
        config: config.digest,
        layers: descriptors.into_iter().map(|d| d.digest).collect(),
    }
}

#[tokio::test]
async fn orphan_is_reported_on_dry_run() {
    let (storage, registry) = memory();
    let image = push_image(&repo(&registry, "app"), "app", &["layer"]).await;
    let orphan = registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap().digest;

    let before = snapshot(&storage).await;
    let report = registry
        .garbage_collector()
        .dry_run(true)
        .run()
        .await
        .unwrap();
    assert_eq!(snapshot(&storage).await, before);

    assert!(report.dry_run);
    assert_eq!(report.marked, 3);
    assert_eq!(report.eligible, vec![orphan.clone()]);
    assert_eq!(report.deleted, 0);

    let text = report.to_string();
    assert!(text.contains(&format!("app: marking manifest {}", image.manifest)));
    assert!(text.contains(&format!("app: marking blob {}", image.layers[0])));
    assert!(text.contains(&format!("app: marking configuration {}", image.config)));
    assert!(text.contains("3 blobs marked, 1 blob eligible for deletion"));
    assert!(text.contains(&format!("blob eligible for deletion: {orphan}")));
}

#[tokio::test]
async fn orphan_is_deleted() {
    let (_storage, registry) = memory();
    let image = push_image(&repo(&registry, "app"), "app", &["layer"]).await;
    let orphan = registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap().digest;

    let report = registry.garbage_collector().run().await.unwrap();
    assert!(!report.dry_run);
    assert!(report.marks.is_empty());
    assert_eq!(report.eligible, vec![orphan.clone()]);
    assert_eq!(report.deleted, 1);

    let expected: BTreeSet<Digest> = [image.manifest, image.config, image.layers[0].clone()]
        .into_iter()
        .collect();
    assert_eq!(stored_blobs(&registry).await, expected);
    assert!(!registry.blobs().exists(&orphan).await.unwrap());

    // Nothing left to collect.
    let report = registry.garbage_collector().run().await.unwrap();
    assert!(report.eligible.is_empty());
    assert_eq!(report.deleted, 0);
}

#[tokio::test]
async fn empty_registry() {
    let (_storage, registry) = memory();
    let report = registry.garbage_collector().run().await.unwrap();
    assert_eq!(report.marked, 0);
    assert!(report.eligible.is_empty());
    assert!(report.to_string().contains("0 blobs marked, 0 blobs eligible for deletion"));
}

#[tokio::test]
async fn repository_without_manifests_is_tolerated() {
    let (_storage, registry) = memory();
    let image = push_image(&repo(&registry, "app"), "app", &["layer"]).await;

    // Only a layer link, as an abandoned upload leaves behind.
    let partial = repo(&registry, "partial")
        .layers()
        .put(LAYER_TYPE, b"unfinished")
        .await
        .unwrap()
        .digest;

    let report = registry.garbage_collector().run().await.unwrap();
    assert_eq!(report.marked, 3);
    assert_eq!(report.eligible, vec![partial]);

    assert!(registry.blobs().exists(&image.manifest).await.unwrap());
}

#[tokio::test]
async fn shared_layers_survive_until_unreferenced() {
    let (_storage, registry) = memory();
    let app = repo(&registry, "app");
    let tools = repo(&registry, "team/tools");

    let first = push_image(&app, "app", &["base", "app"]).await;
    let second = push_image(&tools, "tools", &["base", "tools"]).await;
    let base = first.layers[0].clone();
    assert_eq!(base, second.layers[0]);

    app.manifests().delete(&first.manifest).await.unwrap();
    let report = registry.garbage_collector().run().await.unwrap();

    let reclaimed: BTreeSet<Digest> = report.eligible.into_iter().collect();
    let expected: BTreeSet<Digest> = [
        first.manifest.clone(),
        first.config.clone(),
        first.layers[1].clone(),
    ]
    .into_iter()
    .collect();
    assert_eq!(reclaimed, expected);
    assert!(registry.blobs().exists(&base).await.unwrap());

    tools.manifests().delete(&second.manifest).await.unwrap();
    registry.garbage_collector().run().await.unwrap();
    assert!(stored_blobs(&registry).await.is_empty());
}

#[tokio::test]
async fn tags_do_not_keep_manifests_alive() {
    let (_storage, registry) = memory();
    let app = repo(&registry, "app");
    let image = push_image(&app, "app", &["layer"]).await;
    app.tags().tag("latest", &image.manifest).await.unwrap();

    app.manifests().delete(&image.manifest).await.unwrap();
    let report = registry.garbage_collector().run().await.unwrap();
    assert_eq!(report.eligible.len(), 3);
    assert!(stored_blobs(&registry).await.is_empty());
}

#[tokio::test]
async fn index_keeps_child_manifests() {
    let (_storage, registry) = memory();
    let app = repo(&registry, "app");
    let child = push_image(&app, "child", &["layer"]).await;
    app.manifests().delete(&child.manifest).await.unwrap();

    let child_descriptor = registry.blobs().stat(&child.manifest).await.unwrap();
    let index = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [child_descriptor],
    });
    let index = app
        .manifests()
        .put(&serde_json::to_vec(&index).unwrap())
        .await
        .unwrap();

    let report = registry.garbage_collector().run().await.unwrap();
    assert!(registry.blobs().exists(&index).await.unwrap());
    assert!(registry.blobs().exists(&child.manifest).await.unwrap());

    // Only the index and its direct references are reachable.
    let eligible: BTreeSet<Digest> = report.eligible.into_iter().collect();
    let expected: BTreeSet<Digest> = [child.config, child.layers[0].clone()].into_iter().collect();
    assert_eq!(eligible, expected);
}

#[tokio::test]
async fn signatures_are_collected_with_their_manifest() {
    let (_storage, registry) = memory();
    let app = repo(&registry, "app");
    let image = push_image(&app, "app", &["layer"]).await;
    app.signatures()
        .put(&image.manifest, &["sig-one", "sig-two"])
        .await
        .unwrap();

    assert_eq!(app.signatures().get(&image.manifest).await.len(), 2);

    // Signature blobs are not manifest references, so they are not marked.
    let report = registry
        .garbage_collector()
        .dry_run(true)
        .run()
        .await
        .unwrap();
    assert_eq!(report.marked, 3);
    assert_eq!(report.eligible.len(), 2);
}

#[tokio::test]
async fn unreadable_manifest_aborts_before_deleting() {
    let (storage, registry) = memory();
    push_image(&repo(&registry, "app"), "app", &["layer"]).await;
    registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap();

    let name = RepositoryName::parse("broken").unwrap();
    let revisions = LinkedBlobStore::new(registry.blobs(), name, LinkKind::ManifestRevision);
    let bad = revisions.put(OCTET_STREAM, b"not a manifest").await.unwrap().digest;

    let before = snapshot(&storage).await;
    let err = registry.garbage_collector().run().await.unwrap_err();
    match err {
        GcError::FetchManifest {
            repository, digest, ..
        } => {
            assert_eq!(repository.as_str(), "broken");
            assert_eq!(digest, bad);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(snapshot(&storage).await, before);
}

#[tokio::test]
async fn invalid_repository_name_aborts() {
    let (storage, registry) = memory();
    let orphan = registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap().digest;

    let path = registry
        .paths()
        .repositories_root()
        .join("Not_Valid/_layers/sha256")
        .join(orphan.hex())
        .join("link");
    storage
        .bucket(BUCKET)
        .put(&path, orphan.to_string().as_bytes())
        .await
        .unwrap();

    let err = registry.garbage_collector().run().await.unwrap_err();
    assert!(matches!(err, GcError::RepositoryName { ref name, .. } if name == "Not_Valid"));
    assert!(registry.blobs().exists(&orphan).await.unwrap());
}

#[tokio::test]
async fn malformed_blob_path_aborts_sweep() {
    let (storage, registry) = memory();
    let orphan = registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap().digest;

    let path = registry
        .paths()
        .blobs_root()
        .join("sha256/zz/not-a-digest/data");
    storage.bucket(BUCKET).put(&path, b"junk").await.unwrap();

    let err = registry.garbage_collector().run().await.unwrap_err();
    assert!(matches!(err, GcError::EnumerateBlobs(_)));
    assert!(registry.blobs().exists(&orphan).await.unwrap());
}

#[tokio::test]
async fn concurrent_marking_matches_sequential() {
    let (_storage, registry) = memory();
    let mut live = BTreeSet::new();
    for i in 0..12 {
        let name = format!("repo-{i}");
        let image = push_image(&repo(&registry, &name), &name, &["shared", name.as_str()]).await;
        live.insert(image.manifest);
        live.insert(image.config);
        live.extend(image.layers);
    }
    registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap();

    for concurrency in [1, 8] {
        let report = registry
            .garbage_collector()
            .dry_run(true)
            .concurrency(concurrency)
            .run()
            .await
            .unwrap();
        assert_eq!(report.marked, live.len());
        assert_eq!(report.eligible.len(), 1);
    }
}

#[tokio::test]
async fn local_storage_end_to_end() {
    let driver = TempDriver::new().unwrap();
    let storage: Storage = driver.into();
    let registry = Registry::new(storage.bucket(BUCKET));

    let image = push_image(&repo(&registry, "library/app"), "app", &["layer"]).await;
    let orphan = registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap().digest;

    let report = registry.garbage_collector().run().await.unwrap();
    assert_eq!(report.eligible, vec![orphan.clone()]);
    assert!(!registry.blobs().exists(&orphan).await.unwrap());

    let expected: BTreeSet<Digest> = [image.manifest, image.config, image.layers[0].clone()]
        .into_iter()
        .collect();
    assert_eq!(stored_blobs(&registry).await, expected);
}

/// Fails deletes or listings beneath one path, passing everything else
/// through to memory storage.
#[derive(Debug, Default)]
struct Faulty {
    inner: MemoryStorage,
    deletes: Option<String>,
    lists: Option<String>,
}

impl Faulty {
    fn new() -> Self {
        Self {
            inner: MemoryStorage::with_buckets(&[BUCKET]),
            ..Default::default()
        }
    }

    fn failing_deletes(mut self, path: impl Into<String>) -> Self {
        self.deletes = Some(path.into());
        self
    }

    fn failing_lists(mut self, path: impl Into<String>) -> Self {
        self.lists = Some(path.into());
        self
    }
}

fn matches_fault(fault: &Option<String>, path: &str) -> bool {
    fault.as_deref().is_some_and(|fault| path.contains(fault))
}

#[async_trait]
impl Driver for Faulty {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        if matches_fault(&self.deletes, remote.as_str()) {
            return Err(StorageError::new(
                self.name(),
                StorageErrorKind::PermissionDenied,
                std::io::Error::other("delete refused"),
            ));
        }
        self.inner.delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.inner.metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.inner.upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.inner.download(bucket, remote, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        if matches_fault(&self.lists, prefix.map(Utf8Path::as_str).unwrap_or_default()) {
            return Err(StorageError::new(
                self.name(),
                StorageErrorKind::Io,
                std::io::Error::other("listing failed"),
            ));
        }
        self.inner.list(bucket, prefix).await
    }
}

#[tokio::test]
async fn delete_failure_aborts_run() {
    let poisoned = Digest::sha256(b"stuck");
    let storage: Storage = Faulty::new().failing_deletes(poisoned.hex()).into();
    let registry = Registry::new(storage.bucket(BUCKET));

    registry.blobs().put(OCTET_STREAM, b"stuck").await.unwrap();
    registry.blobs().put(OCTET_STREAM, b"loose").await.unwrap();

    let err = registry.garbage_collector().run().await.unwrap_err();
    match err {
        GcError::Delete { digest, source } => {
            assert_eq!(digest, poisoned);
            assert!(matches!(source, RegistryError::Storage(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(registry.blobs().exists(&poisoned).await.unwrap());
}

#[tokio::test]
async fn manifest_listing_failure_aborts_before_deleting() {
    let storage: Storage = Faulty::new()
        .failing_lists("app/_manifests/revisions")
        .into();
    let registry = Registry::new(storage.bucket(BUCKET));
    let image = push_image(&repo(&registry, "app"), "app", &["layer"]).await;
    registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap();

    let before = snapshot(&storage).await;
    let err = registry.garbage_collector().run().await.unwrap_err();
    match err {
        GcError::EnumerateManifests { repository, source } => {
            assert_eq!(repository.as_str(), "app");
            assert!(!source.is_not_found());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(snapshot(&storage).await, before);
    assert!(registry.blobs().exists(&image.layers[0]).await.unwrap());
}

/// A namespace whose repositories cannot be opened.
#[derive(Debug)]
struct Unreachable;

#[async_trait]
impl Namespace for Unreachable {
    fn repositories(&self) -> BoxStream<'_, RegistryResult<String>> {
        stream::iter([Ok("app".to_string())]).boxed()
    }

    fn blobs(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        stream::empty().boxed()
    }

    async fn repository(&self, name: &RepositoryName) -> RegistryResult<Box<dyn Repository>> {
        Err(RegistryError::Storage(StorageError::new(
            "unreachable",
            StorageErrorKind::Io,
            std::io::Error::other(format!("{name} is offline")),
        )))
    }
}

#[tokio::test]
async fn repository_construction_failure_aborts() {
    let (_storage, registry) = memory();
    let orphan = registry.blobs().put(OCTET_STREAM, b"orphan").await.unwrap().digest;

    let err = registry::GarbageCollector::new(&Unreachable, registry.vacuum())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, GcError::Repository { .. }));
    assert!(registry.blobs().exists(&orphan).await.unwrap());
}

/// A repository whose manifest listing is missing, and whose manifests
/// cannot be fetched.
#[derive(Debug)]
struct Vanished {
    name: RepositoryName,
}

#[async_trait]
impl Repository for Vanished {
    fn name(&self) -> &RepositoryName {
        &self.name
    }

    async fn manifests(&self) -> RegistryResult<Box<dyn ManifestService>> {
        Ok(Box::new(VanishedManifests))
    }
}

#[derive(Debug)]
struct VanishedManifests;

#[async_trait]
impl ManifestService for VanishedManifests {
    fn enumerate(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        let missing = StorageError::not_found("fake", BUCKET, "_manifests/revisions");
        stream::iter([Err(missing.into())]).boxed()
    }

    async fn get(&self, digest: &Digest) -> RegistryResult<Box<dyn registry::Manifest>> {
        Err(RegistryError::ManifestNotFound(digest.to_string()))
    }
}

#[derive(Debug)]
struct VanishedNamespace;

#[async_trait]
impl Namespace for VanishedNamespace {
    fn repositories(&self) -> BoxStream<'_, RegistryResult<String>> {
        stream::iter(["one", "two"].map(|name| Ok(name.to_string()))).boxed()
    }

    fn blobs(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        stream::iter([Ok(Digest::sha256(b"leftover"))]).boxed()
    }

    async fn repository(&self, name: &RepositoryName) -> RegistryResult<Box<dyn Repository>> {
        Ok(Box::new(Vanished { name: name.clone() }))
    }
}

#[tokio::test]
async fn missing_manifest_listing_through_namespace_is_tolerated() {
    let (_storage, registry) = memory();
    let report = registry::GarbageCollector::new(&VanishedNamespace, registry.vacuum())
        .dry_run(true)
        .run()
        .await
        .unwrap();
    assert_eq!(report.marked, 0);
    assert_eq!(report.eligible, vec![Digest::sha256(b"leftover")]);
}
