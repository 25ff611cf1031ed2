//! Repositories: named collections of manifests, tags, and layer links

use std::fmt;
use std::str::FromStr;

use futures::stream::BoxStream;

use crate::blobs::BlobStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::linked::LinkedBlobStore;
use crate::manifest::{self, Manifest};
use crate::paths::LinkKind;
use crate::signatures::SignatureStore;

const MAX_NAME_LENGTH: usize = 255;
const MAX_TAG_LENGTH: usize = 128;

/// A validated repository name, such as `library/ubuntu`.
///
/// Names are one or more `/`-separated components. Each component is
/// lowercase alphanumeric runs joined by a single `.`, a single or double
/// `_`, or any number of `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryName(String);

impl RepositoryName {
    /// Validate a repository name.
    pub fn parse(name: &str) -> RegistryResult<Self> {
        let invalid = |reason| RegistryError::InvalidRepository {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(invalid("name is longer than 255 characters"));
        }
        for component in name.split('/') {
            validate_component(component).map_err(invalid)?;
        }

        Ok(Self(name.to_string()))
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_component(component: &str) -> Result<(), &'static str> {
    let bytes = component.as_bytes();
    let alphanumeric = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (None, _) => return Err("empty path component"),
        (Some(first), Some(last)) if !alphanumeric(first) || !alphanumeric(last) => {
            return Err("components must start and end with a lowercase letter or digit");
        }
        _ => {}
    }

    let mut i = 0;
    while i < bytes.len() {
        if alphanumeric(&bytes[i]) {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && !alphanumeric(&bytes[i]) {
            i += 1;
        }
        match &component[start..i] {
            "." | "_" | "__" => {}
            run if run.bytes().all(|b| b == b'-') => {}
            _ => return Err("invalid separator in component"),
        }
    }

    Ok(())
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepositoryName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepositoryName::parse(s)
    }
}

impl AsRef<str> for RepositoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Storage-backed access to one repository.
#[derive(Debug, Clone)]
pub struct RepositoryStore {
    blobs: BlobStore,
    name: RepositoryName,
}

impl RepositoryStore {
    /// Open a repository over the global blob store.
    ///
    /// Repositories need no creation step; they exist once something is
    /// linked into them.
    pub fn new(blobs: BlobStore, name: RepositoryName) -> Self {
        Self { blobs, name }
    }

    /// The repository name.
    pub fn name(&self) -> &RepositoryName {
        &self.name
    }

    /// Manifest revisions in this repository.
    pub fn manifests(&self) -> ManifestStore {
        ManifestStore {
            linked: LinkedBlobStore::new(
                self.blobs.clone(),
                self.name.clone(),
                LinkKind::ManifestRevision,
            ),
        }
    }

    /// Layer and config blobs linked into this repository.
    pub fn layers(&self) -> LinkedBlobStore {
        LinkedBlobStore::new(self.blobs.clone(), self.name.clone(), LinkKind::Layer)
    }

    /// Signatures attached to this repository's manifests.
    pub fn signatures(&self) -> SignatureStore {
        SignatureStore::new(self.blobs.clone(), self.name.clone())
    }

    /// Tags naming this repository's manifests.
    pub fn tags(&self) -> TagStore {
        TagStore {
            blobs: self.blobs.clone(),
            manifests: self.manifests(),
        }
    }
}

/// The manifest revisions of one repository.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    linked: LinkedBlobStore,
}

impl ManifestStore {
    /// Store a manifest and link it as a revision of the repository.
    ///
    /// The document must parse as a known manifest format.
    pub async fn put(&self, content: &[u8]) -> RegistryResult<Digest> {
        let parsed = manifest::parse(content)?;
        let descriptor = self.linked.put(parsed.media_type(), content).await?;
        tracing::debug!(repository = %self.linked.repository(), digest = %descriptor.digest, "stored manifest");
        Ok(descriptor.digest)
    }

    /// Read a manifest's raw document.
    pub async fn get_bytes(&self, digest: &Digest) -> RegistryResult<bytes::Bytes> {
        self.linked.get(digest).await.map_err(|err| match err {
            RegistryError::BlobNotFound(_) => RegistryError::ManifestNotFound(digest.to_string()),
            err => err,
        })
    }

    /// Fetch and parse a manifest revision.
    pub async fn get(&self, digest: &Digest) -> RegistryResult<Box<dyn Manifest>> {
        let content = self.get_bytes(digest).await?;
        manifest::parse(&content)
    }

    /// Whether a revision is linked into the repository.
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        self.linked.exists(digest).await
    }

    /// Remove a revision from the repository.
    ///
    /// The manifest blob and anything it references stay in storage until
    /// garbage collection finds them unreferenced.
    pub async fn delete(&self, digest: &Digest) -> RegistryResult<()> {
        self.linked.unlink(digest).await.map_err(|err| match err {
            RegistryError::BlobNotFound(_) => RegistryError::ManifestNotFound(digest.to_string()),
            err => err,
        })
    }

    /// Stream every revision digest in the repository.
    ///
    /// A repository with no revisions directory yields a storage not-found
    /// error.
    pub fn enumerate(&self) -> BoxStream<'_, RegistryResult<Digest>> {
        self.linked.enumerate()
    }
}

/// Human-readable names for manifest revisions.
#[derive(Debug, Clone)]
pub struct TagStore {
    blobs: BlobStore,
    manifests: ManifestStore,
}

fn validate_tag(tag: &str) -> RegistryResult<()> {
    let invalid = |reason| RegistryError::InvalidTag {
        tag: tag.to_string(),
        reason,
    };
    let word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    match tag.as_bytes() {
        [] => Err(invalid("tag is empty")),
        _ if tag.len() > MAX_TAG_LENGTH => Err(invalid("tag is longer than 128 characters")),
        [first, ..] if !word(*first) => Err(invalid("tag must start with a word character")),
        [_, rest @ ..] if !rest.iter().all(|&b| word(b) || b == b'.' || b == b'-') => {
            Err(invalid("tag may only contain word characters, '.', and '-'"))
        }
        _ => Ok(()),
    }
}

impl TagStore {
    fn repository(&self) -> &RepositoryName {
        self.manifests.linked.repository()
    }

    /// Point a tag at a manifest revision, replacing any previous target.
    pub async fn tag(&self, tag: &str, digest: &Digest) -> RegistryResult<()> {
        validate_tag(tag)?;
        if !self.manifests.exists(digest).await? {
            return Err(RegistryError::ManifestNotFound(digest.to_string()));
        }

        let path = self.blobs.paths().tag_current_link(self.repository(), tag);
        self.blobs
            .bucket()
            .put(&path, digest.to_string().as_bytes())
            .await?;
        tracing::debug!(repository = %self.repository(), %tag, %digest, "tagged manifest");
        Ok(())
    }

    /// The revision a tag points to.
    pub async fn get(&self, tag: &str) -> RegistryResult<Digest> {
        validate_tag(tag)?;
        let path = self.blobs.paths().tag_current_link(self.repository(), tag);
        let content = match self.blobs.bucket().get(&path).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => {
                return Err(RegistryError::TagNotFound(tag.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let text = String::from_utf8_lossy(&content);
        Digest::parse(text.trim()).map_err(|source| RegistryError::InvalidLink {
            path: path.to_string(),
            source: Box::new(source),
        })
    }

    /// Remove a tag. The revision it pointed to is untouched.
    pub async fn untag(&self, tag: &str) -> RegistryResult<()> {
        validate_tag(tag)?;
        let path = self.blobs.paths().tag_current_link(self.repository(), tag);
        match self.blobs.bucket().delete(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(RegistryError::TagNotFound(tag.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Every tag in the repository, sorted.
    pub async fn all(&self) -> RegistryResult<Vec<String>> {
        let root = self.blobs.paths().tags_root(self.repository());
        let files = match self.blobs.bucket().list(Some(&root)).await {
            Ok(files) => files,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut tags: Vec<String> = files
            .iter()
            .filter_map(|file| {
                let relative = camino::Utf8Path::new(file).strip_prefix(&root).ok()?;
                let parts: Vec<&str> = relative.iter().collect();
                match parts.as_slice() {
                    [tag, "current", "link"] => Some(tag.to_string()),
                    _ => None,
                }
            })
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}
