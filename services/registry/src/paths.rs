//! Storage layout for the registry
//!
//! Every object the registry stores lives under a single root:
//!
//! ```text
//! <root>/blobs/<alg>/<hex[0..2]>/<hex>/data
//! <root>/repositories/<name>/_layers/<alg>/<hex>/link
//! <root>/repositories/<name>/_manifests/revisions/<alg>/<hex>/link
//! <root>/repositories/<name>/_manifests/revisions/<alg>/<hex>/signatures/<alg>/<hex>/link
//! <root>/repositories/<name>/_manifests/tags/<tag>/current/link
//! ```
//!
//! Blob content is stored once, globally. Everything under `repositories`
//! is a link: a small file holding the text of a digest.

use camino::{Utf8Path, Utf8PathBuf};

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::repository::RepositoryName;

/// Default root of the registry layout inside a bucket.
pub const DEFAULT_ROOT: &str = "docker/registry/v2";

const BLOB_DATA: &str = "data";
const LINK: &str = "link";

/// Which family of repository links a linked blob store reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Layer and config blobs uploaded to a repository.
    Layer,
    /// Manifest revisions in a repository.
    ManifestRevision,
    /// Signatures attached to one manifest revision.
    Signature {
        /// The manifest the signatures belong to.
        revision: Digest,
    },
}

/// Maps registry objects to storage paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    root: Utf8PathBuf,
}

impl Default for PathMapper {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl PathMapper {
    /// Create a mapper rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The layout root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding every blob.
    pub fn blobs_root(&self) -> Utf8PathBuf {
        self.root.join("blobs")
    }

    /// Directory holding one blob's data, e.g. `blobs/sha256/ab/abcd…`.
    pub fn blob_dir(&self, digest: &Digest) -> Utf8PathBuf {
        let hex = digest.hex();
        let mut path = self.blobs_root();
        path.push(digest.algorithm().name());
        path.push(&hex[..2]);
        path.push(hex);
        path
    }

    /// The file holding one blob's content.
    pub fn blob_data(&self, digest: &Digest) -> Utf8PathBuf {
        self.blob_dir(digest).join(BLOB_DATA)
    }

    /// Directory holding every repository.
    pub fn repositories_root(&self) -> Utf8PathBuf {
        self.root.join("repositories")
    }

    /// Directory holding one repository.
    pub fn repository_root(&self, name: &RepositoryName) -> Utf8PathBuf {
        self.repositories_root().join(name.as_str())
    }

    /// Directory holding a repository's manifest revision links.
    pub fn manifest_revisions(&self, name: &RepositoryName) -> Utf8PathBuf {
        let mut path = self.repository_root(name);
        path.push("_manifests");
        path.push("revisions");
        path
    }

    /// Directory holding one manifest revision's link and its signatures.
    pub fn manifest_revision(&self, name: &RepositoryName, revision: &Digest) -> Utf8PathBuf {
        let mut path = self.manifest_revisions(name);
        path.push(revision.algorithm().name());
        path.push(revision.hex());
        path
    }

    /// Directory holding the links of one kind in a repository.
    pub fn link_root(&self, name: &RepositoryName, kind: &LinkKind) -> Utf8PathBuf {
        match kind {
            LinkKind::Layer => self.repository_root(name).join("_layers"),
            LinkKind::ManifestRevision => self.manifest_revisions(name),
            LinkKind::Signature { revision } => {
                self.manifest_revision(name, revision).join("signatures")
            }
        }
    }

    /// The link file for `digest` among the links of one kind.
    pub fn link_path(&self, name: &RepositoryName, kind: &LinkKind, digest: &Digest) -> Utf8PathBuf {
        let mut path = self.link_root(name, kind);
        path.push(digest.algorithm().name());
        path.push(digest.hex());
        path.push(LINK);
        path
    }

    /// Directory holding a repository's tags.
    pub fn tags_root(&self, name: &RepositoryName) -> Utf8PathBuf {
        let mut path = self.repository_root(name);
        path.push("_manifests");
        path.push("tags");
        path
    }

    /// The link file naming the manifest a tag currently points to.
    pub fn tag_current_link(&self, name: &RepositoryName, tag: &str) -> Utf8PathBuf {
        let mut path = self.tags_root(name);
        path.push(tag);
        path.push("current");
        path.push(LINK);
        path
    }

    /// Recover a digest from a blob data path relative to [`Self::blobs_root`].
    ///
    /// Returns `None` for paths that are not blob data files.
    pub fn parse_blob_path(relative: &Utf8Path) -> Option<RegistryResult<Digest>> {
        let parts: Vec<&str> = relative.iter().collect();
        let [algorithm, prefix, hex, BLOB_DATA] = parts.as_slice() else {
            return None;
        };

        Some(Digest::parse(&format!("{algorithm}:{hex}")).and_then(|digest| {
            if digest.hex().starts_with(prefix) && prefix.len() == 2 {
                Ok(digest)
            } else {
                Err(crate::error::RegistryError::MalformedDigest {
                    digest: digest.to_string(),
                    reason: "blob stored under the wrong prefix directory",
                })
            }
        }))
    }

    /// Recover a digest from a `<alg>/<hex>/link` path relative to a link root.
    ///
    /// Returns `None` for anything else, including links nested deeper.
    pub fn parse_link_path(relative: &Utf8Path) -> Option<RegistryResult<Digest>> {
        let parts: Vec<&str> = relative.iter().collect();
        let [algorithm, hex, LINK] = parts.as_slice() else {
            return None;
        };
        Some(Digest::parse(&format!("{algorithm}:{hex}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryName {
        RepositoryName::parse("library/app").unwrap()
    }

    #[test]
    fn blob_paths() {
        let paths = PathMapper::default();
        let digest = Digest::sha256(b"layer");
        let hex = digest.hex();
        assert_eq!(
            paths.blob_data(&digest).as_str(),
            format!("docker/registry/v2/blobs/sha256/{}/{hex}/data", &hex[..2])
        );
    }

    #[test]
    fn link_paths() {
        let paths = PathMapper::new("root");
        let digest = Digest::sha256(b"layer");
        let hex = digest.hex();

        assert_eq!(
            paths.link_path(&repo(), &LinkKind::Layer, &digest).as_str(),
            format!("root/repositories/library/app/_layers/sha256/{hex}/link")
        );
        assert_eq!(
            paths
                .link_path(&repo(), &LinkKind::ManifestRevision, &digest)
                .as_str(),
            format!("root/repositories/library/app/_manifests/revisions/sha256/{hex}/link")
        );

        let signature = Digest::sha256(b"signature");
        let kind = LinkKind::Signature {
            revision: digest.clone(),
        };
        assert_eq!(
            paths.link_path(&repo(), &kind, &signature).as_str(),
            format!(
                "root/repositories/library/app/_manifests/revisions/sha256/{hex}/signatures/sha256/{}/link",
                signature.hex()
            )
        );
    }

    #[test]
    fn tag_paths() {
        let paths = PathMapper::new("root");
        assert_eq!(
            paths.tag_current_link(&repo(), "latest").as_str(),
            "root/repositories/library/app/_manifests/tags/latest/current/link"
        );
    }

    #[test]
    fn parse_blob_path_round_trips() {
        let paths = PathMapper::default();
        let digest = Digest::sha256(b"blob");
        let data = paths.blob_data(&digest);
        let relative = data.strip_prefix(paths.blobs_root()).unwrap();
        assert_eq!(PathMapper::parse_blob_path(relative).unwrap().unwrap(), digest);
    }

    #[test]
    fn parse_blob_path_rejects_wrong_prefix() {
        let digest = Digest::sha256(b"blob");
        let relative = Utf8PathBuf::from(format!("sha256/zz/{}/data", digest.hex()));
        assert!(PathMapper::parse_blob_path(&relative).unwrap().is_err());
    }

    #[test]
    fn parse_blob_path_skips_other_files() {
        assert!(PathMapper::parse_blob_path(Utf8Path::new("sha256/ab/abcd/startedat")).is_none());
        assert!(PathMapper::parse_blob_path(Utf8Path::new("sha256/ab")).is_none());
    }

    #[test]
    fn parse_link_path_only_direct_links() {
        let digest = Digest::sha256(b"manifest");
        let direct = Utf8PathBuf::from(format!("sha256/{}/link", digest.hex()));
        assert_eq!(PathMapper::parse_link_path(&direct).unwrap().unwrap(), digest);

        let nested = Utf8PathBuf::from(format!(
            "sha256/{}/signatures/sha256/{}/link",
            digest.hex(),
            digest.hex()
        ));
        assert!(PathMapper::parse_link_path(&nested).is_none());

        let bad = Utf8Path::new("sha256/not-a-digest/link");
        assert!(PathMapper::parse_link_path(bad).unwrap().is_err());
    }
}
