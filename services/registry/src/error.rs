//! Error types for the registry

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A digest string that does not parse
    #[error("malformed digest {digest:?}: {reason}")]
    MalformedDigest {
        /// The offending input
        digest: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Invalid repository name
    #[error("invalid repository name {name:?}: {reason}")]
    InvalidRepository {
        /// The offending name
        name: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Invalid tag name
    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag {
        /// The offending tag
        tag: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Blob not found
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Tag not found
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A manifest body that is not valid JSON for its schema
    #[error("invalid manifest document")]
    ManifestJson(#[from] serde_json::Error),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// A link file whose contents are not a digest
    #[error("invalid link at {path}")]
    InvalidLink {
        /// Path of the link file
        path: String,
        /// Why the contents were rejected
        #[source]
        source: Box<RegistryError>,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

impl RegistryError {
    /// Whether the underlying failure is a missing path in storage.
    ///
    /// Only storage errors classify as not-found; registry-level "unknown"
    /// errors such as [`RegistryError::BlobNotFound`] do not.
    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::Storage(err) => err.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{StorageError, StorageErrorKind};

    #[test]
    fn storage_not_found_classifies() {
        let err: RegistryError = StorageError::not_found("memory", "registry", "a/b").into();
        assert!(err.is_not_found());

        let err: RegistryError = StorageError::new(
            "memory",
            StorageErrorKind::Io,
            std::io::Error::other("boom"),
        )
        .into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn registry_unknown_is_not_storage_not_found() {
        let err = RegistryError::BlobNotFound("sha256:abc".into());
        assert!(!err.is_not_found());
    }
}
