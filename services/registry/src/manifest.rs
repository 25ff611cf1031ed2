//! Manifest formats and the references they carry
//!
//! Every manifest variant exposes the content it references through
//! [`Manifest::references`]. Variants that also point at a configuration
//! blob override [`Manifest::config`]. Callers rely on those two capabilities
//! only, so new formats need no changes elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize, de::IgnoredAny};

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// Known manifest and content media types.
pub mod media_types {
    /// OCI image manifest
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    /// OCI image index
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    /// Docker image manifest, schema 2
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    /// Docker manifest list
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    /// Docker image manifest, schema 1
    pub const DOCKER_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
    /// Docker image manifest, schema 1 with embedded JWS signatures
    pub const DOCKER_SCHEMA1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";
    /// Layer referenced from a schema 1 manifest
    pub const DOCKER_LAYER: &str = "application/vnd.docker.container.image.rootfs.diff.tar.gzip";
}

/// A reference to content by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    #[serde(default)]
    pub media_type: String,
    /// Digest of the referenced content
    pub digest: Digest,
    /// Size of the referenced content in bytes
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    /// Create a descriptor.
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
        }
    }
}

/// A document enumerating the content it references.
pub trait Manifest: fmt::Debug + Send + Sync {
    /// The manifest's media type.
    fn media_type(&self) -> &str;

    /// Content referenced by this manifest: layers, or child manifests for
    /// an index.
    fn references(&self) -> &[Descriptor];

    /// The configuration blob, for formats that carry one.
    fn config(&self) -> Option<&Descriptor> {
        None
    }
}

/// An image manifest: one config blob plus an ordered list of layers.
///
/// Covers both the OCI image manifest and Docker schema 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2
    pub schema_version: u32,
    /// Media type; OCI manifests may omit it
    #[serde(default = "default_manifest_type")]
    pub media_type: String,
    /// The image configuration blob
    pub config: Descriptor,
    /// Filesystem layers
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

fn default_manifest_type() -> String {
    media_types::OCI_MANIFEST.to_string()
}

impl Manifest for ImageManifest {
    fn media_type(&self) -> &str {
        &self.media_type
    }

    fn references(&self) -> &[Descriptor] {
        &self.layers
    }

    fn config(&self) -> Option<&Descriptor> {
        Some(&self.config)
    }
}

/// A list of manifests, typically one per platform.
///
/// Covers both the OCI image index and the Docker manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Always 2
    pub schema_version: u32,
    /// Media type; OCI indexes may omit it
    #[serde(default = "default_index_type")]
    pub media_type: String,
    /// Child manifests
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

fn default_index_type() -> String {
    media_types::OCI_INDEX.to_string()
}

impl Manifest for ImageIndex {
    fn media_type(&self) -> &str {
        &self.media_type
    }

    fn references(&self) -> &[Descriptor] {
        &self.manifests
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsLayer {
    blob_sum: Digest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaOneDocument {
    name: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    fs_layers: Vec<FsLayer>,
}

/// A legacy Docker schema 1 manifest.
///
/// Layers are listed newest first and may repeat; references keep the first
/// occurrence of each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOneManifest {
    /// Repository name recorded in the manifest
    pub name: String,
    /// Tag recorded in the manifest
    pub tag: String,
    references: Vec<Descriptor>,
}

impl From<SchemaOneDocument> for SchemaOneManifest {
    fn from(document: SchemaOneDocument) -> Self {
        let mut references: Vec<Descriptor> = Vec::with_capacity(document.fs_layers.len());
        for layer in document.fs_layers {
            if !references.iter().any(|d| d.digest == layer.blob_sum) {
                references.push(Descriptor::new(media_types::DOCKER_LAYER, layer.blob_sum, 0));
            }
        }

        Self {
            name: document.name,
            tag: document.tag,
            references,
        }
    }
}

impl Manifest for SchemaOneManifest {
    fn media_type(&self) -> &str {
        media_types::DOCKER_SCHEMA1_SIGNED
    }

    fn references(&self) -> &[Descriptor] {
        &self.references
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    schema_version: Option<u32>,
    media_type: Option<String>,
    manifests: Option<IgnoredAny>,
}

/// Parse a manifest document, detecting its format from its content.
///
/// The `mediaType` field decides when present; otherwise `schemaVersion`
/// and the presence of a `manifests` array do.
pub fn parse(data: &[u8]) -> RegistryResult<Box<dyn Manifest>> {
    let probe: Probe = serde_json::from_slice(data)?;

    let manifest: Box<dyn Manifest> = match (probe.media_type.as_deref(), probe.schema_version) {
        (Some(media_types::OCI_MANIFEST | media_types::DOCKER_MANIFEST), _) => {
            Box::new(serde_json::from_slice::<ImageManifest>(data)?)
        }
        (Some(media_types::OCI_INDEX | media_types::DOCKER_MANIFEST_LIST), _) => {
            Box::new(serde_json::from_slice::<ImageIndex>(data)?)
        }
        (Some(media_types::DOCKER_SCHEMA1 | media_types::DOCKER_SCHEMA1_SIGNED), _)
        | (None, Some(1)) => {
            let document: SchemaOneDocument = serde_json::from_slice(data)?;
            Box::new(SchemaOneManifest::from(document))
        }
        (None, Some(2)) if probe.manifests.is_some() => {
            Box::new(serde_json::from_slice::<ImageIndex>(data)?)
        }
        (None, Some(2)) => Box::new(serde_json::from_slice::<ImageManifest>(data)?),
        (Some(other), _) => {
            return Err(RegistryError::InvalidManifest(format!(
                "unsupported media type {other}"
            )));
        }
        (None, version) => {
            return Err(RegistryError::InvalidManifest(format!(
                "unsupported schema version {version:?}"
            )));
        }
    };

    Ok(manifest)
}
