//! Registry configuration files

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::{StorageConfig, StorageError};

use crate::gc::DEFAULT_CONCURRENCY;
use crate::paths::{DEFAULT_ROOT, PathMapper};
use crate::registry::Registry;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// Path to the file
        path: Utf8PathBuf,
        /// The underlying failure
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("invalid config")]
    Parse(#[from] toml_edit::de::Error),
}

/// Registry configuration.
///
/// ```toml
/// bucket = "registry"
/// root = "docker/registry/v2"
///
/// [storage.local]
/// path = "/var/lib/registry"
///
/// [gc]
/// concurrency = 4
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Storage bucket holding the registry.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Layout root inside the bucket.
    #[serde(default = "default_root")]
    pub root: Utf8PathBuf,

    /// Storage backend.
    pub storage: StorageConfig,

    /// Garbage collection settings.
    #[serde(default)]
    pub gc: GcConfig,
}

/// Garbage collection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GcConfig {
    /// Number of repositories marked at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

fn default_bucket() -> String {
    "registry".to_string()
}

fn default_root() -> Utf8PathBuf {
    DEFAULT_ROOT.into()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl RegistryConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(text)?)
    }

    /// Read configuration from a TOML file.
    pub async fn open(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        Self::from_toml(&text)
    }

    /// Connect to the configured storage.
    pub async fn registry(&self) -> Result<Registry, StorageError> {
        let storage = self.storage.clone().build().await?;
        tracing::debug!(driver = storage.name(), bucket = %self.bucket, root = %self.root, "opened registry storage");
        Ok(Registry::with_paths(
            storage.bucket(self.bucket.as_str()),
            PathMapper::new(self.root.clone()),
        ))
    }
}
