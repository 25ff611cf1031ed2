//! # Registry storage
//!
//! The storage core of a content-addressable artifact registry. Blobs are
//! stored once, globally, under the digest of their content. Repositories own
//! content through small link files that point at those digests, so any
//! number of repositories can share one copy of a layer.
//!
//! Unreferenced blobs are reclaimed by a mark-and-sweep [`GarbageCollector`]
//! that walks every repository's manifests through the [`Namespace`]
//! enumeration traits.
//!
//! ## Example
//!
//! ```no_run
//! use registry::{Registry, RepositoryName};
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage: storage::Storage = MemoryStorage::with_buckets(&["registry"]).into();
//! let registry = Registry::new(storage.bucket("registry"));
//!
//! let app = registry.repository(RepositoryName::parse("library/app")?);
//! app.layers().put("application/octet-stream", b"layer").await?;
//!
//! let report = registry.garbage_collector().dry_run(true).run().await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod blobs;
mod config;
mod digest;
mod error;
mod gc;
mod linked;
pub mod manifest;
mod namespace;
mod paths;
mod registry;
mod repository;
mod signatures;
mod vacuum;

pub use blobs::{BlobStore, OCTET_STREAM};
pub use config::{ConfigError, GcConfig, RegistryConfig};
pub use digest::{Algorithm, Digest};
pub use error::{RegistryError, RegistryResult};
pub use gc::{DEFAULT_CONCURRENCY, GarbageCollector, GcError, Mark, MarkKind, MarkSet, Report};
pub use linked::LinkedBlobStore;
pub use manifest::{Descriptor, Manifest};
pub use namespace::{ManifestService, Namespace, Repository};
pub use paths::{DEFAULT_ROOT, LinkKind, PathMapper};
pub use repository::{ManifestStore, RepositoryName, RepositoryStore, TagStore};
pub use registry::Registry;
pub use signatures::SignatureStore;
pub use vacuum::Vacuum;
