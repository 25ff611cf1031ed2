//! Mark-and-sweep garbage collection of global blobs
//!
//! A run has three phases, each finishing before the next starts:
//!
//! 1. **Mark** walks every manifest of every repository and records the
//!    manifest digest, each referenced digest, and the configuration digest
//!    when the manifest has one.
//! 2. **Sweep** lists global blob storage and collects every digest that was
//!    not marked.
//! 3. **Delete** hands each unmarked digest to [`Vacuum`]. A dry run skips
//!    this phase and only reports.
//!
//! The collector takes no lock against concurrent writers. A blob uploaded
//! after marking starts but before its manifest is written looks unreferenced
//! and will be deleted, so writes must be quiesced for a non-dry run. Two runs
//! against one store must not overlap either.

use std::collections::BTreeSet;
use std::fmt;

use dashmap::DashSet;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;

use crate::digest::Digest;
use crate::error::RegistryError;
use crate::namespace::Namespace;
use crate::repository::RepositoryName;
use crate::vacuum::Vacuum;

/// Default number of repositories marked at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Errors that abort a garbage collection run.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// The repository listing failed.
    #[error("failed to enumerate repositories")]
    EnumerateRepositories(#[source] RegistryError),

    /// A listed repository name is not valid.
    #[error("failed to parse repository name {name:?}")]
    RepositoryName {
        /// The name as listed
        name: String,
        /// Why it was rejected
        #[source]
        source: RegistryError,
    },

    /// A repository handle could not be constructed.
    #[error("failed to construct repository {repository}")]
    Repository {
        /// The repository
        repository: RepositoryName,
        /// The underlying failure
        #[source]
        source: RegistryError,
    },

    /// A repository's manifest service could not be constructed.
    #[error("failed to construct manifest service for {repository}")]
    ManifestService {
        /// The repository
        repository: RepositoryName,
        /// The underlying failure
        #[source]
        source: RegistryError,
    },

    /// Listing a repository's manifests failed for a reason other than a
    /// missing directory.
    #[error("failed to enumerate manifests in {repository}")]
    EnumerateManifests {
        /// The repository
        repository: RepositoryName,
        /// The underlying failure
        #[source]
        source: RegistryError,
    },

    /// A listed manifest could not be fetched or parsed.
    #[error("failed to retrieve manifest {digest} in {repository}")]
    FetchManifest {
        /// The repository
        repository: RepositoryName,
        /// The manifest
        digest: Digest,
        /// The underlying failure
        #[source]
        source: RegistryError,
    },

    /// The global blob listing failed.
    #[error("failed to enumerate blobs")]
    EnumerateBlobs(#[source] RegistryError),

    /// A blob could not be deleted. Blobs deleted before it stay deleted.
    #[error("failed to delete blob {digest}")]
    Delete {
        /// The blob
        digest: Digest,
        /// The underlying failure
        #[source]
        source: RegistryError,
    },
}

/// Digests found live during one run.
#[derive(Debug, Default)]
pub struct MarkSet {
    digests: DashSet<Digest>,
}

impl MarkSet {
    /// Create an empty mark set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a digest, returning whether it was newly marked.
    pub fn insert(&self, digest: Digest) -> bool {
        self.digests.insert(digest)
    }

    /// Whether a digest is marked.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.digests.contains(digest)
    }

    /// Number of marked digests.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether nothing is marked.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// What a mark decision was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    /// A manifest revision
    Manifest,
    /// Content a manifest references
    Blob,
    /// A manifest's configuration blob
    Configuration,
}

impl fmt::Display for MarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkKind::Manifest => f.write_str("manifest"),
            MarkKind::Blob => f.write_str("blob"),
            MarkKind::Configuration => f.write_str("configuration"),
        }
    }
}

/// One mark decision, as recorded by a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    /// Repository the digest was reached from
    pub repository: RepositoryName,
    /// What was marked
    pub kind: MarkKind,
    /// The marked digest
    pub digest: Digest,
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: marking {} {}", self.repository, self.kind, self.digest)
    }
}

/// Outcome of a garbage collection run.
#[derive(Debug, Clone)]
pub struct Report {
    /// Whether deletion was skipped
    pub dry_run: bool,
    /// Every mark decision. Only recorded on dry runs.
    pub marks: Vec<Mark>,
    /// Number of distinct digests marked
    pub marked: usize,
    /// Blobs found unreferenced, sorted
    pub eligible: Vec<Digest>,
    /// Number of blobs deleted
    pub deleted: usize,
}

fn blobs(count: usize) -> &'static str {
    if count == 1 { "blob" } else { "blobs" }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for mark in &self.marks {
            writeln!(f, "{mark}")?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{} {} marked, {} {} eligible for deletion",
            self.marked,
            blobs(self.marked),
            self.eligible.len(),
            blobs(self.eligible.len())
        )?;
        for digest in &self.eligible {
            writeln!(f, "blob eligible for deletion: {digest}")?;
        }
        Ok(())
    }
}

/// Runs mark, sweep, and delete over a namespace.
#[derive(Debug)]
pub struct GarbageCollector<'n, N: Namespace + ?Sized> {
    namespace: &'n N,
    vacuum: Vacuum,
    dry_run: bool,
    concurrency: usize,
}

impl<'n, N: Namespace + ?Sized> GarbageCollector<'n, N> {
    /// Create a collector that deletes through `vacuum`.
    pub fn new(namespace: &'n N, vacuum: Vacuum) -> Self {
        Self {
            namespace,
            vacuum,
            dry_run: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Report what would be deleted without changing storage.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Number of repositories marked at once. Zero is treated as one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Collect garbage.
    ///
    /// Any fatal error stops the run before the next phase. On a dry run
    /// storage is never modified.
    #[tracing::instrument(skip(self), fields(dry_run = self.dry_run))]
    pub async fn run(&self) -> Result<Report, GcError> {
        let marks = MarkSet::new();
        let trace = Mutex::new(Vec::new());

        self.mark(&marks, &trace).await?;
        tracing::debug!(marked = marks.len(), "mark complete");

        let eligible = self.sweep(&marks).await?;
        tracing::debug!(eligible = eligible.len(), "sweep complete");

        let deleted = if self.dry_run {
            for digest in &eligible {
                tracing::info!("blob eligible for deletion: {digest}");
            }
            0
        } else {
            self.delete(&eligible).await?
        };

        Ok(Report {
            dry_run: self.dry_run,
            marks: trace.into_inner(),
            marked: marks.len(),
            eligible: eligible.into_iter().collect(),
            deleted,
        })
    }

    fn record(&self, marks: &MarkSet, trace: &Mutex<Vec<Mark>>, mark: Mark) {
        if self.dry_run {
            tracing::info!("{mark}");
            marks.insert(mark.digest.clone());
            trace.lock().push(mark);
        } else {
            marks.insert(mark.digest);
        }
    }

    async fn mark(&self, marks: &MarkSet, trace: &Mutex<Vec<Mark>>) -> Result<(), GcError> {
        self.namespace
            .repositories()
            .map_err(GcError::EnumerateRepositories)
            .try_for_each_concurrent(self.concurrency, move |name| {
                self.mark_repository(name, marks, trace)
            })
            .await
    }

    async fn mark_repository(
        &self,
        name: String,
        marks: &MarkSet,
        trace: &Mutex<Vec<Mark>>,
    ) -> Result<(), GcError> {
        if self.dry_run {
            tracing::info!("{name}");
        }
        let repository_name = RepositoryName::parse(&name)
            .map_err(|source| GcError::RepositoryName { name, source })?;

        let repository = self
            .namespace
            .repository(&repository_name)
            .await
            .map_err(|source| GcError::Repository {
                repository: repository_name.clone(),
                source,
            })?;

        let manifests = repository
            .manifests()
            .await
            .map_err(|source| GcError::ManifestService {
                repository: repository_name.clone(),
                source,
            })?;

        let mut revisions = manifests.enumerate();
        while let Some(revision) = revisions.next().await {
            let digest = match revision {
                Ok(digest) => digest,
                Err(err) if err.is_not_found() => {
                    tracing::debug!(repository = %repository_name, "no manifests to mark");
                    return Ok(());
                }
                Err(source) => {
                    return Err(GcError::EnumerateManifests {
                        repository: repository_name,
                        source,
                    });
                }
            };

            let mark = |kind, digest| Mark {
                repository: repository_name.clone(),
                kind,
                digest,
            };

            self.record(marks, trace, mark(MarkKind::Manifest, digest.clone()));

            let manifest =
                manifests
                    .get(&digest)
                    .await
                    .map_err(|source| GcError::FetchManifest {
                        repository: repository_name.clone(),
                        digest: digest.clone(),
                        source,
                    })?;

            for descriptor in manifest.references() {
                self.record(marks, trace, mark(MarkKind::Blob, descriptor.digest.clone()));
            }

            if let Some(config) = manifest.config() {
                self.record(
                    marks,
                    trace,
                    mark(MarkKind::Configuration, config.digest.clone()),
                );
            }
        }

        Ok(())
    }

    async fn sweep(&self, marks: &MarkSet) -> Result<BTreeSet<Digest>, GcError> {
        let mut eligible = BTreeSet::new();
        let mut blobs = self.namespace.blobs();
        while let Some(digest) = blobs.try_next().await.map_err(GcError::EnumerateBlobs)? {
            if !marks.contains(&digest) {
                eligible.insert(digest);
            }
        }
        Ok(eligible)
    }

    async fn delete(&self, eligible: &BTreeSet<Digest>) -> Result<usize, GcError> {
        let mut deleted = 0;
        for digest in eligible {
            self.vacuum
                .remove_blob(digest)
                .await
                .map_err(|source| GcError::Delete {
                    digest: digest.clone(),
                    source,
                })?;
            deleted += 1;
        }
        tracing::debug!(deleted, "delete complete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(content: &str) -> Digest {
        Digest::sha256(content.as_bytes())
    }

    #[test]
    fn mark_set_dedupes() {
        let marks = MarkSet::new();
        assert!(marks.is_empty());
        assert!(marks.insert(digest("a")));
        assert!(!marks.insert(digest("a")));
        assert!(marks.contains(&digest("a")));
        assert!(!marks.contains(&digest("b")));
        assert_eq!(marks.len(), 1);
    }

    #[test]
    fn mark_lines() {
        let mark = Mark {
            repository: RepositoryName::parse("app").unwrap(),
            kind: MarkKind::Configuration,
            digest: digest("config"),
        };
        assert_eq!(
            mark.to_string(),
            format!("app: marking configuration {}", digest("config"))
        );
    }

    #[test]
    fn report_counts_pluralize() {
        let report = Report {
            dry_run: true,
            marks: Vec::new(),
            marked: 3,
            eligible: vec![digest("orphan")],
            deleted: 0,
        };
        let text = report.to_string();
        assert!(text.contains("3 blobs marked, 1 blob eligible for deletion"));
        assert!(text.contains(&format!("blob eligible for deletion: {}", digest("orphan"))));

        let report = Report {
            marked: 1,
            eligible: Vec::new(),
            ..report
        };
        assert!(
            report
                .to_string()
                .contains("1 blob marked, 0 blobs eligible for deletion")
        );
    }
}
