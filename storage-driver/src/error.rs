use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use tracing_error::SpanTrace;

/// Categorizes storage errors by their meaning, independent of the driver
/// that produced them.
///
/// Callers classify failures with the kind instead of inspecting messages.
/// The registry relies on [`StorageErrorKind::NotFound`] to tell a missing
/// path apart from every other failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested path, or the bucket containing it, does not exist.
    ///
    /// Listing a prefix with no entries beneath it also reports this kind.
    NotFound,

    /// The caller lacks permission to perform the requested operation.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk, etc.).
    Io,

    /// The request was invalid (bad parameters, malformed paths, etc.).
    InvalidRequest,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl StorageErrorKind {
    /// Returns whether this error indicates a client-side fault.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::InvalidRequest | StorageErrorKind::PermissionDenied
        )
    }
}

impl From<io::ErrorKind> for StorageErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput => StorageErrorKind::InvalidRequest,
            _ => StorageErrorKind::Io,
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Captured backtrace, controlled by `RUST_BACKTRACE`.
    backtrace: Backtrace,

    /// Span context at the point where the error was created.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// Storage error with a semantic kind and the context of the failed operation.
///
/// # Example
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "memory",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "path not found"),
/// )
/// .bucket("registry")
/// .path("docker/registry/v2/blobs")
/// .build();
///
/// assert!(error.is_not_found());
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create a new storage error with the minimum required information.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            bucket: None,
            path: None,
            context: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create a storage error from an I/O error, deriving the kind from
    /// the I/O error kind.
    pub fn from_io(engine: &'static str, error: io::Error) -> Self {
        let kind = error.kind().into();
        Self::new(engine, kind, error)
    }

    /// Create a `NotFound` error for a path in a bucket.
    pub fn not_found(engine: &'static str, bucket: &str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self::builder(
            engine,
            StorageErrorKind::NotFound,
            io::Error::new(io::ErrorKind::NotFound, format!("Path not found: {path}")),
        )
        .bucket(bucket)
        .path(path)
        .build()
    }

    /// Create a builder for a storage error with full context.
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            bucket: None,
            path: None,
            context: None,
        }
    }

    /// Returns a closure converting a downstream error into a storage error,
    /// for use with `.map_err()`.
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// fn operation() -> Result<(), StorageError> {
    ///     "12".parse::<u8>()
    ///         .map_err(StorageError::with("local", StorageErrorKind::InvalidRequest))?;
    ///     Ok(())
    /// }
    /// # operation().unwrap();
    /// ```
    pub fn with<E>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Whether this error reports a missing path or bucket.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// Returns the storage engine name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the bucket name, if available.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Returns the file path, if available.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns additional context, if available.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(bucket) = &self.bucket {
            write!(f, " (bucket: {})", bucket)?;
        }

        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for a [`StorageError`] with optional context fields.
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the file path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the `StorageError`.
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            bucket: self.bucket,
            path: self.path,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}
