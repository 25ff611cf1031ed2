use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Storage driver backed by a directory on the local filesystem.
///
/// Each bucket is a directory under the root; files live beneath `<bucket>/b/`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn bucket_root(&self, bucket: &str) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        self.bucket_root(bucket).join(remote)
    }

    fn io_error(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        context: &str,
        err: std::io::Error,
    ) -> StorageError {
        StorageError::builder(self.name(), err.kind().into(), err)
            .bucket(bucket)
            .path(remote.as_str())
            .context(context)
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "metadata", err))?;
        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|err| self.io_error(bucket, remote, "created timestamp", err))?
                .into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "remove_file", err))?;
        prune_empty_parents(&path, &self.bucket_root(bucket)).await;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        let parent = path.parent().ok_or_else(|| {
            StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                eyre::eyre!("upload path has no parent: {path}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build()
        })?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| self.io_error(bucket, remote, "create_dir_all", err))?;

        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&path)
                .await
                .map_err(|err| self.io_error(bucket, remote, "open remote file", err))?,
        );

        tokio::io::copy(local, &mut writer)
            .await
            .map_err(|err| self.io_error(bucket, remote, "copy", err))?;

        writer
            .shutdown()
            .await
            .map_err(|err| self.io_error(bucket, remote, "shutdown writer", err))?;
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(|err| self.io_error(bucket, remote, "open remote file", err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .map_err(|err| self.io_error(bucket, remote, "copy", err))?;

        local
            .flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, "flush writer", err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.bucket_root(bucket);
        let target = match prefix {
            Some(prefix) => base.join(prefix),
            None => base.clone(),
        };

        let exists = tokio::fs::try_exists(&target).await.map_err(|err| {
            self.io_error(
                bucket,
                prefix.unwrap_or(Utf8Path::new("")),
                "try_exists",
                err,
            )
        })?;

        if !exists {
            if prefix.is_none() {
                return Ok(Vec::new());
            }
            return Err(StorageError::not_found(
                self.name(),
                bucket,
                prefix.map(|p| p.as_str()).unwrap_or_default(),
            ));
        }

        let mut items = tokio::task::spawn_blocking(move || collect_list(&base, &target))
            .in_current_span()
            .await
            .wrap_err("local driver: listing task")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        tracing::debug!("Found {} entries", items.len());

        if prefix.is_some() && items.is_empty() {
            return Err(StorageError::not_found(
                self.name(),
                bucket,
                prefix.map(|p| p.as_str()).unwrap_or_default(),
            ));
        }

        items.sort();
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

/// Remove directories left empty by a deletion, stopping at the bucket root.
async fn prune_empty_parents(path: &Utf8Path, stop: &Utf8Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        // remove_dir fails on non-empty directories, which ends the walk
        if tokio::fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Collect every file beneath `target`, as paths relative to `base`.
#[tracing::instrument]
fn collect_list(base: &Utf8Path, target: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    if target.is_file() {
        files.push(target.to_owned());
    } else {
        visit(target, &mut files)?;
    }

    files
        .into_iter()
        .map(|p| {
            p.strip_prefix(base)
                .map(|p| p.to_owned())
                .wrap_err_with(|| format!("listed path {p} outside of {base}"))
        })
        .collect()
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
