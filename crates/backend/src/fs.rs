use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::instrument;

use crate::error::BackendError;
use crate::{Backend, ObjectInfo};

/// Local-disk backend standing in for the pluggable-by-URL-scheme
/// requirement (`file://`). Remote protocol clients (S3, SFTP, ...) would
/// register under their own scheme prefix; they are out of scope here
/// since the restore data plane never depends on their specifics, only on
/// the [`Backend`] trait.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Backend for FilesystemBackend {
    #[instrument(skip(self))]
    fn list(&self) -> BoxFuture<'_, Result<Vec<ObjectInfo>, BackendError>> {
        Box::pin(async move {
            let root = self.root.clone();
            let mut entries = Vec::new();
            let mut read_dir = match tokio::fs::read_dir(&root).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
                Err(e) => return Err(BackendError::Io(e)),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let meta = entry.metadata().await?;
                entries.push(ObjectInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                });
            }
            Ok(entries)
        })
    }

    #[instrument(skip(self))]
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BackendError>> {
        Box::pin(async move {
            let path = self.object_path(name);
            tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BackendError::NotFound(name.to_string())
                } else {
                    BackendError::Io(e)
                }
            })
        })
    }

    #[instrument(skip(self, data))]
    fn put<'a>(&'a self, name: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<u64, BackendError>> {
        Box::pin(async move {
            let path = self.object_path(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let len = data.len() as u64;
            tokio::fs::write(&path, data).await?;
            Ok(len)
        })
    }

    #[instrument(skip(self))]
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let path = self.object_path(name);
            tokio::fs::remove_file(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BackendError::NotFound(name.to_string())
                } else {
                    BackendError::Io(e)
                }
            })
        })
    }

    #[instrument(skip(self))]
    fn rename<'a>(
        &'a self,
        old_name: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let old_path = self.object_path(old_name);
            let new_path = self.object_path(new_name);
            if let Some(parent) = new_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&old_path, &new_path).await?;
            Ok(())
        })
    }
}

/// Whether `path` looks like a directory this backend can serve out of,
/// used by the `file://` URL-scheme dispatcher.
pub fn is_filesystem_root(path: &Path) -> bool {
    path.is_absolute() || path.starts_with("./") || path.starts_with("../")
}
