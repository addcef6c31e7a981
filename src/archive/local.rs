//! Local directory archive.
//!
//! Same contract as the remote hosts: the sha of a file is the hex SHA-256
//! of its content, and replacing or deleting with a stale sha is a
//! conflict.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ArchiveError, ArchiveStore, EntryKind, RemoteEntry, RemoteFile};
use crate::domain::archive_path;

/// Archive kept under a local root directory.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
}

/// Hex SHA-256 of `bytes`.
#[must_use]
pub fn content_sha(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl LocalArchive {
    /// Creates an archive rooted at `root`. The directory is created on
    /// first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ArchiveError> {
        if !archive_path::is_safe_relative(path) {
            return Err(ArchiveError::InvalidPath(path.to_owned()));
        }
        Ok(self.root.join(path))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArchiveError::Io {
                path: path.to_owned(),
                source,
            }),
        }
    }
}

fn io_err(path: &str) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_owned(),
        source,
    }
}

#[async_trait]
impl ArchiveStore for LocalArchive {
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, ArchiveError> {
        Ok(self.read(path).await?.map(|bytes| RemoteFile {
            sha: content_sha(&bytes),
            bytes,
        }))
    }

    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        sha: Option<&str>,
        _message: &str,
    ) -> Result<Option<String>, ArchiveError> {
        let current = self.read(path).await?.map(|existing| content_sha(&existing));
        if current.as_deref() != sha {
            return Err(ArchiveError::Conflict(path.to_owned()));
        }

        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(path))?;
        }
        tokio::fs::write(&full, bytes).await.map_err(io_err(path))?;
        Ok(Some(content_sha(bytes)))
    }

    async fn delete(&self, path: &str, sha: &str, _message: &str) -> Result<(), ArchiveError> {
        let Some(existing) = self.read(path).await? else {
            return Err(ArchiveError::NotFound(path.to_owned()));
        };
        if content_sha(&existing) != sha {
            return Err(ArchiveError::Conflict(path.to_owned()));
        }
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full).await.map_err(io_err(path))
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, ArchiveError> {
        let dir = self.resolve(folder)?;
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Io {
                    path: folder.to_owned(),
                    source,
                });
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_err(folder))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = format!("{folder}/{name}");
            let file_type = entry.file_type().await.map_err(io_err(&path))?;
            if file_type.is_dir() {
                entries.push(RemoteEntry {
                    name,
                    path,
                    sha: String::new(),
                    kind: EntryKind::Dir,
                    size: None,
                });
            } else {
                let bytes = tokio::fs::read(entry.path()).await.map_err(io_err(&path))?;
                entries.push(RemoteEntry {
                    name,
                    sha: content_sha(&bytes),
                    size: Some(bytes.len() as u64),
                    path,
                    kind: EntryKind::File,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}
