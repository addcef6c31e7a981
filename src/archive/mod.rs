//! Remote archive layer: where snapshots, manifests and reports are kept.
//!
//! [`ArchiveStore`] abstracts a file host addressed by relative paths with
//! optimistic concurrency through content hashes. Three hosts are
//! supported: the GitHub contents API, the GitLab repository files API and
//! a local directory. [`Publisher`] layers conflict and transient retries
//! on top of any of them; [`codec`] turns snapshots into bytes and back.

pub mod codec;
pub mod github;
pub mod gitlab;
pub mod local;
pub mod publisher;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use github::GitHubArchive;
pub use gitlab::GitLabArchive;
pub use local::LocalArchive;
pub use publisher::{PublishReceipt, Publisher, RetryPolicy};

use crate::config::{ArchiveHost, ArchiveSettings};
use crate::error::BackupError;

/// Errors raised by an [`ArchiveStore`].
///
/// Messages carry paths and HTTP statuses only. Tokens and response
/// bodies are never included.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The supplied sha no longer matches the remote file.
    #[error("conflicting update to {0}")]
    Conflict(String),

    /// The path does not exist.
    #[error("{0} does not exist in the archive")]
    NotFound(String),

    /// Network failure, rate limit or server error. Worth retrying.
    #[error("archive host temporarily unavailable: {0}")]
    Transient(String),

    /// The token was rejected.
    #[error("archive host rejected the credentials")]
    Unauthorized,

    /// Any other non-success response.
    #[error("archive host rejected the request for {path} with status {status}")]
    Rejected {
        /// Path of the request.
        path: String,
        /// HTTP status.
        status: u16,
    },

    /// The host answered with something we could not interpret.
    #[error("unexpected response from archive host: {0}")]
    Malformed(String),

    /// The path is empty, absolute or escapes the archive root.
    #[error("invalid archive path: {0}")]
    InvalidPath(String),

    /// Local filesystem failure.
    #[error("archive i/o failed for {path}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Returns `true` for failures the publisher retries with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Wraps a client error, stripping the request URL from its message.
    pub(crate) fn from_http(err: reqwest::Error) -> Self {
        Self::Transient(err.without_url().to_string())
    }
}

/// Whether a remote entry is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Folder.
    Dir,
}

/// One item of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    /// Final path component.
    pub name: String,
    /// Path relative to the archive root.
    pub path: String,
    /// Content hash (or the host's equivalent), used for deletes.
    pub sha: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Size in bytes, when the host reports it.
    pub size: Option<u64>,
}

/// A downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Raw content.
    pub bytes: Vec<u8>,
    /// Content hash to pass back on update or delete.
    pub sha: String,
}

/// A remote file host addressed by relative paths.
#[async_trait]
pub trait ArchiveStore: Send + Sync + fmt::Debug {
    /// Downloads a file. `Ok(None)` when it does not exist.
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, ArchiveError>;

    /// Looks up the current hash of a file without needing its content.
    async fn sha(&self, path: &str) -> Result<Option<String>, ArchiveError> {
        Ok(self.get(path).await?.map(|file| file.sha))
    }

    /// Creates or replaces a file.
    ///
    /// `sha` must be the current hash when replacing and `None` when
    /// creating. Returns the new hash when the host reports one.
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<Option<String>, ArchiveError>;

    /// Deletes a file.
    async fn delete(&self, path: &str, sha: &str, message: &str) -> Result<(), ArchiveError>;

    /// Lists a folder. A folder that does not exist lists as empty.
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, ArchiveError>;

    /// Short description for logs and status output, e.g. `github:org/repo@main`.
    fn describe(&self) -> String;
}

/// Builds the shared HTTP client used by the remote adapters.
///
/// # Errors
///
/// Returns [`ArchiveError::Malformed`] if the TLS backend cannot be set up.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ArchiveError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))
}

/// Builds the archive store selected by `settings`.
///
/// # Errors
///
/// Returns [`BackupError::ConfigurationMissing`] naming the first absent
/// variable required by the selected host.
pub fn from_settings(settings: &ArchiveSettings) -> Result<Arc<dyn ArchiveStore>, BackupError> {
    match settings.host {
        ArchiveHost::Local => Ok(Arc::new(LocalArchive::new(settings.local_dir.clone()))),
        ArchiveHost::GitHub | ArchiveHost::GitLab => {
            let token = settings
                .token
                .clone()
                .ok_or(BackupError::ConfigurationMissing("BACKUP_HOST_TOKEN"))?;
            let repository = settings
                .repository
                .clone()
                .ok_or(BackupError::ConfigurationMissing("BACKUP_REPOSITORY"))?;
            let client = http_client(settings.http_timeout)?;
            let branch = settings.branch.clone();
            if settings.host == ArchiveHost::GitHub {
                let api_url = settings
                    .api_url
                    .clone()
                    .unwrap_or_else(|| github::DEFAULT_API_URL.to_string());
                Ok(Arc::new(GitHubArchive::new(
                    client, api_url, repository, branch, token,
                )))
            } else {
                let api_url = settings
                    .api_url
                    .clone()
                    .unwrap_or_else(|| gitlab::DEFAULT_API_URL.to_string());
                Ok(Arc::new(GitLabArchive::new(
                    client, api_url, repository, branch, token,
                )))
            }
        }
    }
}
