//! Create-or-replace publishing with retries.
//!
//! A publish looks up the current sha, writes with it, and on a conflict
//! refreshes the sha and writes once more. Transient failures are retried
//! with exponential backoff up to the policy's attempt limit.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use super::{ArchiveError, ArchiveStore};

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry settings for transient archive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per step, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), capped at [`MAX_BACKOFF`].
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    /// Archive path written.
    pub path: String,
    /// New content sha, when the host reports one.
    pub sha: Option<String>,
    /// Sha of the content that was replaced.
    pub replaced_sha: Option<String>,
    /// `true` if the file did not exist before.
    pub created: bool,
    /// Write attempts made, including conflict and transient retries.
    pub attempts: u32,
}

/// Publishes files to an [`ArchiveStore`].
#[derive(Debug, Clone)]
pub struct Publisher {
    archive: Arc<dyn ArchiveStore>,
    retry: RetryPolicy,
}

impl Publisher {
    /// Creates a publisher over `archive`.
    #[must_use]
    pub fn new(archive: Arc<dyn ArchiveStore>, retry: RetryPolicy) -> Self {
        Self { archive, retry }
    }

    /// The underlying archive.
    #[must_use]
    pub fn archive(&self) -> &Arc<dyn ArchiveStore> {
        &self.archive
    }

    /// Creates or replaces `path` with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns the last [`ArchiveError`] once retries are exhausted, a
    /// second conflict, or any non-retryable failure.
    pub async fn publish(
        &self,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<PublishReceipt, ArchiveError> {
        let mut attempts = 0;
        let mut lookups = 0;
        let mut conflict_retried = false;
        let mut sha = self
            .with_backoff(&mut lookups, || self.archive.sha(path))
            .await?;

        loop {
            let result = self
                .with_backoff(&mut attempts, || {
                    self.archive.put(path, bytes, sha.as_deref(), message)
                })
                .await;
            match result {
                Ok(new_sha) => {
                    tracing::info!(path, attempts, created = sha.is_none(), "archive entry published");
                    return Ok(PublishReceipt {
                        path: path.to_owned(),
                        sha: new_sha,
                        created: sha.is_none(),
                        replaced_sha: sha,
                        attempts,
                    });
                }
                Err(ArchiveError::Conflict(_)) if !conflict_retried => {
                    tracing::warn!(path, "publish conflict, refreshing sha");
                    conflict_retried = true;
                    sha = self
                        .with_backoff(&mut lookups, || self.archive.sha(path))
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs `op`, retrying transient failures per the policy. Every call is
    /// added to `tries`.
    async fn with_backoff<T, F, Fut>(&self, tries: &mut u32, mut op: F) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        let mut attempt = 1;
        loop {
            *tries += 1;
            match op().await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient archive failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
