//! GitHub contents API adapter.
//!
//! Files live in a repository branch and are addressed through
//! `/repos/{owner}/{repo}/contents/{path}`. The blob sha returned by the API
//! is the optimistic-concurrency token for replace and delete.

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{ArchiveError, ArchiveStore, EntryKind, RemoteEntry, RemoteFile};
use crate::domain::archive_path;

/// Public GitHub API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

/// Archive stored in a GitHub repository.
#[derive(Clone)]
pub struct GitHubArchive {
    client: Client,
    api_url: String,
    repository: String,
    branch: String,
    token: String,
}

impl fmt::Debug for GitHubArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubArchive")
            .field("api_url", &self.api_url)
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: Option<PutContent>,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

/// Percent-encodes each segment of an archive path, keeping the slashes.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decodes base64 content as returned by the API (wrapped at 60 columns).
pub(crate) fn decode_content(content: &str) -> Result<Vec<u8>, ArchiveError> {
    let compact: String = content.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| ArchiveError::Malformed(format!("invalid base64 content: {e}")))
}

impl GitHubArchive {
    /// Creates an adapter for `repository` (`owner/name`) on `branch`.
    #[must_use]
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            repository: repository.into(),
            branch: branch.into(),
            token: token.into(),
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_url,
            self.repository,
            encode_path(path)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Contents metadata of a single file, `None` when it does not exist.
    async fn contents(&self, path: &str) -> Result<Option<serde_json::Value>, ArchiveError> {
        if !archive_path::is_safe_relative(path) {
            return Err(ArchiveError::InvalidPath(path.to_owned()));
        }
        let request = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))?;
        if value.is_array() {
            return Err(ArchiveError::Malformed(format!("{path} is a folder")));
        }
        Ok(Some(value))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ArchiveError> {
        self.authorized(request)
            .send()
            .await
            .map_err(ArchiveError::from_http)
    }

    async fn fetch_blob(&self, sha: &str) -> Result<Vec<u8>, ArchiveError> {
        let url = format!("{}/repos/{}/git/blobs/{sha}", self.api_url, self.repository);
        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(classify(response, sha).await);
        }
        let blob: BlobResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))?;
        if blob.encoding != "base64" {
            return Err(ArchiveError::Malformed(format!(
                "unsupported blob encoding {}",
                blob.encoding
            )));
        }
        decode_content(&blob.content)
    }
}

fn is_rate_limited(headers: &HeaderMap) -> bool {
    headers.get("x-ratelimit-remaining") == Some(&HeaderValue::from_static("0"))
}

/// Maps a non-success response onto the archive error taxonomy.
async fn classify(response: Response, path: &str) -> ArchiveError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED => ArchiveError::Unauthorized,
        StatusCode::FORBIDDEN if is_rate_limited(response.headers()) => {
            ArchiveError::Transient("rate limit exhausted".to_owned())
        }
        StatusCode::FORBIDDEN => ArchiveError::Unauthorized,
        StatusCode::NOT_FOUND => ArchiveError::NotFound(path.to_owned()),
        StatusCode::CONFLICT => ArchiveError::Conflict(path.to_owned()),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let body = response.text().await.unwrap_or_default();
            if body.contains("sha") {
                ArchiveError::Conflict(path.to_owned())
            } else {
                ArchiveError::Rejected {
                    path: path.to_owned(),
                    status: status.as_u16(),
                }
            }
        }
        StatusCode::TOO_MANY_REQUESTS => ArchiveError::Transient("rate limited".to_owned()),
        s if s.is_server_error() => ArchiveError::Transient(format!("status {}", s.as_u16())),
        s => ArchiveError::Rejected {
            path: path.to_owned(),
            status: s.as_u16(),
        },
    }
}

#[async_trait]
impl ArchiveStore for GitHubArchive {
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, ArchiveError> {
        let Some(value) = self.contents(path).await? else {
            return Ok(None);
        };
        let file: ContentResponse = serde_json::from_value(value)
            .map_err(|e| ArchiveError::Malformed(e.to_string()))?;

        let bytes = match file.encoding.as_deref() {
            Some("base64") => decode_content(&file.content)?,
            // Files over 1 MB come back without inline content.
            _ => self.fetch_blob(&file.sha).await?,
        };
        Ok(Some(RemoteFile {
            bytes,
            sha: file.sha,
        }))
    }

    async fn sha(&self, path: &str) -> Result<Option<String>, ArchiveError> {
        let Some(value) = self.contents(path).await? else {
            return Ok(None);
        };
        let file: ShaResponse = serde_json::from_value(value)
            .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
        Ok(Some(file.sha))
    }

    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<Option<String>, ArchiveError> {
        if !archive_path::is_safe_relative(path) {
            return Err(ArchiveError::InvalidPath(path.to_owned()));
        }
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(bytes),
            "branch": self.branch,
        });
        if let (Some(sha), Some(fields)) = (sha, body.as_object_mut()) {
            fields.insert("sha".to_owned(), json!(sha));
        }

        let response = self
            .send(self.client.put(self.contents_url(path)).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }
        let created: PutResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))?;
        Ok(created.content.map(|content| content.sha))
    }

    async fn delete(&self, path: &str, sha: &str, message: &str) -> Result<(), ArchiveError> {
        if !archive_path::is_safe_relative(path) {
            return Err(ArchiveError::InvalidPath(path.to_owned()));
        }
        let body = json!({
            "message": message,
            "sha": sha,
            "branch": self.branch,
        });
        let response = self
            .send(self.client.delete(self.contents_url(path)).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, ArchiveError> {
        if !archive_path::is_safe_relative(folder) {
            return Err(ArchiveError::InvalidPath(folder.to_owned()));
        }
        let request = self
            .client
            .get(self.contents_url(folder))
            .query(&[("ref", self.branch.as_str())]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(classify(response, folder).await);
        }
        let items: Vec<ListItem> = response
            .json()
            .await
            .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))?;

        Ok(items
            .into_iter()
            .map(|item| RemoteEntry {
                name: item.name,
                path: item.path,
                sha: item.sha,
                kind: if item.kind == "dir" {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
                size: item.size,
            })
            .collect())
    }

    fn describe(&self) -> String {
        format!("github:{}@{}", self.repository, self.branch)
    }
}
