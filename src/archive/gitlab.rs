//! GitLab repository files API adapter.
//!
//! GitLab separates create (`POST`) from update (`PUT`) and guards updates
//! with the file's last commit id instead of a blob sha, so that id is what
//! this adapter hands out as the sha. Tree listings are paginated through
//! the `x-next-page` header.

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::github::decode_content;
use super::{ArchiveError, ArchiveStore, EntryKind, RemoteEntry, RemoteFile};
use crate::domain::archive_path;

/// Public GitLab API root.
pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const LAST_COMMIT_HEADER: &str = "x-gitlab-last-commit-id";
const NEXT_PAGE_HEADER: &str = "x-next-page";
const PAGE_SIZE: &str = "100";
const MAX_PAGES: u32 = 1000;

/// Archive stored in a GitLab project.
#[derive(Clone)]
pub struct GitLabArchive {
    client: Client,
    api_url: String,
    project: String,
    branch: String,
    token: String,
}

impl fmt::Debug for GitLabArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabArchive")
            .field("api_url", &self.api_url)
            .field("project", &self.project)
            .field("branch", &self.branch)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    content: String,
    last_commit_id: String,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    id: String,
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitLabArchive {
    /// Creates an adapter for `project` (numeric id or `group/name`) on
    /// `branch`.
    #[must_use]
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        project: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            project: project.into(),
            branch: branch.into(),
            token: token.into(),
        }
    }

    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}",
            self.api_url,
            urlencoding::encode(&self.project)
        )
    }

    fn file_url(&self, path: &str) -> String {
        format!(
            "{}/repository/files/{}",
            self.project_url(),
            urlencoding::encode(path)
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ArchiveError> {
        request
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(ArchiveError::from_http)
    }

    fn check_path(path: &str) -> Result<(), ArchiveError> {
        if archive_path::is_safe_relative(path) {
            Ok(())
        } else {
            Err(ArchiveError::InvalidPath(path.to_owned()))
        }
    }
}

/// Maps a non-success response onto the archive error taxonomy.
async fn classify(response: Response, path: &str) -> ArchiveError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ArchiveError::Unauthorized,
        StatusCode::NOT_FOUND => ArchiveError::NotFound(path.to_owned()),
        StatusCode::CONFLICT => ArchiveError::Conflict(path.to_owned()),
        StatusCode::BAD_REQUEST => {
            let body = response.text().await.unwrap_or_default();
            if body.contains("already exists") || body.contains("changed") {
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
impl ArchiveStore for GitLabArchive {
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, ArchiveError> {
        Self::check_path(path)?;
        let request = self
            .client
            .get(self.file_url(path))
            .query(&[("ref", self.branch.as_str())]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }
        let file: FileResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))?;
        Ok(Some(RemoteFile {
            bytes: decode_content(&file.content)?,
            sha: file.last_commit_id,
        }))
    }

    async fn sha(&self, path: &str) -> Result<Option<String>, ArchiveError> {
        Self::check_path(path)?;
        let request = self
            .client
            .head(self.file_url(path))
            .query(&[("ref", self.branch.as_str())]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }
        response
            .headers()
            .get(LAST_COMMIT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| Some(value.to_owned()))
            .ok_or_else(|| ArchiveError::Malformed(format!("no last commit id for {path}")))
    }

    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<Option<String>, ArchiveError> {
        Self::check_path(path)?;
        let mut body = json!({
            "branch": self.branch,
            "content": STANDARD.encode(bytes),
            "encoding": "base64",
            "commit_message": message,
        });
        let request = match sha {
            Some(last_commit_id) => {
                if let Some(fields) = body.as_object_mut() {
                    fields.insert("last_commit_id".to_owned(), json!(last_commit_id));
                }
                self.client.put(self.file_url(path))
            }
            None => self.client.post(self.file_url(path)),
        };

        let response = self.send(request.json(&body)).await?;
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }
        // The write response carries no commit id; a failed lookup only
        // costs the receipt its sha.
        Ok(self.sha(path).await.ok().flatten())
    }

    async fn delete(&self, path: &str, _sha: &str, message: &str) -> Result<(), ArchiveError> {
        // Tree listings expose blob ids, not commit ids, so deletes are not
        // guarded by `last_commit_id`.
        Self::check_path(path)?;
        let body = json!({
            "branch": self.branch,
            "commit_message": message,
        });
        let response = self
            .send(self.client.delete(self.file_url(path)).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response, path).await);
        }
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, ArchiveError> {
        Self::check_path(folder)?;
        let url = format!("{}/repository/tree", self.project_url());
        let mut entries = Vec::new();
        let mut page = String::from("1");

        for _ in 0..MAX_PAGES {
            let request = self.client.get(&url).query(&[
                ("path", folder),
                ("ref", self.branch.as_str()),
                ("per_page", PAGE_SIZE),
                ("page", page.as_str()),
            ]);
            let response = self.send(request).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(classify(response, folder).await);
            }
            let next = response
                .headers()
                .get(NEXT_PAGE_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned);
            let items: Vec<TreeItem> = response
                .json()
                .await
                .map_err(|e| ArchiveError::Malformed(e.without_url().to_string()))?;

            entries.extend(items.into_iter().map(|item| RemoteEntry {
                name: item.name,
                path: item.path,
                sha: item.id,
                kind: if item.kind == "tree" {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
                size: None,
            }));

            match next {
                Some(next) => page = next,
                None => return Ok(entries),
            }
        }
        tracing::warn!(folder, "tree listing stopped at the page limit");
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("gitlab:{}@{}", self.project, self.branch)
    }
}
