//! Manifest of the uploads directory.
//!
//! Only metadata is archived: relative path, size, modification time and
//! extension of every file. File contents stay on the application host.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use walkdir::WalkDir;

use crate::error::BackupError;

/// One file under the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Path relative to the uploads root, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<DateTime<Utc>>,
    /// Lowercase extension with its dot (`.png`), empty when there is none.
    #[serde(rename = "type")]
    pub file_type: String,
}

/// Totals over the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    /// Number of files.
    pub total_files: u64,
    /// Sum of file sizes in bytes.
    pub total_size_bytes: u64,
    /// Distinct extensions, sorted.
    pub file_types: Vec<String>,
}

/// Archived description of the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    /// When the scan ran.
    pub created_at: DateTime<Utc>,
    /// Deployment label.
    pub source_tag: String,
    /// Files sorted by path.
    pub files: Vec<UploadedFile>,
    /// Totals.
    pub summary: ManifestSummary,
}

impl UploadManifest {
    /// Walks `root` recursively on the blocking pool.
    ///
    /// A missing root yields an empty manifest. Entries that cannot be read
    /// are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Internal`] if the blocking task panicked.
    pub async fn scan(
        root: &Path,
        created_at: DateTime<Utc>,
        source_tag: &str,
    ) -> Result<Self, BackupError> {
        let root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| BackupError::Internal(format!("upload scan task failed: {e}")))?;

        let mut file_types: Vec<String> = files.iter().map(|file| file.file_type.clone()).collect();
        file_types.sort();
        file_types.dedup();
        let summary = ManifestSummary {
            total_files: files.len() as u64,
            total_size_bytes: files.iter().map(|file| file.size).sum(),
            file_types,
        };
        tracing::info!(
            files = summary.total_files,
            bytes = summary.total_size_bytes,
            "upload directory scanned"
        );
        Ok(Self {
            created_at,
            source_tag: source_tag.to_owned(),
            files,
            summary,
        })
    }

    /// Pretty JSON, the way the manifest is archived.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Internal`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| BackupError::Internal(format!("cannot encode upload manifest: {e}")))
    }
}

fn walk(root: &Path) -> Vec<UploadedFile> {
    if !root.is_dir() {
        tracing::info!(root = %root.display(), "uploads directory missing, manifest is empty");
        return Vec::new();
    }

    let mut files: Vec<UploadedFile> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable upload entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "cannot stat upload");
                    return None;
                }
            };
            let relative = entry.path().strip_prefix(root).ok()?;
            Some(UploadedFile {
                path: relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                file_type: relative
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
                    .unwrap_or_default(),
            })
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, body: &[u8]) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                panic!("cannot create {}", parent.display());
            }
        }
        if std::fs::write(&path, body).is_err() {
            panic!("cannot write {}", path.display());
        }
    }

    #[tokio::test]
    async fn lists_nested_files_with_totals() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir should be creatable");
        };
        write(dir.path(), "logo.PNG", b"12345");
        write(dir.path(), "campaigns/2026/banner.jpg", b"123");
        write(dir.path(), "campaigns/notes", b"1");

        let Ok(manifest) = UploadManifest::scan(dir.path(), Utc::now(), "test").await else {
            panic!("scan should succeed");
        };
        let paths: Vec<_> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["campaigns/2026/banner.jpg", "campaigns/notes", "logo.PNG"]);
        assert_eq!(manifest.summary.total_files, 3);
        assert_eq!(manifest.summary.total_size_bytes, 9);
        let types: Vec<_> = manifest.summary.file_types.iter().map(String::as_str).collect();
        assert_eq!(types, vec!["", ".jpg", ".png"]);
    }

    #[tokio::test]
    async fn missing_directory_is_an_empty_manifest() {
        let Ok(manifest) =
            UploadManifest::scan(Path::new("/nonexistent/uploads"), Utc::now(), "test").await
        else {
            panic!("scan of a missing directory should succeed");
        };
        assert!(manifest.files.is_empty());
        assert_eq!(manifest.summary, ManifestSummary::default());
    }

    #[tokio::test]
    async fn serializes_type_field() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir should be creatable");
        };
        write(dir.path(), "a.txt", b"x");
        let Ok(manifest) = UploadManifest::scan(dir.path(), Utc::now(), "test").await else {
            panic!("scan should succeed");
        };
        let Ok(bytes) = manifest.to_bytes() else {
            panic!("manifest should encode");
        };
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            panic!("manifest should be JSON");
        };
        assert_eq!(value.pointer("/files/0/type"), Some(&serde_json::json!(".txt")));
        assert_eq!(value.pointer("/summary/totalFiles"), Some(&serde_json::json!(1)));
    }
}
