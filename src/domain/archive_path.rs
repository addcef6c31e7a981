//! Remote archive naming: timestamp tokens embedded in filenames.
//!
//! Every archive file carries a zero-padded UTC token such as
//! `2026-10-19T14-05-00`, so lexicographic filename order equals
//! chronological order. The retention sweeper and the restore engine both
//! depend on being able to parse that token back.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

/// Folder holding database snapshots.
pub const DATABASE_FOLDER: &str = "database";
/// Folder holding upload manifests.
pub const UPLOADS_FOLDER: &str = "uploads";
/// Folder holding run reports.
pub const REPORTS_FOLDER: &str = "reports";
/// Folders visited by the retention sweeper.
pub const SWEPT_FOLDERS: [&str; 3] = [DATABASE_FOLDER, UPLOADS_FOLDER, REPORTS_FOLDER];

const TOKEN_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

static TIMESTAMP_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"backup_(?:[a-z]+_)?(\d{4}-\d{2}-\d{2})(?:T(\d{2})-(\d{2})-(\d{2}))?").ok()
});

static SNAPSHOT_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^db_backup_.+\.json(\.gz)?$").ok());

/// Formats `at` as a filename-safe timestamp token.
#[must_use]
pub fn timestamp_token(at: DateTime<Utc>) -> String {
    at.format(TOKEN_FORMAT).to_string()
}

/// Path of the snapshot archive for a run.
#[must_use]
pub fn snapshot_path(at: DateTime<Utc>, compressed: bool) -> String {
    let ext = if compressed { "json.gz" } else { "json" };
    format!("{DATABASE_FOLDER}/db_backup_{}.{ext}", timestamp_token(at))
}

/// Path of the upload manifest for a run.
#[must_use]
pub fn upload_manifest_path(at: DateTime<Utc>) -> String {
    format!("{UPLOADS_FOLDER}/upload_backup_{}.json", timestamp_token(at))
}

/// Path of the run report.
#[must_use]
pub fn report_path(at: DateTime<Utc>) -> String {
    format!("{REPORTS_FOLDER}/backup_report_{}.json", timestamp_token(at))
}

/// Extracts the embedded timestamp from a filename.
///
/// Date-only tokens (`backup_2026-10-01`) resolve to midnight UTC.
/// Returns `None` for names that carry no recognizable token.
#[must_use]
pub fn parse_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let pattern = TIMESTAMP_PATTERN.as_ref()?;
    let caps = pattern.captures(name)?;
    let date = NaiveDate::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%d").ok()?;

    let time = match (caps.get(2), caps.get(3), caps.get(4)) {
        (Some(h), Some(m), Some(s)) => NaiveTime::from_hms_opt(
            h.as_str().parse().ok()?,
            m.as_str().parse().ok()?,
            s.as_str().parse().ok()?,
        )?,
        _ => NaiveTime::MIN,
    };

    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

/// Returns `true` if `name` looks like a database snapshot file.
#[must_use]
pub fn is_snapshot_name(name: &str) -> bool {
    SNAPSHOT_NAME
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

/// Returns the final path component.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Rejects empty, absolute and parent-escaping archive paths.
#[must_use]
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|part| !part.is_empty() && part != ".." && part != ".")
}
