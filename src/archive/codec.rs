//! Snapshot (de)serialization.
//!
//! Encoded snapshots are JSON, optionally gzip-compressed. Decoding sniffs
//! the gzip magic bytes instead of trusting the file extension, and checks
//! the document shape before anything else sees it.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;

use crate::domain::Snapshot;
use crate::error::BackupError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Serializes a snapshot. Uncompressed output is pretty-printed.
///
/// # Errors
///
/// Returns [`BackupError::Internal`] if serialization or compression fails.
pub fn encode(snapshot: &Snapshot, compress: bool) -> Result<Vec<u8>, BackupError> {
    if !compress {
        return serde_json::to_vec_pretty(snapshot)
            .map_err(|e| BackupError::Internal(format!("snapshot serialization failed: {e}")));
    }
    let json = serde_json::to_vec(snapshot)
        .map_err(|e| BackupError::Internal(format!("snapshot serialization failed: {e}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| BackupError::Internal(format!("snapshot compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| BackupError::Internal(format!("snapshot compression failed: {e}")))
}

/// Returns `true` if `bytes` start with the gzip magic number.
#[must_use]
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Parses a snapshot, gunzipping first if needed.
///
/// Counts are recomputed from the rows; whatever the file claims is
/// discarded.
///
/// # Errors
///
/// Returns [`BackupError::MalformedArchive`] if the bytes are not a
/// snapshot document.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, BackupError> {
    let json = if is_gzip(bytes) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| BackupError::MalformedArchive(format!("gzip stream is corrupt: {e}")))?;
        out
    } else {
        bytes.to_vec()
    };

    let document: Value = serde_json::from_slice(&json)
        .map_err(|e| BackupError::MalformedArchive(format!("not valid JSON: {e}")))?;
    validate_shape(&document)?;

    let mut snapshot: Snapshot = serde_json::from_value(document)
        .map_err(|e| BackupError::MalformedArchive(e.to_string()))?;
    snapshot.recount();
    Ok(snapshot)
}

fn validate_shape(document: &Value) -> Result<(), BackupError> {
    let tables = document
        .as_object()
        .ok_or_else(|| BackupError::MalformedArchive("document is not an object".into()))?
        .get("tables")
        .and_then(Value::as_object)
        .ok_or_else(|| BackupError::MalformedArchive("missing tables object".into()))?;

    for (key, rows) in tables {
        let rows = rows
            .as_array()
            .ok_or_else(|| BackupError::MalformedArchive(format!("{key} is not an array")))?;
        if let Some(index) = rows.iter().position(|row| !row.is_object()) {
            return Err(BackupError::MalformedArchive(format!(
                "row {index} of {key} is not an object"
            )));
        }
    }
    Ok(())
}
