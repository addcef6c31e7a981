//! Backup settings record shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::CronSchedule;
use crate::error::BackupError;

/// Longest retention horizon accepted, in days.
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// Backup settings.
///
/// Missing fields in a stored or submitted document fall back to the
/// defaults below, so partial JSON files keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupConfig {
    /// Whether scheduled runs do anything.
    pub enabled: bool,
    /// Five-field cron expression for the external trigger.
    pub schedule: String,
    /// Archive entries older than this many days are swept.
    pub retention: u32,
    /// Snapshot business tables and the settings record.
    pub include_database: bool,
    /// Publish a manifest of the uploads directory.
    pub include_uploads: bool,
    /// Snapshot the audit log table.
    pub include_logs: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: "0 2 * * *".to_string(),
            retention: 7,
            include_database: true,
            include_uploads: true,
            include_logs: true,
        }
    }
}

impl BackupConfig {
    /// Checks the schedule syntax and retention bounds.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), BackupError> {
        CronSchedule::parse(&self.schedule)?;
        if self.retention == 0 || self.retention > MAX_RETENTION_DAYS {
            return Err(BackupError::InvalidConfig(format!(
                "retention must be between 1 and {MAX_RETENTION_DAYS} days"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(BackupConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let Ok(config) = serde_json::from_str::<BackupConfig>(r#"{"enabled":true,"retention":14}"#)
        else {
            panic!("partial config should parse");
        };
        assert!(config.enabled);
        assert_eq!(config.retention, 14);
        assert_eq!(config.schedule, "0 2 * * *");
        assert!(config.include_uploads);
    }

    #[test]
    fn rejects_bad_retention() {
        let config = BackupConfig {
            retention: 0,
            ..BackupConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackupError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_bad_schedule() {
        let config = BackupConfig {
            schedule: "every day".to_string(),
            ..BackupConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackupError::InvalidConfig(_))));
    }

    #[test]
    fn serializes_camel_case() {
        let Ok(value) = serde_json::to_value(BackupConfig::default()) else {
            panic!("serialization failed");
        };
        assert!(value.get("includeDatabase").is_some());
        assert!(value.get("include_database").is_none());
    }
}
