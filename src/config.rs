//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Credentials are only ever read from the
//! environment, and the `Debug` output of every settings struct redacts
//! them. A missing database URL, token or repository does not stop the
//! service; the operations that need them report which variable to set.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::archive::publisher::RetryPolicy;
use crate::service::PartialReadPolicy;

const REDACTED: &str = "<redacted>";

/// Where archives are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveHost {
    /// GitHub contents API.
    GitHub,
    /// GitLab repository files API.
    GitLab,
    /// A directory on the local filesystem.
    Local,
}

impl FromStr for ArchiveHost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "local" => Ok(Self::Local),
            other => Err(format!("BACKUP_HOST must be github, gitlab or local, got {other}")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Maximum number of database connections in the pool.
    pub max_connections: u32,
    /// Minimum idle connections in the pool.
    pub min_connections: u32,
    /// Timeout for acquiring a database connection.
    pub connect_timeout: Duration,
}

/// Archive destination settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveSettings {
    /// Destination kind.
    pub host: ArchiveHost,
    /// API token for GitHub or GitLab.
    pub token: Option<String>,
    /// `owner/name` on GitHub, project id or path on GitLab.
    pub repository: Option<String>,
    /// Branch receiving the commits.
    pub branch: String,
    /// API base URL override, for self-hosted instances.
    pub api_url: Option<String>,
    /// Root directory for [`ArchiveHost::Local`].
    pub local_dir: PathBuf,
    /// Per-request timeout for the HTTP adapters.
    pub http_timeout: Duration,
    /// Publish retry settings.
    pub retry: RetryPolicy,
}

impl fmt::Debug for ArchiveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSettings")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| REDACTED))
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .field("api_url", &self.api_url)
            .field("local_dir", &self.local_dir)
            .field("http_timeout", &self.http_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Pipeline settings that are not part of the stored [`crate::domain::BackupConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    /// Legacy JSON settings file read when the store has no record.
    pub config_file: Option<PathBuf>,
    /// Directory described by the upload manifest.
    pub uploads_dir: PathBuf,
    /// Deployment label written into every snapshot.
    pub source_tag: String,
    /// Gzip snapshots before publishing.
    pub compress: bool,
    /// What a failed table read does to the snapshot.
    pub partial_read_policy: PartialReadPolicy,
}

/// Top-level service configuration.
///
/// Loaded once at startup via [`ServiceConfig::from_env`].
#[derive(Clone)]
pub struct ServiceConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Pool settings.
    pub database: DatabaseSettings,
    /// Archive destination.
    pub archive: ArchiveSettings,
    /// Pipeline settings.
    pub backup: BackupSettings,
    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,
    /// Log output format.
    pub log_format: LogFormat,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("listen_addr", &self.listen_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| REDACTED))
            .field("database", &self.database)
            .field("archive", &self.archive)
            .field("backup", &self.backup)
            .field("event_bus_capacity", &self.event_bus_capacity)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl ServiceConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR`, `BACKUP_HOST` or
    /// `BACKUP_PARTIAL_READ_POLICY` is set to an unparseable value.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let listen_addr: SocketAddr = env
            .string("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()?;

        let database = DatabaseSettings {
            max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10),
            min_connections: env.parse("DATABASE_MIN_CONNECTIONS", 2),
            connect_timeout: Duration::from_secs(env.parse("DATABASE_CONNECT_TIMEOUT_SECS", 5)),
        };

        let host = match env.string("BACKUP_HOST") {
            Some(raw) => raw.parse::<ArchiveHost>()?,
            None => ArchiveHost::GitHub,
        };
        let archive = ArchiveSettings {
            host,
            token: env.string("BACKUP_HOST_TOKEN"),
            repository: env.string("BACKUP_REPOSITORY"),
            branch: env.string("BACKUP_BRANCH").unwrap_or_else(|| "main".to_string()),
            api_url: env.string("BACKUP_API_URL"),
            local_dir: env.path("BACKUP_LOCAL_DIR", "backups"),
            http_timeout: Duration::from_secs(env.parse("BACKUP_HTTP_TIMEOUT_SECS", 30)),
            retry: RetryPolicy {
                max_attempts: env.parse("BACKUP_RETRY_MAX_ATTEMPTS", 3_u32).max(1),
                base_delay: Duration::from_millis(env.parse("BACKUP_RETRY_BASE_DELAY_MS", 500)),
            },
        };

        let partial_read_policy = match env.string("BACKUP_PARTIAL_READ_POLICY") {
            Some(raw) => raw.parse::<PartialReadPolicy>()?,
            None => PartialReadPolicy::default(),
        };
        let backup = BackupSettings {
            config_file: Some(env.path("BACKUP_CONFIG_FILE", "shared/backup-config.json")),
            uploads_dir: env.path("BACKUP_UPLOADS_DIR", "public/uploads"),
            source_tag: env
                .string("BACKUP_SOURCE_TAG")
                .unwrap_or_else(|| "grbt8-admin".to_string()),
            compress: env.bool("BACKUP_COMPRESS", true),
            partial_read_policy,
        };

        let log_format = match env.string("LOG_FORMAT").as_deref() {
            Some("json" | "JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            database_url: env.string("DATABASE_URL"),
            database,
            archive,
            backup,
            event_bus_capacity: env.parse("EVENT_BUS_CAPACITY", 1024),
            log_format,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-empty trimmed value of `key`.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Parses `key` as `T`, returning `default` on missing or invalid values.
    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Parses `key` as a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
    /// (case-insensitive). Returns `default` otherwise.
    fn bool(&self, key: &str, default: bool) -> bool {
        match self.string(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            _ => default,
        }
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.string(key).unwrap_or_else(|| default.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_any_variable() {
        let Ok(config) = load(&[]) else {
            panic!("empty environment should load");
        };
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.database_url, None);
        assert_eq!(config.archive.host, ArchiveHost::GitHub);
        assert_eq!(config.archive.branch, "main");
        assert_eq!(config.archive.retry, RetryPolicy::default());
        assert_eq!(config.backup.source_tag, "grbt8-admin");
        assert!(config.backup.compress);
        assert_eq!(config.backup.partial_read_policy, PartialReadPolicy::Abort);
        assert_eq!(config.event_bus_capacity, 1024);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn reads_overrides() {
        let Ok(config) = load(&[
            ("BACKUP_HOST", "GitLab"),
            ("BACKUP_REPOSITORY", "grbt8/backups"),
            ("BACKUP_COMPRESS", "0"),
            ("BACKUP_PARTIAL_READ_POLICY", "record_empty"),
            ("BACKUP_RETRY_MAX_ATTEMPTS", "5"),
            ("DATABASE_MAX_CONNECTIONS", "not-a-number"),
            ("LOG_FORMAT", "json"),
        ]) else {
            panic!("overrides should load");
        };
        assert_eq!(config.archive.host, ArchiveHost::GitLab);
        assert_eq!(config.archive.repository.as_deref(), Some("grbt8/backups"));
        assert!(!config.backup.compress);
        assert_eq!(config.backup.partial_read_policy, PartialReadPolicy::RecordEmpty);
        assert_eq!(config.archive.retry.max_attempts, 5);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_enumerations() {
        assert!(load(&[("BACKUP_HOST", "dropbox")]).is_err());
        assert!(load(&[("BACKUP_PARTIAL_READ_POLICY", "ignore")]).is_err());
        assert!(load(&[("LISTEN_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let Ok(config) = load(&[
            ("DATABASE_URL", "postgres://admin:hunter2@db/grbt8"),
            ("BACKUP_HOST_TOKEN", "ghp_secret_value"),
        ]) else {
            panic!("config should load");
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("ghp_secret_value"));
        assert!(rendered.contains(REDACTED));
    }
}
