//! Backup settings with a read-through cache.
//!
//! Reads fall through three tiers: the settings record in the store, the
//! legacy JSON file, then the defaults. A tier that errors is logged and
//! skipped. Writes go to the store only.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::Dependency;
use crate::domain::BackupConfig;
use crate::error::BackupError;
use crate::persistence::Store;

/// Cached access to [`BackupConfig`].
#[derive(Debug)]
pub struct ConfigService {
    store: Dependency<Arc<dyn Store>>,
    legacy_file: Option<PathBuf>,
    cache: RwLock<Option<BackupConfig>>,
    mutation: Mutex<()>,
}

impl ConfigService {
    /// Creates a service with an empty cache.
    #[must_use]
    pub fn new(store: Dependency<Arc<dyn Store>>, legacy_file: Option<PathBuf>) -> Self {
        Self {
            store,
            legacy_file,
            cache: RwLock::new(None),
            mutation: Mutex::new(()),
        }
    }

    /// Current settings. Never fails; falls back to the defaults.
    pub async fn get(&self) -> BackupConfig {
        if let Some(config) = self.cache.read().await.as_ref() {
            return config.clone();
        }
        let mut cache = self.cache.write().await;
        if let Some(config) = cache.as_ref() {
            return config.clone();
        }
        let config = self.load().await;
        *cache = Some(config.clone());
        config
    }

    /// Validates and stores `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfig`] for bad values,
    /// [`BackupError::ConfigurationMissing`] without a store, or
    /// [`BackupError::Store`] if the write failed.
    pub async fn set(&self, config: BackupConfig) -> Result<BackupConfig, BackupError> {
        config.validate()?;
        let store = self.store.get()?;
        let _mutation = self.mutation.lock().await;
        self.persist(&store, config).await
    }

    /// Flips `enabled` and stores the result.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigService::set`].
    pub async fn toggle(&self) -> Result<BackupConfig, BackupError> {
        let store = self.store.get()?;
        let _mutation = self.mutation.lock().await;
        let mut config = self.get().await;
        config.enabled = !config.enabled;
        self.persist(&store, config).await
    }

    /// Drops the cached value so the next read goes to the store.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn persist(
        &self,
        store: &Arc<dyn Store>,
        config: BackupConfig,
    ) -> Result<BackupConfig, BackupError> {
        store.save_backup_config(&config).await?;
        *self.cache.write().await = Some(config.clone());
        tracing::info!(
            enabled = config.enabled,
            schedule = %config.schedule,
            retention = config.retention,
            "backup settings saved"
        );
        Ok(config)
    }

    async fn load(&self) -> BackupConfig {
        if let Some(store) = self.store.ready() {
            match store.load_backup_config().await {
                Ok(Some(config)) => match config.validate() {
                    Ok(()) => return config,
                    Err(e) => tracing::warn!(error = %e, "stored backup settings are out of range"),
                },
                Ok(None) => tracing::debug!("no stored backup settings"),
                Err(e) => tracing::warn!(error = %e, "cannot read stored backup settings"),
            }
        }

        if let Some(path) = &self.legacy_file {
            match tokio::fs::read(path).await {
                Ok(bytes) => match serde_json::from_slice::<BackupConfig>(&bytes) {
                    Ok(config) => match config.validate() {
                        Ok(()) => {
                            tracing::info!(path = %path.display(), "using legacy backup settings file");
                            return config;
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "legacy backup settings are out of range");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "legacy backup settings file is not valid JSON");
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read legacy backup settings file");
                }
            }
        }

        BackupConfig::default()
    }
}
