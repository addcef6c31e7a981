//! grbt8-backup server entry point.
//!
//! Loads configuration, connects the store and archive that are
//! configured, starts the audit writer and serves the REST API.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use grbt8_backup::api;
use grbt8_backup::app_state::AppState;
use grbt8_backup::archive::{self, ArchiveStore};
use grbt8_backup::config::{LogFormat, ServiceConfig};
use grbt8_backup::domain::EventBus;
use grbt8_backup::error::BackupError;
use grbt8_backup::persistence::{PostgresStore, Store};
use grbt8_backup::service::{BackupService, ConfigService, Dependency, EmailQueueService, audit};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServiceConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting grbt8-backup");
    tracing::debug!(?config, "configuration loaded");

    // Build persistence layer
    let store: Dependency<Arc<dyn Store>> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, &config.database)
                .await
                .context("cannot connect to the database")?;
            tracing::info!("database connected");
            Dependency::Ready(Arc::new(store) as Arc<dyn Store>)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, database operations are disabled");
            Dependency::Missing("DATABASE_URL")
        }
    };

    // Build archive destination
    let archive: Dependency<Arc<dyn ArchiveStore>> = match archive::from_settings(&config.archive) {
        Ok(archive) => {
            tracing::info!(destination = %archive.describe(), "archive configured");
            Dependency::Ready(archive)
        }
        Err(BackupError::ConfigurationMissing(variable)) => {
            tracing::warn!(variable, "archive is not configured, backup and restore are disabled");
            Dependency::Missing(variable)
        }
        Err(e) => return Err(e).context("cannot build the archive client"),
    };

    // Build domain and service layer
    let event_bus = EventBus::new(config.event_bus_capacity);
    if let Some(store) = store.ready() {
        let _audit = audit::spawn_writer(&event_bus, Arc::clone(store));
    }
    let configs = Arc::new(ConfigService::new(
        store.clone(),
        config.backup.config_file.clone(),
    ));
    let backup_service = Arc::new(BackupService::new(
        store.clone(),
        archive,
        configs,
        event_bus.clone(),
        config.backup.clone(),
        config.archive.retry,
    ));
    let email_queue = Arc::new(EmailQueueService::new(store));

    // Build application state
    let app_state = AppState {
        backup_service,
        email_queue,
        event_bus,
    };

    // Build router
    let app = api::app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
