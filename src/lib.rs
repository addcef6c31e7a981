//! # grbt8-backup
//!
//! Backup and restore service for the grbt8 admin database.
//!
//! The service snapshots the application tables into one JSON document,
//! publishes it (gzip-compressed by default) to a Git-hosted archive,
//! sweeps archive entries older than the retention horizon, and restores
//! snapshots back into the database in a single transaction. A small REST
//! surface exposes status, settings, manual runs, restore and the email
//! queue actions.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, external scheduler)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── BackupService, ConfigService, EmailQueueService (service/)
//!     ├── SnapshotBuilder → codec → Publisher → RetentionSweeper
//!     ├── RestoreEngine
//!     ├── EventBus → audit writer (domain/, service/audit)
//!     │
//!     ├── Store: PostgreSQL or in-memory (persistence/)
//!     └── ArchiveStore: GitHub, GitLab or local directory (archive/)
//! ```

pub mod api;
pub mod app_state;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
