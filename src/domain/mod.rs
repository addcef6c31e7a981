//! Domain layer: snapshot model, archive naming, settings and events.
//!
//! Nothing in here performs I/O. The table catalog, the snapshot document,
//! the archive naming rules, the cron schedule and the single-flight guard
//! are shared by every service.

pub mod archive_path;
pub mod backup_config;
pub mod backup_event;
pub mod event_bus;
pub mod operation_guard;
pub mod schedule;
pub mod snapshot;
pub mod table;

pub use backup_config::BackupConfig;
pub use backup_event::{BackupEvent, EventLevel};
pub use event_bus::EventBus;
pub use operation_guard::{OperationGuard, OperationKind, OperationPermit};
pub use schedule::CronSchedule;
pub use snapshot::{Row, Snapshot};
pub use table::{TableCategory, TableSpec};
