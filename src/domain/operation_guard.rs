//! Single-flight guards for long-running operations.
//!
//! [`OperationGuard`] holds one [`tokio::sync::Mutex`] per
//! [`OperationKind`]. Callers `try_acquire` instead of waiting, so a second
//! trigger while a snapshot or restore is running is rejected immediately
//! rather than queued behind it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::BackupError;

/// Kinds of operation that may not overlap with themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Snapshot + publish + sweep.
    Snapshot,
    /// Restore from an archive.
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::Restore => f.write_str("restore"),
        }
    }
}

/// Proof that an operation slot is held. Released on drop.
#[derive(Debug)]
pub struct OperationPermit {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Per-kind mutual exclusion.
#[derive(Debug)]
pub struct OperationGuard {
    slots: HashMap<OperationKind, Arc<Mutex<()>>>,
}

impl OperationGuard {
    /// Creates a guard with every slot free.
    #[must_use]
    pub fn new() -> Self {
        let slots = [OperationKind::Snapshot, OperationKind::Restore]
            .into_iter()
            .map(|kind| (kind, Arc::new(Mutex::new(()))))
            .collect();
        Self { slots }
    }

    /// Acquires every listed slot without waiting.
    ///
    /// Slots are taken in the order given; callers that need several kinds
    /// must always list them in the same order. If any slot is busy, the
    /// ones already taken are released.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::OperationInProgress`] naming the busy kind.
    pub fn try_acquire(&self, kinds: &[OperationKind]) -> Result<OperationPermit, BackupError> {
        let mut guards = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let slot = self
                .slots
                .get(kind)
                .ok_or_else(|| BackupError::Internal(format!("no slot for {kind}")))?;
            let guard = Arc::clone(slot)
                .try_lock_owned()
                .map_err(|_| BackupError::OperationInProgress(*kind))?;
            guards.push(guard);
        }
        Ok(OperationPermit { _guards: guards })
    }

    /// Returns `true` if an operation of `kind` is currently running.
    #[must_use]
    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|slot| slot.try_lock().is_err())
    }
}

impl Default for OperationGuard {
    fn default() -> Self {
        Self::new()
    }
}
