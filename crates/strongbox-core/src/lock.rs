//! Single-flight guard shared by backup and restore.
//!
//! Artifact names have second resolution and a restore rewrites the whole
//! datastore, so at most one of these operations may run against a datastore
//! at any time. Acquisition never waits: a second caller learns immediately
//! which operation holds the lock.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// The operation currently holding an [`OperationLock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Backup,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lock is held; carries the holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockBusy {
    pub holder: Operation,
}

/// Cloneable handle to one datastore's single-flight slot
#[derive(Debug, Clone, Default)]
pub struct OperationLock {
    slot: Arc<Mutex<Option<Operation>>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `operation`, failing fast if it is taken
    pub fn try_acquire(&self, operation: Operation) -> Result<OperationGuard, LockBusy> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(holder) = *slot {
            return Err(LockBusy { holder });
        }
        *slot = Some(operation);
        Ok(OperationGuard {
            slot: Arc::clone(&self.slot),
            operation,
        })
    }

    /// The operation currently running, if any
    pub fn holder(&self) -> Option<Operation> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the slot when dropped
#[derive(Debug)]
pub struct OperationGuard {
    slot: Arc<Mutex<Option<Operation>>>,
    operation: Operation,
}

impl OperationGuard {
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }
}
