// Savepoint Manager
//
// Holds at most one savepoint. Creating is idempotent; releasing and rolling
// back always empty the slot, whether or not the database call succeeds.

use log::{debug, warn};
use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionError, SavepointHandle};
use crate::transaction::SavepointStrategy;

/// Statement class a savepoint decision is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointScope {
    Dml,
    Ddl,
}

/// Single-slot savepoint holder
#[derive(Debug, Default)]
pub struct SavepointManager {
    current: Mutex<Option<SavepointHandle>>,
}

impl SavepointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a statement of the given scope runs inside a savepoint
    pub fn use_savepoint_for(
        conn: &dyn Connection,
        strategy: SavepointStrategy,
        scope: SavepointScope,
    ) -> bool {
        if conn.auto_commit() || !conn.dbms().supports_savepoints {
            return false;
        }
        match strategy {
            SavepointStrategy::Always => true,
            SavepointStrategy::Never => false,
            SavepointStrategy::WhenConfiguredByDbms => match scope {
                SavepointScope::Dml => conn.dbms().savepoint_for_dml,
                SavepointScope::Ddl => conn.dbms().savepoint_for_ddl,
            },
        }
    }

    pub fn has_savepoint(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Create a savepoint unless one is already held.
    ///
    /// Failures are logged and leave the slot empty.
    pub fn set_savepoint(&self, conn: &dyn Connection) {
        let mut current = self.current.lock();
        if current.is_some() {
            return;
        }
        match conn.set_savepoint() {
            Ok(handle) => {
                debug!("Savepoint {} set on {}", handle.name, conn.id());
                *current = Some(handle);
            }
            Err(ConnectionError::SavepointsUnsupported(dbms)) => {
                warn!("Savepoints not supported by {}, continuing without", dbms);
            }
            Err(e) => warn!("Could not set savepoint on {}: {}", conn.id(), e),
        }
    }

    pub fn release_savepoint(&self, conn: &dyn Connection) {
        let handle = match self.current.lock().take() {
            Some(handle) => handle,
            None => return,
        };
        if let Err(e) = conn.release_savepoint(&handle) {
            warn!("Could not release savepoint {}: {}", handle.name, e);
        }
    }

    pub fn rollback_savepoint(&self, conn: &dyn Connection) {
        let handle = match self.current.lock().take() {
            Some(handle) => handle,
            None => return,
        };
        if let Err(e) = conn.rollback_savepoint(&handle) {
            warn!("Could not roll back to savepoint {}: {}", handle.name, e);
        }
    }

    /// Forget the held savepoint without touching the database
    pub fn clear(&self) {
        self.current.lock().take();
    }
}
