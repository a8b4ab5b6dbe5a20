// Connection Module
//
// This module defines the boundary to a live database connection: DBMS
// identity and capability flags, the connection profile, savepoint handles
// and the statement execution surface used by commands.

pub mod sqlite;

use std::time::Duration;
use thiserror::Error;

use crate::engine::result::ResultSet;

pub use self::sqlite::SqliteConnection;

/// Errors reported by a database connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Savepoints are not supported by {0}")]
    SavepointsUnsupported(String),
    #[error("Operation not supported: {0}")]
    Unsupported(String),
    #[error("Connection is closed")]
    Closed,
    #[error("Statement was cancelled")]
    Cancelled,
}

/// Result type for connection operations
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// DBMS identity and the capability flags the dispatcher inspects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbmsInfo {
    /// Normalized DBMS identifier, e.g. "postgresql" or "sqlite"
    pub dbms_id: String,
    /// Human readable product name
    pub product_name: String,
    /// Catalog switching through USE
    pub supports_catalogs: bool,
    pub supports_savepoints: bool,
    /// Session variables that can be SET and RESET
    pub supports_session_variables: bool,
    /// SELECT ... INTO creates a new table
    pub supports_select_into: bool,
    /// DESCRIBE is a native statement
    pub native_describe: bool,
    /// Procedures are called through EXEC/EXECUTE
    pub exec_procedure_call: bool,
    /// DDL must be committed explicitly
    pub ddl_needs_commit: bool,
    /// Default for wrapping DML in a savepoint
    pub savepoint_for_dml: bool,
    /// Default for wrapping DDL in a savepoint
    pub savepoint_for_ddl: bool,
}

impl DbmsInfo {
    /// Capability set with every optional feature disabled
    pub fn generic(dbms_id: impl Into<String>, product_name: impl Into<String>) -> Self {
        DbmsInfo {
            dbms_id: dbms_id.into(),
            product_name: product_name.into(),
            supports_catalogs: false,
            supports_savepoints: false,
            supports_session_variables: false,
            supports_select_into: false,
            native_describe: false,
            exec_procedure_call: false,
            ddl_needs_commit: false,
            savepoint_for_dml: false,
            savepoint_for_ddl: false,
        }
    }
}

/// Connection profile settings relevant to statement execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionProfile {
    pub name: String,
    pub url: String,
    pub user: String,
    /// Refuse statements that modify the database
    pub read_only: bool,
    /// Ask before running updating statements
    pub confirm_updates: bool,
    /// Do not report connection warnings
    pub hide_warnings: bool,
}

impl ConnectionProfile {
    pub fn new(name: impl Into<String>, url: impl Into<String>, user: impl Into<String>) -> Self {
        ConnectionProfile {
            name: name.into(),
            url: url.into(),
            user: user.into(),
            ..Default::default()
        }
    }
}

/// A savepoint created on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavepointHandle {
    pub name: String,
}

/// Limits applied to a single statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Maximum number of rows to fetch, 0 for unlimited
    pub max_rows: usize,
    pub timeout: Option<Duration>,
}

/// What the database returned for a statement
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    Rows(ResultSet),
    UpdateCount(u64),
    Done,
}

/// A live database connection.
///
/// Implementations must tolerate `cancel_statement` being called from
/// another thread while `execute` blocks.
pub trait Connection: Send + Sync {
    /// Unique id of this connection, used in log output
    fn id(&self) -> &str;

    fn dbms(&self) -> &DbmsInfo;

    fn profile(&self) -> &ConnectionProfile;

    fn auto_commit(&self) -> bool;

    fn set_auto_commit(&self, enabled: bool) -> ConnectionResult<()>;

    fn execute(&self, sql: &str, options: ExecOptions) -> ConnectionResult<StatementOutput>;

    /// Execute statements as one unit, returning one update count per statement
    fn execute_batch(&self, statements: &[String]) -> ConnectionResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(statements.len());
        for sql in statements {
            match self.execute(sql, ExecOptions::default())? {
                StatementOutput::UpdateCount(n) => counts.push(n),
                _ => counts.push(0),
            }
        }
        Ok(counts)
    }

    fn commit(&self) -> ConnectionResult<()>;

    fn rollback(&self) -> ConnectionResult<()>;

    fn set_savepoint(&self) -> ConnectionResult<SavepointHandle>;

    fn release_savepoint(&self, savepoint: &SavepointHandle) -> ConnectionResult<()>;

    fn rollback_savepoint(&self, savepoint: &SavepointHandle) -> ConnectionResult<()>;

    fn set_catalog(&self, catalog: &str) -> ConnectionResult<()> {
        Err(ConnectionError::Unsupported(format!("switching to catalog {}", catalog)))
    }

    /// Column information for a table
    fn describe_object(&self, name: &str) -> ConnectionResult<ResultSet> {
        Err(ConnectionError::Unsupported(format!("describing {}", name)))
    }

    /// Vendor-level cancel of the running statement
    fn cancel_statement(&self) -> ConnectionResult<()> {
        Err(ConnectionError::Unsupported("statement cancel".to_string()))
    }

    /// Warnings collected since the last call to `clear_warnings`
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }

    fn clear_warnings(&self) {}

    fn disconnect(&self) -> ConnectionResult<()>;

    fn is_closed(&self) -> bool;
}
