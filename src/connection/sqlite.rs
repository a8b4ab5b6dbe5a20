// SQLite Connection
//
// Connection implementation on top of rusqlite. Autocommit-off is emulated
// by opening a transaction before the first statement that runs outside one.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use log::debug;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{ErrorCode, InterruptHandle};

use crate::connection::{
    Connection, ConnectionError, ConnectionProfile, ConnectionResult, DbmsInfo, ExecOptions,
    SavepointHandle, StatementOutput,
};
use crate::engine::result::{DataValue, ResultSet};

static CONNECTION_SEQ: AtomicU32 = AtomicU32::new(1);

impl From<rusqlite::Error> for ConnectionError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
                ConnectionError::Cancelled
            }
            _ => ConnectionError::Database(err.to_string()),
        }
    }
}

/// A connection to an SQLite database file or in-memory database
pub struct SqliteConnection {
    id: String,
    conn: Mutex<Option<rusqlite::Connection>>,
    interrupt: InterruptHandle,
    dbms: DbmsInfo,
    profile: ConnectionProfile,
    auto_commit: AtomicBool,
    savepoint_seq: AtomicU32,
}

impl SqliteConnection {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, profile: ConnectionProfile) -> ConnectionResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Ok(Self::from_connection(conn, profile))
    }

    /// Open a private in-memory database
    pub fn open_in_memory(profile: ConnectionProfile) -> ConnectionResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self::from_connection(conn, profile))
    }

    fn from_connection(conn: rusqlite::Connection, profile: ConnectionProfile) -> Self {
        let interrupt = conn.get_interrupt_handle();
        let id = format!("sqlite-{}", CONNECTION_SEQ.fetch_add(1, Ordering::SeqCst));
        debug!("Opened {} for profile '{}'", id, profile.name);
        SqliteConnection {
            id,
            conn: Mutex::new(Some(conn)),
            interrupt,
            dbms: Self::dbms_info(),
            profile,
            auto_commit: AtomicBool::new(true),
            savepoint_seq: AtomicU32::new(0),
        }
    }

    /// Capabilities advertised for SQLite
    pub fn dbms_info() -> DbmsInfo {
        DbmsInfo {
            supports_savepoints: true,
            ..DbmsInfo::generic("sqlite", format!("SQLite {}", rusqlite::version()))
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> ConnectionResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(ConnectionError::Closed)?;
        f(conn).map_err(ConnectionError::from)
    }

    /// Open a transaction when autocommit is off and none is running
    fn begin_if_needed(conn: &rusqlite::Connection, auto_commit: bool) -> rusqlite::Result<()> {
        if !auto_commit && conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn query(
        conn: &rusqlite::Connection,
        sql: &str,
        max_rows: usize,
    ) -> rusqlite::Result<StatementOutput> {
        let mut stmt = conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            let changed = stmt.execute([])?;
            return Ok(StatementOutput::UpdateCount(changed as u64));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();
        let mut result = ResultSet::new(columns);
        result.set_source_sql(sql);

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if max_rows > 0 && result.row_count() >= max_rows {
                break;
            }
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(to_data_value(row.get_ref(i)?));
            }
            result.add_row(values);
        }
        Ok(StatementOutput::Rows(result))
    }
}

fn to_data_value(value: ValueRef<'_>) -> DataValue {
    match value {
        ValueRef::Null => DataValue::Null,
        ValueRef::Integer(i) => DataValue::Integer(i),
        ValueRef::Real(f) => DataValue::Float(f),
        ValueRef::Text(t) => DataValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => DataValue::Blob(b.to_vec()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.trim_matches('"').replace('"', "\"\""))
}

impl Connection for SqliteConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn dbms(&self) -> &DbmsInfo {
        &self.dbms
    }

    fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    fn set_auto_commit(&self, enabled: bool) -> ConnectionResult<()> {
        if enabled {
            // switching autocommit on ends the running transaction
            self.with_conn(|conn| {
                if !conn.is_autocommit() {
                    conn.execute_batch("COMMIT")?;
                }
                Ok(())
            })?;
        }
        self.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn execute(&self, sql: &str, options: ExecOptions) -> ConnectionResult<StatementOutput> {
        let auto_commit = self.auto_commit();
        self.with_conn(|conn| {
            if let Some(timeout) = options.timeout {
                conn.busy_timeout(timeout)?;
            }
            Self::begin_if_needed(conn, auto_commit)?;
            Self::query(conn, sql, options.max_rows)
        })
    }

    fn execute_batch(&self, statements: &[String]) -> ConnectionResult<Vec<u64>> {
        let auto_commit = self.auto_commit();
        self.with_conn(|conn| {
            Self::begin_if_needed(conn, auto_commit)?;
            let mut counts = Vec::with_capacity(statements.len());
            for sql in statements {
                counts.push(conn.execute(sql, [])? as u64);
            }
            Ok(counts)
        })
    }

    fn commit(&self) -> ConnectionResult<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            Ok(())
        })
    }

    fn rollback(&self) -> ConnectionResult<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
    }

    fn set_savepoint(&self) -> ConnectionResult<SavepointHandle> {
        let auto_commit = self.auto_commit();
        let name = format!("sqlrun_sp_{}", self.savepoint_seq.fetch_add(1, Ordering::SeqCst) + 1);
        self.with_conn(|conn| {
            Self::begin_if_needed(conn, auto_commit)?;
            conn.execute_batch(&format!("SAVEPOINT {}", name))
        })?;
        Ok(SavepointHandle { name })
    }

    fn release_savepoint(&self, savepoint: &SavepointHandle) -> ConnectionResult<()> {
        self.with_conn(|conn| conn.execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint.name)))
    }

    fn rollback_savepoint(&self, savepoint: &SavepointHandle) -> ConnectionResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
                savepoint.name
            ))
        })
    }

    fn describe_object(&self, name: &str) -> ConnectionResult<ResultSet> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(name));
        match self.with_conn(|conn| Self::query(conn, &sql, 0))? {
            StatementOutput::Rows(rs) if !rs.is_empty() => Ok(rs),
            _ => Err(ConnectionError::Database(format!("Object {} not found", name))),
        }
    }

    fn cancel_statement(&self) -> ConnectionResult<()> {
        self.interrupt.interrupt();
        Ok(())
    }

    fn disconnect(&self) -> ConnectionResult<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => {
                debug!("Closing {}", self.id);
                conn.close().map_err(|(_, e)| ConnectionError::from(e))
            }
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}
