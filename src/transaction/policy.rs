// Read-only transaction termination
//
// With autocommit off, even a plain SELECT may open a transaction that keeps
// read locks until the session ends. After a qualifying statement the open
// transaction is committed or rolled back if it holds no changes.

use log::{debug, warn};

use crate::command::SqlCommand;
use crate::connection::Connection;
use crate::transaction::checker::{checker_for, TransactionChecker};
use crate::transaction::EndReadOnlyTransaction;

/// What the termination step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyTermination {
    /// Policy, connection or command state meant nothing to do
    Skipped,
    /// The transaction holds changes and was left open
    PendingChanges,
    Committed,
    RolledBack,
    /// Commit or rollback failed; the failure was logged
    Failed,
}

/// Whether the last statement may end a read-only transaction
pub fn qualifies(command: &dyn SqlCommand, conn: &dyn Connection, sql: &str) -> bool {
    !(command.is_updating_command()
        || command.is_transaction_control()
        || command.is_session_control()
        || command.is_wb_command()
        || command.is_updating_statement(Some(conn.dbms()), sql))
}

/// End the transaction using the checker registered for the DBMS
pub fn end_read_only_transaction(
    conn: Option<&dyn Connection>,
    command: Option<&dyn SqlCommand>,
    sql: &str,
    mode: EndReadOnlyTransaction,
) -> ReadOnlyTermination {
    match conn {
        Some(c) => {
            let checker = checker_for(c.dbms());
            end_read_only_transaction_with(conn, command, sql, mode, checker.as_ref())
        }
        None => ReadOnlyTermination::Skipped,
    }
}

/// End the transaction using an explicit checker
pub fn end_read_only_transaction_with(
    conn: Option<&dyn Connection>,
    command: Option<&dyn SqlCommand>,
    sql: &str,
    mode: EndReadOnlyTransaction,
    checker: &dyn TransactionChecker,
) -> ReadOnlyTermination {
    let conn = match conn {
        Some(conn) if !conn.auto_commit() && !conn.is_closed() => conn,
        _ => return ReadOnlyTermination::Skipped,
    };
    if mode == EndReadOnlyTransaction::Never {
        return ReadOnlyTermination::Skipped;
    }
    match command {
        Some(cmd) if qualifies(cmd, conn, sql) => {}
        _ => return ReadOnlyTermination::Skipped,
    }

    if checker.has_uncommitted_changes(conn) {
        debug!("Transaction on {} has uncommitted changes, leaving it open", conn.id());
        return ReadOnlyTermination::PendingChanges;
    }

    let (outcome, done) = match mode {
        EndReadOnlyTransaction::Commit => (conn.commit(), ReadOnlyTermination::Committed),
        _ => (conn.rollback(), ReadOnlyTermination::RolledBack),
    };
    match outcome {
        Ok(()) => {
            debug!("Read-only transaction on {} ended ({:?})", conn.id(), done);
            done
        }
        Err(e) => {
            warn!("Could not end read-only transaction on {}: {}", conn.id(), e);
            ReadOnlyTermination::Failed
        }
    }
}
