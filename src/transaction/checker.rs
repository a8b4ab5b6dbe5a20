// Transaction Checkers
//
// DBMS specific checks that tell whether the current transaction holds
// uncommitted modifications.

use std::collections::HashMap;
use log::warn;
use once_cell::sync::Lazy;

use crate::connection::{Connection, DbmsInfo, ExecOptions, StatementOutput};

/// Probes a connection for uncommitted changes
pub trait TransactionChecker: Send + Sync {
    fn has_uncommitted_changes(&self, conn: &dyn Connection) -> bool;
}

/// Queries returning a positive count while the transaction has modified data
static CHECK_QUERIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut queries = HashMap::new();
    queries.insert(
        "postgresql",
        "select count(*) from pg_locks where pid = pg_backend_pid() \
         and locktype = 'transactionid' and mode = 'ExclusiveLock'",
    );
    queries.insert(
        "oracle",
        "select count(*) from v$transaction t join v$session s on t.ses_addr = s.saddr \
         where s.sid = sys_context('userenv', 'sid')",
    );
    queries.insert(
        "mysql",
        "select count(*) from information_schema.innodb_trx \
         where trx_mysql_thread_id = connection_id() and trx_rows_modified > 0",
    );
    queries.insert(
        "microsoft_sql_server",
        "select count(*) from sys.dm_tran_database_transactions \
         where transaction_id = current_transaction_id() \
         and database_transaction_log_record_count > 0",
    );
    queries
});

/// Runs a count query; any positive value means pending changes
#[derive(Debug, Clone)]
pub struct QueryTransactionCheck {
    query: String,
}

impl QueryTransactionCheck {
    pub fn new(query: impl Into<String>) -> Self {
        QueryTransactionCheck { query: query.into() }
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl TransactionChecker for QueryTransactionCheck {
    fn has_uncommitted_changes(&self, conn: &dyn Connection) -> bool {
        match conn.execute(&self.query, ExecOptions { max_rows: 1, timeout: None }) {
            Ok(StatementOutput::Rows(rs)) => rs
                .rows()
                .first()
                .and_then(|row| row.first())
                .and_then(|value| value.as_i64())
                .map(|count| count > 0)
                .unwrap_or(false),
            Ok(_) => false,
            Err(e) => {
                // Unknown state, treat as modified so nothing gets rolled back
                warn!("Could not check for uncommitted changes on {}: {}", conn.id(), e);
                true
            }
        }
    }
}

/// Used when the DBMS has no way to check for pending changes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransactionCheck;

impl TransactionChecker for NoTransactionCheck {
    fn has_uncommitted_changes(&self, conn: &dyn Connection) -> bool {
        warn!(
            "No transaction check available for {}, assuming no uncommitted changes",
            conn.dbms().product_name
        );
        false
    }
}

/// The checker for a DBMS, or the no-check sentinel
pub fn checker_for(dbms: &DbmsInfo) -> Box<dyn TransactionChecker> {
    match CHECK_QUERIES.get(dbms.dbms_id.as_str()) {
        Some(query) => Box::new(QueryTransactionCheck::new(*query)),
        None => Box::new(NoTransactionCheck),
    }
}

/// Whether a query based checker exists for the DBMS
pub fn has_checker(dbms: &DbmsInfo) -> bool {
    CHECK_QUERIES.contains_key(dbms.dbms_id.as_str())
}
