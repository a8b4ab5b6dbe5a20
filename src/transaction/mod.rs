// Transaction Policy Module
//
// Savepoint handling for individual statements and the optional commit or
// rollback that ends a transaction opened only by read-only statements.

pub mod checker;
pub mod policy;
pub mod savepoint;

use serde::{Deserialize, Serialize};

pub use self::checker::{checker_for, NoTransactionCheck, QueryTransactionCheck, TransactionChecker};
pub use self::policy::{end_read_only_transaction, end_read_only_transaction_with, ReadOnlyTermination};
pub use self::savepoint::{SavepointManager, SavepointScope};

/// How a transaction is ended after a statement that did not modify anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReadOnlyTransaction {
    /// Leave the transaction open
    #[default]
    Never,
    Commit,
    Rollback,
}

/// When DML and DDL statements are wrapped in a savepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavepointStrategy {
    Always,
    Never,
    /// Follow the DBMS defaults in `DbmsInfo`
    #[default]
    WhenConfiguredByDbms,
}
