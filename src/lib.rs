// sqlrunner
//
// Statement dispatch and execution for an interactive SQL client: verbs are
// resolved to commands, run against a database connection under the session
// policy, and their results routed to the caller or an attached consumer.

pub mod command;
pub mod common;
pub mod connection;
pub mod engine;
pub mod transaction;

// Re-export key items for convenient access
pub use command::{CommandRegistry, SqlCommand, WILDCARD_VERB};
pub use common::{ErrorReportLevel, RunMode, SessionPolicy};
pub use connection::{Connection, ConnectionError, ConnectionProfile, DbmsInfo, SqliteConnection};
pub use engine::{EngineConfig, EngineError, EngineHandle, ExecutionEngine, ExecutionResult, ResultSet};
pub use transaction::{EndReadOnlyTransaction, SavepointStrategy};
