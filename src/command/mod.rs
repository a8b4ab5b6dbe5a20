// Command Module
//
// A command is the unit of work bound to one SQL verb. Commands are created
// once, shared through the registry and stateless between executions except
// for the settings and cancel flag held in their CommandState.

pub mod args;
pub mod meta;
pub mod registry;
pub mod sql;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use log::warn;
use parking_lot::Mutex;

use crate::common::{ConnectionRef, ConsumerRef, ErrorReportLevel, RunMode, SessionPolicy};
use crate::connection::{Connection, ConnectionError, DbmsInfo, ExecOptions, StatementOutput};
use crate::engine::result::{EngineError, EngineResult, ExecutionResult};
use crate::engine::session::SessionAttributes;
use crate::engine::variables::VariablePool;
use crate::transaction::savepoint::{SavepointManager, SavepointScope};
use crate::transaction::SavepointStrategy;

pub use self::registry::{CommandRegistry, WILDCARD_VERB};

/// Execution parameters pushed into a command before each statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandSettings {
    /// Row limit, 0 for unlimited
    pub max_rows: usize,
    pub timeout: Option<Duration>,
    pub error_level: ErrorReportLevel,
    pub show_progress: bool,
}

impl CommandSettings {
    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            max_rows: self.max_rows,
            timeout: self.timeout,
        }
    }
}

/// Mutable per-command state, safe to touch from a cancelling thread
#[derive(Debug, Default)]
pub struct CommandState {
    settings: Mutex<CommandSettings>,
    cancelled: AtomicBool,
}

impl CommandState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply new settings; this also clears a cancel request left over from
    /// the previous statement
    pub fn configure(&self, settings: CommandSettings) {
        *self.settings.lock() = settings;
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn settings(&self) -> CommandSettings {
        *self.settings.lock()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Role a command plays in batch bracketing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRole {
    None,
    Start,
    End,
}

/// Collects the statements between a batch start and end marker
pub trait BatchCollector {
    fn add_statement(&self, sql: &str);

    fn statement_count(&self) -> usize;

    /// Run the collected statements as one unit and produce the aggregated result
    fn execute_batch(&self, ctx: &mut CommandContext<'_>) -> EngineResult<ExecutionResult>;
}

/// A command bound to one SQL verb
pub trait SqlCommand: Send + Sync {
    /// Canonical upper case verb
    fn verb(&self) -> &str;

    /// Long form registered next to the verb
    fn alternate_verb(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> &CommandState;

    fn is_connection_required(&self) -> bool {
        true
    }

    /// DML-like command
    fn is_updating_command(&self) -> bool {
        false
    }

    /// Meta-command handled by the client instead of the database
    fn is_wb_command(&self) -> bool {
        false
    }

    /// COMMIT or ROLLBACK
    fn is_transaction_control(&self) -> bool {
        false
    }

    /// Changes session state (SET, USE, ...)
    fn is_session_control(&self) -> bool {
        false
    }

    fn is_mode_supported(&self, _mode: RunMode) -> bool {
        true
    }

    /// Whether this particular statement modifies the database
    fn is_updating_statement(&self, _dbms: Option<&DbmsInfo>, _sql: &str) -> bool {
        self.is_updating_command()
    }

    fn is_modification_allowed(
        &self,
        policy: &SessionPolicy,
        dbms: Option<&DbmsInfo>,
        sql: &str,
    ) -> bool {
        !policy.read_only || !self.is_updating_statement(dbms, sql)
    }

    fn needs_confirmation(&self, policy: &SessionPolicy, dbms: Option<&DbmsInfo>, sql: &str) -> bool {
        policy.confirm_updates && self.is_updating_statement(dbms, sql)
    }

    fn batch_role(&self) -> BatchRole {
        BatchRole::None
    }

    fn as_batch_collector(&self) -> Option<&dyn BatchCollector> {
        None
    }

    /// The command as a result consumer, for commands that process the
    /// result of the following statement
    fn as_result_consumer(self: Arc<Self>) -> Option<ConsumerRef> {
        None
    }

    fn configure(&self, settings: CommandSettings) {
        self.state().configure(settings);
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult>;

    fn cancel(&self) -> EngineResult<()> {
        self.state().cancel();
        Ok(())
    }

    /// Called once the engine is finished with the statement
    fn done(&self) {
        self.state().reset_cancel();
    }
}

/// Everything a command may touch while it executes
pub struct CommandContext<'a> {
    connection: Option<ConnectionRef>,
    pub variables: &'a VariablePool,
    pub session: &'a mut SessionAttributes,
    savepoints: &'a SavepointManager,
    savepoint_strategy: SavepointStrategy,
    /// Session policy; changes are written back by the engine
    pub policy: SessionPolicy,
    pub run_mode: RunMode,
    consumer_requested: bool,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        connection: Option<ConnectionRef>,
        variables: &'a VariablePool,
        session: &'a mut SessionAttributes,
        savepoints: &'a SavepointManager,
        savepoint_strategy: SavepointStrategy,
        policy: SessionPolicy,
        run_mode: RunMode,
    ) -> Self {
        CommandContext {
            connection,
            variables,
            session,
            savepoints,
            savepoint_strategy,
            policy,
            run_mode,
            consumer_requested: false,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionRef> {
        self.connection.as_ref()
    }

    /// The bound connection, or a connection-required error naming the verb
    pub fn require_connection(&self, verb: &str) -> EngineResult<ConnectionRef> {
        self.connection
            .clone()
            .ok_or_else(|| EngineError::ConnectionRequired { verb: verb.to_string() })
    }

    pub fn use_savepoint_for_dml(&self) -> bool {
        self.use_savepoint_for(SavepointScope::Dml)
    }

    pub fn use_savepoint_for_ddl(&self) -> bool {
        self.use_savepoint_for(SavepointScope::Ddl)
    }

    fn use_savepoint_for(&self, scope: SavepointScope) -> bool {
        match &self.connection {
            Some(conn) => SavepointManager::use_savepoint_for(conn.as_ref(), self.savepoint_strategy, scope),
            None => false,
        }
    }

    pub fn set_savepoint(&self) {
        if let Some(conn) = &self.connection {
            self.savepoints.set_savepoint(conn.as_ref());
        }
    }

    pub fn release_savepoint(&self) {
        if let Some(conn) = &self.connection {
            self.savepoints.release_savepoint(conn.as_ref());
        }
    }

    pub fn rollback_savepoint(&self) {
        if let Some(conn) = &self.connection {
            self.savepoints.rollback_savepoint(conn.as_ref());
        }
    }

    /// Ask the engine to attach the running command as result consumer
    pub fn request_consumer(&mut self) {
        self.consumer_requested = true;
    }

    pub fn consumer_requested(&self) -> bool {
        self.consumer_requested
    }
}

/// Turn database output into a result
pub(crate) fn output_result(output: StatementOutput) -> ExecutionResult {
    let mut result = ExecutionResult::new();
    match output {
        StatementOutput::Rows(rs) => {
            result.add_message(format!("{} rows retrieved", rs.row_count()));
            result.add_result_set(rs);
        }
        StatementOutput::UpdateCount(n) => {
            result.add_update_count(n);
            result.add_message(format!("{} rows affected", n));
        }
        StatementOutput::Done => result.add_message("Statement executed"),
    }
    result
}

/// Format a database error according to the error report level
pub(crate) fn error_message(
    settings: &CommandSettings,
    verb: &str,
    sql: &str,
    err: &ConnectionError,
) -> String {
    match settings.error_level {
        ErrorReportLevel::None => err.to_string(),
        ErrorReportLevel::Limited => format!("{} failed: {}", verb, err),
        ErrorReportLevel::Full => format!("{} failed: {}\nStatement: {}", verb, err, sql.trim()),
    }
}

/// Database errors become a failed result; anything else propagates
pub(crate) fn failed_result(
    settings: &CommandSettings,
    verb: &str,
    sql: &str,
    err: ConnectionError,
) -> EngineResult<ExecutionResult> {
    match err {
        ConnectionError::Database(_)
        | ConnectionError::Unsupported(_)
        | ConnectionError::SavepointsUnsupported(_) => {
            warn!("{}", error_message(settings, verb, sql, &err));
            Ok(ExecutionResult::failure(error_message(settings, verb, sql, &err)))
        }
        ConnectionError::Cancelled => Err(EngineError::Cancelled),
        other => Err(other.into()),
    }
}

/// Copy pending connection warnings into the result
pub(crate) fn attach_warnings(result: &mut ExecutionResult, conn: &dyn Connection, policy: &SessionPolicy) {
    let warnings = conn.warnings();
    conn.clear_warnings();
    if policy.hide_warnings {
        return;
    }
    for warning in warnings {
        result.add_warning(warning);
    }
}
