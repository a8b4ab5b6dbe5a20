// Engine Collaborators
//
// Traits for the pluggable parts of statement execution: the statement hook,
// result consumers, the parameter prompter, the confirmation controller and
// connection observers.

use crate::connection::Connection;
use crate::engine::executor::ExecutionEngine;
use crate::engine::result::{EngineResult, ExecutionResult};
use crate::engine::variables::VariablePool;

/// Intercepts statements before and after execution
pub trait StatementHook: Send {
    /// Rewrite the statement; `None` suppresses execution
    fn pre_exec(&mut self, engine: &ExecutionEngine, sql: &str) -> Option<String>;

    fn post_exec(&mut self, engine: &ExecutionEngine, sql: &str, result: &ExecutionResult);

    /// Called when the connection the hook saw is replaced or closed
    fn close(&mut self, conn: Option<&dyn Connection>);

    /// Whether the hook still holds work for the current connection
    fn is_pending(&self) -> bool;
}

/// Hook used when none is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStatementHook;

impl StatementHook for DefaultStatementHook {
    fn pre_exec(&mut self, _engine: &ExecutionEngine, sql: &str) -> Option<String> {
        Some(sql.to_string())
    }

    fn post_exec(&mut self, _engine: &ExecutionEngine, _sql: &str, _result: &ExecutionResult) {}

    fn close(&mut self, _conn: Option<&dyn Connection>) {}

    fn is_pending(&self) -> bool {
        false
    }
}

/// What a consumer wants after seeing a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Keep receiving results of the following statements
    KeepAttached,
    Detach,
}

/// Receives successful results for further processing
pub trait ResultConsumer: Send + Sync {
    fn consume_result(&self, result: &mut ExecutionResult) -> EngineResult<ConsumeOutcome>;

    /// Row limits should not apply while this consumer is attached
    fn ignore_max_rows(&self) -> bool {
        false
    }

    fn cancel(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// Asks the user for the values of `$[?name]` variables
pub trait ParameterPrompter: Send {
    /// Returns false if the user declined
    fn process_prompts(&mut self, sql: &str, variables: &VariablePool) -> bool;
}

/// Asks the user to confirm an updating statement
pub trait ExecutionController: Send {
    fn confirm_execution(&mut self, sql: &str, verb: &str) -> bool;
}

/// Notified whenever the bound connection changes
pub trait ConnectionObserver: Send {
    fn connection_changed(&self, conn: Option<&dyn Connection>);
}
