// Engine Module
//
// Statement execution: the engine state machine, its configuration, the
// session stores and the collaborator traits it calls out to.

pub mod background;
pub mod config;
pub mod executor;
pub mod hooks;
pub mod result;
pub mod session;
pub mod variables;

pub use self::background::{BackgroundWorker, WorkerError};
pub use self::config::EngineConfig;
pub use self::executor::{EngineHandle, ExecutionEngine};
pub use self::hooks::{
    ConnectionObserver, ConsumeOutcome, DefaultStatementHook, ExecutionController, ParameterPrompter,
    ResultConsumer, StatementHook,
};
pub use self::result::{DataValue, EngineError, EngineResult, ExecutionResult, ResultSet, ResultStatus};
pub use self::session::SessionAttributes;
pub use self::variables::VariablePool;
