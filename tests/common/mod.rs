#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use sqlrunner::command::{CommandContext, CommandState, SqlCommand};
use sqlrunner::common::{ConnectionRef, ConsumerRef};
use sqlrunner::connection::{
    Connection, ConnectionError, ConnectionProfile, ConnectionResult, DbmsInfo, ExecOptions,
    SavepointHandle, StatementOutput,
};
use sqlrunner::engine::hooks::{ConsumeOutcome, ResultConsumer, StatementHook};
use sqlrunner::engine::{DataValue, EngineError, EngineResult, ExecutionEngine, ExecutionResult, ResultSet};

/// How a mocked operation misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    Error,
    Panic,
}

/// Connection double recording every call it receives
pub struct MockConnection {
    id: String,
    dbms: DbmsInfo,
    profile: ConnectionProfile,
    auto_commit: AtomicBool,
    closed: AtomicBool,
    calls: Mutex<Vec<String>>,
    savepoint_seq: AtomicUsize,
    disconnects: AtomicUsize,
    pub savepoint_failure: Mutex<Failure>,
    pub execute_failure: Mutex<Failure>,
    pub cancel_failure: Mutex<Failure>,
    pub commit_failure: Mutex<Failure>,
}

impl MockConnection {
    pub fn new(id: &str, dbms: DbmsInfo) -> Self {
        MockConnection {
            id: id.to_string(),
            dbms,
            profile: ConnectionProfile::new(id, format!("mock://{}", id), "tester"),
            auto_commit: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            savepoint_seq: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            savepoint_failure: Mutex::new(Failure::None),
            execute_failure: Mutex::new(Failure::None),
            cancel_failure: Mutex::new(Failure::None),
            commit_failure: Mutex::new(Failure::None),
        }
    }

    /// Mock with savepoint support
    pub fn generic(id: &str) -> Self {
        let mut dbms = DbmsInfo::generic("mockdb", "Mock DB");
        dbms.supports_savepoints = true;
        Self::new(id, dbms)
    }

    pub fn with_profile(mut self, profile: ConnectionProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn into_ref(self) -> Arc<MockConnection> {
        Arc::new(self)
    }

    pub fn set_auto_commit_flag(&self, enabled: bool) {
        self.auto_commit.store(enabled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn apply(&self, failure: &Mutex<Failure>, what: &str) -> ConnectionResult<()> {
        match *failure.lock() {
            Failure::None => Ok(()),
            Failure::Error => Err(ConnectionError::Database(format!("{} failed", what))),
            Failure::Panic => panic!("{} panicked", what),
        }
    }
}

impl Connection for MockConnection {
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
        self.record(format!("autocommit:{}", enabled));
        self.set_auto_commit_flag(enabled);
        Ok(())
    }

    fn execute(&self, sql: &str, _options: ExecOptions) -> ConnectionResult<StatementOutput> {
        self.record(format!("execute:{}", sql.trim()));
        self.apply(&self.execute_failure, "execute")?;
        if sql.trim_start().to_lowercase().starts_with("select") {
            let mut rs = ResultSet::new(vec!["value".to_string()]);
            rs.add_row(vec![DataValue::Integer(1)]);
            Ok(StatementOutput::Rows(rs))
        } else {
            Ok(StatementOutput::UpdateCount(1))
        }
    }

    fn execute_batch(&self, statements: &[String]) -> ConnectionResult<Vec<u64>> {
        self.record(format!("batch:{}", statements.len()));
        self.apply(&self.execute_failure, "batch")?;
        Ok(statements.iter().map(|_| 1).collect())
    }

    fn commit(&self) -> ConnectionResult<()> {
        self.record("commit");
        self.apply(&self.commit_failure, "commit")
    }

    fn rollback(&self) -> ConnectionResult<()> {
        self.record("rollback");
        self.apply(&self.commit_failure, "rollback")
    }

    fn set_savepoint(&self) -> ConnectionResult<SavepointHandle> {
        self.record("savepoint");
        if !self.dbms.supports_savepoints {
            return Err(ConnectionError::SavepointsUnsupported(self.dbms.product_name.clone()));
        }
        self.apply(&self.savepoint_failure, "savepoint")?;
        let n = self.savepoint_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SavepointHandle { name: format!("sp{}", n) })
    }

    fn release_savepoint(&self, savepoint: &SavepointHandle) -> ConnectionResult<()> {
        self.record(format!("release:{}", savepoint.name));
        self.apply(&self.savepoint_failure, "release")
    }

    fn rollback_savepoint(&self, savepoint: &SavepointHandle) -> ConnectionResult<()> {
        self.record(format!("rollback_to:{}", savepoint.name));
        self.apply(&self.savepoint_failure, "rollback to savepoint")
    }

    fn set_catalog(&self, catalog: &str) -> ConnectionResult<()> {
        self.record(format!("catalog:{}", catalog));
        Ok(())
    }

    fn cancel_statement(&self) -> ConnectionResult<()> {
        self.record("cancel");
        self.apply(&self.cancel_failure, "cancel")
    }

    fn disconnect(&self) -> ConnectionResult<()> {
        self.record("disconnect");
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Coerce a mock into the shared connection handle
pub fn as_connection(conn: &Arc<MockConnection>) -> ConnectionRef {
    conn.clone()
}

/// Command double counting executions and cancels
pub struct StubCommand {
    verb: String,
    state: CommandState,
    pub updating: bool,
    pub wb: bool,
    pub cancel_failure: Failure,
    executions: AtomicUsize,
    cancels: AtomicUsize,
}

impl StubCommand {
    pub fn new(verb: &str) -> Self {
        StubCommand {
            verb: verb.to_uppercase(),
            state: CommandState::new(),
            updating: false,
            wb: false,
            cancel_failure: Failure::None,
            executions: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn updating(mut self) -> Self {
        self.updating = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.wb = true;
        self
    }

    pub fn failing_cancel(mut self, failure: Failure) -> Self {
        self.cancel_failure = failure;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl SqlCommand for StubCommand {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_updating_command(&self) -> bool {
        self.updating
    }

    fn is_wb_command(&self) -> bool {
        self.wb
    }

    fn execute(&self, _ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::with_message(format!("stub ran {}", sql.trim())))
    }

    fn cancel(&self) -> EngineResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        match self.cancel_failure {
            Failure::None => Ok(()),
            Failure::Error => Err(EngineError::Execution("command cancel failed".to_string())),
            Failure::Panic => panic!("command cancel panicked"),
        }
    }
}

/// Consumer recording the results it receives
pub struct RecordingConsumer {
    pub outcome: ConsumeOutcome,
    pub cancel_failure: Failure,
    pub unlimited: bool,
    received: Mutex<Vec<ExecutionResult>>,
}

impl RecordingConsumer {
    pub fn new(outcome: ConsumeOutcome) -> Self {
        RecordingConsumer {
            outcome,
            cancel_failure: Failure::None,
            unlimited: false,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> usize {
        self.received.lock().len()
    }
}

impl ResultConsumer for RecordingConsumer {
    fn consume_result(&self, result: &mut ExecutionResult) -> EngineResult<ConsumeOutcome> {
        self.received.lock().push(result.clone());
        Ok(self.outcome)
    }

    fn ignore_max_rows(&self) -> bool {
        self.unlimited
    }

    fn cancel(&self) -> EngineResult<()> {
        match self.cancel_failure {
            Failure::None => Ok(()),
            Failure::Error => Err(EngineError::Execution("consumer cancel failed".to_string())),
            Failure::Panic => panic!("consumer cancel panicked"),
        }
    }
}

pub fn as_consumer(consumer: &Arc<RecordingConsumer>) -> ConsumerRef {
    consumer.clone()
}

/// Hook that records what it sees and can rewrite or suppress statements
#[derive(Default)]
pub struct RecordingHook {
    pub seen: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicUsize>,
    pub suppress: bool,
    pub rewrite: Option<String>,
}

impl StatementHook for RecordingHook {
    fn pre_exec(&mut self, _engine: &ExecutionEngine, sql: &str) -> Option<String> {
        self.seen.lock().push(format!("pre:{}", sql));
        if self.suppress {
            return None;
        }
        Some(self.rewrite.clone().unwrap_or_else(|| sql.to_string()))
    }

    fn post_exec(&mut self, _engine: &ExecutionEngine, sql: &str, result: &ExecutionResult) {
        self.seen.lock().push(format!("post:{}:{}", sql, result.is_success()));
    }

    fn close(&mut self, _conn: Option<&dyn Connection>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_pending(&self) -> bool {
        false
    }
}
