// Statement Execution Engine
//
// Runs one statement at a time through the command registry while keeping
// the session state that spans statements: the bound connection, a suspended
// connection during temporary switches, the current command, the attached
// result consumer, a pending batch and the savepoint slot. The state that
// other threads may touch lives in `Shared` and is reached through
// `EngineHandle` for cancel and abort.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, info, log, warn, Level};
use parking_lot::Mutex;

use crate::command::{BatchRole, CommandContext, CommandRegistry, CommandSettings};
use crate::common::{same_object, sql_text, CommandRef, ConnectionRef, ConsumerRef, SessionPolicy};
use crate::engine::background::BackgroundWorker;
use crate::engine::config::EngineConfig;
use crate::engine::hooks::{
    ConnectionObserver, ConsumeOutcome, ExecutionController, ParameterPrompter, StatementHook,
};
use crate::engine::result::{EngineError, EngineResult, ExecutionResult};
use crate::engine::session::SessionAttributes;
use crate::engine::variables::VariablePool;
use crate::transaction::policy::{end_read_only_transaction, ReadOnlyTermination};
use crate::transaction::SavepointManager;

/// Annotation requesting removal of empty result sets
pub const REMOVE_EMPTY_ANNOTATION: &str = "WbRemoveEmpty";

/// The connection put aside by `change_connection`
#[derive(Clone)]
struct SuspendedConnection {
    original: Option<ConnectionRef>,
}

#[derive(Default)]
struct ActiveState {
    connection: Option<ConnectionRef>,
    suspended: Option<SuspendedConnection>,
    command: Option<CommandRef>,
    consumer: Option<ConsumerRef>,
    pending_batch: Option<CommandRef>,
    last_sql: String,
}

#[derive(Debug, Clone, Copy)]
struct CancelSettings {
    native_cancel: bool,
    timeout: Duration,
}

/// State shared with `EngineHandle`
struct Shared {
    state: Mutex<ActiveState>,
    savepoints: SavepointManager,
    worker: Option<BackgroundWorker>,
    cancel_settings: Mutex<CancelSettings>,
}

impl Shared {
    /// Clear transient state without touching the connection
    fn abort(&self) {
        let command = {
            let mut state = self.state.lock();
            state.consumer = None;
            state.pending_batch = None;
            state.last_sql.clear();
            state.command.take()
        };
        self.savepoints.clear();
        if let Some(cmd) = command {
            cmd.done();
        }
    }

    fn cancel(&self) {
        let (consumer, command, connection) = {
            let state = self.state.lock();
            (state.consumer.clone(), state.command.clone(), state.connection.clone())
        };
        let settings = *self.cancel_settings.lock();

        if let Some(consumer) = consumer {
            guarded("result consumer cancel", || consumer.cancel());
        }
        if settings.native_cancel {
            if let Some(conn) = connection {
                self.native_cancel(conn, settings.timeout);
            }
        }
        if let Some(cmd) = command {
            guarded("command cancel", || cmd.cancel());
        }
    }

    fn native_cancel(&self, conn: ConnectionRef, timeout: Duration) {
        let id = conn.id().to_string();
        let outcome = match &self.worker {
            Some(worker) => worker
                .submit_and_wait(move || conn.cancel_statement(), timeout)
                .map_err(|e| e.to_string()),
            None => catch_unwind(AssertUnwindSafe(|| conn.cancel_statement()))
                .map_err(|_| "cancel panicked".to_string()),
        };
        match outcome {
            Ok(Ok(())) => debug!("Native cancel sent to {}", id),
            Ok(Err(e)) => warn!("Native cancel on {} failed: {}", id, e),
            Err(e) => warn!("Native cancel on {} failed: {}", id, e),
        }
    }

    /// Disconnect, waiting at most the cancel timeout
    fn disconnect(&self, conn: ConnectionRef) {
        let id = conn.id().to_string();
        let timeout = self.cancel_settings.lock().timeout;
        let outcome = match &self.worker {
            Some(worker) => worker
                .submit_and_wait(move || conn.disconnect(), timeout)
                .map_err(|e| e.to_string()),
            None => Ok(conn.disconnect()),
        };
        match outcome {
            Ok(Ok(())) => debug!("Disconnected {}", id),
            Ok(Err(e)) => warn!("Could not disconnect {}: {}", id, e),
            Err(e) => warn!("Could not disconnect {}: {}", id, e),
        }
    }
}

/// Run a cancel step, logging errors and panics
fn guarded<F>(what: &str, step: F)
where
    F: FnOnce() -> EngineResult<()>,
{
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{} failed: {}", what, e),
        Err(_) => warn!("{} panicked", what),
    }
}

/// Thread-safe handle for cancelling or aborting a running engine
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Best-effort cancel of the running statement; never fails
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn abort(&self) {
        self.shared.abort();
    }
}

/// Executes statements against the bound connection
pub struct ExecutionEngine {
    shared: Arc<Shared>,
    registry: CommandRegistry,
    config: EngineConfig,
    variables: VariablePool,
    session: SessionAttributes,
    policy: SessionPolicy,
    hook: Option<Box<dyn StatementHook>>,
    prompter: Option<Box<dyn ParameterPrompter>>,
    controller: Option<Box<dyn ExecutionController>>,
    observers: Vec<Box<dyn ConnectionObserver>>,
}

impl ExecutionEngine {
    /// Create an engine with its own variable pool
    pub fn new(config: EngineConfig) -> Self {
        Self::with_variables(config, VariablePool::new())
    }

    /// Create an engine sharing an existing variable pool
    pub fn with_variables(config: EngineConfig, variables: VariablePool) -> Self {
        Self::with_registry(config, variables, CommandRegistry::new())
    }

    /// Create an engine around a prepared command registry
    pub fn with_registry(config: EngineConfig, variables: VariablePool, mut registry: CommandRegistry) -> Self {
        let worker = match BackgroundWorker::start("sqlrun-engine-worker") {
            Ok(worker) => Some(worker),
            Err(e) => {
                warn!("Running without background worker: {}", e);
                None
            }
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(ActiveState::default()),
            savepoints: SavepointManager::new(),
            worker,
            cancel_settings: Mutex::new(CancelSettings {
                native_cancel: config.native_cancel,
                timeout: config.cancel_timeout(),
            }),
        });
        registry.set_allow_abbreviations(config.allow_abbreviations);

        ExecutionEngine {
            shared,
            registry,
            config,
            variables,
            session: SessionAttributes::new(),
            policy: SessionPolicy::default(),
            hook: None,
            prompter: None,
            controller: None,
            observers: Vec::new(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration; ignored verbs apply from the next bind
    pub fn reconfigure(&mut self, config: EngineConfig) {
        self.registry.set_allow_abbreviations(config.allow_abbreviations);
        *self.shared.cancel_settings.lock() = CancelSettings {
            native_cancel: config.native_cancel,
            timeout: config.cancel_timeout(),
        };
        self.config = config;
    }

    pub fn set_statement_hook(&mut self, hook: Box<dyn StatementHook>) {
        self.hook = Some(hook);
    }

    pub fn set_parameter_prompter(&mut self, prompter: Box<dyn ParameterPrompter>) {
        self.prompter = Some(prompter);
    }

    pub fn set_execution_controller(&mut self, controller: Box<dyn ExecutionController>) {
        self.controller = Some(controller);
    }

    pub fn add_observer(&mut self, observer: Box<dyn ConnectionObserver>) {
        self.observers.push(observer);
    }

    /// Attach a consumer for the results of the following statements
    pub fn set_consumer(&mut self, consumer: Option<ConsumerRef>) {
        self.shared.state.lock().consumer = consumer;
    }

    pub fn has_consumer(&self) -> bool {
        self.shared.state.lock().consumer.is_some()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn variables(&self) -> &VariablePool {
        &self.variables
    }

    pub fn session(&self) -> &SessionAttributes {
        &self.session
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: SessionPolicy) {
        self.policy = policy;
    }

    pub fn connection(&self) -> Option<ConnectionRef> {
        self.shared.state.lock().connection.clone()
    }

    pub fn current_command(&self) -> Option<CommandRef> {
        self.shared.state.lock().command.clone()
    }

    pub fn has_pending_batch(&self) -> bool {
        self.shared.state.lock().pending_batch.is_some()
    }

    pub fn has_savepoint(&self) -> bool {
        self.shared.savepoints.has_savepoint()
    }

    /// Whether a temporary connection switch is active
    pub fn is_connection_switched(&self) -> bool {
        self.shared.state.lock().suspended.is_some()
    }

    /// Whether the statement hook still has work for the connection
    pub fn has_pending_hook_work(&self) -> bool {
        self.hook.as_ref().map(|h| h.is_pending()).unwrap_or(false)
    }

    fn decision_level(&self) -> Level {
        if self.config.verbose_logging {
            Level::Info
        } else {
            Level::Debug
        }
    }

    /// Make `connection` the active connection
    pub fn bind_connection(&mut self, connection: Option<ConnectionRef>) {
        let previous = {
            let mut state = self.shared.state.lock();
            state.pending_batch = None;
            std::mem::replace(&mut state.connection, connection.clone())
        };

        self.registry
            .bind_connection(connection.as_deref(), &self.config.ignored_verbs);

        match &previous {
            Some(prev) => self.shared.savepoints.release_savepoint(prev.as_ref()),
            None => self.shared.savepoints.clear(),
        }
        if let Some(hook) = self.hook.as_mut() {
            hook.close(previous.as_deref());
        }

        self.session.clear();
        self.policy = connection
            .as_ref()
            .map(|c| SessionPolicy::from_profile(c.profile()))
            .unwrap_or_default();

        for observer in &self.observers {
            observer.connection_changed(connection.as_deref());
        }
        log!(
            self.decision_level(),
            "Bound connection {}",
            connection.as_ref().map(|c| c.id()).unwrap_or("<none>")
        );
    }

    /// Switch to a temporary connection, remembering the current one
    pub fn change_connection(&mut self, connection: ConnectionRef) {
        let to_disconnect = {
            let mut state = self.shared.state.lock();
            match state.suspended.as_ref().map(|s| s.original.clone()) {
                None => {
                    let original = state.connection.clone();
                    state.suspended = Some(SuspendedConnection { original });
                    None
                }
                // A switch is active: the current connection is a temporary one
                Some(original) => state.connection.clone().filter(|active| {
                    !same_object(active, &connection)
                        && !original.as_ref().map(|o| same_object(o, active)).unwrap_or(false)
                }),
            }
        };

        self.bind_connection(Some(connection));
        if let Some(previous) = to_disconnect {
            self.shared.disconnect(previous);
        }
    }

    /// Return to the connection that was active before `change_connection`.
    ///
    /// Does nothing if no switch is active.
    pub fn restore_main_connection(&mut self) {
        let (suspended, temporary) = {
            let mut state = self.shared.state.lock();
            match state.suspended.take() {
                Some(suspended) => (suspended, state.connection.clone()),
                None => return,
            }
        };

        self.bind_connection(suspended.original.clone());
        if let Some(temp) = temporary {
            let is_original = suspended
                .original
                .as_ref()
                .map(|o| same_object(o, &temp))
                .unwrap_or(false);
            if !is_original {
                self.shared.disconnect(temp);
            }
        }
    }

    fn command_context(&mut self, connection: Option<ConnectionRef>) -> CommandContext<'_> {
        CommandContext::new(
            connection,
            &self.variables,
            &mut self.session,
            &self.shared.savepoints,
            self.config.savepoint_strategy,
            self.policy,
            self.config.run_mode,
        )
    }

    /// Run one statement
    pub fn run(&mut self, sql: &str) -> EngineResult<ExecutionResult> {
        if let Some(prompter) = self.prompter.as_mut() {
            if !VariablePool::prompt_names(sql).is_empty() && !prompter.process_prompts(sql, &self.variables) {
                let mut result = ExecutionResult::with_warning("Variable prompting cancelled");
                result.set_prompting_cancelled();
                return Ok(result);
            }
        }

        let command = match self.registry.resolve(sql) {
            Some(command) => command,
            None => return Ok(ExecutionResult::new()),
        };
        let verb = sql_text::sql_verb(sql).unwrap_or_else(|| command.verb().to_string());
        log!(self.decision_level(), "Statement {} resolved to command {}", verb, command.verb());

        if !command.is_mode_supported(self.config.run_mode) {
            warn!("{} is not supported in {:?} mode, statement skipped", verb, self.config.run_mode);
            return Ok(ExecutionResult::new());
        }

        let connection = self.connection();
        if command.is_connection_required() && connection.is_none() {
            return Err(EngineError::ConnectionRequired { verb });
        }

        let sql = if self.variables.is_empty() {
            sql.to_string()
        } else {
            self.variables.substitute(sql)
        };

        let consumer = {
            let mut state = self.shared.state.lock();
            state.command = Some(command.clone());
            state.last_sql = sql.clone();
            state.consumer.clone()
        };
        let unlimited = consumer.as_ref().map(|c| c.ignore_max_rows()).unwrap_or(false);
        command.configure(CommandSettings {
            max_rows: if unlimited { 0 } else { self.config.max_rows },
            timeout: self.config.query_timeout(),
            error_level: self.config.error_level,
            show_progress: self.config.show_progress,
        });

        let dbms = connection.as_ref().map(|c| c.dbms().clone());

        if !command.is_modification_allowed(&self.policy, dbms.as_ref(), &sql) {
            log!(self.decision_level(), "{} skipped in read-only mode", verb);
            self.release_skipped_command();
            return Ok(ExecutionResult::with_warning(format!(
                "{} not executed: the connection is in read-only mode",
                verb
            )));
        }

        if let Some(controller) = self.controller.as_mut() {
            if command.needs_confirmation(&self.policy, dbms.as_ref(), &sql)
                && !controller.confirm_execution(&sql, &verb)
            {
                self.release_skipped_command();
                return Ok(ExecutionResult::with_warning(format!("{} cancelled by user", verb)));
            }
        }

        let pending_batch = self.shared.state.lock().pending_batch.clone();
        if let Some(batch) = &pending_batch {
            if !command.is_wb_command() {
                if let Some(collector) = batch.as_batch_collector() {
                    collector.add_statement(&sql);
                    return Ok(ExecutionResult::with_message(format!(
                        "Statement added to batch ({} pending)",
                        collector.statement_count()
                    )));
                }
            }
        }

        let mut hook = self.hook.take();
        let exec_sql = match hook.as_mut() {
            Some(h) => h.pre_exec(self, &sql),
            None => Some(sql.clone()),
        };
        self.hook = hook;

        let started = Instant::now();
        let mut result = match exec_sql {
            None => {
                log!(self.decision_level(), "Statement hook suppressed {}", verb);
                ExecutionResult::new()
            }
            Some(text) => {
                let mut ctx = self.command_context(connection.clone());
                let outcome = command.execute(&mut ctx, &text);
                let consumer_requested = ctx.consumer_requested();
                let policy = ctx.policy;
                drop(ctx);
                self.policy = policy;

                let result = outcome?;
                if consumer_requested && result.is_success() {
                    if let Some(consumer) = command.clone().as_result_consumer() {
                        self.shared.state.lock().consumer = Some(consumer);
                    }
                }
                result
            }
        };
        let elapsed = started.elapsed();

        match command.batch_role() {
            BatchRole::Start if result.is_success() => {
                let mut state = self.shared.state.lock();
                if state.pending_batch.is_some() {
                    warn!("Batch started while another batch was pending, earlier batch discarded");
                }
                state.pending_batch = Some(command.clone());
            }
            BatchRole::End => {
                let pending = self.shared.state.lock().pending_batch.take();
                if let Some(batch) = pending {
                    if let Some(collector) = batch.as_batch_collector() {
                        let mut ctx = self.command_context(connection.clone());
                        let batch_result = collector.execute_batch(&mut ctx);
                        drop(ctx);
                        result = batch_result?;
                    }
                }
            }
            _ => {}
        }

        if sql_text::has_annotation(&sql, REMOVE_EMPTY_ANNOTATION) {
            result.remove_empty_result_sets();
        }

        let consumer = self.shared.state.lock().consumer.clone();
        if let Some(consumer) = consumer {
            if !same_object(&consumer, &command) && result.is_success() {
                self.hand_to_consumer(&consumer, &mut result)?;
            }
        }

        let mut hook = self.hook.take();
        if let Some(h) = hook.as_mut() {
            h.post_exec(self, &sql, &result);
        }
        self.hook = hook;

        result.set_duration(elapsed);
        if self.config.log_all_statements {
            let (user, url) = connection
                .as_ref()
                .map(|c| (c.profile().user.clone(), c.profile().url.clone()))
                .unwrap_or_default();
            info!(
                "Executed in {} ms by {}@{}: {}",
                elapsed.as_millis(),
                user,
                url,
                sql_text::strip_delimiter(&sql)
            );
        }

        Ok(result)
    }

    /// Forget a command that was resolved but never executed
    fn release_skipped_command(&self) {
        let mut state = self.shared.state.lock();
        state.command = None;
        state.last_sql.clear();
    }

    fn hand_to_consumer(&self, consumer: &ConsumerRef, result: &mut ExecutionResult) -> EngineResult<()> {
        let outcome = consumer.consume_result(result);
        let detach = !matches!(outcome, Ok(ConsumeOutcome::KeepAttached));
        if detach {
            let mut state = self.shared.state.lock();
            if state.consumer.as_ref().map(|c| same_object(c, consumer)).unwrap_or(false) {
                state.consumer = None;
            }
        }
        match outcome {
            Ok(_) => Ok(()),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Result consumer failed: {}", e);
                result.set_failure();
                result.add_message(format!("Processing the result failed: {}", e));
                Ok(())
            }
        }
    }

    /// Finish the current statement: end a read-only transaction if
    /// configured, then release the current command
    pub fn statement_done(&mut self) -> ReadOnlyTermination {
        let (connection, command, sql) = {
            let state = self.shared.state.lock();
            (state.connection.clone(), state.command.clone(), state.last_sql.clone())
        };
        let termination = end_read_only_transaction(
            connection.as_deref(),
            command.as_deref(),
            &sql,
            self.config.end_read_only_transactions,
        );

        let mut state = self.shared.state.lock();
        if let Some(cmd) = state.command.take() {
            let is_consumer = state
                .consumer
                .as_ref()
                .map(|c| same_object(c, &cmd))
                .unwrap_or(false);
            if is_consumer {
                state.command = Some(cmd);
            } else {
                cmd.done();
            }
        }
        termination
    }

    /// Clear transient state without touching the connection
    pub fn abort(&mut self) {
        self.shared.abort();
    }

    /// Best-effort cancel of the running statement
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// End of a script: release the savepoint, detach the consumer, restore a
    /// suspended connection and clear connection warnings
    pub fn done(&mut self) {
        if let Some(conn) = self.connection() {
            self.shared.savepoints.release_savepoint(conn.as_ref());
        }
        self.shared.abort();
        self.restore_main_connection();
        if let Some(conn) = self.connection() {
            conn.clear_warnings();
        }
        if self.has_pending_hook_work() {
            debug!("Statement hook still has pending work");
        }
    }

    /// Run every statement of a script in order.
    ///
    /// Stops at the first failure unless `continue_on_error` is set, or when
    /// a statement asks the script to stop.
    pub fn run_script(&mut self, script: &str, continue_on_error: bool) -> EngineResult<Vec<ExecutionResult>> {
        let mut results = Vec::new();
        for statement in sql_text::split_statements(script) {
            let outcome = self.run(&statement);
            self.statement_done();
            let result = match outcome {
                Ok(result) => result,
                Err(e) if continue_on_error => {
                    warn!("Statement failed, continuing: {}", e);
                    ExecutionResult::failure(e.to_string())
                }
                Err(e) => {
                    self.done();
                    return Err(e);
                }
            };
            let stop = result.stop_script() || (!result.is_success() && !continue_on_error);
            results.push(result);
            if stop {
                break;
            }
        }
        self.done();
        Ok(results)
    }
}
