#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use parking_lot::Mutex;

use common::{as_connection, as_consumer, Failure, MockConnection, RecordingConsumer, RecordingHook, StubCommand};
use sqlrunner::command::CommandRegistry;
use sqlrunner::common::CommandRef;
use sqlrunner::connection::{Connection, ConnectionProfile};
use sqlrunner::engine::hooks::{ConnectionObserver, ConsumeOutcome, ExecutionController, ParameterPrompter};
use sqlrunner::engine::{EngineConfig, ExecutionEngine, VariablePool};

fn engine_with(commands: Vec<CommandRef>) -> ExecutionEngine {
    ExecutionEngine::with_registry(
        EngineConfig::default(),
        VariablePool::new(),
        CommandRegistry::with_commands(commands),
    )
}

fn bound_engine(conn: &Arc<MockConnection>) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new(EngineConfig::default());
    engine.bind_connection(Some(as_connection(conn)));
    engine
}

struct Decline;

impl ExecutionController for Decline {
    fn confirm_execution(&mut self, _sql: &str, _verb: &str) -> bool {
        false
    }
}

struct CancelPrompt;

impl ParameterPrompter for CancelPrompt {
    fn process_prompts(&mut self, _sql: &str, _variables: &VariablePool) -> bool {
        false
    }
}

struct FillPrompt;

impl ParameterPrompter for FillPrompt {
    fn process_prompts(&mut self, sql: &str, variables: &VariablePool) -> bool {
        for name in VariablePool::prompt_names(sql) {
            variables.set(name, "7");
        }
        true
    }
}

struct CountingObserver(Arc<AtomicUsize>);

impl ConnectionObserver for CountingObserver {
    fn connection_changed(&self, _conn: Option<&dyn Connection>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_read_only_skip_is_success() {
    let stub = Arc::new(StubCommand::new("INSERT").updating());
    let mut engine = engine_with(vec![stub.clone() as CommandRef]);

    let mut profile = ConnectionProfile::new("ro", "mock://ro", "tester");
    profile.read_only = true;
    let conn = MockConnection::generic("ro").with_profile(profile).into_ref();
    engine.bind_connection(Some(as_connection(&conn)));

    let result = engine.run("insert into t values (1)").unwrap();
    assert!(result.is_success());
    assert!(result.has_warning());
    assert!(!result.messages().is_empty());
    assert_eq!(stub.executions(), 0);
    assert_eq!(conn.count_calls("execute:"), 0);

    // Queries still run
    let select = engine.run("select 1").unwrap();
    assert!(select.is_success());
    assert_eq!(conn.count_calls("execute:"), 1);
}

#[test]
fn test_wbmode_switches_read_only_at_runtime() {
    let conn = MockConnection::generic("m").into_ref();
    let mut engine = bound_engine(&conn);

    engine.run("WbMode readonly").unwrap();
    assert!(engine.policy().read_only);
    let skipped = engine.run("delete from t").unwrap();
    assert!(skipped.has_warning());
    assert_eq!(conn.count_calls("execute:delete"), 0);

    engine.run("WbMode normal").unwrap();
    assert!(!engine.policy().read_only);
    engine.run("delete from t").unwrap();
    assert_eq!(conn.count_calls("execute:delete"), 1);
}

#[test]
fn test_batch_round_trip() {
    let conn = MockConnection::generic("batch").into_ref();
    let mut engine = bound_engine(&conn);

    engine.run("WbStartBatch").unwrap();
    assert!(engine.has_pending_batch());

    let queued = engine.run("insert into t values (1);").unwrap();
    assert!(queued.is_success());
    engine.run("update t set a = 2").unwrap();
    assert_eq!(conn.count_calls("execute:"), 0);

    let result = engine.run("WbEndBatch").unwrap();
    assert!(result.is_success());
    assert_eq!(result.update_counts(), &[1, 1]);
    assert_eq!(result.total_update_count(), 2);
    assert!(result.messages().iter().any(|m| m.contains("Batch of 2 statements")));
    assert!(!engine.has_pending_batch());
    assert_eq!(conn.calls(), vec!["batch:2".to_string()]);

    // Statements after the batch run directly
    engine.run("insert into t values (3)").unwrap();
    assert_eq!(conn.count_calls("execute:insert"), 1);
}

#[test]
fn test_end_batch_without_start_warns() {
    let conn = MockConnection::generic("batch").into_ref();
    let mut engine = bound_engine(&conn);
    let result = engine.run("WbEndBatch").unwrap();
    assert!(result.has_warning());
    assert!(!engine.has_pending_batch());
}

#[test]
fn test_connection_switch_restore() {
    let main = MockConnection::generic("main").into_ref();
    let temp = MockConnection::generic("temp").into_ref();
    let main_ref = as_connection(&main);
    let mut engine = ExecutionEngine::new(EngineConfig::default());
    engine.bind_connection(Some(main_ref.clone()));

    engine.change_connection(as_connection(&temp));
    assert!(engine.is_connection_switched());
    assert_eq!(engine.connection().unwrap().id(), "temp");

    engine.restore_main_connection();
    assert!(!engine.is_connection_switched());
    assert!(Arc::ptr_eq(&engine.connection().unwrap(), &main_ref));
    assert_eq!(temp.disconnect_count(), 1);
    assert_eq!(main.disconnect_count(), 0);

    // Nothing left to restore
    engine.restore_main_connection();
    assert_eq!(temp.disconnect_count(), 1);
}

#[test]
fn test_chained_switches_disconnect_each_temporary_once() {
    let main = MockConnection::generic("main").into_ref();
    let first = MockConnection::generic("first").into_ref();
    let second = MockConnection::generic("second").into_ref();
    let mut engine = bound_engine(&main);

    engine.change_connection(as_connection(&first));
    engine.change_connection(as_connection(&second));
    assert_eq!(first.disconnect_count(), 1);

    engine.done();
    assert_eq!(engine.connection().unwrap().id(), "main");
    assert_eq!(second.disconnect_count(), 1);
    assert_eq!(first.disconnect_count(), 1);
    assert_eq!(main.disconnect_count(), 0);
}

#[test]
fn test_cancel_never_propagates_failures() {
    for failure in [Failure::Error, Failure::Panic] {
        let stub = Arc::new(StubCommand::new("WORK").failing_cancel(failure));
        let mut engine = engine_with(vec![stub.clone() as CommandRef]);

        let conn = MockConnection::generic("c").into_ref();
        *conn.cancel_failure.lock() = failure;
        engine.bind_connection(Some(as_connection(&conn)));

        let mut consumer = RecordingConsumer::new(ConsumeOutcome::KeepAttached);
        consumer.cancel_failure = failure;
        let consumer = Arc::new(consumer);
        engine.set_consumer(Some(as_consumer(&consumer)));

        engine.run("work hard").unwrap();
        assert_eq!(stub.executions(), 1);
        assert_eq!(consumer.received(), 1);

        engine.cancel();
        assert_eq!(stub.cancels(), 1);
        assert_eq!(conn.count_calls("cancel"), 1);

        // Also from another thread through the handle
        let handle = engine.handle();
        thread::spawn(move || handle.cancel()).join().unwrap();
        assert_eq!(stub.cancels(), 2);
    }
}

#[test]
fn test_cancel_without_native_cancel_skips_connection() {
    let stub = Arc::new(StubCommand::new("WORK"));
    let config = EngineConfig { native_cancel: false, ..Default::default() };
    let mut engine = ExecutionEngine::with_registry(
        config,
        VariablePool::new(),
        CommandRegistry::with_commands(vec![stub.clone() as CommandRef]),
    );
    let conn = MockConnection::generic("c").into_ref();
    engine.bind_connection(Some(as_connection(&conn)));

    engine.run("work").unwrap();
    engine.cancel();
    assert_eq!(stub.cancels(), 1);
    assert_eq!(conn.count_calls("cancel"), 0);
}

#[test]
fn test_consumer_detaches_after_first_result() {
    let conn = MockConnection::generic("c").into_ref();
    let mut engine = bound_engine(&conn);
    let consumer = Arc::new(RecordingConsumer::new(ConsumeOutcome::Detach));
    engine.set_consumer(Some(as_consumer(&consumer)));

    engine.run("select 1").unwrap();
    engine.run("select 2").unwrap();
    assert_eq!(consumer.received(), 1);
    assert!(!engine.has_consumer());
}

#[test]
fn test_prompting_cancelled() {
    let conn = MockConnection::generic("c").into_ref();
    let mut engine = bound_engine(&conn);
    engine.set_parameter_prompter(Box::new(CancelPrompt));

    let result = engine.run("select * from t where id = $[?id]").unwrap();
    assert!(result.prompting_cancelled());
    assert_eq!(conn.count_calls("execute:"), 0);

    // Statements without prompts never reach the prompter
    let plain = engine.run("select 1").unwrap();
    assert!(!plain.prompting_cancelled());
}

#[test]
fn test_prompted_values_are_substituted() {
    let conn = MockConnection::generic("c").into_ref();
    let mut engine = bound_engine(&conn);
    engine.set_parameter_prompter(Box::new(FillPrompt));

    engine.run("select * from t where id = $[?id]").unwrap();
    assert_eq!(conn.calls(), vec!["execute:select * from t where id = 7".to_string()]);
}

#[test]
fn test_declined_confirmation() {
    let mut profile = ConnectionProfile::new("c", "mock://c", "tester");
    profile.confirm_updates = true;
    let conn = MockConnection::generic("c").with_profile(profile).into_ref();
    let mut engine = bound_engine(&conn);
    engine.set_execution_controller(Box::new(Decline));

    let result = engine.run("update t set a = 1").unwrap();
    assert!(result.is_success());
    assert!(result.has_warning());
    assert_eq!(conn.count_calls("execute:"), 0);

    // Queries need no confirmation
    engine.run("select 1").unwrap();
    assert_eq!(conn.count_calls("execute:select"), 1);
}

#[test]
fn test_hook_rewrites_and_suppresses() {
    let conn = MockConnection::generic("c").into_ref();
    let mut engine = bound_engine(&conn);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook = RecordingHook {
        seen: seen.clone(),
        rewrite: Some("select 42".to_string()),
        ..Default::default()
    };
    engine.set_statement_hook(Box::new(hook));
    engine.run("select 1").unwrap();
    assert_eq!(conn.calls(), vec!["execute:select 42".to_string()]);
    assert_eq!(seen.lock().len(), 2);

    let suppressing = RecordingHook { suppress: true, ..Default::default() };
    let closed = suppressing.closed.clone();
    engine.set_statement_hook(Box::new(suppressing));
    conn.clear_calls();
    let result = engine.run("delete from t").unwrap();
    assert!(result.is_success());
    assert!(conn.calls().is_empty());

    engine.bind_connection(None);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_observers_see_every_bind() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut engine = ExecutionEngine::new(EngineConfig::default());
    engine.add_observer(Box::new(CountingObserver(counter.clone())));

    let conn = MockConnection::generic("c").into_ref();
    engine.bind_connection(Some(as_connection(&conn)));
    engine.bind_connection(None);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_abort_clears_transient_state() {
    let conn = MockConnection::generic("c").into_ref();
    let mut engine = bound_engine(&conn);
    engine.run("WbStartBatch").unwrap();
    engine.set_consumer(Some(as_consumer(&Arc::new(RecordingConsumer::new(ConsumeOutcome::KeepAttached)))));

    engine.abort();
    assert!(!engine.has_pending_batch());
    assert!(!engine.has_consumer());
    assert!(engine.current_command().is_none());
    assert_eq!(conn.disconnect_count(), 0);
}

#[test]
fn test_script_stops_on_exit_and_failure() {
    let conn = MockConnection::generic("c").into_ref();
    let mut engine = bound_engine(&conn);

    let results = engine.run_script("select 1; WbExit; select 2;", false).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[1].stop_script());
    assert_eq!(conn.count_calls("execute:"), 1);

    *conn.execute_failure.lock() = Failure::Error;
    let failed = engine.run_script("select 1; select 2", false).unwrap();
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].is_success());

    let all = engine.run_script("select 1; select 2", true).unwrap();
    assert_eq!(all.len(), 2);
}
