use std::fs;
use std::sync::Arc;
use anyhow::Result;
use tempfile::TempDir;

use sqlrunner::common::ConnectionRef;
use sqlrunner::engine::DataValue;
use sqlrunner::{ConnectionProfile, EngineConfig, ExecutionEngine, SqliteConnection};

fn setup(config: EngineConfig) -> Result<(ExecutionEngine, ConnectionRef)> {
    let profile = ConnectionProfile::new("test", "sqlite::memory:", "tester");
    let conn: ConnectionRef = Arc::new(SqliteConnection::open_in_memory(profile)?);
    let mut engine = ExecutionEngine::new(config);
    engine.bind_connection(Some(conn.clone()));
    engine.run_script(
        "create table people (id integer primary key, name text);
         insert into people values (1, 'Ann');
         insert into people values (2, NULL);
         insert into people values (3, 'Bo, Jr.');",
        false,
    )?;
    Ok((engine, conn))
}

fn count(engine: &mut ExecutionEngine) -> Result<i64> {
    let result = engine.run("select count(*) from people")?;
    let value = result.result_sets()[0].rows()[0][0].clone();
    Ok(value.as_i64().unwrap_or(-1))
}

#[test]
fn test_query_and_update() -> Result<()> {
    let (mut engine, _conn) = setup(EngineConfig::default())?;

    let result = engine.run("select name from people where id = 1")?;
    assert!(result.is_success());
    assert_eq!(result.result_sets()[0].rows()[0][0], DataValue::Text("Ann".to_string()));
    assert!(result.duration().is_some());

    let update = engine.run("update people set name = 'Cy' where id = 2")?;
    assert_eq!(update.total_update_count(), 1);
    Ok(())
}

#[test]
fn test_database_error_is_failed_result() -> Result<()> {
    let (mut engine, _conn) = setup(EngineConfig::default())?;
    let result = engine.run("select * from missing_table")?;
    assert!(!result.is_success());
    assert!(result.messages()[0].contains("SELECT failed"));
    assert!(result.messages()[0].contains("missing_table"));

    // The engine is usable afterwards
    assert_eq!(count(&mut engine)?, 3);
    Ok(())
}

#[test]
fn test_set_with_non_ascii_name() -> Result<()> {
    let (mut engine, _conn) = setup(EngineConfig::default())?;
    let result = engine.run("set \u{17f} to 1")?;
    assert!(!result.is_success());
    engine.statement_done();

    assert_eq!(count(&mut engine)?, 3);
    Ok(())
}

#[test]
fn test_row_limit() -> Result<()> {
    let config = EngineConfig { max_rows: 2, ..Default::default() };
    let (mut engine, _conn) = setup(config)?;
    let result = engine.run("select * from people")?;
    assert_eq!(result.result_sets()[0].row_count(), 2);
    assert!(result.messages().iter().any(|m| m == "Result limited to 2 rows"));
    Ok(())
}

#[test]
fn test_export_next_result() -> Result<()> {
    let config = EngineConfig { max_rows: 1, ..Default::default() };
    let (mut engine, _conn) = setup(config)?;
    let dir = TempDir::new()?;
    let path = dir.path().join("people.csv");

    let prepared = engine.run(&format!("WbExport -file=\"{}\" -delimiter=,", path.display()))?;
    assert!(prepared.is_success());
    assert!(engine.has_consumer());
    engine.statement_done();

    // The export ignores the row limit
    let result = engine.run("select id, name from people order by id")?;
    assert!(result.messages().iter().any(|m| m.starts_with("3 rows exported")));
    assert!(!engine.has_consumer());

    let content = fs::read_to_string(&path)?;
    assert_eq!(content, "id,name\n1,Ann\n2,\n3,\"Bo, Jr.\"\n");
    Ok(())
}

#[test]
fn test_manual_commit_and_rollback() -> Result<()> {
    let (mut engine, conn) = setup(EngineConfig::default())?;

    engine.run("set autocommit off")?;
    assert!(!conn.auto_commit());
    engine.run("delete from people")?;
    assert_eq!(count(&mut engine)?, 0);
    engine.run("rollback")?;
    assert_eq!(count(&mut engine)?, 3);

    engine.run("delete from people where id = 3")?;
    engine.run("commit work")?;
    engine.run("rollback")?;
    assert_eq!(count(&mut engine)?, 2);
    Ok(())
}

#[test]
fn test_batch_and_variables() -> Result<()> {
    let (mut engine, _conn) = setup(EngineConfig::default())?;

    engine.run("WbVarDef new_name='Di'")?;
    engine.run("WbStartBatch")?;
    engine.run("insert into people values (4, '$[new_name]')")?;
    engine.run("insert into people values (5, 'Ed')")?;
    let batch = engine.run("WbEndBatch")?;
    assert_eq!(batch.update_counts(), &[1, 1]);
    assert!(!engine.has_pending_batch());

    let result = engine.run("select name from people where id = 4")?;
    assert_eq!(result.result_sets()[0].rows()[0][0], DataValue::Text("Di".to_string()));

    let vars = engine.run("WbVarList")?;
    assert_eq!(vars.result_sets()[0].row_count(), 1);
    Ok(())
}

#[test]
fn test_describe_table() -> Result<()> {
    let (mut engine, _conn) = setup(EngineConfig::default())?;
    let result = engine.run("describe people")?;
    assert!(result.is_success());
    assert_eq!(result.result_sets()[0].row_count(), 2);

    let missing = engine.run("desc nothing_here")?;
    assert!(!missing.is_success());
    Ok(())
}

#[test]
fn test_script_runner_reports_each_statement() -> Result<()> {
    let (mut engine, _conn) = setup(EngineConfig::default())?;
    let results = engine.run_script(
        "insert into people values (10, 'X');
         -- a comment between statements
         select * from people where id = 10;
         WbEcho done",
        false,
    )?;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(results[2].messages(), &["done".to_string()]);
    Ok(())
}
