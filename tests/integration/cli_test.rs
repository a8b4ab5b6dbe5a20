use std::fs;
use std::process::Command;
use anyhow::Result;
use tempfile::TempDir;

fn sqlrun() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sqlrun"))
}

/// Test that the CLI reports connection capabilities and verbs
#[test]
fn test_cli_info_command() -> Result<()> {
    let output = sqlrun().args(["info"]).output()?;
    assert!(output.status.success(), "CLI info command failed");

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("sqlrun Information:"));
    assert!(stdout.contains("[sqlite]"));
    assert!(stdout.contains("WBEXPORT"));
    Ok(())
}

/// Test that a single query runs and prints its rows
#[test]
fn test_cli_query_execution() -> Result<()> {
    let output = sqlrun().args(["query", "select 41 + 1 as answer"]).output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("answer"));
    assert!(stdout.contains("42"));
    assert!(stdout.contains("Execution time:"));
    Ok(())
}

/// Test that verbose mode sends engine decisions to stderr
#[test]
fn test_cli_verbose_logging() -> Result<()> {
    let output = sqlrun()
        .env_remove("RUST_LOG")
        .args(["--verbose", "query", "select 1"])
        .output()?;
    assert!(output.status.success());

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("resolved to command"));

    let quiet = sqlrun().env_remove("RUST_LOG").args(["query", "select 1"]).output()?;
    assert!(!String::from_utf8(quiet.stderr)?.contains("resolved to command"));
    Ok(())
}

/// Test that a script file runs against a database file and persists
#[test]
fn test_cli_script_execution() -> Result<()> {
    let dir = TempDir::new()?;
    let db = dir.path().join("test.db");
    let script = dir.path().join("setup.sql");
    fs::write(
        &script,
        "create table people (id integer, name text);\n\
         insert into people values (1, 'Ann');\n\
         insert into people values (2, 'Bo');\n",
    )?;

    let output = sqlrun().arg("--db").arg(&db).arg("script").arg(&script).output()?;
    assert!(output.status.success(), "script failed: {}", String::from_utf8_lossy(&output.stderr));

    let output = sqlrun()
        .arg("--db")
        .arg(&db)
        .args(["query", "select name from people where id = 2"])
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Bo"));
    Ok(())
}

/// Test that a failing statement gives a non-zero exit status
#[test]
fn test_cli_failure_exit_status() -> Result<()> {
    let dir = TempDir::new()?;
    let script = dir.path().join("broken.sql");
    fs::write(&script, "select * from no_such_table;\nWbEcho after;\n")?;

    let output = sqlrun().arg("script").arg(&script).output()?;
    assert!(!output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(!stdout.contains("after"));

    let output = sqlrun().arg("script").arg(&script).arg("--continue-on-error").output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains("after"));
    Ok(())
}

/// Test that read-only mode skips updates without failing
#[test]
fn test_cli_read_only_mode() -> Result<()> {
    let dir = TempDir::new()?;
    let db = dir.path().join("ro.db");
    sqlrun().arg("--db").arg(&db).args(["query", "create table t (id integer)"]).output()?;

    let output = sqlrun()
        .arg("--db")
        .arg(&db)
        .arg("--read-only")
        .args(["query", "insert into t values (1)"])
        .output()?;
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains("read-only"));

    let output = sqlrun().arg("--db").arg(&db).args(["query", "select count(*) as n from t"]).output()?;
    assert!(String::from_utf8(output.stdout)?.contains("| 0 "));
    Ok(())
}
