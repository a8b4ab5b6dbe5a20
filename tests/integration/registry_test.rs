#[path = "../common/mod.rs"]
mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{MockConnection, StubCommand};
use sqlrunner::command::CommandRegistry;
use sqlrunner::common::CommandRef;
use sqlrunner::connection::{Connection, DbmsInfo};
use sqlrunner::WILDCARD_VERB;

fn dbms(id: &str) -> DbmsInfo {
    DbmsInfo::generic(id, id.to_uppercase())
}

#[test]
fn test_unknown_verbs_resolve_to_wildcard() {
    let registry = CommandRegistry::new();
    let wildcard = registry.wildcard();

    for sql in ["frobnicate the table", "PRAGMA foo", "x", "vacuum;", "wbnothing -x=1"] {
        let cmd = registry.resolve(sql).expect("non-empty statements always resolve");
        assert!(Arc::ptr_eq(&cmd, &wildcard), "{} did not fall back", sql);
    }
}

#[test]
fn test_rebinding_drops_verbs_of_previous_dbms() {
    let mut registry = CommandRegistry::new();

    let mut info_a = dbms("dba");
    info_a.exec_procedure_call = true;
    info_a.supports_session_variables = true;
    let conn_a = MockConnection::new("a", info_a);

    let mut info_b = dbms("dbb");
    info_b.supports_catalogs = true;
    let conn_b = MockConnection::new("b", info_b);

    let mut ignored = HashMap::new();
    ignored.insert("dba".to_string(), vec!["GATHER".to_string()]);

    registry.bind_connection(Some(&conn_a as &dyn Connection), &ignored);
    assert_eq!(registry.resolve("exec my_proc").unwrap().verb(), "CALL");
    assert_eq!(registry.resolve("reset search_path").unwrap().verb(), "SET");
    assert_eq!(registry.resolve("gather stats").unwrap().verb(), "GATHER");
    assert_eq!(registry.resolve("use other").unwrap().verb(), WILDCARD_VERB);

    registry.bind_connection(Some(&conn_b as &dyn Connection), &ignored);
    for sql in ["exec my_proc", "execute my_proc", "reset search_path", "gather stats"] {
        assert_eq!(registry.resolve(sql).unwrap().verb(), WILDCARD_VERB, "{} survived rebind", sql);
    }
    assert_eq!(registry.resolve("use other").unwrap().verb(), "USE");
    assert_eq!(registry.installed_verbs(), vec!["USE".to_string()]);
}

#[test]
fn test_native_describe_hides_builtin() {
    let mut registry = CommandRegistry::new();
    let mut info = dbms("mysql");
    info.native_describe = true;
    let conn = MockConnection::new("m", info);

    assert_eq!(registry.resolve("describe t").unwrap().verb(), "DESC");
    registry.bind_connection(Some(&conn as &dyn Connection), &HashMap::new());
    assert_eq!(registry.resolve("describe t").unwrap().verb(), WILDCARD_VERB);
    // The short form stays client side
    assert_eq!(registry.resolve("desc t").unwrap().verb(), "DESC");

    registry.bind_connection(None, &HashMap::new());
    assert_eq!(registry.resolve("describe t").unwrap().verb(), "DESC");
}

#[test]
fn test_ambiguous_abbreviation_is_not_resolved() {
    let registry = CommandRegistry::new();
    assert!(registry.get("WBEXPORT").is_some());
    assert!(registry.get("WBEXIT").is_some());

    assert_eq!(registry.resolve("WBEX").unwrap().verb(), WILDCARD_VERB);
    assert_eq!(registry.resolve("WBEXP -file=out.csv").unwrap().verb(), "WBEXPORT");
    assert_eq!(registry.resolve("wbexi").unwrap().verb(), "WBEXIT");
}

#[test]
fn test_exact_match_beats_abbreviation() {
    let stub: CommandRef = Arc::new(StubCommand::new("WBVAR").meta());
    let registry = CommandRegistry::with_commands(vec![stub.clone()]);

    let exact = registry.resolve("wbvar").unwrap();
    assert!(Arc::ptr_eq(&exact, &stub));
    // WBVARDEF, WBVARDELETE, WBVARLIST and the stub all share the prefix
    assert_eq!(registry.resolve("wbva").unwrap().verb(), WILDCARD_VERB);
}

#[test]
fn test_select_into_uses_generic_command_when_supported() {
    let mut registry = CommandRegistry::new();
    let sql = "select * into backup_table from orders";
    assert_eq!(registry.resolve(sql).unwrap().verb(), "SELECT");

    let mut info = dbms("microsoft_sql_server");
    info.supports_select_into = true;
    let conn = MockConnection::new("ms", info);
    registry.bind_connection(Some(&conn as &dyn Connection), &HashMap::new());

    assert_eq!(registry.resolve(sql).unwrap().verb(), WILDCARD_VERB);
    assert_eq!(registry.resolve("select id from orders").unwrap().verb(), "SELECT");
}
