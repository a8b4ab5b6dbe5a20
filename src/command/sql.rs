// Generic SQL Commands
//
// Commands for statements that are passed to the database: queries, DML,
// DDL, transaction and session control, procedure calls and the wildcard
// passthrough used for everything the registry does not know.

use std::collections::HashSet;
use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::command::{
    attach_warnings, failed_result, output_result, CommandContext, CommandState, SqlCommand,
};
use crate::common::sql_text;
use crate::command::args::unquote;
use crate::connection::{ConnectionError, DbmsInfo, StatementOutput};
use crate::engine::result::{EngineResult, ExecutionResult};

/// Verbs that modify data or schema when run through the passthrough command
static UPDATING_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "UPSERT", "REPLACE", "CREATE", "DROP",
        "ALTER", "RENAME", "COMMENT", "GRANT", "REVOKE", "CALL", "EXEC", "EXECUTE", "COPY", "LOAD",
        "VACUUM", "REINDEX", "ANALYZE",
    ]
    .into_iter()
    .collect()
});

/// Run a statement, wrapped in the engine savepoint when requested
fn execute_guarded(
    ctx: &CommandContext<'_>,
    state: &CommandState,
    sql: &str,
    use_savepoint: bool,
) -> Result<StatementOutput, ConnectionError> {
    let conn = match ctx.connection() {
        Some(conn) => conn.clone(),
        None => return Err(ConnectionError::Closed),
    };
    if use_savepoint {
        ctx.set_savepoint();
    }
    match conn.execute(sql, state.settings().exec_options()) {
        Ok(output) => {
            if use_savepoint {
                ctx.release_savepoint();
            }
            Ok(output)
        }
        Err(err) => {
            if use_savepoint {
                ctx.rollback_savepoint();
            }
            Err(err)
        }
    }
}

/// Plain execution used by the simple passthrough-style commands
fn run_plain(
    ctx: &CommandContext<'_>,
    state: &CommandState,
    verb: &str,
    sql: &str,
) -> EngineResult<ExecutionResult> {
    let conn = ctx.require_connection(verb)?;
    let settings = state.settings();
    let mut result = match conn.execute(sql, settings.exec_options()) {
        Ok(output) => output_result(output),
        Err(err) => return failed_result(&settings, verb, sql, err),
    };
    attach_warnings(&mut result, conn.as_ref(), &ctx.policy);
    Ok(result)
}

/// Queries returning rows
pub struct SelectCommand {
    verb: String,
    state: CommandState,
}

impl SelectCommand {
    pub fn new(verb: &str) -> Self {
        SelectCommand {
            verb: verb.to_string(),
            state: CommandState::new(),
        }
    }
}

impl SqlCommand for SelectCommand {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let mut result = run_plain(ctx, &self.state, &self.verb, sql)?;
        let max_rows = self.state.settings().max_rows;
        if max_rows > 0 && result.result_sets().iter().any(|rs| rs.row_count() >= max_rows) {
            result.add_message(format!("Result limited to {} rows", max_rows));
        }
        Ok(result)
    }
}

/// INSERT, UPDATE, DELETE and friends
pub struct UpdatingCommand {
    verb: String,
    state: CommandState,
}

impl UpdatingCommand {
    pub fn new(verb: &str) -> Self {
        UpdatingCommand {
            verb: verb.to_string(),
            state: CommandState::new(),
        }
    }
}

impl SqlCommand for UpdatingCommand {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_updating_command(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(&self.verb)?;
        let settings = self.state.settings();
        let use_savepoint = ctx.use_savepoint_for_dml();
        let mut result = match execute_guarded(ctx, &self.state, sql, use_savepoint) {
            Ok(output) => output_result(output),
            Err(err) => return failed_result(&settings, &self.verb, sql, err),
        };
        attach_warnings(&mut result, conn.as_ref(), &ctx.policy);
        Ok(result)
    }
}

/// CREATE, DROP and ALTER
pub struct DdlCommand {
    verb: String,
    state: CommandState,
    commit_after: bool,
}

impl DdlCommand {
    pub fn new(verb: &str) -> Self {
        DdlCommand {
            verb: verb.to_string(),
            state: CommandState::new(),
            commit_after: false,
        }
    }

    /// Variant for DBMS that need an explicit commit after DDL
    pub fn committing(verb: &str) -> Self {
        DdlCommand {
            commit_after: true,
            ..Self::new(verb)
        }
    }

    pub fn commits_after(&self) -> bool {
        self.commit_after
    }
}

impl SqlCommand for DdlCommand {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_updating_command(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(&self.verb)?;
        let settings = self.state.settings();
        let use_savepoint = ctx.use_savepoint_for_ddl();
        let manual_commit = self.commit_after && !conn.auto_commit();

        match execute_guarded(ctx, &self.state, sql, use_savepoint) {
            Ok(_) => {
                let mut result = ExecutionResult::with_message(format!("{} executed successfully", self.verb));
                if manual_commit {
                    if let Err(e) = conn.commit() {
                        result.add_warning(format!("Commit after {} failed: {}", self.verb, e));
                    }
                }
                attach_warnings(&mut result, conn.as_ref(), &ctx.policy);
                Ok(result)
            }
            Err(err) => {
                if manual_commit && !use_savepoint {
                    if let Err(e) = conn.rollback() {
                        warn!("Rollback after failed {} did not succeed: {}", self.verb, e);
                    }
                }
                failed_result(&settings, &self.verb, sql, err)
            }
        }
    }
}

/// COMMIT and ROLLBACK
pub struct TransactionCommand {
    verb: String,
    state: CommandState,
}

impl TransactionCommand {
    pub fn commit() -> Self {
        TransactionCommand {
            verb: "COMMIT".to_string(),
            state: CommandState::new(),
        }
    }

    pub fn rollback() -> Self {
        TransactionCommand {
            verb: "ROLLBACK".to_string(),
            state: CommandState::new(),
        }
    }
}

impl SqlCommand for TransactionCommand {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_transaction_control(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(&self.verb)?;
        let rest = sql_text::text_after_verb(sql).to_uppercase();
        // ROLLBACK TO SAVEPOINT and friends go to the database as written
        if !(rest.is_empty() || rest == "WORK" || rest == "TRANSACTION") {
            return run_plain(ctx, &self.state, &self.verb, sql);
        }

        let outcome = if self.verb == "COMMIT" { conn.commit() } else { conn.rollback() };
        match outcome {
            Ok(()) => Ok(ExecutionResult::with_message(format!("{} successful", self.verb))),
            Err(err) => failed_result(&self.state.settings(), &self.verb, sql, err),
        }
    }
}

/// SET, also registered as RESET where the DBMS has session variables
pub struct SetCommand {
    state: CommandState,
}

impl SetCommand {
    pub const VERB: &'static str = "SET";
    pub const RESET_VERB: &'static str = "RESET";

    pub fn new() -> Self {
        SetCommand {
            state: CommandState::new(),
        }
    }

    /// Split `name = value` or `name TO value`
    fn parse_assignment(text: &str) -> Option<(String, String)> {
        if let Some((name, value)) = text.split_once('=') {
            return Some((name.trim().to_lowercase(), unquote(value)));
        }
        let upper = text.to_ascii_uppercase();
        if let Some(pos) = upper.find(" TO ") {
            return Some((text[..pos].trim().to_lowercase(), unquote(&text[pos + 4..])));
        }
        let mut parts = text.splitn(2, char::is_whitespace);
        match (parts.next(), parts.next()) {
            (Some(name), Some(value)) => Some((name.trim().to_lowercase(), unquote(value))),
            _ => None,
        }
    }

    fn parse_flag(value: &str) -> Option<bool> {
        match value.to_uppercase().as_str() {
            "ON" | "TRUE" | "1" => Some(true),
            "OFF" | "FALSE" | "0" => Some(false),
            _ => None,
        }
    }
}

impl Default for SetCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for SetCommand {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_session_control(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(Self::VERB)?;
        let text = sql_text::text_after_verb(sql);

        if sql_text::sql_verb(sql).as_deref() == Some(Self::RESET_VERB) {
            let result = run_plain(ctx, &self.state, Self::RESET_VERB, sql)?;
            if result.is_success() {
                ctx.session.remove(&text.trim().to_lowercase());
            }
            return Ok(result);
        }

        let assignment = Self::parse_assignment(text);
        if let Some((name, value)) = &assignment {
            if name == "autocommit" {
                let enabled = match Self::parse_flag(value) {
                    Some(flag) => flag,
                    None => return Ok(ExecutionResult::failure(format!("Invalid autocommit value: {}", value))),
                };
                return match conn.set_auto_commit(enabled) {
                    Ok(()) => {
                        ctx.session.set("autocommit", if enabled { "on" } else { "off" });
                        Ok(ExecutionResult::with_message(format!(
                            "Autocommit switched {}",
                            if enabled { "on" } else { "off" }
                        )))
                    }
                    Err(err) => failed_result(&self.state.settings(), Self::VERB, sql, err),
                };
            }
        }

        let result = run_plain(ctx, &self.state, Self::VERB, sql)?;
        if result.is_success() {
            if let Some((name, value)) = assignment {
                debug!("Session attribute {} = {}", name, value);
                ctx.session.set(name, value);
            }
        }
        Ok(result)
    }
}

/// CALL, also reachable as EXEC/EXECUTE on DBMS that use that syntax
pub struct ProcedureCall {
    state: CommandState,
}

impl ProcedureCall {
    pub const VERB: &'static str = "CALL";
    pub const EXEC_VERB_SHORT: &'static str = "EXEC";
    pub const EXEC_VERB_LONG: &'static str = "EXECUTE";

    pub fn new() -> Self {
        ProcedureCall {
            state: CommandState::new(),
        }
    }
}

impl Default for ProcedureCall {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for ProcedureCall {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_updating_command(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let sql = match sql_text::sql_verb(sql).as_deref() {
            Some(Self::EXEC_VERB_SHORT) | Some(Self::EXEC_VERB_LONG) => {
                format!("CALL {}", sql_text::text_after_verb(sql))
            }
            _ => sql.to_string(),
        };
        run_plain(ctx, &self.state, Self::VERB, &sql)
    }
}

/// USE <catalog>
pub struct UseCommand {
    state: CommandState,
}

impl UseCommand {
    pub const VERB: &'static str = "USE";

    pub fn new() -> Self {
        UseCommand {
            state: CommandState::new(),
        }
    }
}

impl Default for UseCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for UseCommand {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_session_control(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(Self::VERB)?;
        let catalog = unquote(sql_text::text_after_verb(sql));
        if catalog.is_empty() {
            return Ok(ExecutionResult::failure("USE requires a catalog name"));
        }
        match conn.set_catalog(&catalog) {
            Ok(()) => {
                ctx.session.set("catalog", catalog.clone());
                Ok(ExecutionResult::with_message(format!("Catalog changed to {}", catalog)))
            }
            Err(err) => failed_result(&self.state.settings(), Self::VERB, sql, err),
        }
    }
}

/// The wildcard command: anything the registry has no handler for
pub struct PassthroughCommand {
    state: CommandState,
}

impl PassthroughCommand {
    pub fn new() -> Self {
        PassthroughCommand {
            state: CommandState::new(),
        }
    }
}

impl Default for PassthroughCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for PassthroughCommand {
    fn verb(&self) -> &str {
        crate::command::WILDCARD_VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_updating_statement(&self, dbms: Option<&DbmsInfo>, sql: &str) -> bool {
        let verb = sql_text::sql_verb(sql).unwrap_or_default();
        if UPDATING_VERBS.contains(verb.as_str()) {
            return true;
        }
        dbms.map(|d| d.supports_select_into).unwrap_or(false)
            && verb == "SELECT"
            && sql_text::is_select_into_new_table(sql)
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let verb = sql_text::sql_verb(sql).unwrap_or_else(|| "SQL".to_string());
        run_plain(ctx, &self.state, &verb, sql)
    }
}

/// Accepts a verb configured to be ignored for the current DBMS
pub struct IgnoredCommand {
    verb: String,
    state: CommandState,
}

impl IgnoredCommand {
    pub fn new(verb: &str) -> Self {
        IgnoredCommand {
            verb: verb.to_uppercase(),
            state: CommandState::new(),
        }
    }
}

impl SqlCommand for IgnoredCommand {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn execute(&self, _ctx: &mut CommandContext<'_>, _sql: &str) -> EngineResult<ExecutionResult> {
        debug!("Ignoring {} statement", self.verb);
        Ok(ExecutionResult::with_message(format!("{} ignored", self.verb)))
    }
}
