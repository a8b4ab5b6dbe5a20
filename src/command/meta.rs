// Meta Commands
//
// Client-side commands that never reach the database as written: batch
// bracketing, result export, script control, variables, session mode and
// table description.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use log::{debug, info};
use parking_lot::Mutex;

use crate::command::args::CommandArgs;
use crate::command::{
    failed_result, BatchCollector, BatchRole, CommandContext, CommandState, SqlCommand,
};
use crate::common::sql_text;
use crate::common::{ConsumerRef, RunMode, SessionPolicy};
use crate::engine::hooks::{ConsumeOutcome, ResultConsumer};
use crate::engine::result::{DataValue, EngineError, EngineResult, ExecutionResult, ResultSet};

/// Opens a batch; statements up to WBENDBATCH are collected instead of run
pub struct WbStartBatch {
    state: CommandState,
    statements: Mutex<Vec<String>>,
}

impl WbStartBatch {
    pub const VERB: &'static str = "WBSTARTBATCH";

    pub fn new() -> Self {
        WbStartBatch {
            state: CommandState::new(),
            statements: Mutex::new(Vec::new()),
        }
    }
}

impl Default for WbStartBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbStartBatch {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn batch_role(&self) -> BatchRole {
        BatchRole::Start
    }

    fn as_batch_collector(&self) -> Option<&dyn BatchCollector> {
        Some(self)
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, _sql: &str) -> EngineResult<ExecutionResult> {
        ctx.require_connection(Self::VERB)?;
        self.statements.lock().clear();
        Ok(ExecutionResult::with_message("Batch started"))
    }
}

impl BatchCollector for WbStartBatch {
    fn add_statement(&self, sql: &str) {
        self.statements.lock().push(sql_text::strip_delimiter(sql).to_string());
    }

    fn statement_count(&self) -> usize {
        self.statements.lock().len()
    }

    fn execute_batch(&self, ctx: &mut CommandContext<'_>) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(Self::VERB)?;
        let statements = std::mem::take(&mut *self.statements.lock());
        if statements.is_empty() {
            return Ok(ExecutionResult::with_warning("Batch contained no statements"));
        }

        debug!("Executing batch of {} statements on {}", statements.len(), conn.id());
        match conn.execute_batch(&statements) {
            Ok(counts) => {
                let mut result = ExecutionResult::new();
                for count in &counts {
                    result.add_update_count(*count);
                }
                result.add_message(format!(
                    "Batch of {} statements executed, {} rows affected",
                    statements.len(),
                    result.total_update_count()
                ));
                Ok(result)
            }
            Err(err) => failed_result(&self.state.settings(), "Batch", &statements.join(";\n"), err),
        }
    }
}

/// Closes a batch; the engine replaces its result with the batch result
pub struct WbEndBatch {
    state: CommandState,
}

impl WbEndBatch {
    pub const VERB: &'static str = "WBENDBATCH";

    pub fn new() -> Self {
        WbEndBatch {
            state: CommandState::new(),
        }
    }
}

impl Default for WbEndBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbEndBatch {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn batch_role(&self) -> BatchRole {
        BatchRole::End
    }

    fn execute(&self, _ctx: &mut CommandContext<'_>, _sql: &str) -> EngineResult<ExecutionResult> {
        // Only reached as-is when no batch is pending
        Ok(ExecutionResult::with_warning("No batch started"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExportTarget {
    file: PathBuf,
    delimiter: String,
    header: bool,
}

/// Writes the result of the next statement to a delimited text file
pub struct WbExport {
    state: CommandState,
    target: Mutex<Option<ExportTarget>>,
}

impl WbExport {
    pub const VERB: &'static str = "WBEXPORT";

    pub fn new() -> Self {
        WbExport {
            state: CommandState::new(),
            target: Mutex::new(None),
        }
    }

    /// Whether an export is waiting for a result
    pub fn is_pending(&self) -> bool {
        self.target.lock().is_some()
    }

    fn parse_delimiter(value: Option<&str>) -> String {
        match value {
            None | Some("") => "\t".to_string(),
            Some("\\t") | Some("tab") => "\t".to_string(),
            Some(other) => other.to_string(),
        }
    }

    fn quote(value: &str, delimiter: &str) -> String {
        if value.contains(delimiter) || value.contains('"') || value.contains('\n') {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }

    fn write_row<W: Write>(out: &mut W, values: &[String], delimiter: &str) -> std::io::Result<()> {
        let line: Vec<String> = values.iter().map(|v| Self::quote(v, delimiter)).collect();
        writeln!(out, "{}", line.join(delimiter))
    }

    fn write_file(target: &ExportTarget, result_set: &ResultSet) -> std::io::Result<usize> {
        let mut out = BufWriter::new(File::create(&target.file)?);
        if target.header {
            Self::write_row(&mut out, result_set.columns(), &target.delimiter)?;
        }
        for row in result_set.rows() {
            let values: Vec<String> = row.iter().map(DataValue::to_export_text).collect();
            Self::write_row(&mut out, &values, &target.delimiter)?;
        }
        out.flush()?;
        Ok(result_set.row_count())
    }
}

impl Default for WbExport {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbExport {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn as_result_consumer(self: Arc<Self>) -> Option<ConsumerRef> {
        Some(self)
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let args = CommandArgs::parse(sql_text::text_after_verb(sql));
        let target = ExportTarget {
            file: PathBuf::from(args.require("file")?),
            delimiter: Self::parse_delimiter(args.get("delimiter")),
            header: args.get_bool("header", true),
        };
        let message = format!("Export to {} prepared for next statement", target.file.display());
        *self.target.lock() = Some(target);
        ctx.request_consumer();
        Ok(ExecutionResult::with_message(message))
    }

    fn done(&self) {
        self.state.reset_cancel();
    }
}

impl ResultConsumer for WbExport {
    fn consume_result(&self, result: &mut ExecutionResult) -> EngineResult<ConsumeOutcome> {
        let target = match self.target.lock().clone() {
            Some(target) => target,
            None => return Ok(ConsumeOutcome::Detach),
        };
        let result_set = match result.result_sets().first() {
            Some(rs) => rs,
            // Keep waiting for a statement that produces rows
            None => return Ok(ConsumeOutcome::KeepAttached),
        };
        if self.state.is_cancelled() {
            *self.target.lock() = None;
            return Err(EngineError::Cancelled);
        }

        let rows = Self::write_file(&target, result_set)?;
        *self.target.lock() = None;
        info!("Exported {} rows to {}", rows, target.file.display());
        result.add_message(format!("{} rows exported to {}", rows, target.file.display()));
        Ok(ConsumeOutcome::Detach)
    }

    fn ignore_max_rows(&self) -> bool {
        true
    }

    fn cancel(&self) -> EngineResult<()> {
        self.state.cancel();
        *self.target.lock() = None;
        Ok(())
    }
}

/// Stops the running script
pub struct WbExit {
    state: CommandState,
}

impl WbExit {
    pub const VERB: &'static str = "WBEXIT";

    pub fn new() -> Self {
        WbExit {
            state: CommandState::new(),
        }
    }
}

impl Default for WbExit {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbExit {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn is_mode_supported(&self, mode: RunMode) -> bool {
        mode != RunMode::Gui
    }

    fn execute(&self, _ctx: &mut CommandContext<'_>, _sql: &str) -> EngineResult<ExecutionResult> {
        let mut result = ExecutionResult::with_message("Script stopped");
        result.set_stop_script();
        Ok(result)
    }
}

/// WBVARDEF name=value
pub struct WbVarDef {
    state: CommandState,
}

impl WbVarDef {
    pub const VERB: &'static str = "WBVARDEF";
    pub const ALTERNATE_VERB: &'static str = "WBDEFINEVAR";

    pub fn new() -> Self {
        WbVarDef {
            state: CommandState::new(),
        }
    }
}

impl Default for WbVarDef {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbVarDef {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn alternate_verb(&self) -> Option<&str> {
        Some(Self::ALTERNATE_VERB)
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let text = sql_text::text_after_verb(sql);
        let (name, value) = text
            .split_once('=')
            .map(|(n, v)| (n.trim(), crate::command::args::unquote(v)))
            .ok_or_else(|| EngineError::InvalidArgument(format!("Expected name=value, got '{}'", text)))?;
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("Variable name is empty".to_string()));
        }
        ctx.variables.set(name, value.clone());
        Ok(ExecutionResult::with_message(format!("Variable {} defined with value '{}'", name, value)))
    }
}

/// WBVARDELETE name [name...] or * for all
pub struct WbVarDelete {
    state: CommandState,
}

impl WbVarDelete {
    pub const VERB: &'static str = "WBVARDELETE";

    pub fn new() -> Self {
        WbVarDelete {
            state: CommandState::new(),
        }
    }
}

impl Default for WbVarDelete {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbVarDelete {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let names: Vec<&str> = sql_text::text_after_verb(sql)
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(ExecutionResult::with_warning("No variable name given"));
        }
        if names == ["*"] {
            let count = ctx.variables.len();
            ctx.variables.clear();
            return Ok(ExecutionResult::with_message(format!("{} variables removed", count)));
        }

        let mut result = ExecutionResult::new();
        for name in names {
            if ctx.variables.remove(name) {
                result.add_message(format!("Variable {} removed", name));
            } else {
                result.add_warning(format!("Variable {} not defined", name));
            }
        }
        Ok(result)
    }
}

/// Lists the defined variables
pub struct WbVarList {
    state: CommandState,
}

impl WbVarList {
    pub const VERB: &'static str = "WBVARLIST";
    pub const ALTERNATE_VERB: &'static str = "WBLISTVARS";

    pub fn new() -> Self {
        WbVarList {
            state: CommandState::new(),
        }
    }
}

impl Default for WbVarList {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbVarList {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn alternate_verb(&self) -> Option<&str> {
        Some(Self::ALTERNATE_VERB)
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, _sql: &str) -> EngineResult<ExecutionResult> {
        let mut rs = ResultSet::new(vec!["VARIABLE".to_string(), "VALUE".to_string()]);
        for (name, value) in ctx.variables.entries() {
            rs.add_row(vec![DataValue::Text(name), DataValue::Text(value)]);
        }
        let mut result = ExecutionResult::new();
        result.add_result_set(rs);
        Ok(result)
    }
}

pub struct WbEcho {
    state: CommandState,
}

impl WbEcho {
    pub const VERB: &'static str = "WBECHO";

    pub fn new() -> Self {
        WbEcho {
            state: CommandState::new(),
        }
    }
}

impl Default for WbEcho {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbEcho {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn execute(&self, _ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        Ok(ExecutionResult::with_message(sql_text::text_after_verb(sql)))
    }
}

/// Switches the session policy: readonly, normal, confirm or reset
pub struct WbMode {
    state: CommandState,
}

impl WbMode {
    pub const VERB: &'static str = "WBMODE";

    pub fn new() -> Self {
        WbMode {
            state: CommandState::new(),
        }
    }
}

impl Default for WbMode {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for WbMode {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn is_wb_command(&self) -> bool {
        true
    }

    fn is_connection_required(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let mode = sql_text::text_after_verb(sql).to_lowercase();
        let hide_warnings = ctx.policy.hide_warnings;
        ctx.policy = match mode.as_str() {
            "readonly" | "read_only" => SessionPolicy {
                read_only: true,
                confirm_updates: false,
                hide_warnings,
            },
            "normal" => SessionPolicy {
                read_only: false,
                confirm_updates: false,
                hide_warnings,
            },
            "confirm" => SessionPolicy {
                read_only: false,
                confirm_updates: true,
                hide_warnings,
            },
            "reset" => match ctx.connection() {
                Some(conn) => SessionPolicy::from_profile(conn.profile()),
                None => SessionPolicy::default(),
            },
            other => {
                return Ok(ExecutionResult::failure(format!(
                    "Unknown mode '{}', expected readonly, normal, confirm or reset",
                    other
                )))
            }
        };
        Ok(ExecutionResult::with_message(format!("Session mode set to {}", mode)))
    }
}

/// DESC / DESCRIBE table
pub struct Describe {
    state: CommandState,
}

impl Describe {
    pub const VERB: &'static str = "DESC";
    pub const ALTERNATE_VERB: &'static str = "DESCRIBE";

    pub fn new() -> Self {
        Describe {
            state: CommandState::new(),
        }
    }
}

impl Default for Describe {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCommand for Describe {
    fn verb(&self) -> &str {
        Self::VERB
    }

    fn alternate_verb(&self) -> Option<&str> {
        Some(Self::ALTERNATE_VERB)
    }

    fn state(&self) -> &CommandState {
        &self.state
    }

    fn execute(&self, ctx: &mut CommandContext<'_>, sql: &str) -> EngineResult<ExecutionResult> {
        let conn = ctx.require_connection(Self::VERB)?;
        let name = crate::command::args::unquote(sql_text::text_after_verb(sql));
        if name.is_empty() {
            return Ok(ExecutionResult::failure("DESCRIBE requires a table name"));
        }
        match conn.describe_object(&name) {
            Ok(mut rs) => {
                rs.set_source_sql(sql);
                let mut result = ExecutionResult::new();
                result.add_result_set(rs);
                Ok(result)
            }
            Err(err) => failed_result(&self.state.settings(), Self::VERB, sql, err),
        }
    }
}
