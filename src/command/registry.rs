// Command Registry
//
// Maps SQL verbs to commands. The baseline map is built once; entries
// installed for a particular DBMS live in a separate dynamic map that is
// emptied and rebuilt whenever a new connection is bound.

use std::collections::HashMap;
use std::sync::Arc;
use linked_hash_map::LinkedHashMap;
use log::{debug, warn};

use crate::command::meta::{
    Describe, WbEcho, WbEndBatch, WbExit, WbExport, WbMode, WbStartBatch, WbVarDef, WbVarDelete,
    WbVarList,
};
use crate::command::sql::{
    DdlCommand, IgnoredCommand, PassthroughCommand, ProcedureCall, SelectCommand, SetCommand,
    TransactionCommand, UpdatingCommand, UseCommand,
};
use crate::common::{sql_text, CommandRef};
use crate::connection::{Connection, DbmsInfo};

/// Key of the fallback command used for unknown verbs
pub const WILDCARD_VERB: &str = "*";

/// Resolves statements to the command that runs them
pub struct CommandRegistry {
    baseline: HashMap<String, CommandRef>,
    /// Verbs installed for the bound DBMS; `None` hides a baseline verb
    dynamic: LinkedHashMap<String, Option<CommandRef>>,
    procedure_call: CommandRef,
    set_command: CommandRef,
    wildcard: CommandRef,
    allow_abbreviations: bool,
    select_into_supported: bool,
}

impl CommandRegistry {
    /// Create a registry holding the baseline commands
    pub fn new() -> Self {
        let procedure_call: CommandRef = Arc::new(ProcedureCall::new());
        let set_command: CommandRef = Arc::new(SetCommand::new());
        let wildcard: CommandRef = Arc::new(PassthroughCommand::new());

        let mut registry = CommandRegistry {
            baseline: HashMap::new(),
            dynamic: LinkedHashMap::new(),
            procedure_call,
            set_command,
            wildcard,
            allow_abbreviations: true,
            select_into_supported: false,
        };
        registry.build_baseline();
        registry
    }

    /// Create a registry with additional commands in the baseline; an extra
    /// command replaces a built-in one registered under the same verb
    pub fn with_commands(commands: Vec<CommandRef>) -> Self {
        let mut registry = Self::new();
        for cmd in commands {
            registry.register(cmd);
        }
        registry
    }

    fn build_baseline(&mut self) {
        let meta: Vec<CommandRef> = vec![
            Arc::new(WbStartBatch::new()),
            Arc::new(WbEndBatch::new()),
            Arc::new(WbExport::new()),
            Arc::new(WbExit::new()),
            Arc::new(WbVarDef::new()),
            Arc::new(WbVarDelete::new()),
            Arc::new(WbVarList::new()),
            Arc::new(WbEcho::new()),
            Arc::new(WbMode::new()),
            Arc::new(Describe::new()),
        ];
        for cmd in meta {
            self.register(cmd);
        }

        let select: CommandRef = Arc::new(SelectCommand::new("SELECT"));
        self.baseline.insert("WITH".to_string(), select.clone());
        self.register(select);

        for verb in ["INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE"] {
            self.register(Arc::new(UpdatingCommand::new(verb)));
        }
        for verb in ["CREATE", "DROP", "ALTER"] {
            self.register(Arc::new(DdlCommand::new(verb)));
        }
        self.register(Arc::new(TransactionCommand::commit()));
        self.register(Arc::new(TransactionCommand::rollback()));
        self.register(self.set_command.clone());
        self.register(self.procedure_call.clone());
        self.register(self.wildcard.clone());
    }

    /// Register a command under its verb and alternate verb
    fn register(&mut self, cmd: CommandRef) {
        if let Some(alternate) = cmd.alternate_verb() {
            self.baseline.insert(alternate.to_uppercase(), cmd.clone());
        }
        self.baseline.insert(cmd.verb().to_uppercase(), cmd);
    }

    fn install(&mut self, verb: &str, cmd: Option<CommandRef>) {
        debug!("Installing DBMS specific verb {}", verb);
        self.dynamic.insert(verb.to_uppercase(), cmd);
    }

    /// Replace the DBMS specific verbs with those for `connection`
    pub fn bind_connection(
        &mut self,
        connection: Option<&dyn Connection>,
        ignored_verbs: &HashMap<String, Vec<String>>,
    ) {
        self.dynamic.clear();
        self.select_into_supported = false;

        let dbms = match connection {
            Some(conn) => conn.dbms().clone(),
            None => return,
        };
        self.select_into_supported = dbms.supports_select_into;

        if dbms.exec_procedure_call {
            let call = self.procedure_call.clone();
            self.install(ProcedureCall::EXEC_VERB_SHORT, Some(call.clone()));
            self.install(ProcedureCall::EXEC_VERB_LONG, Some(call));
        }
        if dbms.supports_session_variables {
            let set = self.set_command.clone();
            self.install(SetCommand::RESET_VERB, Some(set));
        }
        if dbms.supports_catalogs {
            self.install(UseCommand::VERB, Some(Arc::new(UseCommand::new())));
        }
        if dbms.ddl_needs_commit {
            for verb in ["CREATE", "DROP", "ALTER"] {
                self.install(verb, Some(Arc::new(DdlCommand::committing(verb))));
            }
        }
        self.install_ignored(&dbms, ignored_verbs);
        if dbms.native_describe {
            self.install(Describe::ALTERNATE_VERB, None);
        }
    }

    fn install_ignored(&mut self, dbms: &DbmsInfo, ignored_verbs: &HashMap<String, Vec<String>>) {
        let verbs = match ignored_verbs.get(&dbms.dbms_id) {
            Some(verbs) => verbs,
            None => return,
        };
        for verb in verbs {
            let verb = verb.trim();
            if verb.is_empty() || !verb.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                warn!("Ignoring malformed verb '{}' configured for {}", verb, dbms.dbms_id);
                continue;
            }
            self.install(verb, Some(Arc::new(IgnoredCommand::new(verb))));
        }
    }

    pub fn set_allow_abbreviations(&mut self, allow: bool) {
        self.allow_abbreviations = allow;
    }

    /// The fallback command for unknown verbs
    pub fn wildcard(&self) -> CommandRef {
        self.wildcard.clone()
    }

    /// Exact lookup of a verb, honoring DBMS specific overrides
    pub fn get(&self, verb: &str) -> Option<CommandRef> {
        let verb = verb.to_uppercase();
        match self.dynamic.get(&verb) {
            Some(installed) => installed.clone(),
            None => self.baseline.get(&verb).cloned(),
        }
    }

    /// Find the command for a statement; `None` only for empty statements
    pub fn resolve(&self, sql: &str) -> Option<CommandRef> {
        let verb = sql_text::sql_verb(sql)?;

        if self.select_into_supported && verb == "SELECT" && sql_text::is_select_into_new_table(sql) {
            debug!("SELECT INTO detected, using generic command");
            return Some(self.wildcard());
        }
        if let Some(cmd) = self.get(&verb) {
            return Some(cmd);
        }
        if self.allow_abbreviations {
            if let Some(cmd) = self.resolve_abbreviation(&verb) {
                return Some(cmd);
            }
        }
        Some(self.wildcard())
    }

    /// Unique meta-command whose verb starts with `prefix`
    fn resolve_abbreviation(&self, prefix: &str) -> Option<CommandRef> {
        let mut found: Option<CommandRef> = None;
        for (verb, cmd) in self.active_entries() {
            if !cmd.is_wb_command() || !verb.starts_with(prefix) {
                continue;
            }
            match &found {
                Some(existing) if Arc::ptr_eq(existing, &cmd) => {}
                Some(_) => {
                    debug!("Abbreviation {} is ambiguous", prefix);
                    return None;
                }
                None => found = Some(cmd),
            }
        }
        found
    }

    /// All resolvable (verb, command) pairs
    fn active_entries(&self) -> Vec<(String, CommandRef)> {
        let mut entries: Vec<(String, CommandRef)> = self
            .baseline
            .iter()
            .filter(|(verb, _)| !self.dynamic.contains_key(*verb))
            .map(|(verb, cmd)| (verb.clone(), cmd.clone()))
            .collect();
        for (verb, cmd) in self.dynamic.iter() {
            if let Some(cmd) = cmd {
                entries.push((verb.clone(), cmd.clone()));
            }
        }
        entries
    }

    /// Verbs installed by the last bind, in installation order
    pub fn installed_verbs(&self) -> Vec<String> {
        self.dynamic.keys().cloned().collect()
    }

    /// Every resolvable verb, sorted
    pub fn verbs(&self) -> Vec<String> {
        let mut verbs: Vec<String> = self
            .active_entries()
            .into_iter()
            .map(|(verb, _)| verb)
            .filter(|verb| verb != WILDCARD_VERB)
            .collect();
        verbs.sort();
        verbs
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
