// Variable Pool
//
// Script variables referenced as `$[name]` in statement text. A reference
// written as `$[?name]` asks the parameter prompter for a value before the
// statement runs. The pool is shared by handle; clones see the same values.

use std::sync::Arc;
use linked_hash_map::LinkedHashMap;
use parking_lot::RwLock;

const REF_START: &str = "$[";
const REF_END: char = ']';
const PROMPT_MARKER: char = '?';

/// Shared, ordered variable store
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    values: Arc<RwLock<LinkedHashMap<String, String>>>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.read().get(name).cloned()
    }

    /// Returns true if the variable existed
    pub fn remove(&self, name: &str) -> bool {
        self.values.write().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Snapshot of all (name, value) pairs in definition order
    pub fn entries(&self) -> Vec<(String, String)> {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Names referenced with the prompt marker, in order of appearance
    pub fn prompt_names(sql: &str) -> Vec<String> {
        let mut names = Vec::new();
        for (name, prompt) in references(sql) {
            if prompt && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Whether the statement contains any variable reference
    pub fn has_references(sql: &str) -> bool {
        references(sql).next().is_some()
    }

    /// Replace every reference to a defined variable with its value
    pub fn substitute(&self, sql: &str) -> String {
        let values = self.values.read();
        if values.is_empty() {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len());
        let mut rest = sql;
        while let Some(start) = rest.find(REF_START) {
            let after = &rest[start + REF_START.len()..];
            let end = match after.find(REF_END) {
                Some(end) => end,
                None => break,
            };
            let name = after[..end].trim_start_matches(PROMPT_MARKER);
            out.push_str(&rest[..start]);
            match values.get(name) {
                Some(value) => out.push_str(value),
                None => out.push_str(&rest[start..start + REF_START.len() + end + 1]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Iterate (name, is_prompt) for each `$[...]` in the text
fn references(sql: &str) -> impl Iterator<Item = (&str, bool)> {
    let mut rest = sql;
    std::iter::from_fn(move || {
        let start = rest.find(REF_START)?;
        let after = &rest[start + REF_START.len()..];
        let end = after.find(REF_END)?;
        let raw = &after[..end];
        rest = &after[end + 1..];
        match raw.strip_prefix(PROMPT_MARKER) {
            Some(name) => Some((name, true)),
            None => Some((raw, false)),
        }
    })
}
