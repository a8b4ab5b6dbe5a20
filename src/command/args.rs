// Meta-command argument parsing
//
// Arguments are written as `-name=value` switches; values may be quoted.
// Anything that is not a switch is collected as a positional argument.

use linked_hash_map::LinkedHashMap;

use crate::engine::result::{EngineError, EngineResult};

/// Parsed meta-command arguments
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    switches: LinkedHashMap<String, String>,
    positional: Vec<String>,
}

impl CommandArgs {
    pub fn parse(text: &str) -> Self {
        let mut args = CommandArgs::default();
        for token in split_quoted(text) {
            match token.strip_prefix('-') {
                Some(switch) if !switch.is_empty() => {
                    let (name, value) = match switch.split_once('=') {
                        Some((name, value)) => (name, unquote(value)),
                        None => (switch, "true".to_string()),
                    };
                    args.switches.insert(name.to_lowercase(), value);
                }
                _ => args.positional.push(unquote(&token)),
            }
        }
        args
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.switches.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> EngineResult<&str> {
        self.get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EngineError::InvalidArgument(format!("-{} is required", name)))
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name).map(str::to_lowercase).as_deref() {
            Some("true") | Some("yes") | Some("1") | Some("on") => true,
            Some("false") | Some("no") | Some("0") | Some("off") => false,
            _ => default,
        }
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }
}

/// Split on whitespace, keeping quoted sections together
fn split_quoted(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Strip one level of matching quotes
pub fn unquote(value: &str) -> String {
    let value = value.trim();
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}
