// Engine configuration
//
// Plain settings struct handed to the engine at construction time and
// replaced as a whole through `ExecutionEngine::reconfigure`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::common::{ErrorReportLevel, RunMode};
use crate::engine::result::{EngineError, EngineResult};
use crate::transaction::{EndReadOnlyTransaction, SavepointStrategy};

/// Configuration for the execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Row limit for queries, 0 for unlimited
    pub max_rows: usize,
    /// Statement timeout in seconds, 0 for none
    pub query_timeout_secs: u64,
    pub error_level: ErrorReportLevel,
    pub show_progress: bool,
    pub run_mode: RunMode,
    /// Resolve unique prefixes of meta-command verbs
    pub allow_abbreviations: bool,
    pub end_read_only_transactions: EndReadOnlyTransaction,
    pub savepoint_strategy: SavepointStrategy,
    /// Log resolution and policy decisions at info level
    pub verbose_logging: bool,
    /// Log every statement with duration, user and url
    pub log_all_statements: bool,
    /// Ask the connection to cancel the running statement on cancel
    pub native_cancel: bool,
    /// How long cancel waits for the native cancel to finish
    pub cancel_timeout_ms: u64,
    /// Verbs accepted but not executed, by DBMS id
    pub ignored_verbs: HashMap<String, Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_rows: 0,
            query_timeout_secs: 0,
            error_level: ErrorReportLevel::default(),
            show_progress: false,
            run_mode: RunMode::default(),
            allow_abbreviations: true,
            end_read_only_transactions: EndReadOnlyTransaction::default(),
            savepoint_strategy: SavepointStrategy::default(),
            verbose_logging: false,
            log_all_statements: false,
            native_cancel: true,
            cancel_timeout_ms: 5000,
            ignored_verbs: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        match self.query_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}
