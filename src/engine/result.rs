// Execution Result Implementation
//
// This module defines the values, tables and per-statement results produced
// by command execution, plus the engine error type.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionError;

/// A single value in a result row
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "{}", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::Blob(b) => write!(f, "BLOB ({} bytes)", b.len()),
        }
    }
}

impl DataValue {
    /// Render the value as a SQL literal
    pub fn to_sql_literal(&self) -> String {
        match self {
            DataValue::Null => "NULL".to_string(),
            DataValue::Integer(i) => i.to_string(),
            DataValue::Float(f) => f.to_string(),
            DataValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DataValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DataValue::Blob(b) => format!("X'{}'", hex::encode(b)),
        }
    }

    /// Render the value for a delimited text export; NULL becomes empty
    pub fn to_export_text(&self) -> String {
        match self {
            DataValue::Null => String::new(),
            DataValue::Blob(b) => hex::encode(b),
            other => other.to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            DataValue::Float(f) => Some(*f as i64),
            DataValue::Boolean(b) => Some(*b as i64),
            DataValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Tabular result of a query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// Column names in the result set
    columns: Vec<String>,
    /// Rows of data, in column order
    rows: Vec<Vec<DataValue>>,
    /// Statement that produced the data
    source_sql: Option<String>,
}

impl ResultSet {
    /// Create a new empty result set with column names
    pub fn new(columns: Vec<String>) -> Self {
        ResultSet {
            columns,
            rows: Vec::new(),
            source_sql: None,
        }
    }

    /// Add a row to the result set
    pub fn add_row(&mut self, row: Vec<DataValue>) {
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<DataValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn source_sql(&self) -> Option<&str> {
        self.source_sql.as_deref()
    }

    pub fn set_source_sql(&mut self, sql: impl Into<String>) {
        self.source_sql = Some(sql.into());
    }

    /// Value at the given row and column name
    pub fn value(&self, row: usize, column: &str) -> Option<&DataValue> {
        let index = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Format the result set as an aligned text table
    pub fn to_string_table(&self) -> String {
        if self.columns.is_empty() {
            return "Empty result".to_string();
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len().max(3)).collect();
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        for row in &rendered {
            for (i, value) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(value.chars().count());
                }
            }
        }

        let mut out = String::new();
        out.push('|');
        for (col, width) in self.columns.iter().zip(&widths) {
            out.push_str(&format!(" {:<width$} |", col, width = width));
        }
        out.push('\n');

        out.push('+');
        for width in &widths {
            out.push_str(&format!("{:-<width$}+", "", width = width + 2));
        }
        out.push('\n');

        for row in &rendered {
            out.push('|');
            for (i, width) in widths.iter().enumerate() {
                let value = row.get(i).map(String::as_str).unwrap_or("NULL");
                out.push_str(&format!(" {:<width$} |", value, width = width));
            }
            out.push('\n');
        }
        out.push_str(&format!("({} rows)", self.rows.len()));
        out
    }
}

/// Outcome classification of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    /// Succeeded, but carries at least one warning
    Warning,
    Failure,
}

/// Result of running a single statement
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    status: ResultStatus,
    result_sets: Vec<ResultSet>,
    messages: Vec<String>,
    update_counts: Vec<u64>,
    duration: Option<Duration>,
    prompting_cancelled: bool,
    stop_script: bool,
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionResult {
    /// Create a new successful result without content
    pub fn new() -> Self {
        ExecutionResult {
            status: ResultStatus::Success,
            result_sets: Vec::new(),
            messages: Vec::new(),
            update_counts: Vec::new(),
            duration: None,
            prompting_cancelled: false,
            stop_script: false,
        }
    }

    /// Successful result carrying a single message
    pub fn with_message(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.add_message(message);
        result
    }

    /// Successful result carrying a warning
    pub fn with_warning(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.add_warning(message);
        result
    }

    /// Failed result carrying an error message
    pub fn failure(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.set_failure();
        result.add_message(message);
        result
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    /// True for plain successes and successes with warnings
    pub fn is_success(&self) -> bool {
        self.status != ResultStatus::Failure
    }

    pub fn has_warning(&self) -> bool {
        self.status == ResultStatus::Warning
    }

    pub fn set_failure(&mut self) {
        self.status = ResultStatus::Failure;
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Add a message and flag the result as a warning, unless it already failed
    pub fn add_warning(&mut self, message: impl Into<String>) {
        if self.status == ResultStatus::Success {
            self.status = ResultStatus::Warning;
        }
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn add_result_set(&mut self, result_set: ResultSet) {
        self.result_sets.push(result_set);
    }

    pub fn result_sets(&self) -> &[ResultSet] {
        &self.result_sets
    }

    pub fn has_data(&self) -> bool {
        !self.result_sets.is_empty()
    }

    /// Drop result sets without rows
    pub fn remove_empty_result_sets(&mut self) {
        self.result_sets.retain(|rs| !rs.is_empty());
    }

    pub fn add_update_count(&mut self, count: u64) {
        self.update_counts.push(count);
    }

    pub fn update_counts(&self) -> &[u64] {
        &self.update_counts
    }

    pub fn total_update_count(&self) -> u64 {
        self.update_counts.iter().sum()
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = Some(duration);
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn set_prompting_cancelled(&mut self) {
        self.prompting_cancelled = true;
    }

    pub fn prompting_cancelled(&self) -> bool {
        self.prompting_cancelled
    }

    /// Ask the script runner to stop after this statement
    pub fn set_stop_script(&mut self) {
        self.stop_script = true;
    }

    pub fn stop_script(&self) -> bool {
        self.stop_script
    }
}

/// Errors raised by commands and the execution engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A command needing a database was run without one
    #[error("{verb} requires an active database connection")]
    ConnectionRequired { verb: String },
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Statement cancelled")]
    Cancelled,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
