// Common Module
//
// Shared type aliases, enums and SQL text helpers used across the crate.

pub mod sql_text;
pub mod types;

pub use self::types::{
    same_object, CommandRef, ConnectionRef, ConsumerRef, ErrorReportLevel, RunMode, SessionPolicy,
};
