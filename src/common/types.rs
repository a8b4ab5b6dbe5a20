use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::command::SqlCommand;
use crate::connection::{Connection, ConnectionProfile};
use crate::engine::hooks::ResultConsumer;

/// Shared handle to a live database connection
pub type ConnectionRef = Arc<dyn Connection>;

/// Shared handle to a registered command
pub type CommandRef = Arc<dyn SqlCommand>;

/// Shared handle to an attached result consumer
pub type ConsumerRef = Arc<dyn ResultConsumer>;

/// The environment a script is executed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Embedded in a graphical host
    Gui,
    /// Interactive console shell
    #[default]
    Console,
    /// Unattended script execution
    Batch,
}

/// How much detail error messages carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReportLevel {
    /// Only the database message
    None,
    /// Database message plus the verb
    #[default]
    Limited,
    /// Database message plus the full statement
    Full,
}

/// Per-session statement policy, derived from the connection profile and
/// adjustable at runtime (WbMode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionPolicy {
    /// Skip statements that would modify the database
    pub read_only: bool,
    /// Ask the confirmation controller before updating statements
    pub confirm_updates: bool,
    /// Do not attach connection warnings to results
    pub hide_warnings: bool,
}

impl SessionPolicy {
    /// Derive the policy from a connection profile
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        SessionPolicy {
            read_only: profile.read_only,
            confirm_updates: profile.confirm_updates,
            hide_warnings: profile.hide_warnings,
        }
    }
}

/// Returns true if both handles point at the same allocation, regardless of
/// which trait object they were coerced to.
pub fn same_object<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
