use std::time::Duration;

use chrono::NaiveDateTime;

/// Limits and switches applied to one dynamic execution.
#[derive(Debug, Clone, PartialEq)]
pub struct VbaSandboxPolicy {
    /// Statements executed before the run is cancelled.
    pub max_steps: u64,
    pub max_execution_time: Duration,
    pub max_call_depth: usize,
    /// Emit a `StatementEntered` event for every executed statement.
    pub trace_statements: bool,
    /// Pins `Now`, `Date`, `Time` and `Timer` so runs are reproducible.
    pub clock: Option<NaiveDateTime>,
}

impl Default for VbaSandboxPolicy {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_execution_time: Duration::from_secs(10),
            max_call_depth: 200,
            trace_statements: false,
            clock: None,
        }
    }
}
