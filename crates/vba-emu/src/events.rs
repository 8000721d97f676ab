use serde::Serialize;

use crate::environment::{HostCallKind, HostHandle};
use crate::error::{SourcePosition, VbaError};
use crate::value::VbaValue;

/// One observation made during dynamic execution. `sequence` orders events of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    pub sequence: u64,
    pub position: SourcePosition,
    /// `Module.Procedure` executing when the event was recorded.
    pub procedure: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ProcedureEntered {
        args: Vec<String>,
    },
    ProcedureExited,
    StatementEntered,
    ValueAssigned {
        target: String,
        value: String,
    },
    ErrorRaised {
        number: i32,
        description: String,
    },
    ErrorHandled {
        number: i32,
        action: String,
    },
    HostCall {
        call: HostCallKind,
        operation: String,
        target: Option<HostHandle>,
        args: Vec<String>,
    },
    ResourceReleased {
        handle: Option<HostHandle>,
        resource: String,
    },
    /// A line written by `Debug.Print`.
    DebugPrint {
        text: String,
    },
}

/// How a dynamic execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { returned: Option<VbaValue> },
    /// The program executed `End`.
    Terminated,
    Uncaught(VbaError),
    BudgetExhausted(VbaError),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. } | Outcome::Terminated)
    }

    pub fn error(&self) -> Option<&VbaError> {
        match self {
            Outcome::Uncaught(err) | Outcome::BudgetExhausted(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionReport {
    pub fn returned(&self) -> Option<&VbaValue> {
        match &self.outcome {
            Outcome::Completed { returned } => returned.as_ref(),
            _ => None,
        }
    }

    pub fn host_calls(&self) -> impl Iterator<Item = &EventKind> {
        self.events
            .iter()
            .map(|e| &e.kind)
            .filter(|k| matches!(k, EventKind::HostCall { .. }))
    }

    /// Lines written by `Debug.Print`, in order.
    pub fn debug_output(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::DebugPrint { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}
