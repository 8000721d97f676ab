use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A location in the analyzed source text.
///
/// `offset` is the byte offset into the original text, `line` is the 1-based physical line and
/// `column` the 1-based character column. Ordering compares offsets first, which gives the stable
/// ordering used for execution events.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SourcePosition {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(offset: usize, line: u32, column: u32) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One frame of a call-stack snapshot, innermost frame last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackEntry {
    pub module: String,
    pub procedure: String,
    pub position: SourcePosition,
}

impl fmt::Display for StackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.module, self.procedure, self.position)
    }
}

/// Coarse classification of an error by the phase that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Semantic,
    Runtime,
}

/// The budget that ran out when execution was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Budget {
    Steps,
    Time,
    CallDepth,
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Budget::Steps => "step",
            Budget::Time => "time",
            Budget::CallDepth => "call depth",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VbaError {
    #[error("Lexical error at {position}: {message}")]
    Lexical {
        message: String,
        position: SourcePosition,
    },
    #[error("Syntax error at {position}: {message}")]
    Syntax {
        message: String,
        position: SourcePosition,
    },
    #[error("Compile error at {position}: {message}")]
    Semantic {
        message: String,
        position: SourcePosition,
    },
    #[error("Runtime error 424 at {position}: `{name}` is not defined")]
    NameResolution {
        name: String,
        position: SourcePosition,
    },
    #[error("Runtime error 13 at {position}: Type mismatch ({message})")]
    TypeMismatch {
        message: String,
        position: SourcePosition,
    },
    #[error("Runtime error {number} at {position}: {message}")]
    Runtime {
        number: i32,
        message: String,
        position: SourcePosition,
    },
    #[error("Execution exceeded its {budget} budget at {position}")]
    ResourceExhausted {
        budget: Budget,
        position: SourcePosition,
    },
    #[error("Runtime error {number} at {position}: {description}")]
    UserRaised {
        number: i32,
        origin: String,
        description: String,
        position: SourcePosition,
    },
    #[error("Uncaught {error}")]
    Uncaught {
        error: Box<VbaError>,
        call_stack: Vec<StackEntry>,
    },
}

pub type VbaResult<T> = Result<T, VbaError>;

impl VbaError {
    pub fn lexical(message: impl Into<String>, position: SourcePosition) -> Self {
        VbaError::Lexical {
            message: message.into(),
            position,
        }
    }

    pub fn syntax(message: impl Into<String>, position: SourcePosition) -> Self {
        VbaError::Syntax {
            message: message.into(),
            position,
        }
    }

    pub fn semantic(message: impl Into<String>, position: SourcePosition) -> Self {
        VbaError::Semantic {
            message: message.into(),
            position,
        }
    }

    pub fn runtime(number: i32, message: impl Into<String>, position: SourcePosition) -> Self {
        VbaError::Runtime {
            number,
            message: message.into(),
            position,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VbaError::Lexical { .. } => ErrorKind::Lexical,
            VbaError::Syntax { .. } => ErrorKind::Syntax,
            VbaError::Semantic { .. } => ErrorKind::Semantic,
            VbaError::Uncaught { error, .. } => error.kind(),
            _ => ErrorKind::Runtime,
        }
    }

    pub fn position(&self) -> SourcePosition {
        match self {
            VbaError::Lexical { position, .. }
            | VbaError::Syntax { position, .. }
            | VbaError::Semantic { position, .. }
            | VbaError::NameResolution { position, .. }
            | VbaError::TypeMismatch { position, .. }
            | VbaError::Runtime { position, .. }
            | VbaError::ResourceExhausted { position, .. }
            | VbaError::UserRaised { position, .. } => *position,
            VbaError::Uncaught { error, .. } => error.position(),
        }
    }

    /// The value `Err.Number` takes when this error is observed by an `On Error` handler.
    pub fn number(&self) -> i32 {
        match self {
            VbaError::Lexical { .. } | VbaError::Syntax { .. } | VbaError::Semantic { .. } => 2,
            VbaError::NameResolution { .. } => 424,
            VbaError::TypeMismatch { .. } => 13,
            VbaError::Runtime { number, .. } | VbaError::UserRaised { number, .. } => *number,
            VbaError::ResourceExhausted { .. } => 7,
            VbaError::Uncaught { error, .. } => error.number(),
        }
    }

    /// The value `Err.Description` takes when this error is observed by a handler.
    pub fn description(&self) -> String {
        match self {
            VbaError::Lexical { message, .. }
            | VbaError::Syntax { message, .. }
            | VbaError::Semantic { message, .. }
            | VbaError::Runtime { message, .. } => message.clone(),
            VbaError::NameResolution { name, .. } => format!("Object required: `{name}`"),
            VbaError::TypeMismatch { .. } => "Type mismatch".to_string(),
            VbaError::ResourceExhausted { budget, .. } => {
                format!("Execution exceeded its {budget} budget")
            }
            VbaError::UserRaised { description, .. } => description.clone(),
            VbaError::Uncaught { error, .. } => error.description(),
        }
    }

    /// Call-stack snapshot of an uncaught error, innermost frame last.
    pub fn call_stack(&self) -> &[StackEntry] {
        match self {
            VbaError::Uncaught { call_stack, .. } => call_stack,
            _ => &[],
        }
    }

    /// Unwraps an [`VbaError::Uncaught`] wrapper.
    pub fn root(&self) -> &VbaError {
        match self {
            VbaError::Uncaught { error, .. } => error.root(),
            other => other,
        }
    }

    /// Whether an `On Error` handler installed by the analyzed program may intercept this error.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            VbaError::NameResolution { .. }
                | VbaError::TypeMismatch { .. }
                | VbaError::Runtime { .. }
                | VbaError::UserRaised { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncaught_errors_report_the_inner_error() {
        let inner = VbaError::TypeMismatch {
            message: "String to Long".to_string(),
            position: SourcePosition::new(10, 2, 5),
        };
        let err = VbaError::Uncaught {
            error: Box::new(inner.clone()),
            call_stack: vec![StackEntry {
                module: "Module1".to_string(),
                procedure: "Main".to_string(),
                position: SourcePosition::new(10, 2, 5),
            }],
        };

        assert_eq!(err.number(), 13);
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(err.position(), SourcePosition::new(10, 2, 5));
        assert_eq!(err.root(), &inner);
        assert_eq!(err.call_stack().len(), 1);
        assert!(!err.is_catchable());
        assert_eq!(
            err.to_string(),
            "Uncaught Runtime error 13 at 2:5: Type mismatch (String to Long)"
        );
    }

    #[test]
    fn budget_exhaustion_is_never_catchable() {
        let err = VbaError::ResourceExhausted {
            budget: Budget::Steps,
            position: SourcePosition::default(),
        };
        assert!(!err.is_catchable());
        assert_eq!(err.description(), "Execution exceeded its step budget");
    }
}
