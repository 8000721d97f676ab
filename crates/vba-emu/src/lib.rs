//! `vba-emu` analyzes the VBA macros embedded in office documents without running them on a
//! real host.
//!
//! The crate exposes:
//! - A two-pass lexer and a parser that turn module source into a syntax tree ([`ast`]).
//! - A visitor contract ([`visit`]) that every pass over the tree implements.
//! - An interpreter ([`VbaRuntime`]) with a static mode that produces a [`SymbolTable`] and a
//!   dynamic mode that executes procedures under a [`VbaSandboxPolicy`], reporting what the
//!   code did as a stream of [`ExecutionEvent`]s.
//! - An [`Environment`] trait through which every effect (object activation, process launch,
//!   file writes, library calls) is delegated to the embedder.
//! - A printer ([`printer::SourcePrinter`]) that renders a tree back to normalized source.

pub mod ast;
mod builtins;
mod environment;
mod error;
mod events;
mod keywords;
pub mod lexer;
mod object_model;
pub mod operators;
pub mod parser;
pub mod printer;
mod runtime;
mod sandbox;
mod scope;
mod stack;
mod symbols;
pub mod value;
pub mod visit;

pub use crate::builtins::{Builtin, BuiltinScope, Intrinsic, PureFn};
pub use crate::environment::{
    host_object, Environment, HostCall, HostCallKind, HostError, HostHandle, RecordedCall,
    RecordingEnvironment,
};
pub use crate::error::{Budget, ErrorKind, SourcePosition, StackEntry, VbaError, VbaResult};
pub use crate::events::{EventKind, ExecutionEvent, ExecutionReport, Outcome};
pub use crate::keywords::is_reserved;
pub use crate::object_model::{
    ClassInstance, Collection, Dictionary, ErrObject, Record, VbaObject, VbaObjectRef,
};
pub use crate::parser::{parse_expression, parse_module};
pub use crate::printer::{expression_text, print_module, SourcePrinter};
pub use crate::runtime::{VbaProject, VbaRuntime};
pub use crate::sandbox::VbaSandboxPolicy;
pub use crate::symbols::{
    auto_exec_rank, ConstantSymbol, EntryPoint, EntryReason, EnumSymbol, ExternalSymbol,
    ModuleSymbols, ParamSymbol, ProcedureSymbol, SymbolTable, TypeSymbol, VariableSymbol,
    AUTO_EXEC,
};
pub use crate::value::{ValueError, ValueKind, VbaArray, VbaValue};
