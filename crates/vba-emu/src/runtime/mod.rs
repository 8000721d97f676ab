//! The tree-walking interpreter.
//!
//! One parsed [`VbaProject`] is analyzed statically with [`VbaRuntime::analyze`] and executed with
//! [`VbaRuntime::execute`]. Both are passes over the same tree through the [`crate::visit`]
//! contract: static mode never evaluates an expression, dynamic mode runs statements against
//! module state that persists between executions of the same runtime.

mod eval;
mod exec;
mod scan;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ast::{Module, ModuleKind};
use crate::builtins::BuiltinScope;
use crate::environment::{Environment, HostHandle};
use crate::error::VbaResult;
use crate::events::ExecutionReport;
use crate::parser::parse_module;
use crate::sandbox::VbaSandboxPolicy;
use crate::scope::Scope;
use crate::symbols::{EntryPoint, SymbolTable};
use crate::value::VbaValue;

use exec::Executor;

/// The modules of one analyzed document.
#[derive(Debug, Clone, Default)]
pub struct VbaProject {
    modules: Vec<Module>,
}

impl VbaProject {
    pub fn new(modules: Vec<Module>) -> Self {
        Self { modules }
    }

    /// Parses every source as one module, failing on the first lexical or syntax error.
    pub fn parse<'s>(sources: impl IntoIterator<Item = &'s str>) -> VbaResult<Self> {
        let modules = sources
            .into_iter()
            .map(parse_module)
            .collect::<VbaResult<Vec<_>>>()?;
        Ok(Self::new(modules))
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn module_index(&self, name: &str) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn class_index(&self, name: &str) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.kind == ModuleKind::Class && m.name.eq_ignore_ascii_case(name))
    }
}

/// Members of one `Enum`, evaluated.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnumState {
    pub name: String,
    pub members: Vec<(String, VbaValue)>,
}

impl EnumState {
    pub fn member(&self, name: &str) -> Option<&VbaValue> {
        self.members
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Run-time state of one module, kept between executions.
#[derive(Debug, Default)]
pub(crate) struct ModuleState {
    /// Module-level variables and constants. Class modules keep only constants here; their
    /// variables live in each instance.
    pub scope: Scope,
    /// Lowercase names declared `Public` or `Global`.
    pub public: HashSet<String>,
    pub enums: Vec<EnumState>,
    /// `Static` locals, keyed by procedure.
    pub statics: HashMap<String, Scope>,
}

impl ModuleState {
    pub fn enum_member(&self, name: &str) -> Option<VbaValue> {
        self.enums.iter().find_map(|e| e.member(name)).cloned()
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumState> {
        self.enums.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Clears module-level and `Static` slots that still hold a released host object.
    pub fn forget_host(&mut self, handle: HostHandle) {
        self.scope.forget_host(handle);
        for scope in self.statics.values_mut() {
            scope.forget_host(handle);
        }
    }
}

#[derive(Debug, Default)]
struct ProjectState {
    modules: Vec<ModuleState>,
    initialized: bool,
}

/// Interpreter for one project. Module-level variables persist across calls to
/// [`VbaRuntime::execute`], as they do while a document stays open.
pub struct VbaRuntime {
    project: VbaProject,
    builtins: Arc<BuiltinScope>,
    policy: VbaSandboxPolicy,
    state: RefCell<ProjectState>,
}

impl VbaRuntime {
    pub fn new(project: VbaProject) -> Self {
        let modules = project
            .modules()
            .iter()
            .map(|_| ModuleState::default())
            .collect();
        Self {
            project,
            builtins: Arc::new(BuiltinScope::standard()),
            policy: VbaSandboxPolicy::default(),
            state: RefCell::new(ProjectState {
                modules,
                initialized: false,
            }),
        }
    }

    pub fn with_builtins(mut self, builtins: Arc<BuiltinScope>) -> Self {
        self.builtins = builtins;
        self
    }

    pub fn with_sandbox_policy(mut self, policy: VbaSandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn project(&self) -> &VbaProject {
        &self.project
    }

    pub fn policy(&self) -> &VbaSandboxPolicy {
        &self.policy
    }

    /// Static mode: the symbol table, or the first compile-time (`Semantic`) error.
    pub fn analyze(&self) -> VbaResult<SymbolTable> {
        scan::scan_project(&self.project)
    }

    /// Dynamic mode: runs `entry` (`Procedure` or `Module.Procedure`) with `args`.
    ///
    /// Never fails: errors that escape the entry procedure are reported in the outcome, and every
    /// resource the environment handed out is released before this returns.
    pub fn execute(
        &self,
        env: &mut dyn Environment,
        entry: &str,
        args: &[VbaValue],
    ) -> ExecutionReport {
        let mut state = self.state.borrow_mut();
        let ProjectState {
            modules,
            initialized,
        } = &mut *state;
        let mut executor = Executor::new(self, modules, env);
        let outcome = executor.run(entry, args, initialized);
        ExecutionReport {
            outcome,
            events: executor.into_events(),
        }
    }

    /// Runs every entry point found by static analysis, auto-exec procedures first.
    pub fn execute_entry_points(
        &self,
        env: &mut dyn Environment,
    ) -> VbaResult<Vec<(EntryPoint, ExecutionReport)>> {
        let table = self.analyze()?;
        Ok(table
            .entry_points
            .into_iter()
            .map(|entry| {
                let report = self.execute(env, &entry.qualified_name(), &[]);
                (entry, report)
            })
            .collect())
    }
}

/// Standard description of a run-time error number.
pub(crate) fn error_message(number: i32) -> &'static str {
    match number {
        3 => "Return without GoSub",
        5 => "Invalid procedure call or argument",
        6 => "Overflow",
        7 => "Out of memory",
        9 => "Subscript out of range",
        10 => "This array is fixed or temporarily locked",
        11 => "Division by zero",
        13 => "Type mismatch",
        14 => "Out of string space",
        20 => "Resume without error",
        35 => "Sub or Function not defined",
        52 => "Bad file name or number",
        53 => "File not found",
        55 => "File already open",
        91 => "Object variable or With block variable not set",
        92 => "For loop not initialized",
        94 => "Invalid use of Null",
        424 => "Object required",
        429 => "ActiveX component can't create object",
        438 => "Object doesn't support this property or method",
        448 => "Named argument not found",
        449 => "Argument not optional",
        450 => "Wrong number of arguments or invalid property assignment",
        451 => "Object not a collection",
        457 => "This key is already associated with an element of this collection",
        _ => "Application-defined or object-defined error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_lookup_is_case_insensitive() {
        let project = VbaProject::parse([
            "Attribute VB_Name = \"Module1\"\nSub Main()\nEnd Sub\n",
            "VERSION 1.0 CLASS\nBEGIN\n  MultiUse = -1\nEND\nAttribute VB_Name = \"Widget\"\n",
        ])
        .unwrap();
        assert_eq!(project.module_index("MODULE1"), Some(0));
        assert_eq!(project.class_index("widget"), Some(1));
        assert_eq!(project.class_index("Module1"), None);
        assert!(project.module("nope").is_none());
    }

    #[test]
    fn unknown_error_numbers_get_the_generic_description() {
        assert_eq!(error_message(13), "Type mismatch");
        assert_eq!(error_message(1004), "Application-defined or object-defined error");
    }
}
