//! Output of static analysis: the structure of a project and its plausible entry points.

use serde::Serialize;

use crate::ast::{ModuleKind, ProcedureKind, Visibility};
use crate::error::SourcePosition;

/// Procedure names the host application runs on its own when a document is opened, created or
/// closed. Listed in the order entry points are reported.
pub const AUTO_EXEC: &[&str] = &[
    "AutoOpen",
    "AutoExec",
    "AutoNew",
    "AutoClose",
    "Auto_Open",
    "Auto_Close",
    "Document_Open",
    "Document_Close",
    "Document_New",
    "Workbook_Open",
    "Workbook_Activate",
    "Workbook_BeforeClose",
];

/// Position of `name` in [`AUTO_EXEC`], compared case-insensitively.
pub fn auto_exec_rank(name: &str) -> Option<usize> {
    AUTO_EXEC.iter().position(|n| n.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolTable {
    pub modules: Vec<ModuleSymbols>,
    pub entry_points: Vec<EntryPoint>,
}

impl SymbolTable {
    pub fn module(&self, name: &str) -> Option<&ModuleSymbols> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Every procedure of the project with the name of its module.
    pub fn procedures(&self) -> impl Iterator<Item = (&str, &ProcedureSymbol)> {
        self.modules
            .iter()
            .flat_map(|m| m.procedures.iter().map(move |p| (m.name.as_str(), p)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSymbols {
    pub name: String,
    pub kind: ModuleKind,
    pub option_explicit: bool,
    pub variables: Vec<VariableSymbol>,
    pub constants: Vec<ConstantSymbol>,
    pub enums: Vec<EnumSymbol>,
    pub types: Vec<TypeSymbol>,
    pub externals: Vec<ExternalSymbol>,
    pub procedures: Vec<ProcedureSymbol>,
    pub position: SourcePosition,
}

impl ModuleSymbols {
    pub fn procedure(&self, name: &str) -> Option<&ProcedureSymbol> {
        self.procedures
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSymbol {
    pub name: String,
    /// Declared type; the element type for arrays.
    pub ty: String,
    pub visibility: Visibility,
    pub is_array: bool,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantSymbol {
    pub name: String,
    pub visibility: Visibility,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumSymbol {
    pub name: String,
    pub members: Vec<String>,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeSymbol {
    pub name: String,
    pub fields: Vec<VariableSymbol>,
    pub position: SourcePosition,
}

/// A `Declare` statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalSymbol {
    pub name: String,
    pub library: String,
    pub alias: Option<String>,
    pub is_function: bool,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureSymbol {
    pub name: String,
    pub kind: ProcedureKind,
    pub visibility: Visibility,
    pub params: Vec<ParamSymbol>,
    pub locals: Vec<VariableSymbol>,
    pub labels: Vec<String>,
    /// Names called from the body in first-use order: `Foo` or `Object.Member`.
    pub calls: Vec<String>,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSymbol {
    pub name: String,
    pub ty: String,
    pub by_ref: bool,
    pub optional: bool,
    pub param_array: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryReason {
    /// The host runs the procedure by itself, such as `AutoOpen` or `Document_Open`.
    AutoExec,
    /// A public parameterless `Sub` a user could start from the macro dialog.
    PublicSub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    pub module: String,
    pub procedure: String,
    pub reason: EntryReason,
}

impl EntryPoint {
    /// `Module.Procedure`, the form accepted by `VbaRuntime::execute`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.procedure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_exec_names_match_case_insensitively() {
        assert_eq!(auto_exec_rank("autoopen"), Some(0));
        assert_eq!(auto_exec_rank("DOCUMENT_OPEN"), Some(6));
        assert_eq!(auto_exec_rank("Main"), None);
    }
}
