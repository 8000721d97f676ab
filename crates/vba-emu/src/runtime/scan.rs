//! Static mode: walks declarations and procedure bodies without evaluating anything, building the
//! symbol table and rejecting programs that could never compile.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    ArrayDim, Declaration, DeclarationKind, ExitKind, Expr, ExprKind, Module, ModuleKind,
    OnErrorAction, ParamDef, PassingMode, Procedure, ProcedureKind, ResumeTarget, Stmt, StmtChild,
    StmtKind, VarDecl, Visibility,
};
use crate::error::{SourcePosition, VbaError, VbaResult};
use crate::keywords::is_reserved;
use crate::stack::ensure_sufficient_stack;
use crate::symbols::{
    auto_exec_rank, ConstantSymbol, EntryPoint, EntryReason, EnumSymbol, ExternalSymbol,
    ModuleSymbols, ParamSymbol, ProcedureSymbol, SymbolTable, TypeSymbol, VariableSymbol,
};
use crate::visit::{Visitable, Visitor};

use super::VbaProject;

pub(crate) fn scan_project(project: &VbaProject) -> VbaResult<SymbolTable> {
    let mut table = SymbolTable::default();
    for module in project.modules() {
        let mut scanner = SymbolScanner::new(module);
        module.accept(&mut scanner)?;
        table.modules.push(scanner.symbols);
    }
    table.entry_points = entry_points(project);
    log::debug!(
        "static analysis found {} modules and {} entry points",
        table.modules.len(),
        table.entry_points.len()
    );
    Ok(table)
}

fn entry_points(project: &VbaProject) -> Vec<EntryPoint> {
    let mut auto = Vec::new();
    let mut candidates = Vec::new();
    for module in project.modules() {
        for procedure in &module.procedures {
            if procedure.kind.is_property() {
                continue;
            }
            let entry = |reason| EntryPoint {
                module: module.name.clone(),
                procedure: procedure.name.clone(),
                reason,
            };
            if let Some(rank) = auto_exec_rank(&procedure.name) {
                auto.push((rank, entry(EntryReason::AutoExec)));
            } else if module.kind == ModuleKind::Procedural
                && procedure.kind == ProcedureKind::Sub
                && procedure.visibility == Visibility::Public
                && procedure.params.is_empty()
            {
                candidates.push(entry(EntryReason::PublicSub));
            }
        }
    }
    auto.sort_by_key(|(rank, _)| *rank);
    auto.into_iter().map(|(_, e)| e).chain(candidates).collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    For,
    Do,
    While,
}

struct SymbolScanner<'a> {
    module: &'a Module,
    symbols: ModuleSymbols,
    procedure: Option<ProcedureSymbol>,
    proc_kind: ProcedureKind,
    labels: HashSet<String>,
    loops: Vec<LoopKind>,
}

impl<'a> SymbolScanner<'a> {
    fn new(module: &'a Module) -> Self {
        Self {
            module,
            symbols: ModuleSymbols {
                name: module.name.clone(),
                kind: module.kind,
                option_explicit: module.options.explicit,
                variables: Vec::new(),
                constants: Vec::new(),
                enums: Vec::new(),
                types: Vec::new(),
                externals: Vec::new(),
                procedures: Vec::new(),
                position: module.position,
            },
            procedure: None,
            proc_kind: ProcedureKind::Sub,
            labels: HashSet::new(),
            loops: Vec::new(),
        }
    }

    fn check_name(&self, name: &str, position: SourcePosition) -> VbaResult<()> {
        if is_reserved(name) {
            return Err(VbaError::semantic(
                format!("`{name}` is a reserved word and cannot be used as an identifier"),
                position,
            ));
        }
        Ok(())
    }

    fn variable(&self, var: &VarDecl, visibility: Visibility) -> VbaResult<VariableSymbol> {
        self.check_name(&var.name, var.position)?;
        Ok(VariableSymbol {
            name: var.name.clone(),
            ty: var.ty.name(),
            visibility,
            is_array: var.dims.is_some(),
            position: var.position,
        })
    }

    fn dims(&mut self, dims: &'a Option<Vec<ArrayDim>>) -> VbaResult<()> {
        for dim in dims.iter().flatten() {
            if let Some(lower) = &dim.lower {
                lower.accept(self)?;
            }
            dim.upper.accept(self)?;
        }
        Ok(())
    }

    fn params(&mut self, params: &'a [ParamDef]) -> VbaResult<Vec<ParamSymbol>> {
        let mut out = Vec::with_capacity(params.len());
        for param in params {
            self.check_name(&param.name, param.position)?;
            if let Some(default) = &param.default {
                default.accept(self)?;
            }
            out.push(ParamSymbol {
                name: param.name.clone(),
                ty: param.ty.as_ref().map(|t| t.name()).unwrap_or_else(|| "Variant".to_string()),
                by_ref: param.passing == PassingMode::ByRef,
                optional: param.optional,
                param_array: param.param_array,
            });
        }
        Ok(out)
    }

    fn check_label(&self, label: &str, position: SourcePosition) -> VbaResult<()> {
        if self.labels.contains(&label.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(VbaError::semantic(format!("Label not defined: `{label}`"), position))
        }
    }

    fn check_exit(&self, kind: ExitKind, position: SourcePosition) -> VbaResult<()> {
        let ok = match kind {
            ExitKind::Sub => self.proc_kind == ProcedureKind::Sub,
            ExitKind::Function => self.proc_kind == ProcedureKind::Function,
            ExitKind::Property => self.proc_kind.is_property(),
            ExitKind::For => self.loops.contains(&LoopKind::For),
            ExitKind::Do => self.loops.contains(&LoopKind::Do),
        };
        if ok {
            return Ok(());
        }
        let text = match kind {
            ExitKind::Sub => "Exit Sub not allowed in Function or Property",
            ExitKind::Function => "Exit Function not allowed in Sub or Property",
            ExitKind::Property => "Exit Property not allowed in Function or Sub",
            ExitKind::For => "Exit For not within For...Next",
            ExitKind::Do => "Exit Do not within Do...Loop",
        };
        Err(VbaError::semantic(text, position))
    }

    fn record_call(&mut self, name: String) {
        if let Some(procedure) = &mut self.procedure {
            if !procedure.calls.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
                procedure.calls.push(name);
            }
        }
    }

    fn record_local(&mut self, local: VariableSymbol) {
        if let Some(procedure) = &mut self.procedure {
            procedure.locals.push(local);
        }
    }

    fn block(&mut self, body: &'a [Stmt]) -> VbaResult<()> {
        ensure_sufficient_stack(|| {
            for stmt in body {
                stmt.accept(self)?;
            }
            Ok(())
        })
    }

    fn looped(&mut self, kind: LoopKind, stmt: &'a Stmt) -> VbaResult<()> {
        self.loops.push(kind);
        let result = self.children(stmt);
        self.loops.pop();
        result
    }

    fn children(&mut self, stmt: &'a Stmt) -> VbaResult<()> {
        for child in stmt.children() {
            match child {
                StmtChild::Expr(expr) => expr.accept(self)?,
                StmtChild::Block(block) => self.block(block)?,
            }
        }
        Ok(())
    }

    /// Property accessors of one name must agree: `Let`/`Set` take the `Get` parameters plus the
    /// assigned value, under the same names.
    fn check_procedures(&self) -> VbaResult<()> {
        let mut groups: HashMap<String, Vec<&Procedure>> = HashMap::new();
        for procedure in &self.module.procedures {
            groups
                .entry(procedure.name.to_ascii_lowercase())
                .or_default()
                .push(procedure);
        }
        for procedure in &self.module.procedures {
            let group = &groups[&procedure.name.to_ascii_lowercase()];
            let clash = group.iter().find(|other| {
                !std::ptr::eq(**other, procedure)
                    && other.position < procedure.position
                    && (!other.kind.is_property()
                        || !procedure.kind.is_property()
                        || other.kind == procedure.kind)
            });
            if clash.is_some() {
                return Err(VbaError::semantic(
                    format!("Ambiguous name detected: `{}`", procedure.name),
                    procedure.position,
                ));
            }
            if !procedure.kind.is_property_setter() {
                continue;
            }
            let Some(getter) = group.iter().find(|p| p.kind == ProcedureKind::PropertyGet) else {
                continue;
            };
            let agrees = procedure.params.len() == getter.params.len() + 1
                && getter
                    .params
                    .iter()
                    .zip(&procedure.params)
                    .all(|(g, s)| g.name.eq_ignore_ascii_case(&s.name));
            if !agrees {
                return Err(VbaError::semantic(
                    format!(
                        "Definitions of property procedures for the same property are inconsistent: `{}`",
                        procedure.name
                    ),
                    procedure.position,
                ));
            }
        }
        Ok(())
    }
}

fn collect_labels(body: &[Stmt], out: &mut HashSet<String>) {
    for stmt in body {
        if let StmtKind::Label(label) = &stmt.kind {
            out.insert(label.to_ascii_lowercase());
        }
        for child in stmt.children() {
            if let StmtChild::Block(block) = child {
                collect_labels(block, out);
            }
        }
    }
}

fn member_path(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name.clone()),
        ExprKind::Me => Some("Me".to_string()),
        ExprKind::WithMember(member) => Some(format!(".{member}")),
        ExprKind::Member { object, member } => {
            Some(format!("{}.{member}", member_path(object).unwrap_or_default()))
        }
        ExprKind::Call { callee, .. } => member_path(callee),
        _ => None,
    }
}

impl<'a> Visitor<'a> for SymbolScanner<'a> {
    type Output = VbaResult<()>;
    type ExprOutput = VbaResult<()>;

    fn visit_module(&mut self, module: &'a Module) -> VbaResult<()> {
        for decl in &module.declarations {
            decl.accept(self)?;
        }
        for procedure in &module.procedures {
            procedure.accept(self)?;
        }
        self.check_procedures()
    }

    fn visit_declaration(&mut self, decl: &'a Declaration) -> VbaResult<()> {
        match &decl.kind {
            DeclarationKind::Variables {
                visibility, vars, ..
            } => {
                for var in vars {
                    self.dims(&var.dims)?;
                    let symbol = self.variable(var, *visibility)?;
                    self.symbols.variables.push(symbol);
                }
            }
            DeclarationKind::Constants { visibility, consts } => {
                for c in consts {
                    self.check_name(&c.name, c.position)?;
                    c.value.accept(self)?;
                    self.symbols.constants.push(ConstantSymbol {
                        name: c.name.clone(),
                        visibility: *visibility,
                        position: c.position,
                    });
                }
            }
            DeclarationKind::Enum { name, members, .. } => {
                self.check_name(name, decl.position)?;
                for member in members {
                    self.check_name(&member.name, member.position)?;
                    if let Some(value) = &member.value {
                        value.accept(self)?;
                    }
                }
                self.symbols.enums.push(EnumSymbol {
                    name: name.clone(),
                    members: members.iter().map(|m| m.name.clone()).collect(),
                    position: decl.position,
                });
            }
            DeclarationKind::Type {
                visibility,
                name,
                fields,
            } => {
                self.check_name(name, decl.position)?;
                let fields = fields
                    .iter()
                    .map(|f| self.variable(f, *visibility))
                    .collect::<VbaResult<Vec<_>>>()?;
                self.symbols.types.push(TypeSymbol {
                    name: name.clone(),
                    fields,
                    position: decl.position,
                });
            }
            DeclarationKind::External(ext) => {
                self.check_name(&ext.name, decl.position)?;
                self.params(&ext.params)?;
                self.symbols.externals.push(ExternalSymbol {
                    name: ext.name.clone(),
                    library: ext.library.clone(),
                    alias: ext.alias.clone(),
                    is_function: ext.is_function,
                    position: decl.position,
                });
            }
            DeclarationKind::Event { name, params, .. } => {
                self.check_name(name, decl.position)?;
                self.params(params)?;
            }
            DeclarationKind::Option(_) | DeclarationKind::Implements(_) => {}
        }
        Ok(())
    }

    fn visit_procedure(&mut self, procedure: &'a Procedure) -> VbaResult<()> {
        self.check_name(&procedure.name, procedure.position)?;
        let params = self.params(&procedure.params)?;
        self.labels.clear();
        collect_labels(&procedure.body, &mut self.labels);
        self.proc_kind = procedure.kind;
        self.loops.clear();

        let mut labels: Vec<String> = Vec::new();
        collect_label_names(&procedure.body, &mut labels);
        self.procedure = Some(ProcedureSymbol {
            name: procedure.name.clone(),
            kind: procedure.kind,
            visibility: procedure.visibility,
            params,
            locals: Vec::new(),
            labels,
            calls: Vec::new(),
            position: procedure.position,
        });
        let result = self.block(&procedure.body);
        let symbol = self.procedure.take();
        result?;
        if let Some(symbol) = symbol {
            self.symbols.procedures.push(symbol);
        }
        Ok(())
    }

    fn visit_statement(&mut self, stmt: &'a Stmt) -> VbaResult<()> {
        match &stmt.kind {
            StmtKind::Dim { vars, .. } => {
                for var in vars {
                    self.dims(&var.dims)?;
                    let local = self.variable(var, Visibility::Private)?;
                    self.record_local(local);
                }
                Ok(())
            }
            StmtKind::Const(consts) => {
                for c in consts {
                    self.check_name(&c.name, c.position)?;
                    c.value.accept(self)?;
                    self.record_local(VariableSymbol {
                        name: c.name.clone(),
                        ty: c.ty.as_ref().map(|t| t.name()).unwrap_or_else(|| "Variant".to_string()),
                        visibility: Visibility::Private,
                        is_array: false,
                        position: c.position,
                    });
                }
                Ok(())
            }
            StmtKind::Call { target, .. } => {
                if let Some(path) = member_path(target) {
                    self.record_call(path);
                }
                // Only the arguments; the callee itself is recorded above.
                match &target.kind {
                    ExprKind::Call { callee, args } => {
                        self.callee_object(callee)?;
                        for arg in args {
                            arg.value.accept(self)?;
                        }
                        Ok(())
                    }
                    _ => self.callee_object(target),
                }
            }
            StmtKind::GoTo(label) => self.check_label(label, stmt.position),
            StmtKind::OnError(OnErrorAction::GoToLabel(label)) => {
                self.check_label(label, stmt.position)
            }
            StmtKind::Resume(ResumeTarget::Label(label)) => self.check_label(label, stmt.position),
            StmtKind::Exit(kind) => self.check_exit(*kind, stmt.position),
            StmtKind::For { .. } | StmtKind::ForEach { .. } => self.looped(LoopKind::For, stmt),
            StmtKind::DoLoop { .. } => self.looped(LoopKind::Do, stmt),
            StmtKind::While { .. } => self.looped(LoopKind::While, stmt),
            _ => self.children(stmt),
        }
    }

    fn visit_expression(&mut self, expr: &'a Expr) -> VbaResult<()> {
        ensure_sufficient_stack(|| self.scan_expression(expr))
    }
}

impl<'a> SymbolScanner<'a> {
    fn scan_expression(&mut self, expr: &'a Expr) -> VbaResult<()> {
        match &expr.kind {
            ExprKind::Name(name) => self.check_name(name, expr.position),
            ExprKind::Call { callee, args } => {
                if let Some(path) = member_path(callee) {
                    self.record_call(path);
                }
                self.callee_object(callee)?;
                for arg in args {
                    arg.value.accept(self)?;
                }
                Ok(())
            }
            ExprKind::Binary { .. } => {
                let (leftmost, steps) = expr.binary_chain();
                leftmost.accept(self)?;
                for (_, right) in steps {
                    right.accept(self)?;
                }
                Ok(())
            }
            _ => {
                for child in expr.children() {
                    child.accept(self)?;
                }
                Ok(())
            }
        }
    }

    /// Visits what a callee is reached through, without recording the callee again.
    fn callee_object(&mut self, callee: &'a Expr) -> VbaResult<()> {
        match &callee.kind {
            ExprKind::Name(name) => self.check_name(name, callee.position),
            ExprKind::Member { object, .. } | ExprKind::Bang { object, .. } => object.accept(self),
            _ => callee.accept(self),
        }
    }
}

fn collect_label_names(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        if let StmtKind::Label(label) = &stmt.kind {
            out.push(label.clone());
        }
        for child in stmt.children() {
            if let StmtChild::Block(block) = child {
                collect_label_names(block, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn scan(source: &str) -> VbaResult<SymbolTable> {
        scan_project(&VbaProject::new(vec![parse_module(source)?]))
    }

    #[test]
    fn records_locals_labels_and_calls() {
        let table = scan(
            "Attribute VB_Name = \"Module1\"\n\
             Sub Main()\n\
             Dim x As Long\n\
             On Error GoTo Fail\n\
             x = Helper(1)\n\
             Shell \"calc\"\n\
             Exit Sub\n\
             Fail:\n\
             End Sub\n\
             Function Helper(n)\n\
             Helper = n\n\
             End Function\n",
        )
        .unwrap();
        let main = table.modules[0].procedure("Main").unwrap();
        assert_eq!(main.locals[0].name, "x");
        assert_eq!(main.labels, ["Fail"]);
        assert_eq!(main.calls, ["Helper", "Shell"]);
        assert_eq!(table.entry_points.len(), 1);
        assert_eq!(table.entry_points[0].procedure, "Main");
    }

    #[test]
    fn rejects_undefined_labels_and_misplaced_exits() {
        let err = scan("Attribute VB_Name = \"M\"\nSub A()\nGoTo Nowhere\nEnd Sub\n").unwrap_err();
        assert!(matches!(err, VbaError::Semantic { .. }));

        let err = scan("Attribute VB_Name = \"M\"\nSub A()\nExit For\nEnd Sub\n").unwrap_err();
        assert!(err.to_string().contains("Exit For"));

        let err = scan("Attribute VB_Name = \"M\"\nFunction A()\nExit Sub\nEnd Function\n")
            .unwrap_err();
        assert!(err.to_string().contains("Exit Sub"));
    }
}
