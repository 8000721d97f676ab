//! Renders a syntax tree back to VBA source.
//!
//! The output is normalized (block `If`, explicit `As` clauses, four-space indentation) and
//! parses back to the same tree, so printing is idempotent after the first pass. Comments and
//! the original layout are not kept.

use crate::ast::{
    ArrayDim, CallArg, CaseCondition, ConstDecl, Declaration, DeclarationKind, ExitKind, Expr,
    ExprKind, ExternalDecl, Literal, LoopCondition, LoopConditionKind, Module, ModuleKind,
    ModuleOption, OnErrorAction, OpenMode, ParamDef, PassingMode, PrintItem, Procedure,
    ProcedureKind, ResumeTarget, Stmt, StmtKind, UnOp, VarDecl, VbaType, Visibility,
};
use crate::keywords::is_reserved;
use crate::stack::ensure_sufficient_stack;
use crate::value::ole_date_to_datetime;
use crate::visit::{Visitable, Visitor};

const INDENT: &str = "    ";

const CLASS_HEADER: &str = "VERSION 1.0 CLASS\nBEGIN\n  MultiUse = -1  'True\nEND\n";

/// Source text of a whole module.
pub fn print_module(module: &Module) -> String {
    let mut printer = SourcePrinter::new();
    module.accept(&mut printer);
    printer.finish()
}

/// Source text of one expression, as it would appear in a statement.
pub fn expression_text(expr: &Expr) -> String {
    expr.accept(&mut SourcePrinter::new())
}

#[derive(Debug, Default)]
pub struct SourcePrinter {
    out: String,
    indent: usize,
}

impl SourcePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, body: &[Stmt]) {
        self.indent += 1;
        ensure_sufficient_stack(|| {
            for stmt in body {
                stmt.accept(self);
            }
        });
        self.indent -= 1;
    }

    fn expr(&mut self, expr: &Expr) -> String {
        ensure_sufficient_stack(|| expr.accept(self))
    }

    fn args(&mut self, args: &[CallArg]) -> String {
        args.iter()
            .map(|arg| {
                let value = self.expr(&arg.value);
                match &arg.name {
                    Some(name) => format!("{}:={value}", name_text(name)),
                    None => value,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn dims(&mut self, dims: &[ArrayDim]) -> String {
        dims.iter()
            .map(|dim| {
                let upper = self.expr(&dim.upper);
                match &dim.lower {
                    Some(lower) => format!("{} To {upper}", self.expr(lower)),
                    None => upper,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn var_decl(&mut self, var: &VarDecl) -> String {
        let mut text = name_text(&var.name);
        if let Some(dims) = &var.dims {
            text.push('(');
            text.push_str(&self.dims(dims));
            text.push(')');
        }
        text.push_str(" As ");
        if var.is_new {
            text.push_str("New ");
        }
        text.push_str(&type_text(&var.ty));
        text
    }

    fn var_list(&mut self, vars: &[VarDecl]) -> String {
        vars.iter()
            .map(|v| self.var_decl(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn const_list(&mut self, consts: &[ConstDecl]) -> String {
        consts
            .iter()
            .map(|c| {
                let value = self.expr(&c.value);
                match &c.ty {
                    Some(ty) => format!("{} As {} = {value}", name_text(&c.name), type_text(ty)),
                    None => format!("{} = {value}", name_text(&c.name)),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn params(&mut self, params: &[ParamDef]) -> String {
        let list = params
            .iter()
            .map(|p| {
                let mut text = String::new();
                if p.optional {
                    text.push_str("Optional ");
                }
                if !p.param_array {
                    text.push_str(match p.passing {
                        PassingMode::ByVal => "ByVal ",
                        PassingMode::ByRef => "ByRef ",
                    });
                }
                if p.param_array {
                    text.push_str("ParamArray ");
                }
                text.push_str(&name_text(&p.name));
                if p.is_array {
                    text.push_str("()");
                }
                if let Some(ty) = &p.ty {
                    text.push_str(" As ");
                    text.push_str(&type_text(ty));
                }
                if let Some(default) = &p.default {
                    text.push_str(" = ");
                    text.push_str(&self.expr(default));
                }
                text
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("({list})")
    }

    fn external(&mut self, decl: &ExternalDecl) -> String {
        let mut text = format!(
            "{} Declare PtrSafe {} {} Lib {}",
            visibility_text(decl.visibility),
            if decl.is_function { "Function" } else { "Sub" },
            name_text(&decl.name),
            string_literal(&decl.library),
        );
        if let Some(alias) = &decl.alias {
            text.push_str(" Alias ");
            text.push_str(&string_literal(alias));
        }
        text.push(' ');
        text.push_str(&self.params(&decl.params));
        if let Some(ty) = &decl.return_type {
            text.push_str(" As ");
            text.push_str(&type_text(ty));
        }
        text
    }

    fn loop_condition(&mut self, keyword: &str, condition: &Option<LoopCondition>) -> String {
        match condition {
            Some(c) => {
                let kind = match c.kind {
                    LoopConditionKind::While => "While",
                    LoopConditionKind::Until => "Until",
                };
                format!("{keyword} {kind} {}", self.expr(&c.expr))
            }
            None => keyword.to_string(),
        }
    }

    fn print_items(&mut self, items: &[PrintItem]) -> String {
        let mut text = String::new();
        for item in items {
            if let Some(expr) = &item.expr {
                text.push_str(&self.expr(expr));
            }
            if let Some(sep) = item.separator {
                text.push(sep);
                text.push(' ');
            }
        }
        text.trim_end().to_string()
    }

    /// A label starts its physical line whatever the indentation.
    fn label(&mut self, label: &str) {
        if label.chars().all(|c| c.is_ascii_digit()) {
            self.out.push_str(label);
        } else {
            self.out.push_str(&name_text(label));
            self.out.push(':');
        }
        self.out.push('\n');
    }

    fn call_statement(&mut self, target: &Expr, explicit: bool) -> String {
        if explicit {
            return format!("Call {}", self.expr(target));
        }
        match &target.kind {
            ExprKind::Call { callee, args } if !args.is_empty() => {
                let callee = self.expr(callee);
                let args = self.args(args);
                format!("{callee} {args}")
            }
            _ => self.expr(target),
        }
    }
}

impl<'ast> Visitor<'ast> for SourcePrinter {
    type Output = ();
    type ExprOutput = String;

    fn visit_module(&mut self, module: &'ast Module) {
        if module.kind == ModuleKind::Class {
            self.out.push_str(CLASS_HEADER);
        }
        let name = Literal::String(module.name.clone());
        self.line(&format!("Attribute VB_Name = {}", literal_text(&name)));
        for attr in &module.attributes {
            if attr.name.eq_ignore_ascii_case("VB_Name") {
                continue;
            }
            let value = self.expr(&attr.value);
            self.line(&format!("Attribute {} = {value}", attr.name));
        }
        for decl in &module.declarations {
            decl.accept(self);
        }
        for procedure in &module.procedures {
            self.out.push('\n');
            procedure.accept(self);
        }
    }

    fn visit_declaration(&mut self, decl: &'ast Declaration) {
        match &decl.kind {
            DeclarationKind::Option(option) => {
                let text = match option {
                    ModuleOption::Explicit => "Option Explicit".to_string(),
                    ModuleOption::Base(base) => format!("Option Base {base}"),
                    ModuleOption::CompareBinary => "Option Compare Binary".to_string(),
                    ModuleOption::CompareText => "Option Compare Text".to_string(),
                    ModuleOption::CompareDatabase => "Option Compare Database".to_string(),
                    ModuleOption::PrivateModule => "Option Private Module".to_string(),
                };
                self.line(&text);
            }
            DeclarationKind::Variables {
                visibility,
                with_events,
                vars,
            } => {
                let vars = self.var_list(vars);
                let with_events = if *with_events { "WithEvents " } else { "" };
                self.line(&format!(
                    "{} {with_events}{vars}",
                    visibility_text(*visibility)
                ));
            }
            DeclarationKind::Constants { visibility, consts } => {
                let consts = self.const_list(consts);
                self.line(&format!("{} Const {consts}", visibility_text(*visibility)));
            }
            DeclarationKind::Enum {
                visibility,
                name,
                members,
            } => {
                self.line(&format!("{} Enum {}", visibility_text(*visibility), name_text(name)));
                self.indent += 1;
                for member in members {
                    let text = match &member.value {
                        Some(value) => format!("{} = {}", name_text(&member.name), self.expr(value)),
                        None => name_text(&member.name),
                    };
                    self.line(&text);
                }
                self.indent -= 1;
                self.line("End Enum");
            }
            DeclarationKind::Type {
                visibility,
                name,
                fields,
            } => {
                self.line(&format!("{} Type {}", visibility_text(*visibility), name_text(name)));
                self.indent += 1;
                for field in fields {
                    let text = self.var_decl(field);
                    self.line(&text);
                }
                self.indent -= 1;
                self.line("End Type");
            }
            DeclarationKind::External(external) => {
                let text = self.external(external);
                self.line(&text);
            }
            DeclarationKind::Implements(name) => {
                self.line(&format!("Implements {}", name_text(name)));
            }
            DeclarationKind::Event {
                visibility,
                name,
                params,
            } => {
                let params = self.params(params);
                self.line(&format!(
                    "{} Event {}{params}",
                    visibility_text(*visibility),
                    name_text(name)
                ));
            }
        }
    }

    fn visit_procedure(&mut self, procedure: &'ast Procedure) {
        let keyword = procedure_keyword(procedure.kind);
        let mut header = visibility_text(procedure.visibility).to_string();
        if procedure.is_static {
            header.push_str(" Static");
        }
        header.push(' ');
        header.push_str(keyword);
        header.push(' ');
        header.push_str(&name_text(&procedure.name));
        header.push_str(&self.params(&procedure.params));
        if let Some(ty) = &procedure.return_type {
            header.push_str(" As ");
            header.push_str(&type_text(ty));
        }
        self.line(&header);
        self.block(&procedure.body);
        let end = match procedure.kind {
            ProcedureKind::Sub => "End Sub",
            ProcedureKind::Function => "End Function",
            _ => "End Property",
        };
        self.line(end);
    }

    fn visit_statement(&mut self, stmt: &'ast Stmt) {
        match &stmt.kind {
            StmtKind::Dim { is_static, vars } => {
                let vars = self.var_list(vars);
                let keyword = if *is_static { "Static" } else { "Dim" };
                self.line(&format!("{keyword} {vars}"));
            }
            StmtKind::ReDim { preserve, targets } => {
                let targets = targets
                    .iter()
                    .map(|t| {
                        let mut text = format!("{}({})", self.expr(&t.target), self.dims(&t.dims));
                        if let Some(ty) = &t.ty {
                            text.push_str(" As ");
                            text.push_str(&type_text(ty));
                        }
                        text
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let preserve = if *preserve { "Preserve " } else { "" };
                self.line(&format!("ReDim {preserve}{targets}"));
            }
            StmtKind::Const(consts) => {
                let consts = self.const_list(consts);
                self.line(&format!("Const {consts}"));
            }
            StmtKind::Assign { target, value } => {
                let text = format!("{} = {}", self.expr(target), self.expr(value));
                self.line(&text);
            }
            StmtKind::Set { target, value } => {
                let text = format!("Set {} = {}", self.expr(target), self.expr(value));
                self.line(&text);
            }
            StmtKind::Call { target, explicit } => {
                let text = self.call_statement(target, *explicit);
                self.line(&text);
            }
            StmtKind::If {
                condition,
                then_body,
                else_ifs,
                else_body,
            } => {
                let text = format!("If {} Then", self.expr(condition));
                self.line(&text);
                self.block(then_body);
                for arm in else_ifs {
                    let text = format!("ElseIf {} Then", self.expr(&arm.condition));
                    self.line(&text);
                    self.block(&arm.body);
                }
                if let Some(body) = else_body {
                    self.line("Else");
                    self.block(body);
                }
                self.line("End If");
            }
            StmtKind::SelectCase {
                selector,
                arms,
                else_body,
            } => {
                let text = format!("Select Case {}", self.expr(selector));
                self.line(&text);
                for arm in arms {
                    let conditions = arm
                        .conditions
                        .iter()
                        .map(|c| match c {
                            CaseCondition::Expr(e) => self.expr(e),
                            CaseCondition::Range { start, end } => {
                                format!("{} To {}", self.expr(start), self.expr(end))
                            }
                            CaseCondition::Is { op, expr } => {
                                format!("Is {} {}", op.symbol(), self.expr(expr))
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.line(&format!("Case {conditions}"));
                    self.block(&arm.body);
                }
                if let Some(body) = else_body {
                    self.line("Case Else");
                    self.block(body);
                }
                self.line("End Select");
            }
            StmtKind::For {
                counter,
                start,
                end,
                step,
                body,
            } => {
                let mut text = format!(
                    "For {} = {} To {}",
                    self.expr(counter),
                    self.expr(start),
                    self.expr(end)
                );
                if let Some(step) = step {
                    text.push_str(" Step ");
                    text.push_str(&self.expr(step));
                }
                self.line(&text);
                self.block(body);
                self.line("Next");
            }
            StmtKind::ForEach {
                element,
                collection,
                body,
            } => {
                let text = format!("For Each {} In {}", self.expr(element), self.expr(collection));
                self.line(&text);
                self.block(body);
                self.line("Next");
            }
            StmtKind::DoLoop {
                pre_condition,
                post_condition,
                body,
            } => {
                let head = self.loop_condition("Do", pre_condition);
                self.line(&head);
                self.block(body);
                let tail = self.loop_condition("Loop", post_condition);
                self.line(&tail);
            }
            StmtKind::While { condition, body } => {
                let text = format!("While {}", self.expr(condition));
                self.line(&text);
                self.block(body);
                self.line("Wend");
            }
            StmtKind::With { object, body } => {
                let text = format!("With {}", self.expr(object));
                self.line(&text);
                self.block(body);
                self.line("End With");
            }
            StmtKind::Label(label) => self.label(label),
            StmtKind::GoTo(label) => self.line(&format!("GoTo {label}")),
            StmtKind::OnError(action) => {
                let text = match action {
                    OnErrorAction::ResumeNext => "On Error Resume Next".to_string(),
                    OnErrorAction::GoToZero => "On Error GoTo 0".to_string(),
                    OnErrorAction::GoToMinusOne => "On Error GoTo -1".to_string(),
                    OnErrorAction::GoToLabel(label) => format!("On Error GoTo {label}"),
                };
                self.line(&text);
            }
            StmtKind::Resume(target) => {
                let text = match target {
                    ResumeTarget::Same => "Resume".to_string(),
                    ResumeTarget::Next => "Resume Next".to_string(),
                    ResumeTarget::Label(label) => format!("Resume {label}"),
                };
                self.line(&text);
            }
            StmtKind::Exit(kind) => self.line(match kind {
                ExitKind::Sub => "Exit Sub",
                ExitKind::Function => "Exit Function",
                ExitKind::Property => "Exit Property",
                ExitKind::For => "Exit For",
                ExitKind::Do => "Exit Do",
            }),
            StmtKind::End => self.line("End"),
            StmtKind::Stop => self.line("Stop"),
            StmtKind::RaiseError(number) => {
                let text = format!("Error {}", self.expr(number));
                self.line(&text);
            }
            StmtKind::Erase(targets) => {
                let targets = targets
                    .iter()
                    .map(|t| self.expr(t))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.line(&format!("Erase {targets}"));
            }
            StmtKind::Open {
                path,
                mode,
                file_number,
            } => {
                let mode = match mode {
                    OpenMode::Input => "Input",
                    OpenMode::Output => "Output",
                    OpenMode::Append => "Append",
                    OpenMode::Binary => "Binary",
                    OpenMode::Random => "Random",
                };
                let text = format!(
                    "Open {} For {mode} As #{}",
                    self.expr(path),
                    self.expr(file_number)
                );
                self.line(&text);
            }
            StmtKind::Close(numbers) => {
                if numbers.is_empty() {
                    self.line("Close");
                } else {
                    let numbers = numbers
                        .iter()
                        .map(|n| format!("#{}", self.expr(n)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.line(&format!("Close {numbers}"));
                }
            }
            StmtKind::Print {
                file_number,
                items,
                write,
            } => {
                let items = self.print_items(items);
                let text = match file_number {
                    Some(number) => {
                        let keyword = if *write { "Write" } else { "Print" };
                        let number = self.expr(number);
                        if items.is_empty() {
                            format!("{keyword} #{number}")
                        } else {
                            format!("{keyword} #{number}, {items}")
                        }
                    }
                    None if items.is_empty() => "Debug.Print".to_string(),
                    None => format!("Debug.Print {items}"),
                };
                self.line(&text);
            }
        }
    }

    fn visit_expression(&mut self, expr: &'ast Expr) -> String {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_text(literal),
            ExprKind::Name(name) => name_text(name),
            ExprKind::Me => "Me".to_string(),
            ExprKind::WithMember(member) => format!(".{member}"),
            ExprKind::Member { object, member } => format!("{}.{member}", self.expr(object)),
            ExprKind::Bang { object, key } => format!("{}!{key}", self.expr(object)),
            ExprKind::Call { callee, args } => {
                let callee = self.expr(callee);
                format!("{callee}({})", self.args(args))
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand);
                match op {
                    UnOp::Neg => format!("-{operand}"),
                    UnOp::Plus => format!("+{operand}"),
                    UnOp::Not => format!("Not {operand}"),
                }
            }
            ExprKind::Binary { .. } => {
                let (leftmost, steps) = expr.binary_chain();
                let mut text = self.expr(leftmost);
                for (op, right) in steps {
                    let right = self.expr(right);
                    text.push(' ');
                    text.push_str(op.symbol());
                    text.push(' ');
                    text.push_str(&right);
                }
                text
            }
            ExprKind::Paren(inner) => format!("({})", self.expr(inner)),
            ExprKind::New(class) => format!("New {class}"),
            ExprKind::TypeOf { operand, type_name } => {
                format!("TypeOf {} Is {type_name}", self.expr(operand))
            }
            ExprKind::AddressOf(name) => format!("AddressOf {name}"),
            ExprKind::Missing => String::new(),
        }
    }
}

fn visibility_text(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "Public",
        Visibility::Private => "Private",
        Visibility::Friend => "Friend",
    }
}

fn procedure_keyword(kind: ProcedureKind) -> &'static str {
    match kind {
        ProcedureKind::Sub => "Sub",
        ProcedureKind::Function => "Function",
        ProcedureKind::PropertyGet => "Property Get",
        ProcedureKind::PropertyLet => "Property Let",
        ProcedureKind::PropertySet => "Property Set",
    }
}

fn type_text(ty: &VbaType) -> String {
    ty.name()
}

/// Identifiers that the lexer would not read back as a plain name are bracketed.
fn name_text(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain && !is_reserved(name) {
        name.to_string()
    } else {
        format!("[{name}]")
    }
}

fn string_literal(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn literal_text(literal: &Literal) -> String {
    match literal {
        Literal::Integer(v) if *v < 0 => format!("&H{:X}", *v as u16),
        Literal::Integer(v) => v.to_string(),
        Literal::Long(v) if *v < 0 => format!("&H{:X}&", *v as u32),
        Literal::Long(v) => format!("{v}&"),
        Literal::LongLong(v) if *v < 0 => format!("&H{:X}^", *v as u64),
        Literal::LongLong(v) => format!("{v}^"),
        Literal::Single(v) => format!("{v}!"),
        Literal::Double(v) => format!("{v}#"),
        Literal::Currency(v) => {
            let (whole, frac) = (v / 10_000, (v % 10_000).abs());
            if frac == 0 {
                format!("{whole}@")
            } else {
                format!("{whole}.{frac:04}@")
            }
        }
        Literal::Date(serial) => date_literal(*serial),
        Literal::String(s) => string_literal(s),
        Literal::Boolean(true) => "True".to_string(),
        Literal::Boolean(false) => "False".to_string(),
        Literal::Empty => "Empty".to_string(),
        Literal::Null => "Null".to_string(),
        Literal::Nothing => "Nothing".to_string(),
    }
}

fn date_literal(serial: f64) -> String {
    match ole_date_to_datetime(serial) {
        Some(dt) if serial.fract() == 0.0 => format!("#{}#", dt.format("%-m/%-d/%Y")),
        Some(dt) => format!("#{}#", dt.format("%-m/%-d/%Y %-H:%M:%S")),
        None => format!("CDate({serial}#)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expression, parse_module};

    const SOURCE: &str = r#"Attribute VB_Name = "Module1"
Option Explicit
Private Const Greeting As String = "Say ""hi"""
Public Enum Color
    Red = 1
    Green
End Enum
Private Type Point
    X As Long
    Y As Long
End Type
Private Declare PtrSafe Function GetTickCount Lib "kernel32" () As Long
Dim counter As Long, names(1 To 3) As String

Sub Main(Optional ByVal n As Integer = 2, ParamArray rest())
    Dim i As Long
    On Error GoTo Fail
    For i = 1 To n Step 1
        If i Mod 2 = 0 Then Debug.Print i; "even" Else Debug.Print i
    Next i
    Select Case n
        Case 1, 2 To 4, Is > 10
            MsgBox "small", vbOKOnly
        Case Else
            Call Helper(n)
    End Select
    Do While counter < 3
        counter = counter + 1
    Loop
    Exit Sub
Fail:
    Resume Next
End Sub
"#;

    #[test]
    fn printing_is_idempotent() {
        let first = print_module(&parse_module(SOURCE).unwrap());
        let second = print_module(&parse_module(&first).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn printed_module_parses_to_the_same_declarations() {
        let module = parse_module(SOURCE).unwrap();
        let reparsed = parse_module(&print_module(&module)).unwrap();
        assert_eq!(module.name, reparsed.name);
        assert_eq!(module.options, reparsed.options);
        assert_eq!(module.declarations.len(), reparsed.declarations.len());
        assert_eq!(module.procedures[0].params, {
            // Positions differ; compare everything else.
            let mut params = reparsed.procedures[0].params.clone();
            for (p, original) in params.iter_mut().zip(&module.procedures[0].params) {
                p.position = original.position;
                if let (Some(d), Some(o)) = (p.default.as_mut(), original.default.as_ref()) {
                    d.position = o.position;
                }
            }
            params
        });
    }

    #[test]
    fn expressions_keep_their_grouping() {
        let expr = parse_expression("(1 + 2) * -x ^ 2 & obj!key").unwrap();
        assert_eq!(expression_text(&expr), "(1 + 2) * -x ^ 2 & obj!key");
        let expr = parse_expression("f(, b:=\"q\"\"\")").unwrap();
        assert_eq!(expression_text(&expr), "f(, b:=\"q\"\"\")");
    }

    #[test]
    fn literals_carry_their_type() {
        assert_eq!(literal_text(&Literal::Long(5)), "5&");
        assert_eq!(literal_text(&Literal::Integer(-1)), "&HFFFF");
        assert_eq!(literal_text(&Literal::Double(1.5)), "1.5#");
        assert_eq!(literal_text(&Literal::Currency(12_3400)), "12.3400@");
        assert_eq!(literal_text(&Literal::Date(45_000.0)), "#3/15/2023#");
        assert_eq!(literal_text(&Literal::Date(45_000.5)), "#3/15/2023 12:00:00#");
    }

    #[test]
    fn reserved_and_odd_names_are_bracketed() {
        assert_eq!(name_text("counter"), "counter");
        assert_eq!(name_text("Dim"), "[Dim]");
        assert_eq!(name_text("my var"), "[my var]");
    }

    #[test]
    fn class_modules_get_their_header() {
        let module = parse_module(
            "VERSION 1.0 CLASS\nBEGIN\n  MultiUse = -1\nEND\nAttribute VB_Name = \"Widget\"\nPrivate m As Long\n",
        )
        .unwrap();
        let text = print_module(&module);
        assert!(text.starts_with("VERSION 1.0 CLASS\n"));
        assert!(text.contains("Attribute VB_Name = \"Widget\"\nPrivate m As Long\n"));
        assert_eq!(parse_module(&text).unwrap().kind, ModuleKind::Class);
    }
}
