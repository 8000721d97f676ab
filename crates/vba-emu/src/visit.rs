//! Double-dispatch traversal over the syntax tree.
//!
//! Every node kind accepts a `Visitor`, which defines one operation per kind. Passes
//! (symbol collection, execution, printing, rewriting) implement the trait; node
//! definitions never change when a pass is added.
//!
//! Statement-level operations return `Output`, expression operations `ExprOutput`,
//! so an evaluator can produce values for expressions and control flow for statements.

use crate::ast::{Declaration, Expr, Module, Procedure, Stmt, StmtChild};

pub trait Visitor<'ast> {
    type Output;
    type ExprOutput;

    fn visit_module(&mut self, module: &'ast Module) -> Self::Output;
    fn visit_declaration(&mut self, decl: &'ast Declaration) -> Self::Output;
    fn visit_procedure(&mut self, procedure: &'ast Procedure) -> Self::Output;
    fn visit_statement(&mut self, stmt: &'ast Stmt) -> Self::Output;
    fn visit_expression(&mut self, expr: &'ast Expr) -> Self::ExprOutput;
}

/// Implemented by every statement-level node.
pub trait Visitable<'ast> {
    fn accept<V: Visitor<'ast>>(&'ast self, visitor: &mut V) -> V::Output;
}

impl<'ast> Visitable<'ast> for Module {
    fn accept<V: Visitor<'ast>>(&'ast self, visitor: &mut V) -> V::Output {
        visitor.visit_module(self)
    }
}

impl<'ast> Visitable<'ast> for Declaration {
    fn accept<V: Visitor<'ast>>(&'ast self, visitor: &mut V) -> V::Output {
        visitor.visit_declaration(self)
    }
}

impl<'ast> Visitable<'ast> for Procedure {
    fn accept<V: Visitor<'ast>>(&'ast self, visitor: &mut V) -> V::Output {
        visitor.visit_procedure(self)
    }
}

impl<'ast> Visitable<'ast> for Stmt {
    fn accept<V: Visitor<'ast>>(&'ast self, visitor: &mut V) -> V::Output {
        visitor.visit_statement(self)
    }
}

impl Expr {
    pub fn accept<'ast, V: Visitor<'ast>>(&'ast self, visitor: &mut V) -> V::ExprOutput {
        visitor.visit_expression(self)
    }
}

// Default recursion for passes that only observe the tree. Each helper visits the
// children of a node in source order.

pub fn walk_module<'ast, V>(visitor: &mut V, module: &'ast Module)
where
    V: Visitor<'ast, Output = (), ExprOutput = ()>,
{
    for attr in &module.attributes {
        attr.value.accept(visitor);
    }
    for decl in &module.declarations {
        decl.accept(visitor);
    }
    for procedure in &module.procedures {
        procedure.accept(visitor);
    }
}

pub fn walk_procedure<'ast, V>(visitor: &mut V, procedure: &'ast Procedure)
where
    V: Visitor<'ast, Output = (), ExprOutput = ()>,
{
    for param in &procedure.params {
        if let Some(default) = &param.default {
            default.accept(visitor);
        }
    }
    for stmt in &procedure.body {
        stmt.accept(visitor);
    }
}

pub fn walk_statement<'ast, V>(visitor: &mut V, stmt: &'ast Stmt)
where
    V: Visitor<'ast, Output = (), ExprOutput = ()>,
{
    for child in stmt.children() {
        match child {
            StmtChild::Expr(expr) => expr.accept(visitor),
            StmtChild::Block(block) => {
                for inner in block {
                    inner.accept(visitor);
                }
            }
        }
    }
}

pub fn walk_expression<'ast, V>(visitor: &mut V, expr: &'ast Expr)
where
    V: Visitor<'ast, Output = (), ExprOutput = ()>,
{
    for child in expr.children() {
        child.accept(visitor);
    }
}
