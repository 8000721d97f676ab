//! Dynamic mode: statement execution, frames, `On Error` handling and the resource ledger.
//!
//! `GoTo`, `Resume` and error-handler jumps are not real control transfers. Each block runs as a
//! loop over a statement index; jumps travel outward as [`ControlFlow`] values until the block
//! that owns the target label resets its index.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use log::{debug, trace, warn};

use crate::ast::{
    ArrayDim, BinOp, CaseCondition, ConstDecl, Declaration, DeclarationKind, ExitKind, Expr,
    ExprKind, LoopCondition, LoopConditionKind, Module, ModuleKind, OnErrorAction, OpenMode,
    PrintItem, Procedure, ReDimTarget, ResumeTarget, SelectCaseArm, Stmt, StmtKind, VarDecl,
    VbaType, Visibility,
};
use crate::builtins::{BuiltinScope, RndState};
use crate::environment::{Environment, HostCallKind, HostHandle};
use crate::error::{Budget, SourcePosition, StackEntry, VbaError, VbaResult};
use crate::events::{EventKind, ExecutionEvent, Outcome};
use crate::object_model::{ErrObject, Record, VbaObject, VbaObjectRef};
use crate::operators::{self, CompareMode};
use crate::sandbox::VbaSandboxPolicy;
use crate::scope::{Scope, Variable};
use crate::stack::ensure_sufficient_stack;
use crate::value::{coerce_to_type, default_for, ole_date_to_datetime, ValueError, VbaArray, VbaValue};
use crate::visit::{Visitable, Visitor};

use super::eval::Arg;
use super::{error_message, EnumState, ModuleState, VbaProject, VbaRuntime};

/// `Err.Source` of errors raised by the analyzed program itself.
pub(super) const PROJECT_NAME: &str = "VBAProject";

#[derive(Debug, Clone)]
pub(super) enum ErrorMode {
    Default,
    ResumeNext,
    GotoLabel(String),
}

/// Where `Resume` and `Resume Next` continue: statement indices in the block, at nesting `depth`,
/// that owns the handler label.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct ResumeState {
    pc: Option<usize>,
    next_pc: Option<usize>,
    depth: usize,
}

pub(super) struct Frame<'a> {
    pub module: usize,
    pub procedure: Option<&'a Procedure>,
    pub locals: Scope,
    /// `Me` inside class modules.
    pub instance: Option<VbaObjectRef>,
    pub error_mode: ErrorMode,
    pub resume: ResumeState,
    /// An `On Error GoTo` handler is running; a further error leaves the procedure.
    pub handling: bool,
    /// Block nesting of the statement being executed.
    pub depth: usize,
    pub position: SourcePosition,
    /// Lowercase names of `Static` locals.
    pub statics: Vec<String>,
}

impl<'a> Frame<'a> {
    pub fn module_level(module: usize) -> Self {
        Self::new(module, None, Scope::new(), None)
    }

    pub fn new(
        module: usize,
        procedure: Option<&'a Procedure>,
        locals: Scope,
        instance: Option<VbaObjectRef>,
    ) -> Self {
        Self {
            module,
            procedure,
            locals,
            instance,
            error_mode: ErrorMode::Default,
            resume: ResumeState::default(),
            handling: false,
            depth: 0,
            position: procedure.map(|p| p.position).unwrap_or_default(),
            statics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum ControlFlow {
    Continue,
    ExitSub,
    ExitFunction,
    ExitProperty,
    ExitFor,
    ExitDo,
    Goto(String),
    ErrorGoto(String),
    Resume(ResumeKind),
    /// `End` or `Stop`: unwind everything.
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum ResumeKind {
    Next,
    Same,
    Label(String),
}

struct OpenFile {
    handle: Option<HostHandle>,
}

pub(super) struct Executor<'a> {
    pub project: &'a VbaProject,
    pub builtins: &'a BuiltinScope,
    pub policy: &'a VbaSandboxPolicy,
    pub modules: &'a mut [ModuleState],
    pub env: &'a mut dyn Environment,
    pub frame: Frame<'a>,
    /// Suspended callers, outermost first.
    pub callers: Vec<Frame<'a>>,
    pub with_stack: Vec<VbaValue>,
    pub err_obj: VbaObjectRef,
    pub debug_obj: VbaObjectRef,
    pub host_globals: HashMap<String, VbaValue>,
    pub rnd: RndState,
    pub terminated: bool,
    /// Records and class instances under construction, bounding recursive type definitions.
    pub nesting: usize,
    events: Vec<ExecutionEvent>,
    steps: u64,
    start: Instant,
    /// Host handles not yet released, in acquisition order, with what they stand for.
    ledger: Vec<(HostHandle, String)>,
    files: BTreeMap<i32, OpenFile>,
    /// Call stack captured where the error currently propagating was raised.
    raised: Option<Vec<StackEntry>>,
}

impl<'a> Executor<'a> {
    pub fn new(
        runtime: &'a VbaRuntime,
        modules: &'a mut [ModuleState],
        env: &'a mut dyn Environment,
    ) -> Self {
        Self {
            project: &runtime.project,
            builtins: &runtime.builtins,
            policy: &runtime.policy,
            modules,
            env,
            frame: Frame::module_level(0),
            callers: Vec::new(),
            with_stack: Vec::new(),
            err_obj: VbaObjectRef::new(VbaObject::Err(ErrObject::default())),
            debug_obj: VbaObjectRef::new(VbaObject::Debug),
            host_globals: HashMap::new(),
            rnd: RndState::default(),
            terminated: false,
            nesting: 0,
            events: Vec::new(),
            steps: 0,
            start: Instant::now(),
            ledger: Vec::new(),
            files: BTreeMap::new(),
            raised: None,
        }
    }

    pub fn into_events(self) -> Vec<ExecutionEvent> {
        self.events
    }

    pub fn run(&mut self, entry: &str, args: &[VbaValue], initialized: &mut bool) -> Outcome {
        debug!("executing `{entry}`");
        let result = self.start(entry, args, initialized);
        let outcome = match result {
            Ok(_) if self.terminated => Outcome::Terminated,
            Ok(returned) => Outcome::Completed { returned },
            Err(err @ VbaError::ResourceExhausted { .. }) => {
                warn!("execution of `{entry}` cancelled: {err}");
                Outcome::BudgetExhausted(err)
            }
            Err(err) => {
                let call_stack = self.raised.take().unwrap_or_else(|| self.snapshot());
                debug!("execution of `{entry}` ended with an uncaught error: {err}");
                Outcome::Uncaught(VbaError::Uncaught {
                    error: Box::new(err),
                    call_stack,
                })
            }
        };
        self.release_all();
        outcome
    }

    fn start(
        &mut self,
        entry: &str,
        args: &[VbaValue],
        initialized: &mut bool,
    ) -> VbaResult<Option<VbaValue>> {
        if !*initialized {
            self.initialize()?;
            *initialized = true;
        }
        let (module, procedure) = self.resolve_entry(entry)?;
        self.frame = Frame::module_level(module);
        self.frame.position = procedure.position;
        let args = args.iter().cloned().map(Arg::value).collect();
        let value = self.call_procedure(module, procedure, args, None, procedure.position)?;
        Ok(procedure.kind.returns_value().then_some(value))
    }

    fn resolve_entry(&self, entry: &str) -> VbaResult<(usize, &'a Procedure)> {
        let project: &'a VbaProject = self.project;
        let (module_name, name) = match entry.split_once('.') {
            Some((module, name)) => (Some(module), name),
            None => (None, entry),
        };
        project
            .modules()
            .iter()
            .enumerate()
            .filter(|(_, m)| m.kind != ModuleKind::Class)
            .filter(|(_, m)| module_name.map_or(true, |n| m.name.eq_ignore_ascii_case(n)))
            .find_map(|(index, m)| m.procedure(name).map(|p| (index, p)))
            .ok_or_else(|| VbaError::NameResolution {
                name: entry.to_string(),
                position: SourcePosition::default(),
            })
    }

    /// Declares module-level state. Constants and enums may refer to each other across modules,
    /// so they are evaluated until no further declaration resolves.
    fn initialize(&mut self) -> VbaResult<()> {
        let project: &'a VbaProject = self.project;
        let mut pending: Vec<(usize, &'a Declaration)> = project
            .modules()
            .iter()
            .enumerate()
            .flat_map(|(index, module)| {
                module
                    .declarations
                    .iter()
                    .filter(|d| {
                        matches!(
                            d.kind,
                            DeclarationKind::Constants { .. } | DeclarationKind::Enum { .. }
                        )
                    })
                    .map(move |d| (index, d))
            })
            .collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut last_error = None;
            for (index, decl) in pending {
                self.frame = Frame::module_level(index);
                match decl.accept(self) {
                    Ok(_) => {}
                    Err(err @ VbaError::NameResolution { .. }) => {
                        deferred.push((index, decl));
                        last_error = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }
            if deferred.len() == before {
                if let Some(err) = last_error {
                    return Err(err);
                }
            }
            pending = deferred;
        }

        for (index, module) in project.modules().iter().enumerate() {
            self.frame = Frame::module_level(index);
            module.accept(self)?;
        }
        debug!("initialized {} modules", project.modules().len());
        Ok(())
    }

    pub fn emit(&mut self, kind: EventKind) {
        let event = ExecutionEvent {
            sequence: self.events.len() as u64,
            position: self.frame.position,
            procedure: self.procedure_label(),
            kind,
        };
        self.events.push(event);
    }

    pub fn module_name(&self, index: usize) -> &'a str {
        let project: &'a VbaProject = self.project;
        project
            .modules()
            .get(index)
            .map(|m| m.name.as_str())
            .unwrap_or_default()
    }

    fn procedure_label(&self) -> String {
        let module = self.module_name(self.frame.module);
        match self.frame.procedure {
            Some(p) => format!("{module}.{}", p.name),
            None => module.to_string(),
        }
    }

    pub fn current_module(&self) -> &'a Module {
        &self.project.modules()[self.frame.module]
    }

    pub fn compare_mode(&self) -> CompareMode {
        if self.current_module().options.compare_text {
            CompareMode::Text
        } else {
            CompareMode::Binary
        }
    }

    pub fn option_base(&self) -> i32 {
        self.current_module().options.base
    }

    /// Counts one step against the budget; checked at every statement and loop iteration.
    pub fn tick(&mut self, position: SourcePosition) -> VbaResult<()> {
        self.frame.position = position;
        self.steps = self.steps.saturating_add(1);
        if self.steps > self.policy.max_steps {
            return Err(VbaError::ResourceExhausted {
                budget: Budget::Steps,
                position,
            });
        }
        if self.start.elapsed() > self.policy.max_execution_time {
            return Err(VbaError::ResourceExhausted {
                budget: Budget::Time,
                position,
            });
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<StackEntry> {
        self.callers
            .iter()
            .chain(std::iter::once(&self.frame))
            .filter_map(|frame| {
                let procedure = frame.procedure?;
                Some(StackEntry {
                    module: self.module_name(frame.module).to_string(),
                    procedure: procedure.name.clone(),
                    position: frame.position,
                })
            })
            .collect()
    }

    fn note_raised(&mut self, err: &VbaError) {
        if self.raised.is_some() || matches!(err, VbaError::ResourceExhausted { .. }) {
            return;
        }
        self.raised = Some(self.snapshot());
        self.emit(EventKind::ErrorRaised {
            number: err.number(),
            description: err.description(),
        });
    }

    fn set_err(&mut self, err: &VbaError) {
        if let VbaObject::Err(obj) = &mut *self.err_obj.borrow_mut() {
            obj.number = err.number();
            obj.description = err.description();
            obj.source = match err.root() {
                VbaError::UserRaised { origin, .. } => origin.clone(),
                _ => PROJECT_NAME.to_string(),
            };
        }
    }

    pub fn clear_err(&mut self) {
        if let VbaObject::Err(obj) = &mut *self.err_obj.borrow_mut() {
            *obj = ErrObject::default();
        }
    }

    fn handle(&mut self, err: &VbaError, action: String) {
        warn!(
            "runtime error {} handled by `{action}` at {}: {}",
            err.number(),
            err.position(),
            err.description()
        );
        self.set_err(err);
        self.raised = None;
        self.emit(EventKind::ErrorHandled {
            number: err.number(),
            action,
        });
    }

    /// Applies the frame's `On Error` mode. `Ok(None)` continues with the next statement,
    /// `Ok(Some(label))` jumps to the handler, `Err` propagates to the caller.
    fn intercept(&mut self, err: VbaError) -> VbaResult<Option<String>> {
        self.note_raised(&err);
        if !err.is_catchable() || self.frame.handling {
            return Err(err);
        }
        match self.frame.error_mode.clone() {
            ErrorMode::Default => Err(err),
            ErrorMode::ResumeNext => {
                self.handle(&err, "Resume Next".to_string());
                Ok(None)
            }
            ErrorMode::GotoLabel(label) => {
                self.handle(&err, format!("GoTo {label}"));
                self.frame.handling = true;
                Ok(Some(label))
            }
        }
    }

    pub fn exec_block(&mut self, body: &'a [Stmt]) -> VbaResult<ControlFlow> {
        self.frame.depth += 1;
        let result = ensure_sufficient_stack(|| self.run_block(body));
        self.frame.depth -= 1;
        result
    }

    fn run_block(&mut self, body: &'a [Stmt]) -> VbaResult<ControlFlow> {
        let labels = collect_labels(body);
        let mut pc = 0;
        while pc < body.len() {
            let stmt = &body[pc];
            self.tick(stmt.position)?;
            trace!("{} statement at {}", self.procedure_label(), stmt.position);
            if self.policy.trace_statements {
                self.emit(EventKind::StatementEntered);
            }

            let result = stmt.accept(self);
            if self.terminated {
                return Ok(ControlFlow::End);
            }
            let flow = match result {
                Ok(flow) => flow,
                Err(err) => match self.intercept(err)? {
                    None => {
                        pc += 1;
                        continue;
                    }
                    Some(label) => ControlFlow::ErrorGoto(label),
                },
            };

            match flow {
                ControlFlow::Continue => pc += 1,
                ControlFlow::Goto(label) => match labels.get(&label.to_ascii_lowercase()) {
                    Some(&dest) => pc = dest,
                    None => return Ok(ControlFlow::Goto(label)),
                },
                ControlFlow::ErrorGoto(label) => match labels.get(&label.to_ascii_lowercase()) {
                    Some(&dest) => {
                        self.frame.resume = ResumeState {
                            pc: Some(pc),
                            next_pc: Some(pc + 1),
                            depth: self.frame.depth,
                        };
                        pc = dest;
                    }
                    None => return Ok(ControlFlow::ErrorGoto(label)),
                },
                ControlFlow::Resume(kind) => {
                    let target = match &kind {
                        ResumeKind::Label(label) => match labels.get(&label.to_ascii_lowercase()) {
                            Some(&dest) => Some(dest),
                            None => return Ok(ControlFlow::Resume(kind)),
                        },
                        _ if self.frame.resume.depth != self.frame.depth => {
                            return Ok(ControlFlow::Resume(kind));
                        }
                        ResumeKind::Next => self.frame.resume.next_pc,
                        ResumeKind::Same => self.frame.resume.pc,
                    };
                    let Some(target) = target else {
                        return Err(VbaError::runtime(20, error_message(20), stmt.position));
                    };
                    self.clear_err();
                    self.frame.handling = false;
                    self.frame.resume = ResumeState::default();
                    pc = target;
                }
                other => return Ok(other),
            }
        }
        Ok(ControlFlow::Continue)
    }

    pub fn eval_i32(&mut self, expr: &'a Expr) -> VbaResult<i32> {
        let value = self.eval(expr)?;
        value.to_i32().map_err(|e| e.at(expr.position))
    }

    /// Truth of a condition; Null counts as False.
    fn condition(&mut self, expr: &'a Expr) -> VbaResult<bool> {
        let value = self.eval(expr)?;
        truth(&value, expr.position)
    }

    fn loop_condition(&mut self, cond: &'a LoopCondition) -> VbaResult<bool> {
        let value = self.condition(&cond.expr)?;
        Ok(match cond.kind {
            LoopConditionKind::While => value,
            LoopConditionKind::Until => !value,
        })
    }

    fn exec_if(
        &mut self,
        condition: &'a Expr,
        then_body: &'a [Stmt],
        else_ifs: &'a [crate::ast::ElseIf],
        else_body: Option<&'a [Stmt]>,
    ) -> VbaResult<ControlFlow> {
        if self.condition(condition)? {
            return self.exec_block(then_body);
        }
        for arm in else_ifs {
            if self.condition(&arm.condition)? {
                return self.exec_block(&arm.body);
            }
        }
        match else_body {
            Some(body) => self.exec_block(body),
            None => Ok(ControlFlow::Continue),
        }
    }

    fn exec_select(
        &mut self,
        selector: &'a Expr,
        arms: &'a [SelectCaseArm],
        else_body: Option<&'a [Stmt]>,
    ) -> VbaResult<ControlFlow> {
        let selector = self.eval(selector)?;
        for arm in arms {
            for cond in &arm.conditions {
                if self.case_matches(&selector, cond)? {
                    return self.exec_block(&arm.body);
                }
            }
        }
        match else_body {
            Some(body) => self.exec_block(body),
            None => Ok(ControlFlow::Continue),
        }
    }

    fn case_matches(&mut self, selector: &VbaValue, cond: &'a CaseCondition) -> VbaResult<bool> {
        let mode = self.compare_mode();
        match cond {
            CaseCondition::Expr(expr) => {
                let value = self.eval(expr)?;
                let eq = operators::binary(BinOp::Eq, selector, &value, mode)
                    .map_err(|e| e.at(expr.position))?;
                truth(&eq, expr.position)
            }
            CaseCondition::Range { start, end } => {
                let low = self.eval(start)?;
                let high = self.eval(end)?;
                let above = operators::compare(selector, &low, mode)
                    .map_err(|e| e.at(start.position))?;
                let below = operators::compare(selector, &high, mode)
                    .map_err(|e| e.at(end.position))?;
                Ok(above.is_some_and(|o| o.is_ge()) && below.is_some_and(|o| o.is_le()))
            }
            CaseCondition::Is { op, expr } => {
                let value = self.eval(expr)?;
                let result =
                    operators::binary(*op, selector, &value, mode).map_err(|e| e.at(expr.position))?;
                truth(&result, expr.position)
            }
        }
    }

    fn exec_for(
        &mut self,
        position: SourcePosition,
        counter: &'a Expr,
        start: &'a Expr,
        end: &'a Expr,
        step: Option<&'a Expr>,
        body: &'a [Stmt],
    ) -> VbaResult<ControlFlow> {
        let first = self.eval(start)?;
        let last = self.eval(end)?.to_f64().map_err(|e| e.at(end.position))?;
        let step_value = match step {
            Some(expr) => self.eval(expr)?,
            None => VbaValue::Integer(1),
        };
        let increment = step_value.to_f64().map_err(|e| e.at(position))?;
        self.assign_quiet(counter, first, false)?;
        loop {
            let current = self.eval(counter)?;
            let current_f = current.to_f64().map_err(|e| e.at(counter.position))?;
            let done = if increment >= 0.0 {
                current_f > last
            } else {
                current_f < last
            };
            if done {
                break;
            }
            match self.exec_block(body)? {
                ControlFlow::Continue => {}
                ControlFlow::ExitFor => break,
                other => return Ok(other),
            }
            self.tick(position)?;
            let current = self.eval(counter)?;
            let next = operators::binary(BinOp::Add, &current, &step_value, CompareMode::Binary)
                .map_err(|e| e.at(counter.position))?;
            self.assign_quiet(counter, next, false)?;
        }
        Ok(ControlFlow::Continue)
    }

    fn exec_for_each(
        &mut self,
        position: SourcePosition,
        element: &'a Expr,
        collection: &'a Expr,
        body: &'a [Stmt],
    ) -> VbaResult<ControlFlow> {
        let source = self.eval(collection)?;
        let items = self.elements(source, collection.position)?;
        for item in items {
            self.assign_quiet(element, item, false)?;
            match self.exec_block(body)? {
                ControlFlow::Continue => {}
                ControlFlow::ExitFor => break,
                other => return Ok(other),
            }
            self.tick(position)?;
        }
        Ok(ControlFlow::Continue)
    }

    /// Snapshot of what `For Each` visits.
    fn elements(&mut self, source: VbaValue, position: SourcePosition) -> VbaResult<Vec<VbaValue>> {
        match &source {
            VbaValue::Array(arr) => Ok(arr.borrow().values().to_vec()),
            VbaValue::Object(obj) => {
                if let Some(items) = obj.native_elements() {
                    return Ok(items);
                }
                let Some(handle) = obj.host_handle() else {
                    return Err(VbaError::runtime(451, error_message(451), position));
                };
                match self.host_call(HostCallKind::Enumerate, "_NewEnum", Some(handle), Vec::new(), position)? {
                    VbaValue::Array(arr) => Ok(arr.borrow().values().to_vec()),
                    VbaValue::Empty => Ok(Vec::new()),
                    other => Ok(vec![other]),
                }
            }
            VbaValue::Nothing => Err(ValueError::ObjectNotSet.at(position)),
            _ => Err(VbaError::runtime(451, error_message(451), position)),
        }
    }

    fn exec_do(
        &mut self,
        position: SourcePosition,
        pre: Option<&'a LoopCondition>,
        post: Option<&'a LoopCondition>,
        body: &'a [Stmt],
    ) -> VbaResult<ControlFlow> {
        loop {
            if let Some(cond) = pre {
                if !self.loop_condition(cond)? {
                    break;
                }
            }
            match self.exec_block(body)? {
                ControlFlow::Continue => {}
                ControlFlow::ExitDo => break,
                other => return Ok(other),
            }
            if let Some(cond) = post {
                if !self.loop_condition(cond)? {
                    break;
                }
            }
            self.tick(position)?;
        }
        Ok(ControlFlow::Continue)
    }

    fn exec_while(
        &mut self,
        position: SourcePosition,
        condition: &'a Expr,
        body: &'a [Stmt],
    ) -> VbaResult<ControlFlow> {
        while self.condition(condition)? {
            match self.exec_block(body)? {
                ControlFlow::Continue => {}
                other => return Ok(other),
            }
            self.tick(position)?;
        }
        Ok(ControlFlow::Continue)
    }

    fn declare_local(&mut self, var: &'a VarDecl, is_static: bool) -> VbaResult<()> {
        if self.frame.locals.contains(&var.name) {
            return Ok(());
        }
        let variable = self.declare_variable(var)?;
        self.frame.locals.declare(variable);
        if is_static || self.frame.procedure.is_some_and(|p| p.is_static) {
            self.frame.statics.push(var.name.to_ascii_lowercase());
        }
        Ok(())
    }

    /// A fresh variable for `var`: fixed arrays are allocated, records built and `As New`
    /// objects created.
    pub fn declare_variable(&mut self, var: &'a VarDecl) -> VbaResult<Variable> {
        let ty = self.resolve_type(&var.ty);
        let position = var.position;
        match &var.dims {
            None => {
                let value = if var.is_new {
                    self.instantiate(&ty.name(), position)?
                } else {
                    self.default_value(&ty, position)?
                };
                Ok(Variable::new(&var.name, ty, position).with_value(value))
            }
            Some(dims) => {
                let declared = VbaType::Array(Box::new(ty.clone()));
                if dims.is_empty() {
                    return Ok(Variable::new(&var.name, declared, position));
                }
                let bounds = self.eval_bounds(dims)?;
                let mut array = VbaArray::new(bounds, ty.clone())
                    .map_err(|e| e.at(position))?
                    .with_fixed(true);
                if self.record_type(&ty).is_some() {
                    let template = self.default_value(&ty, position)?;
                    array.fill(&template);
                }
                Ok(Variable::new(&var.name, declared, position)
                    .with_value(VbaValue::Array(array.into_ref())))
            }
        }
    }

    /// Enum-typed declarations hold `Long` values.
    pub fn resolve_type(&self, ty: &VbaType) -> VbaType {
        match ty {
            VbaType::Named(name)
                if self.modules.iter().any(|m| m.enum_type(name).is_some()) =>
            {
                VbaType::Long
            }
            other => other.clone(),
        }
    }

    fn record_type(&self, ty: &VbaType) -> Option<(&'a str, &'a [VarDecl])> {
        let VbaType::Named(name) = ty else {
            return None;
        };
        let project: &'a VbaProject = self.project;
        project
            .modules()
            .iter()
            .flat_map(|m| &m.declarations)
            .find_map(|d| match &d.kind {
                DeclarationKind::Type {
                    name: type_name,
                    fields,
                    ..
                } if type_name.eq_ignore_ascii_case(name) => {
                    Some((type_name.as_str(), fields.as_slice()))
                }
                _ => None,
            })
    }

    pub fn default_value(&mut self, ty: &VbaType, position: SourcePosition) -> VbaResult<VbaValue> {
        let Some((type_name, fields)) = self.record_type(ty) else {
            return Ok(default_for(ty));
        };
        self.enter_nested(position)?;
        let mut scope = Scope::new();
        for field in fields {
            match self.declare_variable(field) {
                Ok(var) => scope.declare(var),
                Err(err) => {
                    self.nesting -= 1;
                    return Err(err);
                }
            }
        }
        self.nesting -= 1;
        Ok(VbaValue::Object(VbaObjectRef::new(VbaObject::Record(Record {
            type_name: type_name.to_string(),
            fields: scope,
        }))))
    }

    /// Guards construction of nested records and instances.
    pub fn enter_nested(&mut self, position: SourcePosition) -> VbaResult<()> {
        if self.nesting >= self.policy.max_call_depth {
            return Err(VbaError::ResourceExhausted {
                budget: Budget::CallDepth,
                position,
            });
        }
        self.nesting += 1;
        Ok(())
    }

    fn eval_bounds(&mut self, dims: &'a [ArrayDim]) -> VbaResult<Vec<(i32, i32)>> {
        let base = self.option_base();
        let mut bounds = Vec::with_capacity(dims.len());
        for dim in dims {
            let lower = match &dim.lower {
                Some(expr) => self.eval_i32(expr)?,
                None => base,
            };
            let upper = self.eval_i32(&dim.upper)?;
            bounds.push((lower, upper));
        }
        Ok(bounds)
    }

    fn redim(&mut self, target: &'a ReDimTarget, preserve: bool) -> VbaResult<()> {
        let position = target.target.position;
        let bounds = self.eval_bounds(&target.dims)?;
        let element = target.ty.as_ref().map(|t| self.resolve_type(t));

        let current = match &target.target.kind {
            ExprKind::Name(name) => match self.read_variable(name, position)? {
                Some(value) => value,
                None => {
                    let ty = element.unwrap_or(VbaType::Variant);
                    let array = VbaArray::new(bounds, ty.clone()).map_err(|e| e.at(position))?;
                    let var = Variable::new(name, VbaType::Array(Box::new(ty)), position)
                        .with_value(VbaValue::Array(array.into_ref()));
                    self.frame.locals.declare(var);
                    return Ok(());
                }
            },
            _ => self.eval(&target.target)?,
        };
        match current {
            VbaValue::Array(arr) => arr
                .borrow_mut()
                .redim(bounds, element, preserve)
                .map_err(|e| e.at(position)),
            _ => {
                let array = VbaArray::new(bounds, element.unwrap_or(VbaType::Variant))
                    .map_err(|e| e.at(position))?;
                self.assign_quiet(&target.target, VbaValue::Array(array.into_ref()), false)
            }
        }
    }

    pub fn const_value(&mut self, decl: &'a ConstDecl) -> VbaResult<VbaValue> {
        let value = self.eval(&decl.value)?;
        match &decl.ty {
            Some(ty) => coerce_to_type(value, &self.resolve_type(ty)).map_err(|e| e.at(decl.position)),
            None => Ok(value),
        }
    }

    fn exec_on_error(&mut self, action: &'a OnErrorAction) {
        self.clear_err();
        match action {
            OnErrorAction::ResumeNext => self.frame.error_mode = ErrorMode::ResumeNext,
            OnErrorAction::GoToZero => self.frame.error_mode = ErrorMode::Default,
            OnErrorAction::GoToMinusOne => {
                self.frame.handling = false;
                self.frame.resume = ResumeState::default();
            }
            OnErrorAction::GoToLabel(label) => {
                self.frame.error_mode = ErrorMode::GotoLabel(label.clone());
            }
        }
    }

    fn exec_open(
        &mut self,
        position: SourcePosition,
        path: &'a Expr,
        mode: OpenMode,
        file_number: &'a Expr,
    ) -> VbaResult<()> {
        let path = self.eval(path)?;
        let path = path.to_string_value().map_err(|e| e.at(position))?;
        let number = self.eval_i32(file_number)?;
        if self.files.contains_key(&number) {
            return Err(VbaError::runtime(55, error_message(55), position));
        }
        let mode = match mode {
            OpenMode::Input => "Input",
            OpenMode::Output => "Output",
            OpenMode::Append => "Append",
            OpenMode::Binary => "Binary",
            OpenMode::Random => "Random",
        };
        let args = vec![
            VbaValue::String(path.clone()),
            VbaValue::from(mode),
            VbaValue::Long(number),
        ];
        let file = self.host_call(HostCallKind::FileOpen, "Open", None, args, position)?;
        let handle = file.as_object().and_then(|o| o.host_handle());
        if let Some(handle) = handle {
            if let Some(entry) = self.ledger.iter_mut().find(|(h, _)| *h == handle) {
                entry.1 = path;
            }
        }
        self.files.insert(number, OpenFile { handle });
        Ok(())
    }

    fn close_file(&mut self, number: i32, position: SourcePosition) -> VbaResult<()> {
        let Some(file) = self.files.remove(&number) else {
            return Ok(());
        };
        let result = self.host_call(
            HostCallKind::FileClose,
            "Close",
            file.handle,
            vec![VbaValue::Long(number)],
            position,
        );
        if let Some(handle) = file.handle {
            self.release(handle);
        }
        result.map(|_| ())
    }

    fn print_text(&mut self, items: &'a [PrintItem]) -> VbaResult<String> {
        let mut text = String::new();
        for item in items {
            if let Some(expr) = &item.expr {
                let value = self.eval(expr)?;
                text.push_str(&print_form(&value));
            }
            if item.separator == Some(',') {
                let column = text.chars().count();
                let next_zone = (column / PRINT_ZONE + 1) * PRINT_ZONE;
                text.extend(std::iter::repeat(' ').take(next_zone - column));
            }
        }
        Ok(text)
    }

    fn write_text(&mut self, items: &'a [PrintItem]) -> VbaResult<String> {
        let mut fields = Vec::with_capacity(items.len());
        for item in items {
            if let Some(expr) = &item.expr {
                let value = self.eval(expr)?;
                fields.push(write_form(&value));
            }
        }
        Ok(fields.join(","))
    }

    fn exec_print(
        &mut self,
        position: SourcePosition,
        file_number: Option<&'a Expr>,
        items: &'a [PrintItem],
        write: bool,
    ) -> VbaResult<()> {
        let Some(file_number) = file_number else {
            let text = self.print_text(items)?;
            debug!("Debug.Print {text}");
            self.emit(EventKind::DebugPrint { text });
            return Ok(());
        };
        let number = self.eval_i32(file_number)?;
        let Some(handle) = self.files.get(&number).map(|f| f.handle) else {
            return Err(VbaError::runtime(52, error_message(52), position));
        };
        let mut text = if write {
            self.write_text(items)?
        } else {
            self.print_text(items)?
        };
        let continues = !write && items.last().is_some_and(|i| i.separator.is_some());
        if !continues {
            text.push_str("\r\n");
        }
        let operation = if write { "Write" } else { "Print" };
        self.host_call(HostCallKind::FileWrite, operation, handle, vec![VbaValue::String(text)], position)?;
        Ok(())
    }

    /// Records host handles found in `value` so they are released exactly once.
    pub fn track(&mut self, value: &VbaValue) {
        match value {
            VbaValue::Object(obj) => {
                if let Some(handle) = obj.host_handle() {
                    if !self.ledger.iter().any(|(h, _)| *h == handle) {
                        self.ledger.push((handle, obj.class_name()));
                    }
                }
            }
            VbaValue::Array(arr) => {
                let items = arr.borrow().values().to_vec();
                for item in &items {
                    self.track(item);
                }
            }
            _ => {}
        }
    }

    fn release(&mut self, handle: HostHandle) {
        let Some(index) = self.ledger.iter().position(|(h, _)| *h == handle) else {
            return;
        };
        let (handle, resource) = self.ledger.remove(index);
        self.env.release(handle);
        // Module-level slots outlive the run; a later run must not reach the dead handle.
        for state in self.modules.iter_mut() {
            state.forget_host(handle);
        }
        debug!("released {resource} ({handle:?})");
        self.emit(EventKind::ResourceReleased {
            handle: Some(handle),
            resource,
        });
    }

    /// Whether `handle` was acquired in this run and not released since.
    pub(super) fn is_live(&self, handle: HostHandle) -> bool {
        self.ledger.iter().any(|(h, _)| *h == handle)
    }

    fn release_all(&mut self) {
        self.files.clear();
        self.host_globals.clear();
        let handles: Vec<HostHandle> = self.ledger.iter().map(|(h, _)| *h).collect();
        for handle in handles {
            self.release(handle);
        }
    }

    fn declare_module_variables(&mut self, visibility: Visibility, vars: &'a [VarDecl]) -> VbaResult<()> {
        let index = self.frame.module;
        for var in vars {
            let variable = self.declare_variable(var)?;
            let state = &mut self.modules[index];
            if visibility == Visibility::Public {
                state.public.insert(var.name.to_ascii_lowercase());
            }
            state.scope.declare(variable);
        }
        Ok(())
    }

    fn declare_enum(&mut self, name: &str, members: &'a [crate::ast::EnumMember]) -> VbaResult<()> {
        let index = self.frame.module;
        let state = &mut self.modules[index];
        state.enums.retain(|e| !e.name.eq_ignore_ascii_case(name));
        state.enums.push(EnumState {
            name: name.to_string(),
            members: Vec::new(),
        });
        let slot = state.enums.len() - 1;
        let mut next: i64 = 0;
        for member in members {
            let value = match &member.value {
                Some(expr) => {
                    let value = self.eval(expr)?;
                    value.to_i64().map_err(|e| e.at(member.position))?
                }
                None => next,
            };
            let long = i32::try_from(value).map_err(|_| ValueError::Overflow.at(member.position))?;
            self.modules[index].enums[slot]
                .members
                .push((member.name.clone(), VbaValue::Long(long)));
            next = value + 1;
        }
        Ok(())
    }
}

/// Width of a `Debug.Print` zone selected by `,`.
const PRINT_ZONE: usize = 14;

fn truth(value: &VbaValue, position: SourcePosition) -> VbaResult<bool> {
    Ok(value
        .to_condition()
        .map_err(|e| e.at(position))?
        .unwrap_or(false))
}

fn collect_labels(body: &[Stmt]) -> HashMap<String, usize> {
    body.iter()
        .enumerate()
        .filter_map(|(index, stmt)| match &stmt.kind {
            StmtKind::Label(label) => Some((label.to_ascii_lowercase(), index)),
            _ => None,
        })
        .collect()
}

/// `Print` renders numbers with a leading sign position and a trailing space.
pub(super) fn print_form(value: &VbaValue) -> String {
    match value {
        v if v.kind().is_numeric() => {
            let text = v.display_string();
            if text.starts_with('-') {
                format!("{text} ")
            } else {
                format!(" {text} ")
            }
        }
        VbaValue::Error(number) => format!("Error {number}"),
        other => other.display_string(),
    }
}

fn write_form(value: &VbaValue) -> String {
    match value {
        VbaValue::String(s) => format!("\"{s}\""),
        VbaValue::Boolean(true) => "#TRUE#".to_string(),
        VbaValue::Boolean(false) => "#FALSE#".to_string(),
        VbaValue::Null => "#NULL#".to_string(),
        VbaValue::Empty => String::new(),
        VbaValue::Error(number) => format!("#ERROR {number}#"),
        VbaValue::Date(serial) => match ole_date_to_datetime(*serial) {
            Some(dt) => format!("#{}#", dt.format("%Y-%m-%d %H:%M:%S")),
            None => value.display_string(),
        },
        other => other.display_string(),
    }
}

impl<'a> Visitor<'a> for Executor<'a> {
    type Output = VbaResult<ControlFlow>;
    type ExprOutput = VbaResult<VbaValue>;

    /// Declares the module-level variables of a standard or document module.
    fn visit_module(&mut self, module: &'a Module) -> VbaResult<ControlFlow> {
        if module.kind != ModuleKind::Class {
            for decl in &module.declarations {
                if matches!(decl.kind, DeclarationKind::Variables { .. }) {
                    decl.accept(self)?;
                }
            }
        }
        Ok(ControlFlow::Continue)
    }

    fn visit_declaration(&mut self, decl: &'a Declaration) -> VbaResult<ControlFlow> {
        self.frame.position = decl.position;
        match &decl.kind {
            DeclarationKind::Variables {
                visibility, vars, ..
            } => self.declare_module_variables(*visibility, vars)?,
            DeclarationKind::Constants { visibility, consts } => {
                let index = self.frame.module;
                for c in consts {
                    let value = self.const_value(c)?;
                    let state = &mut self.modules[index];
                    if *visibility == Visibility::Public {
                        state.public.insert(c.name.to_ascii_lowercase());
                    }
                    state
                        .scope
                        .declare(Variable::constant(&c.name, value, c.position));
                }
            }
            DeclarationKind::Enum { name, members, .. } => self.declare_enum(name, members)?,
            _ => {}
        }
        Ok(ControlFlow::Continue)
    }

    fn visit_procedure(&mut self, procedure: &'a Procedure) -> VbaResult<ControlFlow> {
        match self.exec_block(&procedure.body)? {
            ControlFlow::End => Ok(ControlFlow::End),
            ControlFlow::Goto(label) | ControlFlow::ErrorGoto(label) => Err(VbaError::semantic(
                format!("Label not defined: `{label}`"),
                self.frame.position,
            )),
            ControlFlow::Resume(_) => Err(VbaError::runtime(20, error_message(20), self.frame.position)),
            _ => Ok(ControlFlow::Continue),
        }
    }

    fn visit_statement(&mut self, stmt: &'a Stmt) -> VbaResult<ControlFlow> {
        let position = stmt.position;
        match &stmt.kind {
            StmtKind::Dim { is_static, vars } => {
                for var in vars {
                    self.declare_local(var, *is_static)?;
                }
            }
            StmtKind::ReDim { preserve, targets } => {
                for target in targets {
                    self.redim(target, *preserve)?;
                }
            }
            StmtKind::Const(consts) => {
                for c in consts {
                    let value = self.const_value(c)?;
                    self.frame
                        .locals
                        .declare(Variable::constant(&c.name, value, c.position));
                }
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value, false)?;
            }
            StmtKind::Set { target, value: source } => {
                let value = self.eval(source)?;
                if !value.is_object() {
                    return Err(ValueError::ObjectRequired.at(source.position));
                }
                self.assign(target, value, true)?;
            }
            StmtKind::Call { target, .. } => self.call_statement(target)?,
            StmtKind::If {
                condition,
                then_body,
                else_ifs,
                else_body,
            } => return self.exec_if(condition, then_body, else_ifs, else_body.as_deref()),
            StmtKind::SelectCase {
                selector,
                arms,
                else_body,
            } => return self.exec_select(selector, arms, else_body.as_deref()),
            StmtKind::For {
                counter,
                start,
                end,
                step,
                body,
            } => return self.exec_for(position, counter, start, end, step.as_ref(), body),
            StmtKind::ForEach {
                element,
                collection,
                body,
            } => return self.exec_for_each(position, element, collection, body),
            StmtKind::DoLoop {
                pre_condition,
                post_condition,
                body,
            } => {
                return self.exec_do(position, pre_condition.as_ref(), post_condition.as_ref(), body)
            }
            StmtKind::While { condition, body } => return self.exec_while(position, condition, body),
            StmtKind::With { object, body } => {
                let target = self.eval(object)?;
                self.with_stack.push(target);
                let flow = self.exec_block(body);
                self.with_stack.pop();
                return flow;
            }
            StmtKind::Label(_) => {}
            StmtKind::GoTo(label) => return Ok(ControlFlow::Goto(label.clone())),
            StmtKind::OnError(action) => self.exec_on_error(action),
            StmtKind::Resume(target) => {
                if !self.frame.handling {
                    return Err(VbaError::runtime(20, error_message(20), position));
                }
                return Ok(ControlFlow::Resume(match target {
                    ResumeTarget::Next => ResumeKind::Next,
                    ResumeTarget::Same => ResumeKind::Same,
                    ResumeTarget::Label(label) => ResumeKind::Label(label.clone()),
                }));
            }
            StmtKind::Exit(kind) => {
                return Ok(match kind {
                    ExitKind::Sub => ControlFlow::ExitSub,
                    ExitKind::Function => ControlFlow::ExitFunction,
                    ExitKind::Property => ControlFlow::ExitProperty,
                    ExitKind::For => ControlFlow::ExitFor,
                    ExitKind::Do => ControlFlow::ExitDo,
                })
            }
            StmtKind::End | StmtKind::Stop => {
                debug!("`End` at {position}");
                self.terminated = true;
                return Ok(ControlFlow::End);
            }
            StmtKind::RaiseError(expr) => {
                let number = self.eval_i32(expr)?;
                return Err(VbaError::UserRaised {
                    number,
                    origin: PROJECT_NAME.to_string(),
                    description: error_message(number).to_string(),
                    position,
                });
            }
            StmtKind::Erase(targets) => {
                for target in targets {
                    match self.eval(target)? {
                        VbaValue::Array(arr) => arr.borrow_mut().erase(),
                        other => {
                            return Err(ValueError::mismatch(&other, "Array").at(target.position))
                        }
                    }
                }
            }
            StmtKind::Open {
                path,
                mode,
                file_number,
            } => self.exec_open(position, path, *mode, file_number)?,
            StmtKind::Close(numbers) => {
                let numbers = if numbers.is_empty() {
                    self.files.keys().copied().collect()
                } else {
                    let mut out = Vec::with_capacity(numbers.len());
                    for expr in numbers {
                        out.push(self.eval_i32(expr)?);
                    }
                    out
                };
                for number in numbers {
                    self.close_file(number, position)?;
                }
            }
            StmtKind::Print {
                file_number,
                items,
                write,
            } => self.exec_print(position, file_number.as_ref(), items, *write)?,
        }
        Ok(ControlFlow::Continue)
    }

    fn visit_expression(&mut self, expr: &'a Expr) -> VbaResult<VbaValue> {
        self.evaluate(expr)
    }
}
