//! Dynamic mode: expressions, name resolution, assignment and calls.

use chrono::{Local, NaiveDateTime, Timelike};
use log::{debug, warn};

use crate::ast::{
    BinOp, CallArg, DeclarationKind, Expr, ExprKind, ExternalDecl, ModuleKind, PassingMode,
    Procedure, ProcedureKind, VbaType, Visibility,
};
use crate::builtins::{Builtin, Intrinsic};
use crate::environment::{HostCall, HostCallKind, HostHandle};
use crate::error::{Budget, SourcePosition, VbaError, VbaResult};
use crate::events::EventKind;
use crate::object_model::{ClassInstance, Collection, Dictionary, VbaObject, VbaObjectRef};
use crate::operators;
use crate::printer::expression_text;
use crate::scope::{Scope, Variable};
use crate::stack::ensure_sufficient_stack;
use crate::value::{
    coerce_to_type, datetime_to_ole_date, default_for, ValueError, VbaArray, VbaValue,
    MISSING_ARGUMENT,
};
use crate::visit::Visitable;

use super::error_message;
use super::exec::{print_form, Executor, Frame, PROJECT_NAME};

/// Library names that may qualify a built-in, as in `VBA.Shell` or `Strings.Left`.
const LIBRARY_QUALIFIERS: &[&str] = &[
    "vba",
    "strings",
    "interaction",
    "conversion",
    "math",
    "datetime",
    "filesystem",
    "information",
];

/// An argument at a call site. `value` is `None` for an omitted argument; `source` is the
/// argument expression, used to write `ByRef` parameters back.
#[derive(Debug, Clone)]
pub(super) struct Arg<'a> {
    pub name: Option<&'a str>,
    pub value: Option<VbaValue>,
    pub source: Option<&'a Expr>,
}

impl<'a> Arg<'a> {
    pub fn value(value: VbaValue) -> Self {
        Self {
            name: None,
            value: Some(value),
            source: None,
        }
    }
}

/// What a name refers to from the current frame.
#[derive(Debug, Clone)]
pub(super) enum Binding<'a> {
    Local,
    Instance(VbaObjectRef),
    ModuleVar(usize),
    /// Enum members and built-in constants.
    Constant(VbaValue),
    Procedure(usize, &'a Procedure),
    External(&'a ExternalDecl),
    Module(usize),
    /// Module index and enum index, for `EnumName.Member`.
    EnumType(usize, usize),
    Builtin(Builtin),
    HostGlobal,
    Err,
    Debug,
}

impl<'a> Executor<'a> {
    pub fn eval(&mut self, expr: &'a Expr) -> VbaResult<VbaValue> {
        ensure_sufficient_stack(|| expr.accept(self))
    }

    pub fn evaluate(&mut self, expr: &'a Expr) -> VbaResult<VbaValue> {
        let position = expr.position;
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(VbaValue::from_literal(literal)),
            ExprKind::Name(name) => self.call_name(name, &[], position),
            ExprKind::Me => self
                .frame
                .instance
                .clone()
                .map(VbaValue::Object)
                .ok_or_else(|| VbaError::semantic("Invalid use of Me keyword", position)),
            ExprKind::WithMember(member) => {
                let target = self.with_object(position)?;
                self.call_member(target, member, &[], false, position)
            }
            ExprKind::Member { object, member } => {
                self.member_access(object, member, &[], false, position)
            }
            ExprKind::Bang { object, key } => {
                let target = self.eval(object)?;
                let obj = self.object_of(target, position)?;
                self.member_with_values(obj, "", vec![VbaValue::String(key.clone())], false, position)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, false, position),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                let value = self.scalar(value, position)?;
                operators::unary(*op, &value).map_err(|e| e.at(position))
            }
            ExprKind::Binary { .. } => {
                let (leftmost, steps) = expr.binary_chain();
                let mut acc = self.eval(leftmost)?;
                for (op, right) in steps {
                    let r = self.eval(right)?;
                    let (l, r) = if op == BinOp::Is {
                        (acc, r)
                    } else {
                        (self.scalar(acc, leftmost.position)?, self.scalar(r, right.position)?)
                    };
                    // Every node of the run starts where its leftmost operand starts.
                    acc = operators::binary(op, &l, &r, self.compare_mode())
                        .map_err(|e| e.at(position))?;
                }
                Ok(acc)
            }
            ExprKind::Paren(inner) => self.eval(inner),
            ExprKind::New(class) => self.instantiate(class, position),
            ExprKind::TypeOf { operand, type_name } => {
                let value = self.eval(operand)?;
                self.type_of(&value, type_name, position).map(VbaValue::Boolean)
            }
            ExprKind::AddressOf(name) => Ok(VbaValue::Long(pseudo_address(name))),
            ExprKind::Missing => Ok(VbaValue::Error(MISSING_ARGUMENT)),
        }
    }

    /// Replaces a native object by its default member, as operators expect (`Err & ""`).
    fn scalar(&mut self, value: VbaValue, position: SourcePosition) -> VbaResult<VbaValue> {
        if let VbaValue::Object(obj) = &value {
            if matches!(&*obj.borrow(), VbaObject::Err(_)) {
                if let Some(result) = obj.native_member("", &[]) {
                    return result.map_err(|e| e.at(position));
                }
            }
        }
        Ok(value)
    }

    fn type_of(&self, value: &VbaValue, type_name: &str, position: SourcePosition) -> VbaResult<bool> {
        let obj = match value {
            VbaValue::Object(obj) => obj,
            VbaValue::Nothing => return Ok(false),
            _ => return Err(ValueError::ObjectRequired.at(position)),
        };
        if type_name.eq_ignore_ascii_case("Object") {
            return Ok(true);
        }
        let short = type_name.rsplit('.').next().unwrap_or(type_name);
        let class = obj.class_name();
        if class.eq_ignore_ascii_case(type_name) || class.eq_ignore_ascii_case(short) {
            return Ok(true);
        }
        let implements = match &*obj.borrow() {
            VbaObject::Instance(instance) => self
                .project
                .modules()
                .get(instance.class_module)
                .is_some_and(|module| {
                    module.declarations.iter().any(|d| {
                        matches!(&d.kind, DeclarationKind::Implements(name) if name.eq_ignore_ascii_case(short))
                    })
                }),
            _ => false,
        };
        Ok(implements)
    }

    pub fn with_object(&self, position: SourcePosition) -> VbaResult<VbaValue> {
        self.with_stack
            .last()
            .cloned()
            .ok_or_else(|| VbaError::semantic("Invalid or unqualified reference", position))
    }

    fn object_of(&self, value: VbaValue, position: SourcePosition) -> VbaResult<VbaObjectRef> {
        match value {
            VbaValue::Object(obj) => Ok(obj),
            VbaValue::Nothing => Err(ValueError::ObjectNotSet.at(position)),
            _ => Err(ValueError::ObjectRequired.at(position)),
        }
    }

    fn instance_for(&self, module: usize) -> Option<VbaObjectRef> {
        if self.frame.module == module {
            self.frame.instance.clone()
        } else {
            None
        }
    }

    // ---- name resolution ----

    /// Resolves `name`: locals, the current instance, the current module, public members of
    /// other modules, module and enum names, then the built-in scope.
    pub fn lookup(&self, name: &str) -> Option<Binding<'a>> {
        if self.frame.locals.contains(name) {
            return Some(Binding::Local);
        }
        if let Some(instance) = &self.frame.instance {
            if let VbaObject::Instance(inst) = &*instance.borrow() {
                if inst.scope.contains(name) {
                    return Some(Binding::Instance(instance.clone()));
                }
            }
        }
        let current = self.frame.module;
        if let Some(binding) = self.module_binding(current, name, true) {
            return Some(binding);
        }
        for (index, module) in self.project.modules().iter().enumerate() {
            if index == current || module.kind == ModuleKind::Class {
                continue;
            }
            if let Some(binding) = self.module_binding(index, name, false) {
                return Some(binding);
            }
        }
        if let Some(index) = self.project.module_index(name) {
            return Some(Binding::Module(index));
        }
        for (index, state) in self.modules.iter().enumerate() {
            if let Some(e) = state.enums.iter().position(|e| e.name.eq_ignore_ascii_case(name)) {
                return Some(Binding::EnumType(index, e));
            }
        }
        if name.eq_ignore_ascii_case("Err") {
            return Some(Binding::Err);
        }
        if name.eq_ignore_ascii_case("Debug") {
            return Some(Binding::Debug);
        }
        if let Some(value) = self.builtins.constant(name) {
            return Some(Binding::Constant(value));
        }
        if let Some(builtin) = self.builtins.function(name) {
            return Some(Binding::Builtin(builtin));
        }
        if self.builtins.is_host_global(name) {
            return Some(Binding::HostGlobal);
        }
        None
    }

    /// A member of module `index`; `private` admits members visible only inside it.
    fn module_binding(&self, index: usize, name: &str, private: bool) -> Option<Binding<'a>> {
        let project: &'a super::VbaProject = self.project;
        let module = project.modules().get(index)?;
        let state = self.modules.get(index)?;
        if state.scope.contains(name)
            && (private || state.public.contains(&name.to_ascii_lowercase()))
        {
            return Some(Binding::ModuleVar(index));
        }
        if let Some(value) = state.enum_member(name) {
            return Some(Binding::Constant(value));
        }
        if let Some(procedure) = module.procedure(name) {
            if private || procedure.visibility != Visibility::Private {
                return Some(Binding::Procedure(index, procedure));
            }
        }
        module.declarations.iter().find_map(|d| match &d.kind {
            DeclarationKind::External(ext)
                if ext.name.eq_ignore_ascii_case(name)
                    && (private || ext.visibility != Visibility::Private) =>
            {
                Some(Binding::External(ext))
            }
            _ => None,
        })
    }

    fn read_binding(
        &mut self,
        name: &str,
        binding: Binding<'a>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        match binding {
            Binding::Local => Ok(self
                .frame
                .locals
                .get(name)
                .map(|v| v.value.clone())
                .unwrap_or_default()),
            Binding::Instance(obj) => Ok(instance_field(&obj, name).unwrap_or_default()),
            Binding::ModuleVar(index) => Ok(self.modules[index]
                .scope
                .get(name)
                .map(|v| v.value.clone())
                .unwrap_or_default()),
            Binding::Constant(value) => Ok(value),
            Binding::Procedure(module, procedure) => {
                let instance = self.instance_for(module);
                self.call_procedure(module, procedure, Vec::new(), instance, position)
            }
            Binding::External(ext) => self.call_external(ext, Vec::new(), position),
            Binding::Builtin(builtin) => self.call_builtin(name, builtin, Vec::new(), position),
            Binding::HostGlobal => self.host_global(name, position),
            Binding::Err => Ok(VbaValue::Object(self.err_obj.clone())),
            Binding::Debug => Ok(VbaValue::Object(self.debug_obj.clone())),
            Binding::Module(_) | Binding::EnumType(..) => {
                Err(VbaError::runtime(424, error_message(424), position))
            }
        }
    }

    /// Value of a variable named `name`, or `None` when the name is not a variable.
    pub fn read_variable(&mut self, name: &str, position: SourcePosition) -> VbaResult<Option<VbaValue>> {
        match self.lookup(name) {
            Some(
                binding @ (Binding::Local | Binding::Instance(_) | Binding::ModuleVar(_)),
            ) => self.read_binding(name, binding, position).map(Some),
            _ => Ok(None),
        }
    }

    fn is_variable(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Name(name) => matches!(
                self.lookup(name),
                Some(Binding::Local | Binding::Instance(_) | Binding::ModuleVar(_))
            ),
            _ => false,
        }
    }

    // ---- assignment ----

    /// `Let` (copying arrays and records) or `Set` assignment, reported as a `ValueAssigned`
    /// event.
    pub fn assign(&mut self, target: &'a Expr, value: VbaValue, set: bool) -> VbaResult<()> {
        let value = if set { value } else { value.copied() };
        let shown = value.display_string();
        self.assign_quiet(target, value, set)?;
        self.emit(EventKind::ValueAssigned {
            target: expression_text(target),
            value: shown,
        });
        Ok(())
    }

    pub fn assign_quiet(&mut self, target: &'a Expr, value: VbaValue, set: bool) -> VbaResult<()> {
        let position = target.position;
        match &target.kind {
            ExprKind::Name(name) => self.assign_name(name, value, set, position),
            ExprKind::Member { object, member } => {
                if let ExprKind::Name(qualifier) = &object.kind {
                    if let Some(Binding::Module(index)) = self.lookup(qualifier) {
                        return self.assign_module_member(index, member, value, set, position);
                    }
                }
                let owner = self.eval(object)?;
                self.assign_member(owner, member, Vec::new(), value, set, position)
            }
            ExprKind::WithMember(member) => {
                let owner = self.with_object(position)?;
                self.assign_member(owner, member, Vec::new(), value, set, position)
            }
            ExprKind::Bang { object, key } => {
                let owner = self.eval(object)?;
                let key = VbaValue::String(key.clone());
                self.assign_member(owner, "", vec![key], value, set, position)
            }
            ExprKind::Call { callee, args } => self.assign_indexed(callee, args, value, set, position),
            _ => Err(VbaError::semantic("Invalid assignment target", position)),
        }
    }

    fn assign_name(
        &mut self,
        name: &str,
        value: VbaValue,
        set: bool,
        position: SourcePosition,
    ) -> VbaResult<()> {
        match self.lookup(name) {
            Some(Binding::Local) => match self.frame.locals.get_mut(name) {
                Some(var) => store(var, value, set, position),
                None => Ok(()),
            },
            Some(Binding::Instance(obj)) => store_field(&obj, name, value, set, position),
            Some(Binding::ModuleVar(index)) => match self.modules[index].scope.get_mut(name) {
                Some(var) => store(var, value, set, position),
                None => Ok(()),
            },
            binding @ (Some(Binding::Procedure(..)) | None) => {
                let module = self.frame.module;
                if let Some(setter) = self.find_setter(module, name, set) {
                    let instance = self.frame.instance.clone();
                    self.call_procedure(module, setter, vec![Arg::value(value)], instance, position)?;
                    return Ok(());
                }
                if binding.is_some() {
                    return Err(VbaError::semantic(
                        format!("Function call on left-hand side of assignment: `{name}`"),
                        position,
                    ));
                }
                if self.current_module().options.explicit {
                    return Err(VbaError::NameResolution {
                        name: name.to_string(),
                        position,
                    });
                }
                let mut var = Variable::new(name, VbaType::Variant, position);
                store(&mut var, value, set, position)?;
                self.frame.locals.declare(var);
                Ok(())
            }
            Some(_) => Err(VbaError::semantic(
                "Assignment to constant not permitted",
                position,
            )),
        }
    }

    fn assign_module_member(
        &mut self,
        index: usize,
        member: &str,
        value: VbaValue,
        set: bool,
        position: SourcePosition,
    ) -> VbaResult<()> {
        let private = index == self.frame.module;
        match self.module_binding(index, member, private) {
            Some(Binding::ModuleVar(index)) => match self.modules[index].scope.get_mut(member) {
                Some(var) => store(var, value, set, position),
                None => Ok(()),
            },
            _ => match self.find_setter(index, member, set) {
                Some(setter) => self
                    .call_procedure(index, setter, vec![Arg::value(value)], None, position)
                    .map(|_| ()),
                None => Err(VbaError::NameResolution {
                    name: format!("{}.{member}", self.module_name(index)),
                    position,
                }),
            },
        }
    }

    fn assign_indexed(
        &mut self,
        callee: &'a Expr,
        args: &'a [CallArg],
        value: VbaValue,
        set: bool,
        position: SourcePosition,
    ) -> VbaResult<()> {
        let indices = self.eval_values(args)?;
        match &callee.kind {
            ExprKind::Name(name) => {
                if let Some(current) = self.read_variable(name, position)? {
                    return self.assign_element(current, indices, value, set, position);
                }
                let module = self.frame.module;
                match self.find_setter(module, name, set) {
                    Some(setter) => {
                        let mut args: Vec<Arg<'a>> = indices.into_iter().map(Arg::value).collect();
                        args.push(Arg::value(value));
                        let instance = self.frame.instance.clone();
                        self.call_procedure(module, setter, args, instance, position)
                            .map(|_| ())
                    }
                    None => Err(VbaError::NameResolution {
                        name: name.clone(),
                        position,
                    }),
                }
            }
            ExprKind::Member { object, member } => {
                let owner = self.eval(object)?;
                self.assign_member_indexed(owner, member, indices, value, set, position)
            }
            ExprKind::WithMember(member) => {
                let owner = self.with_object(position)?;
                self.assign_member_indexed(owner, member, indices, value, set, position)
            }
            _ => {
                let current = self.eval(callee)?;
                self.assign_element(current, indices, value, set, position)
            }
        }
    }

    /// `owner.member(indices) = value`: an element of an array-valued field, or an indexed
    /// property.
    fn assign_member_indexed(
        &mut self,
        owner: VbaValue,
        member: &str,
        indices: Vec<VbaValue>,
        value: VbaValue,
        set: bool,
        position: SourcePosition,
    ) -> VbaResult<()> {
        let obj = self.object_of(owner, position)?;
        let field = match &*obj.borrow() {
            VbaObject::Record(record) => record.fields.get(member).map(|v| v.value.clone()),
            VbaObject::Instance(inst) => inst.scope.get(member).map(|v| v.value.clone()),
            _ => None,
        };
        let setter = instance_class(&obj).and_then(|m| self.find_setter(m, member, set));
        match field {
            Some(current) if setter.is_none() => {
                self.assign_element(current, indices, value, set, position)
            }
            _ => self.assign_member(VbaValue::Object(obj), member, indices, value, set, position),
        }
    }

    fn assign_element(
        &mut self,
        current: VbaValue,
        indices: Vec<VbaValue>,
        value: VbaValue,
        set: bool,
        position: SourcePosition,
    ) -> VbaResult<()> {
        match current {
            VbaValue::Array(arr) => {
                let indices = to_indices(&indices).map_err(|e| e.at(position))?;
                let result = arr.borrow_mut().set(&indices, value);
                result.map_err(|e| e.at(position))
            }
            VbaValue::Object(_) => self.assign_member(current, "", indices, value, set, position),
            VbaValue::Nothing => Err(ValueError::ObjectNotSet.at(position)),
            other => Err(ValueError::mismatch(&other, "Array").at(position)),
        }
    }

    fn assign_member(
        &mut self,
        owner: VbaValue,
        member: &str,
        args: Vec<VbaValue>,
        value: VbaValue,
        set: bool,
        position: SourcePosition,
    ) -> VbaResult<()> {
        let obj = self.object_of(owner, position)?;
        if let Some(module) = instance_class(&obj) {
            if let Some(setter) = self.find_setter(module, member, set) {
                let mut args: Vec<Arg<'a>> = args.into_iter().map(Arg::value).collect();
                args.push(Arg::value(value));
                self.call_procedure(module, setter, args, Some(obj), position)?;
                return Ok(());
            }
            if self.field_visible(&obj, module, member) && instance_field(&obj, member).is_some() {
                return store_field(&obj, member, value, set, position);
            }
            return Err(unsupported(member, position));
        }
        if let Some(handle) = obj.host_handle() {
            let mut args = args;
            args.push(value);
            self.host_call(HostCallKind::PropertyLet, member, Some(handle), args, position)?;
            return Ok(());
        }
        match obj.set_native_member(member, &args, value) {
            Some(result) => result.map_err(|e| e.at(position)),
            None => Err(unsupported(member, position)),
        }
    }

    /// `Property Set` for `Set` assignments, otherwise `Property Let`; either one as fallback.
    fn find_setter(&self, module: usize, name: &str, set: bool) -> Option<&'a Procedure> {
        let project: &'a super::VbaProject = self.project;
        let procedures = &project.modules().get(module)?.procedures;
        let preferred = if set {
            ProcedureKind::PropertySet
        } else {
            ProcedureKind::PropertyLet
        };
        procedures
            .iter()
            .find(|p| p.kind == preferred && p.name.eq_ignore_ascii_case(name))
            .or_else(|| {
                procedures
                    .iter()
                    .find(|p| p.kind.is_property_setter() && p.name.eq_ignore_ascii_case(name))
            })
    }

    /// Instance fields are public when declared so; code of the same instance sees them all.
    fn field_visible(&self, obj: &VbaObjectRef, module: usize, member: &str) -> bool {
        let inside = self
            .frame
            .instance
            .as_ref()
            .is_some_and(|current| current.ptr_eq(obj));
        inside
            || self
                .modules
                .get(module)
                .is_some_and(|m| m.public.contains(&member.to_ascii_lowercase()))
    }

    // ---- calls ----

    pub fn call_statement(&mut self, target: &'a Expr) -> VbaResult<()> {
        let position = target.position;
        match &target.kind {
            ExprKind::Name(name) => self.call_name(name, &[], position),
            ExprKind::Member { object, member } => {
                self.member_access(object, member, &[], true, position)
            }
            ExprKind::WithMember(member) => {
                let owner = self.with_object(position)?;
                self.call_member(owner, member, &[], true, position)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, true, position),
            _ => self.eval(target),
        }?;
        Ok(())
    }

    fn eval_call(
        &mut self,
        callee: &'a Expr,
        args: &'a [CallArg],
        statement: bool,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        match &callee.kind {
            ExprKind::Name(name) => self.call_name(name, args, position),
            ExprKind::Member { object, member } => {
                self.member_access(object, member, args, statement, position)
            }
            ExprKind::WithMember(member) => {
                let owner = self.with_object(position)?;
                self.call_member(owner, member, args, statement, position)
            }
            _ => {
                let target = self.eval(callee)?;
                let values = self.eval_values(args)?;
                self.index_value(target, values, position)
            }
        }
    }

    /// Reads, calls or indexes `name`.
    fn call_name(
        &mut self,
        name: &str,
        args: &'a [CallArg],
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        // Inside a function `Name(args)` recurses, while a bare `Name` reads the return slot.
        if !args.is_empty() {
            if let Some(current) = self.frame.procedure {
                if current.kind.returns_value() && current.name.eq_ignore_ascii_case(name) {
                    let module = self.frame.module;
                    let instance = self.frame.instance.clone();
                    let args = self.eval_args(args)?;
                    return self.call_procedure(module, current, args, instance, position);
                }
            }
        }
        let Some(binding) = self.lookup(name) else {
            return Err(VbaError::NameResolution {
                name: name.to_string(),
                position,
            });
        };
        match binding {
            Binding::Procedure(module, procedure) => {
                let instance = self.instance_for(module);
                let args = self.eval_args(args)?;
                self.call_procedure(module, procedure, args, instance, position)
            }
            Binding::External(ext) => {
                let values = self.eval_values(args)?;
                self.call_external(ext, values, position)
            }
            Binding::Builtin(builtin) => {
                let values = self.eval_values(args)?;
                self.call_builtin(name, builtin, values, position)
            }
            binding => {
                let target = self.read_binding(name, binding, position)?;
                let values = self.eval_values(args)?;
                self.index_value(target, values, position)
            }
        }
    }

    /// `object.member(args)`, where `object` may name a module, an enum or a library.
    fn member_access(
        &mut self,
        object: &'a Expr,
        member: &str,
        args: &'a [CallArg],
        statement: bool,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        if let ExprKind::Name(qualifier) = &object.kind {
            match self.lookup(qualifier) {
                Some(Binding::Module(index)) => {
                    return self.module_member(index, member, args, position)
                }
                Some(Binding::EnumType(module, index)) => {
                    return self.modules[module].enums[index]
                        .member(member)
                        .cloned()
                        .ok_or_else(|| VbaError::NameResolution {
                            name: format!("{qualifier}.{member}"),
                            position,
                        })
                }
                None if LIBRARY_QUALIFIERS.contains(&qualifier.to_ascii_lowercase().as_str()) => {
                    return self.call_name(member, args, position)
                }
                _ => {}
            }
        }
        let target = self.eval(object)?;
        self.call_member(target, member, args, statement, position)
    }

    fn module_member(
        &mut self,
        index: usize,
        member: &str,
        args: &'a [CallArg],
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        let private = index == self.frame.module;
        match self.module_binding(index, member, private) {
            Some(Binding::Procedure(module, procedure)) => {
                let instance = self.instance_for(module);
                let args = self.eval_args(args)?;
                self.call_procedure(module, procedure, args, instance, position)
            }
            Some(Binding::External(ext)) => {
                let values = self.eval_values(args)?;
                self.call_external(ext, values, position)
            }
            Some(binding) => {
                let target = self.read_binding(member, binding, position)?;
                let values = self.eval_values(args)?;
                self.index_value(target, values, position)
            }
            None => Err(VbaError::NameResolution {
                name: format!("{}.{member}", self.module_name(index)),
                position,
            }),
        }
    }

    fn call_member(
        &mut self,
        target: VbaValue,
        member: &str,
        args: &'a [CallArg],
        statement: bool,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        let obj = self.object_of(target, position)?;
        if let Some(module) = instance_class(&obj) {
            let args = self.eval_args(args)?;
            return self.instance_member(obj, module, member, args, position);
        }
        let is_err = matches!(&*obj.borrow(), VbaObject::Err(_));
        if is_err && member.eq_ignore_ascii_case("Raise") {
            let args = self.eval_args(args)?;
            return Err(user_error(&args, position));
        }
        let values = self.eval_values(args)?;
        self.object_member(obj, member, values, statement, position)
    }

    fn member_with_values(
        &mut self,
        obj: VbaObjectRef,
        member: &str,
        values: Vec<VbaValue>,
        statement: bool,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        match instance_class(&obj) {
            Some(module) => {
                let args = values.into_iter().map(Arg::value).collect();
                self.instance_member(obj, module, member, args, position)
            }
            None => self.object_member(obj, member, values, statement, position),
        }
    }

    fn instance_member(
        &mut self,
        obj: VbaObjectRef,
        module: usize,
        member: &str,
        args: Vec<Arg<'a>>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        let project: &'a super::VbaProject = self.project;
        let inside = self
            .frame
            .instance
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&obj));
        let procedure = project
            .modules()
            .get(module)
            .and_then(|m| m.procedure(member))
            .filter(|p| inside || p.visibility != Visibility::Private);
        if let Some(procedure) = procedure {
            return self.call_procedure(module, procedure, args, Some(obj), position);
        }
        match instance_field(&obj, member) {
            Some(value) if self.field_visible(&obj, module, member) => {
                let values = args
                    .into_iter()
                    .map(|a| a.value.unwrap_or(VbaValue::Error(MISSING_ARGUMENT)))
                    .collect();
                self.index_value(value, values, position)
            }
            _ => Err(unsupported(member, position)),
        }
    }

    /// Members of native and host objects.
    fn object_member(
        &mut self,
        obj: VbaObjectRef,
        member: &str,
        values: Vec<VbaValue>,
        statement: bool,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        if let Some(handle) = obj.host_handle() {
            let kind = if statement || !values.is_empty() {
                HostCallKind::Method
            } else {
                HostCallKind::PropertyGet
            };
            return self.host_call(kind, member, Some(handle), values, position);
        }
        let is_debug = matches!(&*obj.borrow(), VbaObject::Debug);
        if is_debug {
            return match member.to_ascii_lowercase().as_str() {
                "print" => {
                    let text: String = values.iter().map(print_form).collect();
                    self.emit(EventKind::DebugPrint { text });
                    Ok(VbaValue::Empty)
                }
                "assert" => Ok(VbaValue::Empty),
                _ => Err(unsupported(member, position)),
            };
        }
        match obj.native_member(member, &values) {
            Some(result) => result.map_err(|e| e.at(position)),
            // `obj.Items(0)`: read the member, then index what it returned.
            None if !values.is_empty() => match obj.native_member(member, &[]) {
                Some(Ok(inner)) => self.index_value(inner, values, position),
                Some(Err(err)) => Err(err.at(position)),
                None => Err(unsupported(member, position)),
            },
            None => Err(unsupported(member, position)),
        }
    }

    /// Applies `values` as indices; an object is indexed through its default member.
    fn index_value(
        &mut self,
        target: VbaValue,
        values: Vec<VbaValue>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        if values.is_empty() {
            return Ok(target);
        }
        match target {
            VbaValue::Array(arr) => {
                let indices = to_indices(&values).map_err(|e| e.at(position))?;
                let value = arr.borrow().get(&indices).cloned();
                value.map_err(|e| e.at(position))
            }
            VbaValue::Object(obj) => self.member_with_values(obj, "", values, false, position),
            VbaValue::Nothing => Err(ValueError::ObjectNotSet.at(position)),
            other => Err(ValueError::mismatch(&other, "Array").at(position)),
        }
    }

    fn eval_args(&mut self, args: &'a [CallArg]) -> VbaResult<Vec<Arg<'a>>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            let value = match arg.value.kind {
                ExprKind::Missing => None,
                _ => Some(self.eval(&arg.value)?),
            };
            out.push(Arg {
                name: arg.name.as_deref(),
                value,
                source: Some(&arg.value),
            });
        }
        Ok(out)
    }

    fn eval_values(&mut self, args: &'a [CallArg]) -> VbaResult<Vec<VbaValue>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(&arg.value)?);
        }
        Ok(out)
    }

    /// Calls a user procedure: binds arguments, runs the body in a fresh frame and writes
    /// `ByRef` arguments back to the caller's variables.
    pub fn call_procedure(
        &mut self,
        module: usize,
        procedure: &'a Procedure,
        args: Vec<Arg<'a>>,
        instance: Option<VbaObjectRef>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        if self.terminated {
            return Ok(VbaValue::Empty);
        }
        if self.callers.len() >= self.policy.max_call_depth {
            return Err(VbaError::ResourceExhausted {
                budget: Budget::CallDepth,
                position,
            });
        }
        let (mut locals, write_backs) = self.bind_arguments(procedure, args, position)?;
        let shown: Vec<String> = procedure
            .params
            .iter()
            .filter_map(|p| locals.get(&p.name))
            .map(|v| v.value.display_string())
            .collect();
        if procedure.kind.returns_value() {
            let ty = procedure
                .return_type
                .as_ref()
                .map(|t| self.resolve_type(t))
                .unwrap_or(VbaType::Variant);
            let value = self.default_value(&ty, position)?;
            locals.declare(Variable::new(&procedure.name, ty, procedure.position).with_value(value));
        }
        let key = static_key(procedure);
        let mut statics = Vec::new();
        if let Some(saved) = self.modules[module].statics.get(&key) {
            for var in saved.iter() {
                statics.push(var.name.to_ascii_lowercase());
                locals.declare(var.clone());
            }
        }

        let mut frame = Frame::new(module, Some(procedure), locals, instance);
        frame.statics = statics;
        let caller = std::mem::replace(&mut self.frame, frame);
        self.callers.push(caller);
        debug!("entering {}.{}", self.module_name(module), procedure.name);
        self.emit(EventKind::ProcedureEntered { args: shown });

        let result = procedure.accept(self);

        self.emit(EventKind::ProcedureExited);
        let caller = self
            .callers
            .pop()
            .unwrap_or_else(|| Frame::module_level(module));
        let finished = std::mem::replace(&mut self.frame, caller);

        if !finished.statics.is_empty() {
            let mut saved = Scope::new();
            for name in &finished.statics {
                if let Some(var) = finished.locals.get(name) {
                    saved.declare(var.clone());
                }
            }
            self.modules[module].statics.insert(key, saved);
        }
        result?;
        if finished.handling {
            self.clear_err();
        }
        for (param, target) in write_backs {
            if let Some(var) = finished.locals.get(param) {
                let value = var.value.clone();
                self.assign_quiet(target, value, false)?;
            }
        }
        Ok(if procedure.kind.returns_value() {
            finished
                .locals
                .get(&procedure.name)
                .map(|v| v.value.clone())
                .unwrap_or_default()
        } else {
            VbaValue::Empty
        })
    }

    /// Matches call-site arguments to parameters. Returns the callee's initial locals and the
    /// `ByRef` parameters to copy back to caller variables.
    #[allow(clippy::type_complexity)]
    fn bind_arguments(
        &mut self,
        procedure: &'a Procedure,
        args: Vec<Arg<'a>>,
        position: SourcePosition,
    ) -> VbaResult<(Scope, Vec<(&'a str, &'a Expr)>)> {
        let params = &procedure.params;
        let fixed = params.iter().take_while(|p| !p.param_array).count();
        let mut slots: Vec<Option<Arg<'a>>> = vec![None; fixed];
        let mut rest = Vec::new();
        let mut positional = 0;
        for arg in args {
            if let Some(name) = arg.name {
                let Some(index) = params[..fixed]
                    .iter()
                    .position(|p| p.name.eq_ignore_ascii_case(name))
                else {
                    return Err(VbaError::runtime(448, error_message(448), position));
                };
                slots[index] = Some(arg);
                continue;
            }
            if positional < fixed {
                slots[positional] = Some(arg);
            } else if fixed < params.len() {
                rest.push(arg.value.unwrap_or(VbaValue::Error(MISSING_ARGUMENT)));
            } else {
                return Err(VbaError::runtime(450, error_message(450), position));
            }
            positional += 1;
        }

        let mut locals = Scope::new();
        let mut write_backs = Vec::new();
        for (param, slot) in params.iter().zip(slots) {
            let declared = {
                let ty = param
                    .ty
                    .as_ref()
                    .map(|t| self.resolve_type(t))
                    .unwrap_or(VbaType::Variant);
                if param.is_array {
                    VbaType::Array(Box::new(ty))
                } else {
                    ty
                }
            };
            let provided = slot.and_then(|arg| arg.value.map(|value| (value, arg.source)));
            let value = match provided {
                Some((value, source)) => match param.passing {
                    PassingMode::ByVal => value.copied(),
                    PassingMode::ByRef => {
                        if let Some(expr) = source.filter(|e| self.is_variable(e)) {
                            write_backs.push((param.name.as_str(), expr));
                        }
                        value
                    }
                },
                None if param.optional => match &param.default {
                    Some(expr) => self.eval(expr)?,
                    None if declared == VbaType::Variant => VbaValue::Error(MISSING_ARGUMENT),
                    None => default_for(&declared),
                },
                None => return Err(VbaError::runtime(449, error_message(449), position)),
            };
            let mut var = Variable::new(&param.name, declared, param.position);
            var.assign(value).map_err(|e| e.at(position))?;
            locals.declare(var);
        }
        if let Some(param) = params.get(fixed) {
            let array = VbaArray::from_values(0, rest).into_ref();
            locals.declare(
                Variable::new(&param.name, VbaType::Array(Box::new(VbaType::Variant)), param.position)
                    .with_value(VbaValue::Array(array)),
            );
        }
        Ok((locals, write_backs))
    }

    // ---- objects ----

    /// `New class`: native collections, class modules, otherwise a host object.
    pub fn instantiate(&mut self, class: &str, position: SourcePosition) -> VbaResult<VbaValue> {
        if let Some(native) = native_object(class) {
            return Ok(native);
        }
        match self.project.class_index(class) {
            Some(module) => self.new_instance(module, position),
            None => self.host_call(
                HostCallKind::CreateObject,
                "New",
                None,
                vec![VbaValue::from(class)],
                position,
            ),
        }
    }

    fn new_instance(&mut self, module: usize, position: SourcePosition) -> VbaResult<VbaValue> {
        let project: &'a super::VbaProject = self.project;
        let Some(class) = project.modules().get(module) else {
            return Err(VbaError::runtime(429, error_message(429), position));
        };
        self.enter_nested(position)?;
        // Field initializers run in the class module's own context.
        let saved = std::mem::replace(&mut self.frame, Frame::module_level(module));
        let mut scope = Scope::new();
        let mut result = Ok(());
        for decl in &class.declarations {
            let DeclarationKind::Variables {
                visibility, vars, ..
            } = &decl.kind
            else {
                continue;
            };
            for var in vars {
                if *visibility == Visibility::Public {
                    self.modules[module]
                        .public
                        .insert(var.name.to_ascii_lowercase());
                }
                match self.declare_variable(var) {
                    Ok(variable) => scope.declare(variable),
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
            }
        }
        self.frame = saved;
        self.nesting -= 1;
        result?;

        let instance = VbaObjectRef::new(VbaObject::Instance(ClassInstance {
            class_module: module,
            class_name: class.name.clone(),
            scope,
        }));
        let initializer = class
            .procedures
            .iter()
            .find(|p| p.kind == ProcedureKind::Sub && p.name.eq_ignore_ascii_case("Class_Initialize"));
        if let Some(initializer) = initializer {
            self.call_procedure(module, initializer, Vec::new(), Some(instance.clone()), position)?;
        }
        Ok(VbaValue::Object(instance))
    }

    // ---- built-ins and the environment ----

    fn call_builtin(
        &mut self,
        name: &str,
        builtin: Builtin,
        values: Vec<VbaValue>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        match builtin {
            Builtin::Pure(function) => function(&values).map_err(|e| e.at(position)),
            Builtin::Host(HostCallKind::CreateObject) => {
                let class = values.first().map(VbaValue::display_string).unwrap_or_default();
                match native_object(&class) {
                    Some(native) => Ok(native),
                    None => self.host_call(HostCallKind::CreateObject, name, None, values, position),
                }
            }
            Builtin::Host(kind) => self.host_call(kind, name, None, values, position),
            Builtin::Intrinsic(intrinsic) => self.intrinsic(intrinsic, values, position),
        }
    }

    fn intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        values: Vec<VbaValue>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        let first = values.first().filter(|v| !v.is_missing());
        Ok(match intrinsic {
            Intrinsic::Array => {
                VbaValue::Array(VbaArray::from_values(self.option_base(), values).into_ref())
            }
            Intrinsic::Rnd => {
                let seed = first
                    .map(VbaValue::to_f64)
                    .transpose()
                    .map_err(|e| e.at(position))?;
                VbaValue::Single(self.rnd.next(seed))
            }
            Intrinsic::Randomize => {
                let seed = match first {
                    Some(v) => v.to_f64().map_err(|e| e.at(position))?,
                    None => seconds_since_midnight(self.now()),
                };
                self.rnd.randomize(seed);
                VbaValue::Empty
            }
            Intrinsic::Now => VbaValue::Date(datetime_to_ole_date(self.now())),
            Intrinsic::Date => VbaValue::Date(datetime_to_ole_date(self.now()).floor()),
            Intrinsic::Time => {
                let serial = datetime_to_ole_date(self.now());
                VbaValue::Date(serial - serial.floor())
            }
            Intrinsic::Timer => VbaValue::Single(seconds_since_midnight(self.now()) as f32),
            Intrinsic::CallByName => return self.call_by_name(values, position),
        })
    }

    fn now(&self) -> NaiveDateTime {
        self.policy
            .clock
            .unwrap_or_else(|| Local::now().naive_local())
    }

    /// `CallByName(object, name, callType, args...)`; call types are 1 method, 2 get, 4 let,
    /// 8 set.
    fn call_by_name(&mut self, values: Vec<VbaValue>, position: SourcePosition) -> VbaResult<VbaValue> {
        let mut values = values.into_iter();
        let target = values.next().unwrap_or_default();
        let name = match values.next() {
            Some(v) => v.to_string_value().map_err(|e| e.at(position))?,
            None => return Err(VbaError::runtime(449, error_message(449), position)),
        };
        let call_type = match values.next() {
            Some(v) => v.to_i32().map_err(|e| e.at(position))?,
            None => 1,
        };
        let mut rest: Vec<VbaValue> = values.collect();
        let obj = self.object_of(target, position)?;
        match call_type {
            4 | 8 => {
                let value = rest.pop().unwrap_or_default();
                self.assign_member(VbaValue::Object(obj), &name, rest, value, call_type == 8, position)?;
                Ok(VbaValue::Empty)
            }
            2 => self.member_with_values(obj, &name, rest, false, position),
            1 => self.member_with_values(obj, &name, rest, true, position),
            _ => Err(VbaError::runtime(5, error_message(5), position)),
        }
    }

    fn call_external(
        &mut self,
        ext: &'a ExternalDecl,
        values: Vec<VbaValue>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        let entry = ext.alias.as_deref().unwrap_or(&ext.name);
        let operation = format!("{}!{entry}", ext.library);
        let value = self.host_call(HostCallKind::External, &operation, None, values, position)?;
        match (&ext.return_type, ext.is_function) {
            (Some(ty), true) => coerce_to_type(value, &self.resolve_type(ty))
                .map_err(|e| e.at(position)),
            (None, true) => Ok(value),
            (_, false) => Ok(VbaValue::Empty),
        }
    }

    /// Host globals such as `Application` are fetched once per execution.
    fn host_global(&mut self, name: &str, position: SourcePosition) -> VbaResult<VbaValue> {
        let key = name.to_ascii_lowercase();
        if let Some(value) = self.host_globals.get(&key) {
            return Ok(value.clone());
        }
        let value = self.host_call(HostCallKind::GetObject, name, None, Vec::new(), position)?;
        self.host_globals.insert(key, value.clone());
        Ok(value)
    }

    /// Forwards one effect to the environment, recording it and any handles it returns.
    pub fn host_call(
        &mut self,
        kind: HostCallKind,
        operation: &str,
        target: Option<HostHandle>,
        args: Vec<VbaValue>,
        position: SourcePosition,
    ) -> VbaResult<VbaValue> {
        if let Some(handle) = target.filter(|h| !self.is_live(*h)) {
            warn!("host call {kind:?} `{operation}` on released {handle:?}");
            return Err(ValueError::ObjectNotSet.at(position));
        }
        self.emit(EventKind::HostCall {
            call: kind,
            operation: operation.to_string(),
            target,
            args: args.iter().map(VbaValue::display_string).collect(),
        });
        debug!("host call {kind:?} `{operation}`");
        let call = HostCall {
            kind,
            operation,
            target,
            args: &args,
        };
        match self.env.invoke(&call) {
            Ok(value) => {
                self.track(&value);
                Ok(value)
            }
            Err(err) => {
                warn!("host call {kind:?} `{operation}` failed: {err}");
                Err(VbaError::runtime(err.number(kind), err.to_string(), position))
            }
        }
    }
}

fn store(var: &mut Variable, value: VbaValue, set: bool, position: SourcePosition) -> VbaResult<()> {
    if var.is_const {
        return Err(VbaError::semantic(
            "Assignment to constant not permitted",
            position,
        ));
    }
    if set && !(var.declared.is_object() || var.declared == VbaType::Variant) {
        return Err(ValueError::mismatch(&value, &var.declared.name()).at(position));
    }
    var.assign(value).map_err(|e| e.at(position))
}

fn instance_field(obj: &VbaObjectRef, name: &str) -> Option<VbaValue> {
    match &*obj.borrow() {
        VbaObject::Instance(inst) => inst.scope.get(name).map(|v| v.value.clone()),
        _ => None,
    }
}

fn store_field(
    obj: &VbaObjectRef,
    name: &str,
    value: VbaValue,
    set: bool,
    position: SourcePosition,
) -> VbaResult<()> {
    let mut guard = obj.borrow_mut();
    match &mut *guard {
        VbaObject::Instance(inst) => match inst.scope.get_mut(name) {
            Some(var) => store(var, value, set, position),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

fn instance_class(obj: &VbaObjectRef) -> Option<usize> {
    match &*obj.borrow() {
        VbaObject::Instance(instance) => Some(instance.class_module),
        _ => None,
    }
}

fn native_object(class: &str) -> Option<VbaValue> {
    let obj = match class.to_ascii_lowercase().as_str() {
        "collection" | "vba.collection" => VbaObject::Collection(Collection::default()),
        "dictionary" | "scripting.dictionary" => VbaObject::Dictionary(Dictionary::default()),
        _ => return None,
    };
    Some(VbaValue::Object(VbaObjectRef::new(obj)))
}

fn unsupported(member: &str, position: SourcePosition) -> VbaError {
    VbaError::runtime(438, format!("{}: `{member}`", error_message(438)), position)
}

fn to_indices(values: &[VbaValue]) -> Result<Vec<i32>, ValueError> {
    values.iter().map(VbaValue::to_i32).collect()
}

/// `Err.Raise number, [source], [description]`, positional or named.
fn user_error(args: &[Arg<'_>], position: SourcePosition) -> VbaError {
    let pick = |name: &str, index: usize| -> Option<VbaValue> {
        args.iter()
            .find(|a| a.name.is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .or_else(|| args.get(index).filter(|a| a.name.is_none()))
            .and_then(|a| a.value.clone())
    };
    let number = match pick("Number", 0).map(|v| v.to_i32()) {
        Some(Ok(number)) => number,
        Some(Err(err)) => return err.at(position),
        None => return VbaError::runtime(449, error_message(449), position),
    };
    let origin = pick("Source", 1)
        .map(|v| v.display_string())
        .unwrap_or_else(|| PROJECT_NAME.to_string());
    let description = pick("Description", 2)
        .map(|v| v.display_string())
        .unwrap_or_else(|| error_message(number).to_string());
    VbaError::UserRaised {
        number,
        origin,
        description,
        position,
    }
}

fn static_key(procedure: &Procedure) -> String {
    format!("{}:{:?}", procedure.name.to_ascii_lowercase(), procedure.kind)
}

fn seconds_since_midnight(now: NaiveDateTime) -> f64 {
    f64::from(now.num_seconds_from_midnight()) + f64::from(now.nanosecond() % 1_000_000_000) / 1e9
}

/// A stable stand-in for a procedure address.
fn pseudo_address(name: &str) -> i32 {
    let hash = name
        .to_ascii_lowercase()
        .bytes()
        .fold(0x0040_0000_u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    (hash & 0x7FFF_FFFF) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RecordingEnvironment;
    use crate::events::Outcome;
    use crate::runtime::{VbaProject, VbaRuntime};

    fn run(source: &str, entry: &str) -> Outcome {
        let source = format!("Attribute VB_Name = \"Module1\"\n{source}");
        let project = VbaProject::parse([source.as_str()]).unwrap();
        let runtime = VbaRuntime::new(project);
        let mut env = RecordingEnvironment::new();
        runtime.execute(&mut env, entry, &[]).outcome
    }

    fn returned(source: &str, entry: &str) -> VbaValue {
        match run(source, entry) {
            Outcome::Completed {
                returned: Some(value),
            } => value,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn recursion_uses_the_function_name_with_arguments() {
        let source = "Function Fact(n)\n  If n <= 1 Then\n    Fact = 1\n  Else\n    Fact = n * Fact(n - 1)\n  End If\nEnd Function\nFunction Main()\n  Main = Fact(5)\nEnd Function\n";
        assert_eq!(returned(source, "Main").display_string(), "120");
    }

    #[test]
    fn byref_arguments_are_written_back() {
        let source = "Sub Bump(ByRef x)\n  x = x + 1\nEnd Sub\nSub Keep(ByVal x)\n  x = x + 1\nEnd Sub\nFunction Main()\n  Dim a, b\n  a = 1: b = 1\n  Bump a\n  Keep b\n  Main = a * 10 + b\nEnd Function\n";
        assert_eq!(returned(source, "Main").display_string(), "21");
    }

    #[test]
    fn named_and_optional_arguments_bind() {
        let source = "Function F(a, Optional b = 5, Optional c)\n  F = a + b + IsMissing(c) * -100\nEnd Function\nFunction Main()\n  Main = F(b:=2, a:=1)\nEnd Function\n";
        assert_eq!(returned(source, "Main").to_f64().unwrap(), 103.0);
    }

    #[test]
    fn missing_required_argument_is_error_449() {
        let source = "Sub F(a)\nEnd Sub\nSub Main()\n  F\nEnd Sub\n";
        let outcome = run(source, "Main");
        assert_eq!(outcome.error().map(VbaError::number), Some(449));
    }

    #[test]
    fn pseudo_addresses_are_stable_and_positive() {
        assert_eq!(pseudo_address("Callback"), pseudo_address("CALLBACK"));
        assert!(pseudo_address("Callback") > 0);
    }
}
