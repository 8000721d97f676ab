use std::collections::HashMap;

use crate::ast::VbaType;
use crate::environment::HostHandle;
use crate::error::SourcePosition;
use crate::value::{coerce_to_type, default_for, ValueError, VbaValue};

/// A name bound to a declared type and a value slot.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub declared: VbaType,
    pub value: VbaValue,
    pub is_const: bool,
    pub position: SourcePosition,
}

impl Variable {
    pub fn new(name: impl Into<String>, declared: VbaType, position: SourcePosition) -> Self {
        let value = default_for(&declared);
        Self {
            name: name.into(),
            declared,
            value,
            is_const: false,
            position,
        }
    }

    pub fn constant(name: impl Into<String>, value: VbaValue, position: SourcePosition) -> Self {
        Self {
            name: name.into(),
            declared: VbaType::Variant,
            value,
            is_const: true,
            position,
        }
    }

    pub fn with_value(mut self, value: VbaValue) -> Self {
        self.value = value;
        self
    }

    /// Stores `value` after assignment-time coercion to the declared type.
    pub fn assign(&mut self, value: VbaValue) -> Result<(), ValueError> {
        self.value = match (&self.declared, value) {
            (VbaType::Array(_), VbaValue::Array(arr)) => VbaValue::Array(arr),
            (VbaType::Array(_), other) => return Err(ValueError::mismatch(&other, "Array")),
            (declared, value) => coerce_to_type(value, declared)?,
        };
        Ok(())
    }
}

/// Variables of one scope, in declaration order, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<Variable>,
    index: HashMap<String, usize>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `var`, replacing an existing binding of the same name.
    pub fn declare(&mut self, var: Variable) {
        let key = var.name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(&slot) => self.vars[slot] = var,
            None => {
                self.index.insert(key, self.vars.len());
                self.vars.push(var);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        let slot = *self.index.get(&name.to_ascii_lowercase())?;
        self.vars.get(slot)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        let slot = *self.index.get(&name.to_ascii_lowercase())?;
        self.vars.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Sets every variable that refers to the host object `handle` to Nothing.
    pub fn forget_host(&mut self, handle: HostHandle) {
        for var in &mut self.vars {
            let held = match &var.value {
                VbaValue::Object(obj) => obj.host_handle() == Some(handle),
                _ => false,
            };
            if held {
                var.value = VbaValue::Nothing;
            }
        }
    }

    /// A copy whose arrays and records are independent of this scope's.
    pub fn copied(&self) -> Scope {
        let vars = self
            .vars
            .iter()
            .map(|v| Variable {
                value: v.value.copied(),
                ..v.clone()
            })
            .collect();
        Scope {
            vars,
            index: self.index.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_ordered() {
        let mut scope = Scope::new();
        scope.declare(Variable::new("Total", VbaType::Long, SourcePosition::default()));
        scope.declare(Variable::new("name", VbaType::String, SourcePosition::default()));

        assert_eq!(scope.get("TOTAL").map(|v| &v.value), Some(&VbaValue::Long(0)));
        let names: Vec<_> = scope.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["Total", "name"]);
    }

    #[test]
    fn assignment_coerces_to_the_declared_type() {
        let mut var = Variable::new("n", VbaType::Integer, SourcePosition::default());
        var.assign(VbaValue::from("12")).unwrap();
        assert_eq!(var.value, VbaValue::Integer(12));
        assert_eq!(var.assign(VbaValue::Long(70_000)), Err(ValueError::Overflow));
        assert_eq!(var.value, VbaValue::Integer(12));
    }
}
