use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use thiserror::Error;

use crate::ast::{Literal, VbaType};
use crate::error::{SourcePosition, VbaError};
use crate::object_model::VbaObjectRef;

/// `Err.Number` of the marker stored in an omitted `Optional` Variant parameter.
pub const MISSING_ARGUMENT: i32 = 448;

/// Largest number of elements a single array may hold.
pub const MAX_ARRAY_ELEMENTS: usize = 1 << 24;

/// Longest string, in UTF-8 bytes, that any operation may produce.
pub const MAX_STRING_LENGTH: usize = 1 << 25;

/// Longest `String * n` a declaration may ask for.
pub const MAX_FIXED_STRING_LENGTH: usize = 65_535;

/// Failure of a value-level operation. The interpreter attaches a position with [`ValueError::at`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Type mismatch ({0})")]
    TypeMismatch(String),
    #[error("Overflow")]
    Overflow,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Invalid use of Null")]
    InvalidUseOfNull,
    #[error("Subscript out of range")]
    SubscriptOutOfRange,
    #[error("Invalid procedure call or argument")]
    InvalidArgument,
    #[error("Object variable not set")]
    ObjectNotSet,
    #[error("Object required")]
    ObjectRequired,
    #[error("This array is fixed or temporarily locked")]
    FixedArray,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Out of string space")]
    OutOfStringSpace,
    #[error("This key is already associated with an element of this collection")]
    DuplicateKey,
}

impl ValueError {
    pub fn number(&self) -> i32 {
        match self {
            ValueError::TypeMismatch(_) => 13,
            ValueError::Overflow => 6,
            ValueError::DivisionByZero => 11,
            ValueError::InvalidUseOfNull => 94,
            ValueError::SubscriptOutOfRange => 9,
            ValueError::InvalidArgument => 5,
            ValueError::ObjectNotSet => 91,
            ValueError::ObjectRequired => 424,
            ValueError::FixedArray => 10,
            ValueError::OutOfMemory => 7,
            ValueError::OutOfStringSpace => 14,
            ValueError::DuplicateKey => 457,
        }
    }

    pub fn at(self, position: SourcePosition) -> VbaError {
        match self {
            ValueError::TypeMismatch(message) => VbaError::TypeMismatch { message, position },
            other => VbaError::runtime(other.number(), other.to_string(), position),
        }
    }

    pub(crate) fn mismatch(from: &VbaValue, to: &str) -> ValueError {
        ValueError::TypeMismatch(format!("{} to {}", from.kind().name(), to))
    }
}

/// Admits a string result of `len` bytes, or fails with "Out of string space".
pub fn check_string_length(len: usize) -> Result<(), ValueError> {
    if len > MAX_STRING_LENGTH {
        return Err(ValueError::OutOfStringSpace);
    }
    Ok(())
}

/// Runtime kind of a [`VbaValue`], the index into the coercion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Empty,
    Null,
    Nothing,
    Boolean,
    Byte,
    Integer,
    Long,
    LongLong,
    Single,
    Double,
    Currency,
    Date,
    String,
    Error,
    Object,
    Array,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Empty => "Empty",
            ValueKind::Null => "Null",
            ValueKind::Nothing => "Nothing",
            ValueKind::Boolean => "Boolean",
            ValueKind::Byte => "Byte",
            ValueKind::Integer => "Integer",
            ValueKind::Long => "Long",
            ValueKind::LongLong => "LongLong",
            ValueKind::Single => "Single",
            ValueKind::Double => "Double",
            ValueKind::Currency => "Currency",
            ValueKind::Date => "Date",
            ValueKind::String => "String",
            ValueKind::Error => "Error",
            ValueKind::Object => "Object",
            ValueKind::Array => "Array",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueKind::Byte
                | ValueKind::Integer
                | ValueKind::Long
                | ValueKind::LongLong
                | ValueKind::Single
                | ValueKind::Double
                | ValueKind::Currency
        )
    }
}

#[derive(Clone, Debug)]
pub struct VbaArray {
    /// Inclusive `(lower, upper)` per dimension; empty for an unallocated dynamic array.
    bounds: Vec<(i32, i32)>,
    values: Vec<VbaValue>,
    element_type: VbaType,
    /// Declared with bounds; such arrays cannot be re-dimensioned.
    fixed: bool,
}

pub type VbaArrayRef = Rc<RefCell<VbaArray>>;

impl VbaArray {
    pub fn new(bounds: Vec<(i32, i32)>, element_type: VbaType) -> Result<Self, ValueError> {
        let len = element_count(&bounds)?;
        let values = vec![default_for(&element_type); len];
        Ok(Self {
            bounds,
            values,
            element_type,
            fixed: false,
        })
    }

    /// An unallocated dynamic array, as declared by `Dim a()`.
    pub fn dynamic(element_type: VbaType) -> Self {
        Self {
            bounds: Vec::new(),
            values: Vec::new(),
            element_type,
            fixed: false,
        }
    }

    /// A one-dimensional Variant array, as returned by `Array` or `Split`.
    pub fn from_values(lower_bound: i32, values: Vec<VbaValue>) -> Self {
        let upper = lower_bound + values.len() as i32 - 1;
        Self {
            bounds: vec![(lower_bound, upper)],
            values,
            element_type: VbaType::Variant,
            fixed: false,
        }
    }

    pub fn into_ref(self) -> VbaArrayRef {
        Rc::new(RefCell::new(self))
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn element_type(&self) -> &VbaType {
        &self.element_type
    }

    pub fn is_allocated(&self) -> bool {
        !self.bounds.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.bounds.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[VbaValue] {
        &self.values
    }

    /// Bounds of the 1-based dimension `dim`.
    pub fn bounds(&self, dim: usize) -> Result<(i32, i32), ValueError> {
        dim.checked_sub(1)
            .and_then(|d| self.bounds.get(d))
            .copied()
            .ok_or(ValueError::SubscriptOutOfRange)
    }

    fn offset(&self, indices: &[i32]) -> Result<usize, ValueError> {
        if indices.len() != self.bounds.len() {
            return Err(ValueError::SubscriptOutOfRange);
        }
        let mut offset = 0usize;
        for (&index, &(lower, upper)) in indices.iter().zip(&self.bounds) {
            if index < lower || index > upper {
                return Err(ValueError::SubscriptOutOfRange);
            }
            let extent = (upper - lower + 1) as usize;
            offset = offset * extent + (index - lower) as usize;
        }
        Ok(offset)
    }

    pub fn get(&self, indices: &[i32]) -> Result<&VbaValue, ValueError> {
        let offset = self.offset(indices)?;
        self.values.get(offset).ok_or(ValueError::SubscriptOutOfRange)
    }

    pub fn get_mut(&mut self, indices: &[i32]) -> Result<&mut VbaValue, ValueError> {
        let offset = self.offset(indices)?;
        self.values
            .get_mut(offset)
            .ok_or(ValueError::SubscriptOutOfRange)
    }

    /// Stores `value` after coercing it to the element type.
    pub fn set(&mut self, indices: &[i32], value: VbaValue) -> Result<(), ValueError> {
        let value = coerce_to_type(value, &self.element_type)?;
        *self.get_mut(indices)? = value;
        Ok(())
    }

    /// Multi-index of the element stored at `offset`.
    fn indices_of(&self, mut offset: usize) -> Vec<i32> {
        let mut out = vec![0; self.bounds.len()];
        for (slot, &(lower, upper)) in out.iter_mut().zip(&self.bounds).rev() {
            let extent = (upper - lower + 1) as usize;
            *slot = lower + (offset % extent) as i32;
            offset /= extent;
        }
        out
    }

    /// `ReDim`: with `preserve` only the last dimension may change and existing elements are kept.
    pub fn redim(
        &mut self,
        bounds: Vec<(i32, i32)>,
        element_type: Option<VbaType>,
        preserve: bool,
    ) -> Result<(), ValueError> {
        if self.fixed {
            return Err(ValueError::FixedArray);
        }
        let element_type = element_type.unwrap_or_else(|| self.element_type.clone());
        let mut resized = VbaArray::new(bounds, element_type)?;
        if preserve && self.is_allocated() {
            let n = self.bounds.len();
            if resized.bounds.len() != n
                || self.bounds[..n - 1] != resized.bounds[..n - 1]
                || self.bounds[n - 1].0 != resized.bounds[n - 1].0
            {
                return Err(ValueError::SubscriptOutOfRange);
            }
            for (offset, value) in std::mem::take(&mut self.values).into_iter().enumerate() {
                let indices = self.indices_of(offset);
                if let Ok(slot) = resized.get_mut(&indices) {
                    *slot = value;
                }
            }
        }
        self.bounds = resized.bounds;
        self.values = resized.values;
        self.element_type = resized.element_type;
        Ok(())
    }

    /// `Erase`: fixed arrays are reset in place, dynamic arrays are deallocated.
    pub fn erase(&mut self) {
        if self.fixed {
            let default = default_for(&self.element_type);
            for value in &mut self.values {
                *value = default.clone();
            }
        } else {
            self.bounds.clear();
            self.values.clear();
        }
    }

    /// Stores an independent copy of `template` in every element; arrays of records use this.
    pub fn fill(&mut self, template: &VbaValue) {
        for value in &mut self.values {
            *value = template.copied();
        }
    }
}

fn element_count(bounds: &[(i32, i32)]) -> Result<usize, ValueError> {
    let mut total = 1usize;
    for &(lower, upper) in bounds {
        let extent = i64::from(upper) - i64::from(lower) + 1;
        if extent < 0 {
            return Err(ValueError::SubscriptOutOfRange);
        }
        total = total
            .checked_mul(extent as usize)
            .filter(|&t| t <= MAX_ARRAY_ELEMENTS)
            .ok_or(ValueError::OutOfMemory)?;
    }
    Ok(total)
}

/// A Variant: every value carries its own runtime kind.
#[derive(Clone, Default)]
pub enum VbaValue {
    #[default]
    Empty,
    Null,
    Nothing,
    Boolean(bool),
    Byte(u8),
    Integer(i16),
    Long(i32),
    LongLong(i64),
    Single(f32),
    Double(f64),
    /// Fixed point, scaled by 10 000.
    Currency(i64),
    /// OLE automation date serial.
    Date(f64),
    String(String),
    /// `CVErr` values; [`MISSING_ARGUMENT`] marks an omitted optional argument.
    Error(i32),
    Object(VbaObjectRef),
    Array(VbaArrayRef),
}

impl fmt::Debug for VbaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Null => write!(f, "Null"),
            Self::Nothing => write!(f, "Nothing"),
            Self::Boolean(v) => write!(f, "Boolean({v})"),
            Self::Byte(v) => write!(f, "Byte({v})"),
            Self::Integer(v) => write!(f, "Integer({v})"),
            Self::Long(v) => write!(f, "Long({v})"),
            Self::LongLong(v) => write!(f, "LongLong({v})"),
            Self::Single(v) => write!(f, "Single({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::Currency(v) => write!(f, "Currency({})", format_currency(*v)),
            Self::Date(v) => write!(f, "Date({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Error(v) => write!(f, "Error({v})"),
            Self::Object(o) => write!(f, "Object({})", o.class_name()),
            Self::Array(v) => match v.try_borrow() {
                Ok(arr) => write!(f, "Array(len={})", arr.len()),
                Err(_) => write!(f, "Array(..)"),
            },
        }
    }
}

impl PartialEq for VbaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Null, Self::Null) => true,
            (Self::Nothing, Self::Nothing) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::LongLong(a), Self::LongLong(b)) => a == b,
            (Self::Single(a), Self::Single(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Currency(a), Self::Currency(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl VbaValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Empty => ValueKind::Empty,
            Self::Null => ValueKind::Null,
            Self::Nothing => ValueKind::Nothing,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Byte(_) => ValueKind::Byte,
            Self::Integer(_) => ValueKind::Integer,
            Self::Long(_) => ValueKind::Long,
            Self::LongLong(_) => ValueKind::LongLong,
            Self::Single(_) => ValueKind::Single,
            Self::Double(_) => ValueKind::Double,
            Self::Currency(_) => ValueKind::Currency,
            Self::Date(_) => ValueKind::Date,
            Self::String(_) => ValueKind::String,
            Self::Error(_) => ValueKind::Error,
            Self::Object(_) => ValueKind::Object,
            Self::Array(_) => ValueKind::Array,
        }
    }

    pub fn from_literal(literal: &Literal) -> VbaValue {
        match literal {
            Literal::Integer(v) => Self::Integer(*v),
            Literal::Long(v) => Self::Long(*v),
            Literal::LongLong(v) => Self::LongLong(*v),
            Literal::Single(v) => Self::Single(*v),
            Literal::Double(v) => Self::Double(*v),
            Literal::Currency(v) => Self::Currency(*v),
            Literal::Date(v) => Self::Date(*v),
            Literal::String(v) => Self::String(v.clone()),
            Literal::Boolean(v) => Self::Boolean(*v),
            Literal::Empty => Self::Empty,
            Literal::Null => Self::Null,
            Literal::Nothing => Self::Nothing,
        }
    }

    /// `TypeName` of the value.
    pub fn type_name(&self) -> String {
        match self {
            Self::Object(obj) => obj.class_name(),
            Self::Array(arr) => {
                let arr = arr.borrow();
                format!("{}()", arr.element_type().name())
            }
            other => other.kind().name().to_string(),
        }
    }

    /// `VarType` of the value.
    pub fn var_type(&self) -> i32 {
        match self {
            Self::Empty => 0,
            Self::Null => 1,
            Self::Integer(_) => 2,
            Self::Long(_) => 3,
            Self::Single(_) => 4,
            Self::Double(_) => 5,
            Self::Currency(_) => 6,
            Self::Date(_) => 7,
            Self::String(_) => 8,
            Self::Object(_) | Self::Nothing => 9,
            Self::Error(_) => 10,
            Self::Boolean(_) => 11,
            Self::Byte(_) => 17,
            Self::LongLong(_) => 20,
            Self::Array(arr) => 8192 + type_var_type(arr.borrow().element_type()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Error(MISSING_ARGUMENT))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Nothing)
    }

    pub fn as_object(&self) -> Option<VbaObjectRef> {
        match self {
            Self::Object(o) => Some(o.clone()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<VbaArrayRef> {
        match self {
            Self::Array(arr) => Some(arr.clone()),
            _ => None,
        }
    }

    /// The value stored by a `Let` assignment: arrays and records are copied, everything else
    /// is shared.
    pub fn copied(&self) -> VbaValue {
        match self {
            Self::Array(arr) => {
                let copy = arr.borrow().clone();
                let values = copy.values.iter().map(VbaValue::copied).collect();
                Self::Array(VbaArray { values, ..copy }.into_ref())
            }
            Self::Object(obj) if obj.is_record() => Self::Object(obj.copied()),
            other => other.clone(),
        }
    }

    pub fn to_f64(&self) -> Result<f64, ValueError> {
        match self {
            Self::Empty => Ok(0.0),
            Self::Boolean(v) => Ok(if *v { -1.0 } else { 0.0 }),
            Self::Byte(v) => Ok(f64::from(*v)),
            Self::Integer(v) => Ok(f64::from(*v)),
            Self::Long(v) => Ok(f64::from(*v)),
            Self::LongLong(v) => Ok(*v as f64),
            Self::Single(v) => Ok(f64::from(*v)),
            Self::Double(v) | Self::Date(v) => Ok(*v),
            Self::Currency(v) => Ok(*v as f64 / 10_000.0),
            Self::String(s) => {
                parse_numeric_str(s).ok_or_else(|| ValueError::mismatch(self, "Double"))
            }
            Self::Null => Err(ValueError::InvalidUseOfNull),
            Self::Nothing => Err(ValueError::ObjectNotSet),
            Self::Error(_) | Self::Object(_) | Self::Array(_) => {
                Err(ValueError::mismatch(self, "Double"))
            }
        }
    }

    /// Integral value with banker's rounding, as used for indices and counts.
    pub fn to_i64(&self) -> Result<i64, ValueError> {
        match self {
            Self::Byte(v) => Ok(i64::from(*v)),
            Self::Integer(v) => Ok(i64::from(*v)),
            Self::Long(v) => Ok(i64::from(*v)),
            Self::LongLong(v) => Ok(*v),
            other => {
                let v = round_bankers(other.to_f64()?);
                if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                    Ok(v as i64)
                } else {
                    Err(ValueError::Overflow)
                }
            }
        }
    }

    pub fn to_i32(&self) -> Result<i32, ValueError> {
        i32::try_from(self.to_i64()?).map_err(|_| ValueError::Overflow)
    }

    pub fn to_bool(&self) -> Result<bool, ValueError> {
        match self {
            Self::Boolean(v) => Ok(*v),
            Self::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
            Self::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
            Self::String(s) => parse_numeric_str(s)
                .map(|v| v != 0.0)
                .ok_or_else(|| ValueError::mismatch(self, "Boolean")),
            other => Ok(other.to_f64()? != 0.0),
        }
    }

    /// Truth value of an `If`/`While` condition; `None` when the condition is Null.
    pub fn to_condition(&self) -> Result<Option<bool>, ValueError> {
        match self {
            Self::Null => Ok(None),
            other => other.to_bool().map(Some),
        }
    }

    /// String conversion used by `CStr`, `&` and assignment to a String.
    pub fn to_string_value(&self) -> Result<String, ValueError> {
        match self {
            Self::Empty => Ok(String::new()),
            Self::Null => Err(ValueError::InvalidUseOfNull),
            Self::Boolean(v) => Ok(if *v { "True" } else { "False" }.to_string()),
            Self::Byte(v) => Ok(v.to_string()),
            Self::Integer(v) => Ok(v.to_string()),
            Self::Long(v) => Ok(v.to_string()),
            Self::LongLong(v) => Ok(v.to_string()),
            Self::Single(v) => Ok(format_number(f64::from(*v), 7)),
            Self::Double(v) => Ok(format_number(*v, 15)),
            Self::Currency(v) => Ok(format_currency(*v)),
            Self::Date(v) => Ok(format_date(*v)),
            Self::String(s) => Ok(s.clone()),
            Self::Error(n) => Ok(format!("Error {n}")),
            Self::Nothing => Err(ValueError::ObjectNotSet),
            Self::Object(_) | Self::Array(_) => Err(ValueError::mismatch(self, "String")),
        }
    }

    /// Best-effort rendering for `Debug.Print` and execution events; never fails.
    pub fn display_string(&self) -> String {
        match self {
            Self::Null => "Null".to_string(),
            Self::Nothing => "Nothing".to_string(),
            Self::Object(o) => format!("<{}>", o.class_name()),
            Self::Array(arr) => format!("<Array {}>", arr.borrow().len()),
            other => other.to_string_value().unwrap_or_default(),
        }
    }

    /// Date serial of a Date, a number, or a string that reads as a date.
    /// Date serial of the value; serials outside years 100 to 9999 overflow.
    pub fn to_date(&self) -> Result<f64, ValueError> {
        let serial = match self {
            Self::Date(v) => *v,
            Self::String(s) => parse_date_string(s)
                .or_else(|| parse_numeric_str(s))
                .ok_or_else(|| ValueError::mismatch(self, "Date"))?,
            other => other.to_f64()?,
        };
        checked_date(serial)
    }
}

impl From<&str> for VbaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for VbaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for VbaValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for VbaValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i32> for VbaValue {
    fn from(value: i32) -> Self {
        Self::Long(value)
    }
}

impl From<i16> for VbaValue {
    fn from(value: i16) -> Self {
        Self::Integer(value)
    }
}

fn type_var_type(ty: &VbaType) -> i32 {
    match ty {
        VbaType::Variant | VbaType::Array(_) => 12,
        VbaType::Boolean => 11,
        VbaType::Byte => 17,
        VbaType::Integer => 2,
        VbaType::Long => 3,
        VbaType::LongLong | VbaType::LongPtr => 20,
        VbaType::Single => 4,
        VbaType::Double => 5,
        VbaType::Currency => 6,
        VbaType::Date => 7,
        VbaType::String | VbaType::FixedString(_) => 8,
        VbaType::Object | VbaType::Named(_) => 9,
    }
}

/// Initial value of a variable declared with `ty`.
pub fn default_for(ty: &VbaType) -> VbaValue {
    match ty {
        VbaType::Variant => VbaValue::Empty,
        VbaType::Boolean => VbaValue::Boolean(false),
        VbaType::Byte => VbaValue::Byte(0),
        VbaType::Integer => VbaValue::Integer(0),
        VbaType::Long => VbaValue::Long(0),
        VbaType::LongLong | VbaType::LongPtr => VbaValue::LongLong(0),
        VbaType::Single => VbaValue::Single(0.0),
        VbaType::Double => VbaValue::Double(0.0),
        VbaType::Currency => VbaValue::Currency(0),
        VbaType::Date => VbaValue::Date(0.0),
        VbaType::String => VbaValue::String(String::new()),
        VbaType::FixedString(len) => VbaValue::String("\0".repeat(*len)),
        VbaType::Object | VbaType::Named(_) => VbaValue::Nothing,
        VbaType::Array(inner) => {
            VbaValue::Array(VbaArray::dynamic(inner.as_ref().clone()).into_ref())
        }
    }
}

fn checked_integral(value: &VbaValue, min: f64, max: f64, to: &str) -> Result<i64, ValueError> {
    if let VbaValue::String(s) = value {
        if parse_numeric_str(s).is_none() {
            return Err(ValueError::mismatch(value, to));
        }
    }
    let v = round_bankers(value.to_f64()?);
    if !(min..=max).contains(&v) {
        return Err(ValueError::Overflow);
    }
    Ok(v as i64)
}

/// Assignment-time coercion to a declared type.
pub fn coerce_to_type(value: VbaValue, ty: &VbaType) -> Result<VbaValue, ValueError> {
    Ok(match ty {
        VbaType::Variant => value,
        VbaType::Boolean => VbaValue::Boolean(value.to_bool()?),
        VbaType::Byte => VbaValue::Byte(checked_integral(&value, 0.0, 255.0, "Byte")? as u8),
        VbaType::Integer => VbaValue::Integer(checked_integral(
            &value,
            f64::from(i16::MIN),
            f64::from(i16::MAX),
            "Integer",
        )? as i16),
        VbaType::Long => VbaValue::Long(checked_integral(
            &value,
            f64::from(i32::MIN),
            f64::from(i32::MAX),
            "Long",
        )? as i32),
        VbaType::LongLong | VbaType::LongPtr => match value {
            VbaValue::LongLong(v) => VbaValue::LongLong(v),
            other => VbaValue::LongLong(checked_integral(
                &other,
                i64::MIN as f64,
                i64::MAX as f64,
                "LongLong",
            )?),
        },
        VbaType::Single => {
            let v = value.to_f64()?;
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(ValueError::Overflow);
            }
            VbaValue::Single(v as f32)
        }
        VbaType::Double => VbaValue::Double(value.to_f64()?),
        VbaType::Currency => match value {
            VbaValue::Currency(v) => VbaValue::Currency(v),
            other => VbaValue::Currency(to_currency(other.to_f64()?)?),
        },
        VbaType::Date => VbaValue::Date(value.to_date()?),
        VbaType::String => VbaValue::String(value.to_string_value()?),
        VbaType::FixedString(len) => {
            let mut s: String = value.to_string_value()?.chars().take(*len).collect();
            let pad = len - s.chars().count();
            s.extend(std::iter::repeat(' ').take(pad));
            VbaValue::String(s)
        }
        VbaType::Object | VbaType::Named(_) => match value {
            VbaValue::Object(_) | VbaValue::Nothing => value,
            VbaValue::Empty if matches!(ty, VbaType::Object) => VbaValue::Nothing,
            other => return Err(ValueError::mismatch(&other, &ty.name())),
        },
        VbaType::Array(_) => match value {
            VbaValue::Array(_) => value,
            other => return Err(ValueError::mismatch(&other, &ty.name())),
        },
    })
}

pub fn to_currency(v: f64) -> Result<i64, ValueError> {
    let scaled = round_bankers(v * 10_000.0);
    if !scaled.is_finite() || scaled.abs() >= 9.223_372_036_854_775e18 {
        return Err(ValueError::Overflow);
    }
    Ok(scaled as i64)
}

/// Round half to even, as `CInt`, `CLng` and `Round` do.
pub fn round_bankers(n: f64) -> f64 {
    if (n - n.trunc()).abs() == 0.5 {
        2.0 * (n / 2.0).round()
    } else {
        n.round()
    }
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eEdD][+-]?[0-9]+)?$")
            .expect("valid numeric regex")
    })
}

/// Reads a string as a number the way implicit coercion does: surrounding blanks are
/// ignored, and `&H`/`&O` prefixes are accepted.
pub fn parse_numeric_str(s: &str) -> Option<f64> {
    let s = s.trim_matches(|c: char| c == ' ' || c == '\t');
    if let Some(hex) = s.strip_prefix("&H").or_else(|| s.strip_prefix("&h")) {
        return i64::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    if let Some(oct) = s.strip_prefix("&O").or_else(|| s.strip_prefix("&o")) {
        return i64::from_str_radix(oct, 8).ok().map(|v| v as f64);
    }
    if !numeric_re().is_match(s) {
        return None;
    }
    s.replace(|c| c == 'd' || c == 'D', "e").parse().ok()
}

/// Formats a floating value with at most `digits` significant digits, switching to
/// scientific notation outside `1E-5..1E+15`.
pub fn format_number(v: f64, digits: usize) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        let text = if v.is_nan() {
            "NaN"
        } else if v > 0.0 {
            "1.#INF"
        } else {
            "-1.#INF"
        };
        return text.to_string();
    }
    let sci = format!("{:.*e}", digits - 1, v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-5..digits as i32).contains(&exp) {
        let decimals = (digits as i32 - 1 - exp).max(0) as usize;
        trim_fraction(format!("{v:.decimals$}"))
    } else {
        let mantissa = trim_fraction(mantissa.to_string());
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}E{sign}{:02}", exp.abs())
    }
}

fn trim_fraction(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        t => t.to_string(),
    }
}

fn format_currency(v: i64) -> String {
    let sign = if v < 0 { "-" } else { "" };
    let abs = v.unsigned_abs();
    let whole = abs / 10_000;
    let frac = abs % 10_000;
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        let frac = format!("{frac:04}");
        format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

// Dates are OLE automation serials: days since 1899-12-30, with the time of day in the
// fraction. For negative serials the fraction still counts forward from midnight.

fn ole_base_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

pub fn datetime_to_ole_date(dt: NaiveDateTime) -> f64 {
    let base = ole_base_datetime();
    let days = (dt.date() - base.date()).num_days() as f64;
    let secs = f64::from(dt.time().num_seconds_from_midnight()) / 86_400.0;
    if days < 0.0 && secs > 0.0 {
        days - secs
    } else {
        days + secs
    }
}

/// Serials of 1 January 100 up to the end of 31 December 9999.
const DATE_SERIALS: std::ops::Range<f64> = -657_434.0..2_958_466.0;

/// Admits a serial that names a representable date.
pub fn checked_date(serial: f64) -> Result<f64, ValueError> {
    if DATE_SERIALS.contains(&serial) {
        Ok(serial)
    } else {
        Err(ValueError::Overflow)
    }
}

pub fn ole_date_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !DATE_SERIALS.contains(&serial) {
        return None;
    }
    let days = serial.trunc();
    let secs = ((serial - days).abs() * 86_400.0).round() as i64;
    ole_base_datetime()
        .checked_add_signed(ChronoDuration::days(days as i64))?
        .checked_add_signed(ChronoDuration::seconds(secs))
}

/// Formats a date serial the way `CStr` does with US regional settings.
pub fn format_date(serial: f64) -> String {
    let Some(dt) = ole_date_to_datetime(serial) else {
        return format_number(serial, 15);
    };
    let has_date = serial.trunc() != 0.0;
    let has_time = serial.fract() != 0.0;
    match (has_date, has_time) {
        (true, false) => dt.format("%-m/%-d/%Y").to_string(),
        (false, _) => dt.format("%-I:%M:%S %p").to_string(),
        (true, true) => dt.format("%-m/%-d/%Y %-I:%M:%S %p").to_string(),
    }
}

/// Reads a date or time in the shapes accepted by date literals and `CDate`.
pub fn parse_date_string(s: &str) -> Option<f64> {
    let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let s = normalized.as_str();
    if s.is_empty() {
        return None;
    }

    const DATE_TIME_FORMATS: &[&str] = &[
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %I:%M %p",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%m-%d-%Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &[
        "%m/%d/%Y",
        "%m-%d-%Y",
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
    ];
    const TIME_FORMATS: &[&str] = &["%I:%M:%S %p", "%I:%M %p", "%H:%M:%S", "%H:%M"];

    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(datetime_to_ole_date(fix_two_digit_year(dt)));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(datetime_to_ole_date(fix_two_digit_year(d.and_time(NaiveTime::MIN))));
        }
    }
    for fmt in TIME_FORMATS {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Some(f64::from(t.num_seconds_from_midnight()) / 86_400.0);
        }
    }
    None
}

/// Date literal body, without the surrounding `#`.
pub fn parse_date_literal(text: &str) -> Option<f64> {
    parse_date_string(text)
}

/// Two-digit years map to 1930..=2029.
fn fix_two_digit_year(dt: NaiveDateTime) -> NaiveDateTime {
    use chrono::Datelike;
    let year = dt.year();
    if (0..100).contains(&year) {
        let full = if year < 30 { 2000 + year } else { 1900 + year };
        dt.with_year(full).unwrap_or(dt)
    } else {
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_cstr() {
        assert_eq!(format_number(0.1 + 0.2, 15), "0.3");
        assert_eq!(format_number(1e20, 15), "1E+20");
        assert_eq!(format_number(0.000_000_1, 15), "1E-07");
        assert_eq!(format_number(-2.5, 15), "-2.5");
        assert_eq!(format_number(123456789.0, 15), "123456789");
        assert_eq!(format_currency(12_3400), "12.34");
    }

    #[test]
    fn numeric_strings() {
        assert_eq!(parse_numeric_str(" 10 "), Some(10.0));
        assert_eq!(parse_numeric_str("&HFF"), Some(255.0));
        assert_eq!(parse_numeric_str("1e3"), Some(1000.0));
        assert_eq!(parse_numeric_str("inf"), None);
        assert_eq!(parse_numeric_str("abc"), None);
        assert_eq!(parse_numeric_str(""), None);
    }

    #[test]
    fn bankers_rounding() {
        assert_eq!(round_bankers(2.5), 2.0);
        assert_eq!(round_bankers(3.5), 4.0);
        assert_eq!(round_bankers(-2.5), -2.0);
        assert_eq!(round_bankers(2.6), 3.0);
    }

    #[test]
    fn narrowing_assignment_overflows() {
        assert_eq!(
            coerce_to_type(VbaValue::Long(40_000), &VbaType::Integer),
            Err(ValueError::Overflow)
        );
        assert_eq!(
            coerce_to_type(VbaValue::from("12"), &VbaType::Integer),
            Ok(VbaValue::Integer(12))
        );
        assert!(matches!(
            coerce_to_type(VbaValue::from("x"), &VbaType::Long),
            Err(ValueError::TypeMismatch(_))
        ));
        assert_eq!(
            coerce_to_type(VbaValue::from("abcdef"), &VbaType::FixedString(3)),
            Ok(VbaValue::from("abc"))
        );
    }

    #[test]
    fn dates_round_trip_through_serials() {
        let serial = parse_date_literal("1/2/2003").unwrap();
        assert_eq!(serial, 37623.0);
        assert_eq!(format_date(serial), "1/2/2003");
        assert_eq!(format_date(0.5), "12:00:00 PM");
    }

    #[test]
    fn redim_preserve_keeps_elements() {
        let mut arr = VbaArray::new(vec![(0, 2)], VbaType::Long).unwrap();
        arr.set(&[1], VbaValue::Long(7)).unwrap();
        arr.redim(vec![(0, 5)], None, true).unwrap();
        assert_eq!(arr.get(&[1]), Ok(&VbaValue::Long(7)));
        assert_eq!(arr.get(&[5]), Ok(&VbaValue::Long(0)));
        assert_eq!(arr.get(&[6]), Err(ValueError::SubscriptOutOfRange));
    }

    #[test]
    fn huge_arrays_are_refused() {
        assert_eq!(
            VbaArray::new(vec![(0, i32::MAX)], VbaType::Variant).unwrap_err(),
            ValueError::OutOfMemory
        );
    }
}
