//! Operator semantics over Variants.
//!
//! [`coercion_rule`] is the single table deciding how a binary operator treats a pair of
//! operand kinds; [`binary`] evaluates an operator by looking its rule up and applying it.

use std::cmp::Ordering;

use regex::RegexBuilder;

use crate::ast::{BinOp, UnOp};
use crate::value::{
    check_string_length, parse_numeric_str, round_bankers, to_currency, ValueError, ValueKind,
    VbaValue,
};

/// `Option Compare` setting of the module executing an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    #[default]
    Binary,
    Text,
}

/// How a binary operator combines its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// A Null operand makes the result Null (three-valued for logical operators).
    Null,
    /// Overflow-checked integer arithmetic; the result has this kind.
    Integral(ValueKind),
    /// Floating arithmetic in `Single` or `Double`.
    Floating(ValueKind),
    Currency,
    /// Date plus or minus a number.
    Date,
    Concat,
    CompareNumeric,
    CompareString,
    /// A string against a number: numeric when the string reads as a number, otherwise the
    /// number's string form is compared.
    CompareMixed,
    Pattern,
    /// `Is`: object identity.
    Identity,
    /// Boolean logic on two Booleans.
    Logical,
    /// Bitwise logic on integers of this kind.
    Bitwise(ValueKind),
    Mismatch,
}

/// Kind an operand takes part in arithmetic as, or `None` when it cannot.
fn arithmetic_kind(kind: ValueKind) -> Option<ValueKind> {
    match kind {
        ValueKind::Empty | ValueKind::Boolean => Some(ValueKind::Integer),
        ValueKind::String => Some(ValueKind::Double),
        k if k.is_numeric() || k == ValueKind::Date => Some(k),
        _ => None,
    }
}

fn integral_rank(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Byte => 0,
        ValueKind::Integer => 1,
        ValueKind::Long => 2,
        _ => 3,
    }
}

fn is_integral(kind: ValueKind) -> bool {
    matches!(
        kind,
        ValueKind::Byte | ValueKind::Integer | ValueKind::Long | ValueKind::LongLong
    )
}

/// The promotion ladder: integral kinds widen to the larger, Single meets Long as Double,
/// Currency and Date dominate.
fn promote(op: BinOp, l: ValueKind, r: ValueKind) -> Coercion {
    use ValueKind as K;

    if l == K::Date || r == K::Date {
        return match op {
            BinOp::Add => Coercion::Date,
            BinOp::Sub if l == K::Date && r == K::Date => Coercion::Floating(K::Double),
            BinOp::Sub => Coercion::Date,
            _ => Coercion::Floating(K::Double),
        };
    }
    if l == K::Currency || r == K::Currency {
        return Coercion::Currency;
    }
    if l == K::Double || r == K::Double {
        return Coercion::Floating(K::Double);
    }
    if l == K::Single || r == K::Single {
        let other = if l == K::Single { r } else { l };
        return if matches!(other, K::Long | K::LongLong) {
            Coercion::Floating(K::Double)
        } else {
            Coercion::Floating(K::Single)
        };
    }
    if integral_rank(l) >= integral_rank(r) {
        Coercion::Integral(l)
    } else {
        Coercion::Integral(r)
    }
}

/// Integral kind used by `\`, `Mod` and bitwise operators.
fn integral_kind(l: ValueKind, r: ValueKind) -> ValueKind {
    let narrow = |k: ValueKind| if is_integral(k) { k } else { ValueKind::Long };
    let (l, r) = (narrow(l), narrow(r));
    if integral_rank(l) >= integral_rank(r) {
        l
    } else {
        r
    }
}

fn is_stringish(kind: ValueKind) -> bool {
    matches!(kind, ValueKind::String | ValueKind::Empty)
}

pub fn coercion_rule(op: BinOp, l: ValueKind, r: ValueKind) -> Coercion {
    use ValueKind as K;

    let has_null = l == K::Null || r == K::Null;
    match op {
        BinOp::Is => {
            if matches!(l, K::Object | K::Nothing) && matches!(r, K::Object | K::Nothing) {
                Coercion::Identity
            } else {
                Coercion::Mismatch
            }
        }
        BinOp::Concat => {
            let ok = |k: K| !matches!(k, K::Object | K::Nothing | K::Array | K::Error);
            if ok(l) && ok(r) {
                Coercion::Concat
            } else {
                Coercion::Mismatch
            }
        }
        _ if has_null => {
            let ok = |k: K| !matches!(k, K::Object | K::Nothing | K::Array);
            if ok(l) && ok(r) {
                Coercion::Null
            } else {
                Coercion::Mismatch
            }
        }
        BinOp::Like => {
            let ok = |k: K| !matches!(k, K::Object | K::Nothing | K::Array | K::Error);
            if ok(l) && ok(r) {
                Coercion::Pattern
            } else {
                Coercion::Mismatch
            }
        }
        op if op.is_comparison() => {
            if matches!(l, K::Object | K::Nothing | K::Array | K::Error)
                || matches!(r, K::Object | K::Nothing | K::Array | K::Error)
            {
                Coercion::Mismatch
            } else if is_stringish(l) && is_stringish(r) && (l == K::String || r == K::String) {
                Coercion::CompareString
            } else if l == K::String || r == K::String {
                Coercion::CompareMixed
            } else {
                Coercion::CompareNumeric
            }
        }
        BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Eqv | BinOp::Imp => {
            if l == K::Boolean && r == K::Boolean {
                return Coercion::Logical;
            }
            match (arithmetic_kind(l), arithmetic_kind(r)) {
                (Some(a), Some(b)) => Coercion::Bitwise(integral_kind(a, b)),
                _ => Coercion::Mismatch,
            }
        }
        BinOp::Add if is_stringish(l) && is_stringish(r) && (l == K::String || r == K::String) => {
            Coercion::Concat
        }
        _ => {
            let (Some(a), Some(b)) = (arithmetic_kind(l), arithmetic_kind(r)) else {
                return Coercion::Mismatch;
            };
            match op {
                BinOp::Pow => Coercion::Floating(K::Double),
                BinOp::IntDiv | BinOp::Mod => Coercion::Integral(integral_kind(a, b)),
                BinOp::Div => match promote(op, a, b) {
                    Coercion::Floating(K::Single) => Coercion::Floating(K::Single),
                    _ => Coercion::Floating(K::Double),
                },
                _ => promote(op, a, b),
            }
        }
    }
}

/// Evaluates a binary operator. `Is` compares identity; every other operator follows
/// [`coercion_rule`].
pub fn binary(op: BinOp, l: &VbaValue, r: &VbaValue, mode: CompareMode) -> Result<VbaValue, ValueError> {
    match coercion_rule(op, l.kind(), r.kind()) {
        Coercion::Mismatch => Err(mismatch(op, l, r)),
        Coercion::Null => Ok(null_logic(op, l, r)),
        Coercion::Identity => Ok(VbaValue::Boolean(match (l, r) {
            (VbaValue::Nothing, VbaValue::Nothing) => true,
            (VbaValue::Object(a), VbaValue::Object(b)) => a.ptr_eq(b),
            _ => false,
        })),
        Coercion::Concat => {
            if matches!((l, r), (VbaValue::Null, VbaValue::Null)) {
                return Ok(VbaValue::Null);
            }
            let text = |v: &VbaValue| match v {
                VbaValue::Null => Ok(String::new()),
                other => other.to_string_value(),
            };
            let (l, r) = (text(l)?, text(r)?);
            check_string_length(l.len() + r.len())?;
            Ok(VbaValue::String(l + &r))
        }
        Coercion::Pattern => Ok(VbaValue::Boolean(like(
            &l.to_string_value()?,
            &r.to_string_value()?,
            mode,
        )?)),
        Coercion::CompareNumeric | Coercion::CompareString | Coercion::CompareMixed => {
            match compare(l, r, mode)? {
                Some(ordering) => Ok(VbaValue::Boolean(comparison_holds(op, ordering))),
                None => Ok(VbaValue::Null),
            }
        }
        Coercion::Logical => {
            let (a, b) = (l.to_bool()?, r.to_bool()?);
            Ok(VbaValue::Boolean(match op {
                BinOp::And => a && b,
                BinOp::Or => a || b,
                BinOp::Xor => a != b,
                BinOp::Eqv => a == b,
                _ => !a || b,
            }))
        }
        Coercion::Bitwise(kind) => {
            let (a, b) = (l.to_i64()?, r.to_i64()?);
            let v = match op {
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
                BinOp::Eqv => !(a ^ b),
                _ => !a | b,
            };
            let v = if kind == ValueKind::Byte { v & 0xFF } else { v };
            integral_value(kind, v)
        }
        Coercion::Integral(kind) => integral_arith(op, kind, l, r),
        Coercion::Floating(kind) => floating_arith(op, kind, l.to_f64()?, r.to_f64()?),
        Coercion::Currency => {
            let v = match floating_arith(op, ValueKind::Double, l.to_f64()?, r.to_f64()?)? {
                VbaValue::Double(v) => v,
                other => other.to_f64()?,
            };
            Ok(VbaValue::Currency(to_currency(v)?))
        }
        Coercion::Date => {
            let (a, b) = (l.to_f64()?, r.to_f64()?);
            let v = if op == BinOp::Sub { a - b } else { a + b };
            if !(-657_434.0..2_958_466.0).contains(&v) {
                return Err(ValueError::Overflow);
            }
            Ok(VbaValue::Date(v))
        }
    }
}

fn mismatch(op: BinOp, l: &VbaValue, r: &VbaValue) -> ValueError {
    ValueError::TypeMismatch(format!(
        "{} {} {}",
        l.kind().name(),
        op.symbol(),
        r.kind().name()
    ))
}

fn comparison_holds(op: BinOp, ordering: Ordering) -> bool {
    match op {
        BinOp::Eq => ordering == Ordering::Equal,
        BinOp::Ne => ordering != Ordering::Equal,
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    }
}

/// Three-valued logic: `Null And False` is False, `Null Or True` is True, and so on.
/// Every other operator with a Null operand yields Null.
fn null_logic(op: BinOp, l: &VbaValue, r: &VbaValue) -> VbaValue {
    let bits = |v: &VbaValue| match v {
        VbaValue::Null => None,
        other => other.to_i64().ok(),
    };
    let (a, b) = (bits(l), bits(r));
    let known = if a.is_some() { l } else { r };
    match op {
        BinOp::And if a == Some(0) || b == Some(0) => known.clone(),
        BinOp::Or if a == Some(-1) || b == Some(-1) => known.clone(),
        BinOp::Imp if b == Some(-1) => r.clone(),
        BinOp::Imp if a == Some(0) => match l {
            VbaValue::Boolean(_) => VbaValue::Boolean(true),
            _ => integral_value(integral_kind(l.kind(), l.kind()), -1).unwrap_or(VbaValue::Null),
        },
        _ => VbaValue::Null,
    }
}

fn integral_value(kind: ValueKind, v: i64) -> Result<VbaValue, ValueError> {
    Ok(match kind {
        ValueKind::Byte => VbaValue::Byte(u8::try_from(v).map_err(|_| ValueError::Overflow)?),
        ValueKind::Integer => {
            VbaValue::Integer(i16::try_from(v).map_err(|_| ValueError::Overflow)?)
        }
        ValueKind::Long => VbaValue::Long(i32::try_from(v).map_err(|_| ValueError::Overflow)?),
        _ => VbaValue::LongLong(v),
    })
}

fn integral_arith(
    op: BinOp,
    kind: ValueKind,
    l: &VbaValue,
    r: &VbaValue,
) -> Result<VbaValue, ValueError> {
    let (a, b) = (l.to_i64()?, r.to_i64()?);
    let v = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::IntDiv | BinOp::Mod if b == 0 => return Err(ValueError::DivisionByZero),
        BinOp::IntDiv => a.checked_div(b),
        BinOp::Mod => a.checked_rem(b),
        _ => return floating_arith(op, ValueKind::Double, a as f64, b as f64),
    };
    integral_value(kind, v.ok_or(ValueError::Overflow)?)
}

fn floating_arith(op: BinOp, kind: ValueKind, a: f64, b: f64) -> Result<VbaValue, ValueError> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 && a == 0.0 => return Err(ValueError::Overflow),
        BinOp::Div if b == 0.0 => return Err(ValueError::DivisionByZero),
        BinOp::Div => a / b,
        BinOp::Pow => {
            if a < 0.0 && b.fract() != 0.0 {
                return Err(ValueError::InvalidArgument);
            }
            if a == 0.0 && b < 0.0 {
                return Err(ValueError::DivisionByZero);
            }
            a.powf(b)
        }
        BinOp::IntDiv | BinOp::Mod => {
            let (a, b) = (round_bankers(a), round_bankers(b));
            if b == 0.0 {
                return Err(ValueError::DivisionByZero);
            }
            if op == BinOp::IntDiv {
                (a / b).trunc()
            } else {
                a % b
            }
        }
        _ => return Err(ValueError::InvalidArgument),
    };
    if !v.is_finite() {
        return Err(ValueError::Overflow);
    }
    if kind == ValueKind::Single {
        if v.abs() > f64::from(f32::MAX) {
            return Err(ValueError::Overflow);
        }
        return Ok(VbaValue::Single(v as f32));
    }
    Ok(VbaValue::Double(v))
}

/// Orders two values following the coercion ladder. `None` when either operand is Null.
pub fn compare(l: &VbaValue, r: &VbaValue, mode: CompareMode) -> Result<Option<Ordering>, ValueError> {
    let numeric = |a: f64, b: f64| a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match coercion_rule(BinOp::Eq, l.kind(), r.kind()) {
        Coercion::Null => Ok(None),
        Coercion::Mismatch => Err(mismatch(BinOp::Eq, l, r)),
        Coercion::CompareString => Ok(Some(compare_strings(
            &l.to_string_value()?,
            &r.to_string_value()?,
            mode,
        ))),
        Coercion::CompareMixed => {
            let (text, number, flipped) = match (l, r) {
                (VbaValue::String(s), other) => (s, other, false),
                (other, VbaValue::String(s)) => (s, other, true),
                _ => return Err(mismatch(BinOp::Eq, l, r)),
            };
            // A string that does not read as a number cannot be ordered against one.
            let n = parse_numeric_str(text).ok_or_else(|| mismatch(BinOp::Eq, l, r))?;
            let ordering = numeric(n, number.to_f64()?);
            Ok(Some(if flipped { ordering.reverse() } else { ordering }))
        }
        _ => Ok(Some(numeric(l.to_f64()?, r.to_f64()?))),
    }
}

pub fn compare_strings(a: &str, b: &str, mode: CompareMode) -> Ordering {
    match mode {
        CompareMode::Binary => a.encode_utf16().cmp(b.encode_utf16()),
        CompareMode::Text => a
            .to_lowercase()
            .encode_utf16()
            .cmp(b.to_lowercase().encode_utf16()),
    }
}

/// `text Like pattern`: `*`, `?`, `#`, and `[...]` / `[!...]` character lists.
pub fn like(text: &str, pattern: &str, mode: CompareMode) -> Result<bool, ValueError> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '#' => re.push_str("[0-9]"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                let mut first = true;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '!' if first => class.push('^'),
                        '-' => class.push('-'),
                        '\\' | '^' | '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(c);
                        }
                        c => class.push(c),
                    }
                    first = false;
                }
                if !closed {
                    return Err(ValueError::InvalidArgument);
                }
                if class.is_empty() {
                    // `[]` matches the empty string.
                    continue;
                }
                re.push('[');
                re.push_str(&class);
                re.push(']');
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    let re = RegexBuilder::new(&re)
        .dot_matches_new_line(true)
        .case_insensitive(mode == CompareMode::Text)
        .build()
        .map_err(|_| ValueError::InvalidArgument)?;
    Ok(re.is_match(text))
}

pub fn unary(op: UnOp, v: &VbaValue) -> Result<VbaValue, ValueError> {
    match op {
        UnOp::Plus => match v {
            VbaValue::Object(_) | VbaValue::Array(_) | VbaValue::Nothing => {
                Err(ValueError::mismatch(v, "Double"))
            }
            other => Ok(other.clone()),
        },
        UnOp::Neg => negate(v),
        UnOp::Not => not(v),
    }
}

fn negate(v: &VbaValue) -> Result<VbaValue, ValueError> {
    Ok(match v {
        VbaValue::Null => VbaValue::Null,
        VbaValue::Empty => VbaValue::Integer(0),
        VbaValue::Boolean(b) => VbaValue::Integer(if *b { 1 } else { 0 }),
        VbaValue::Byte(b) => VbaValue::Integer(-i16::from(*b)),
        VbaValue::Integer(i) => VbaValue::Integer(i.checked_neg().ok_or(ValueError::Overflow)?),
        VbaValue::Long(i) => VbaValue::Long(i.checked_neg().ok_or(ValueError::Overflow)?),
        VbaValue::LongLong(i) => VbaValue::LongLong(i.checked_neg().ok_or(ValueError::Overflow)?),
        VbaValue::Currency(c) => VbaValue::Currency(c.checked_neg().ok_or(ValueError::Overflow)?),
        VbaValue::Single(f) => VbaValue::Single(-f),
        VbaValue::Double(f) => VbaValue::Double(-f),
        VbaValue::Date(f) => VbaValue::Date(-f),
        VbaValue::String(_) => VbaValue::Double(-v.to_f64()?),
        other => return Err(ValueError::mismatch(other, "Double")),
    })
}

fn not(v: &VbaValue) -> Result<VbaValue, ValueError> {
    Ok(match v {
        VbaValue::Null => VbaValue::Null,
        VbaValue::Boolean(b) => VbaValue::Boolean(!b),
        VbaValue::Empty => VbaValue::Integer(-1),
        VbaValue::Byte(b) => VbaValue::Byte(!b),
        VbaValue::Integer(i) => VbaValue::Integer(!i),
        VbaValue::Long(i) => VbaValue::Long(!i),
        VbaValue::LongLong(i) => VbaValue::LongLong(!i),
        VbaValue::Single(_)
        | VbaValue::Double(_)
        | VbaValue::Currency(_)
        | VbaValue::Date(_)
        | VbaValue::String(_) => VbaValue::Long(!v.to_i32()?),
        other => return Err(ValueError::mismatch(other, "Long")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: BinOp, l: VbaValue, r: VbaValue) -> Result<VbaValue, ValueError> {
        binary(op, &l, &r, CompareMode::Binary)
    }

    #[test]
    fn rule_table_picks_concatenation_for_string_addition() {
        assert_eq!(
            coercion_rule(BinOp::Add, ValueKind::String, ValueKind::String),
            Coercion::Concat
        );
        assert_eq!(
            coercion_rule(BinOp::Add, ValueKind::String, ValueKind::Integer),
            Coercion::Floating(ValueKind::Double)
        );
        assert_eq!(
            coercion_rule(BinOp::Add, ValueKind::Integer, ValueKind::Long),
            Coercion::Integral(ValueKind::Long)
        );
        assert_eq!(
            coercion_rule(BinOp::Mul, ValueKind::Single, ValueKind::Long),
            Coercion::Floating(ValueKind::Double)
        );
        assert_eq!(
            coercion_rule(BinOp::Eq, ValueKind::Null, ValueKind::Integer),
            Coercion::Null
        );
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert_eq!(
            eval(BinOp::Mul, VbaValue::Integer(200), VbaValue::Integer(200)),
            Err(ValueError::Overflow)
        );
        assert_eq!(
            eval(BinOp::Add, VbaValue::Integer(1), VbaValue::Long(2)),
            Ok(VbaValue::Long(3))
        );
    }

    #[test]
    fn division_rules() {
        assert_eq!(
            eval(BinOp::Div, VbaValue::Integer(1), VbaValue::Integer(0)),
            Err(ValueError::DivisionByZero)
        );
        assert_eq!(
            eval(BinOp::IntDiv, VbaValue::Double(7.5), VbaValue::Integer(2)),
            Ok(VbaValue::Long(4))
        );
        assert_eq!(
            eval(BinOp::Mod, VbaValue::Integer(-7), VbaValue::Integer(3)),
            Ok(VbaValue::Integer(-1))
        );
    }

    #[test]
    fn strings_compare_with_numbers() {
        assert_eq!(
            eval(BinOp::Eq, VbaValue::from("10"), VbaValue::Integer(10)),
            Ok(VbaValue::Boolean(true))
        );
        assert_eq!(
            eval(BinOp::Eq, VbaValue::Empty, VbaValue::Integer(0)),
            Ok(VbaValue::Boolean(true))
        );
        assert_eq!(
            eval(BinOp::Gt, VbaValue::from(" 7 "), VbaValue::Double(6.5)),
            Ok(VbaValue::Boolean(true))
        );
    }

    #[test]
    fn non_numeric_strings_do_not_order_against_numbers() {
        for (op, text) in [(BinOp::Lt, "+"), (BinOp::Gt, "abc"), (BinOp::Eq, "5x")] {
            let number = VbaValue::Integer(9);
            let err = eval(op, VbaValue::from(text), number.clone()).unwrap_err();
            assert_eq!(err.number(), 13, "{text}");
            let err = eval(op, number, VbaValue::from(text)).unwrap_err();
            assert_eq!(err.number(), 13, "{text}");
        }
        assert_eq!(
            eval(BinOp::Lt, VbaValue::from("abc"), VbaValue::from("5")),
            Ok(VbaValue::Boolean(false))
        );
    }

    #[test]
    fn null_propagates_and_short_circuits_logic() {
        assert_eq!(
            eval(BinOp::Add, VbaValue::Null, VbaValue::Integer(1)),
            Ok(VbaValue::Null)
        );
        assert_eq!(
            eval(BinOp::And, VbaValue::Null, VbaValue::Boolean(false)),
            Ok(VbaValue::Boolean(false))
        );
        assert_eq!(
            eval(BinOp::Or, VbaValue::Null, VbaValue::Boolean(true)),
            Ok(VbaValue::Boolean(true))
        );
        assert_eq!(
            eval(BinOp::Concat, VbaValue::Null, VbaValue::from("x")),
            Ok(VbaValue::from("x"))
        );
    }

    #[test]
    fn like_patterns() {
        assert!(like("abc123", "a*#", CompareMode::Binary).unwrap());
        assert!(like("b", "[a-c]", CompareMode::Binary).unwrap());
        assert!(!like("b", "[!a-c]", CompareMode::Binary).unwrap());
        assert!(like("ABC", "a?c", CompareMode::Text).unwrap());
        assert!(!like("ABC", "a?c", CompareMode::Binary).unwrap());
        assert_eq!(like("x", "[a", CompareMode::Binary), Err(ValueError::InvalidArgument));
    }

    #[test]
    fn not_is_bitwise_on_numbers() {
        assert_eq!(unary(UnOp::Not, &VbaValue::Integer(0)), Ok(VbaValue::Integer(-1)));
        assert_eq!(unary(UnOp::Not, &VbaValue::Boolean(true)), Ok(VbaValue::Boolean(false)));
        assert_eq!(unary(UnOp::Neg, &VbaValue::Integer(i16::MIN)), Err(ValueError::Overflow));
    }
}
