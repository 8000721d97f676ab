//! The global built-in scope: constants, pure library functions, host-routed functions and
//! host globals.
//!
//! A [`BuiltinScope`] is built once, never mutated afterwards, and shared between runtimes
//! through an `Arc`. Constants are stored as literals and functions as plain `fn` pointers, so
//! the table holds no interpreter state.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};

use crate::ast::{Literal, VbaType};
use crate::environment::HostCallKind;
use crate::operators::{compare_strings, CompareMode};
use crate::value::{
    check_string_length, checked_date, coerce_to_type, datetime_to_ole_date, format_number,
    ole_date_to_datetime, parse_date_string, parse_numeric_str, round_bankers, ValueError,
    VbaArray, VbaValue,
};

pub type PureFn = fn(&[VbaValue]) -> Result<VbaValue, ValueError>;

/// Built-ins that need interpreter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `Array(...)` honours the calling module's `Option Base`.
    Array,
    Rnd,
    Randomize,
    Now,
    Date,
    Time,
    Timer,
    CallByName,
}

#[derive(Clone, Copy)]
pub enum Builtin {
    Pure(PureFn),
    /// Forwarded to the environment with this call kind; never implemented by the core.
    Host(HostCallKind),
    Intrinsic(Intrinsic),
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Builtin::Pure(_) => f.write_str("Pure(..)"),
            Builtin::Host(kind) => write!(f, "Host({kind:?})"),
            Builtin::Intrinsic(intrinsic) => write!(f, "Intrinsic({intrinsic:?})"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuiltinScope {
    constants: HashMap<String, Literal>,
    functions: HashMap<String, Builtin>,
    host_globals: HashSet<String>,
}

const HOST_FUNCTIONS: &[&str] = &[
    "MsgBox", "InputBox", "Shell", "Environ", "Dir", "Kill", "FileCopy", "MkDir", "RmDir",
    "SetAttr", "FileLen", "CurDir", "SendKeys", "AppActivate", "Beep",
];

const HOST_GLOBALS: &[&str] = &[
    "Application", "ActiveDocument", "ThisDocument", "ThisWorkbook", "ActiveWorkbook",
    "ActiveSheet", "Documents", "Workbooks", "Selection",
];

fn str_lit(s: &str) -> Literal {
    Literal::String(s.to_string())
}

impl BuiltinScope {
    /// A scope with no entries, for embedders that assemble their own table.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut scope = Self::default();

        let strings = [
            ("vbCrLf", "\r\n"),
            ("vbCr", "\r"),
            ("vbLf", "\n"),
            ("vbNewLine", "\r\n"),
            ("vbTab", "\t"),
            ("vbNullString", ""),
            ("vbNullChar", "\0"),
            ("vbBack", "\u{8}"),
            ("vbFormFeed", "\u{c}"),
            ("vbVerticalTab", "\u{b}"),
        ];
        for (name, value) in strings {
            scope = scope.with_constant(name, str_lit(value));
        }
        scope = scope
            .with_constant("vbTrue", Literal::Integer(-1))
            .with_constant("vbFalse", Literal::Integer(0))
            .with_constant("vbObjectError", Literal::Long(-2_147_221_504));

        let integers: &[(&str, i16)] = &[
            ("vbBinaryCompare", 0),
            ("vbTextCompare", 1),
            ("vbUpperCase", 1),
            ("vbLowerCase", 2),
            ("vbProperCase", 3),
            ("vbUnicode", 64),
            ("vbFromUnicode", 128),
            ("vbHide", 0),
            ("vbNormalFocus", 1),
            ("vbMinimizedFocus", 2),
            ("vbMaximizedFocus", 3),
            ("vbNormalNoFocus", 4),
            ("vbMinimizedNoFocus", 6),
            ("vbOKOnly", 0),
            ("vbOKCancel", 1),
            ("vbYesNo", 4),
            ("vbOK", 1),
            ("vbCancel", 2),
            ("vbYes", 6),
            ("vbNo", 7),
            ("vbCritical", 16),
            ("vbQuestion", 32),
            ("vbExclamation", 48),
            ("vbInformation", 64),
            ("vbSunday", 1),
            ("vbMonday", 2),
            ("vbEmpty", 0),
            ("vbNull", 1),
            ("vbInteger", 2),
            ("vbLong", 3),
            ("vbSingle", 4),
            ("vbDouble", 5),
            ("vbCurrency", 6),
            ("vbDate", 7),
            ("vbString", 8),
            ("vbObject", 9),
            ("vbError", 10),
            ("vbBoolean", 11),
            ("vbVariant", 12),
            ("vbByte", 17),
            ("vbLongLong", 20),
            ("vbArray", 8192),
        ];
        for &(name, value) in integers {
            scope = scope.with_constant(name, Literal::Integer(value));
        }

        let pure: &[(&str, PureFn)] = &[
            ("Chr", chr),
            ("ChrB", chr),
            ("ChrW", chrw),
            ("Asc", asc),
            ("AscB", ascb),
            ("AscW", asc),
            ("Len", len),
            ("LenB", lenb),
            ("Left", left),
            ("LeftB", left),
            ("Right", right),
            ("RightB", right),
            ("Mid", mid),
            ("MidB", mid),
            ("InStr", instr),
            ("InStrB", instr),
            ("InStrRev", instr_rev),
            ("Replace", replace),
            ("Split", split),
            ("Join", join),
            ("StrReverse", str_reverse),
            ("StrComp", str_comp),
            ("StrConv", str_conv),
            ("UCase", ucase),
            ("LCase", lcase),
            ("Trim", trim),
            ("LTrim", ltrim),
            ("RTrim", rtrim),
            ("Space", space),
            ("String", string_fn),
            ("Val", val),
            ("Str", str_fn),
            ("Hex", hex),
            ("Oct", oct),
            ("Format", format),
            ("CStr", |a| convert(a, &VbaType::String)),
            ("CInt", |a| convert(a, &VbaType::Integer)),
            ("CLng", |a| convert(a, &VbaType::Long)),
            ("CLngLng", |a| convert(a, &VbaType::LongLong)),
            ("CLngPtr", |a| convert(a, &VbaType::LongPtr)),
            ("CByte", |a| convert(a, &VbaType::Byte)),
            ("CSng", |a| convert(a, &VbaType::Single)),
            ("CDbl", |a| convert(a, &VbaType::Double)),
            ("CCur", |a| convert(a, &VbaType::Currency)),
            ("CBool", |a| convert(a, &VbaType::Boolean)),
            ("CDate", |a| convert(a, &VbaType::Date)),
            ("CVDate", |a| convert(a, &VbaType::Date)),
            ("CVar", |a| Ok(required(a, 0)?.clone())),
            ("CVErr", |a| Ok(VbaValue::Error(required(a, 0)?.to_i32()?))),
            ("Abs", abs),
            ("Int", int),
            ("Fix", fix),
            ("Sgn", sgn),
            ("Sqr", |a| math(a, |x| (x >= 0.0).then(|| x.sqrt()))),
            ("Exp", |a| math(a, |x| Some(x.exp()))),
            ("Log", |a| math(a, |x| (x > 0.0).then(|| x.ln()))),
            ("Sin", |a| math(a, |x| Some(x.sin()))),
            ("Cos", |a| math(a, |x| Some(x.cos()))),
            ("Tan", |a| math(a, |x| Some(x.tan()))),
            ("Atn", |a| math(a, |x| Some(x.atan()))),
            ("Round", round),
            ("IsNumeric", is_numeric),
            ("IsEmpty", |a| Ok(matches!(required(a, 0)?, VbaValue::Empty).into())),
            ("IsNull", |a| Ok(matches!(required(a, 0)?, VbaValue::Null).into())),
            ("IsArray", |a| Ok(matches!(required(a, 0)?, VbaValue::Array(_)).into())),
            ("IsObject", |a| Ok(required(a, 0)?.is_object().into())),
            ("IsError", |a| Ok(matches!(required(a, 0)?, VbaValue::Error(_)).into())),
            ("IsDate", is_date),
            ("IsMissing", |a| Ok(a.first().map_or(true, VbaValue::is_missing).into())),
            ("TypeName", |a| Ok(required(a, 0)?.type_name().into())),
            ("VarType", |a| Ok(VbaValue::Integer(required(a, 0)?.var_type() as i16))),
            ("LBound", |a| bound(a, false)),
            ("UBound", |a| bound(a, true)),
            ("IIf", iif),
            ("Choose", choose),
            ("DateSerial", date_serial),
            ("TimeSerial", time_serial),
            ("DateValue", |a| Ok(VbaValue::Date(required(a, 0)?.to_date()?.trunc()))),
            ("TimeValue", |a| Ok(VbaValue::Date(required(a, 0)?.to_date()?.fract().abs()))),
            ("DateAdd", date_add_fn),
            ("DateDiff", date_diff_fn),
            ("Year", |a| date_part(a, |d| d.year())),
            ("Month", |a| date_part(a, |d| d.month() as i32)),
            ("Day", |a| date_part(a, |d| d.day() as i32)),
            ("Hour", |a| date_part(a, |d| d.hour() as i32)),
            ("Minute", |a| date_part(a, |d| d.minute() as i32)),
            ("Second", |a| date_part(a, |d| d.second() as i32)),
            ("Weekday", weekday),
            ("DoEvents", |_| Ok(VbaValue::Integer(0))),
            ("RGB", rgb),
        ];
        for &(name, f) in pure {
            scope = scope.with_function(name, Builtin::Pure(f));
        }

        for &name in HOST_FUNCTIONS {
            scope = scope.with_function(name, Builtin::Host(HostCallKind::Function));
        }
        scope = scope
            .with_function("CreateObject", Builtin::Host(HostCallKind::CreateObject))
            .with_function("GetObject", Builtin::Host(HostCallKind::GetObject));

        let intrinsics = [
            ("Array", Intrinsic::Array),
            ("Rnd", Intrinsic::Rnd),
            ("Randomize", Intrinsic::Randomize),
            ("Now", Intrinsic::Now),
            ("Date", Intrinsic::Date),
            ("Time", Intrinsic::Time),
            ("Timer", Intrinsic::Timer),
            ("CallByName", Intrinsic::CallByName),
        ];
        for (name, intrinsic) in intrinsics {
            scope = scope.with_function(name, Builtin::Intrinsic(intrinsic));
        }

        for &name in HOST_GLOBALS {
            scope = scope.with_host_global(name);
        }
        scope
    }

    pub fn with_constant(mut self, name: &str, value: Literal) -> Self {
        self.constants.insert(name.to_ascii_lowercase(), value);
        self
    }

    pub fn with_function(mut self, name: &str, builtin: Builtin) -> Self {
        self.functions.insert(name.to_ascii_lowercase(), builtin);
        self
    }

    pub fn with_host_global(mut self, name: &str) -> Self {
        self.host_globals.insert(name.to_ascii_lowercase());
        self
    }

    pub fn constant(&self, name: &str) -> Option<VbaValue> {
        self.constants
            .get(&name.to_ascii_lowercase())
            .map(VbaValue::from_literal)
    }

    /// Looks a function up; a trailing `$` is ignored.
    pub fn function(&self, name: &str) -> Option<Builtin> {
        let name = name.strip_suffix('$').unwrap_or(name);
        self.functions.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn is_host_global(&self, name: &str) -> bool {
        self.host_globals.contains(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constant(name).is_some() || self.function(name).is_some() || self.is_host_global(name)
    }
}

fn arg(args: &[VbaValue], index: usize) -> Option<&VbaValue> {
    args.get(index).filter(|v| !v.is_missing())
}

fn required(args: &[VbaValue], index: usize) -> Result<&VbaValue, ValueError> {
    arg(args, index).ok_or(ValueError::InvalidArgument)
}

fn string_arg(args: &[VbaValue], index: usize) -> Result<String, ValueError> {
    required(args, index)?.to_string_value()
}

fn int_arg(args: &[VbaValue], index: usize) -> Result<i64, ValueError> {
    required(args, index)?.to_i64()
}

fn opt_int(args: &[VbaValue], index: usize, default: i64) -> Result<i64, ValueError> {
    arg(args, index).map_or(Ok(default), VbaValue::to_i64)
}

fn compare_arg(args: &[VbaValue], index: usize) -> Result<CompareMode, ValueError> {
    Ok(match opt_int(args, index, 0)? {
        1 => CompareMode::Text,
        _ => CompareMode::Binary,
    })
}

fn is_null(args: &[VbaValue], index: usize) -> bool {
    matches!(args.get(index), Some(VbaValue::Null))
}

/// Non-negative count argument such as the length of `Left`.
fn count_arg(args: &[VbaValue], index: usize) -> Result<usize, ValueError> {
    usize::try_from(int_arg(args, index)?).map_err(|_| ValueError::InvalidArgument)
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn fold(s: &str, mode: CompareMode) -> Vec<char> {
    match mode {
        CompareMode::Binary => chars(s),
        CompareMode::Text => s.chars().flat_map(char::to_lowercase).collect(),
    }
}

/// 0-based char index of `needle` in `hay` at or after `from`.
fn find_from(hay: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.len() > hay.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()] == *needle)
}

fn chr(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let code = int_arg(args, 0)?;
    let byte = u8::try_from(code).map_err(|_| ValueError::InvalidArgument)?;
    Ok(VbaValue::String(char::from(byte).to_string()))
}

fn chrw(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let code = int_arg(args, 0)?;
    let code = if (-32768..0).contains(&code) { code + 65536 } else { code };
    let ch = u32::try_from(code)
        .ok()
        .filter(|&c| c <= 0xFFFF)
        .and_then(char::from_u32)
        .ok_or(ValueError::InvalidArgument)?;
    Ok(VbaValue::String(ch.to_string()))
}

fn asc(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let s = string_arg(args, 0)?;
    let unit = s.encode_utf16().next().ok_or(ValueError::InvalidArgument)?;
    Ok(VbaValue::Integer(unit as i16))
}

fn ascb(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let s = string_arg(args, 0)?;
    let unit = s.encode_utf16().next().ok_or(ValueError::InvalidArgument)?;
    Ok(VbaValue::Integer((unit & 0xFF) as i16))
}

fn len(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::Long(string_arg(args, 0)?.encode_utf16().count() as i32))
}

fn lenb(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    match len(args)? {
        VbaValue::Long(n) => Ok(VbaValue::Long(n * 2)),
        other => Ok(other),
    }
}

fn left(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let s = string_arg(args, 0)?;
    let n = count_arg(args, 1)?;
    Ok(VbaValue::String(s.chars().take(n).collect()))
}

fn right(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let s = chars(&string_arg(args, 0)?);
    let n = count_arg(args, 1)?.min(s.len());
    Ok(VbaValue::String(s[s.len() - n..].iter().collect()))
}

fn mid(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let s = chars(&string_arg(args, 0)?);
    let start = int_arg(args, 1)?;
    if start < 1 {
        return Err(ValueError::InvalidArgument);
    }
    let from = (start as usize - 1).min(s.len());
    let take = match arg(args, 2) {
        Some(n) => usize::try_from(n.to_i64()?).map_err(|_| ValueError::InvalidArgument)?,
        None => s.len(),
    };
    Ok(VbaValue::String(s[from..].iter().take(take).collect()))
}

fn instr(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let (start, first, mode_at) = if args.len() >= 3 {
        (int_arg(args, 0)?, 1, 3)
    } else {
        (1, 0, 2)
    };
    if start < 1 {
        return Err(ValueError::InvalidArgument);
    }
    if is_null(args, first) || is_null(args, first + 1) {
        return Ok(VbaValue::Null);
    }
    let mode = compare_arg(args, mode_at)?;
    let hay = fold(&string_arg(args, first)?, mode);
    let needle = fold(&string_arg(args, first + 1)?, mode);
    let from = start as usize - 1;
    if from > hay.len() {
        return Ok(VbaValue::Long(0));
    }
    if needle.is_empty() {
        return Ok(VbaValue::Long(start as i32));
    }
    Ok(VbaValue::Long(
        find_from(&hay, &needle, from).map_or(0, |i| i as i32 + 1),
    ))
}

fn instr_rev(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) || is_null(args, 1) {
        return Ok(VbaValue::Null);
    }
    let mode = compare_arg(args, 3)?;
    let hay = fold(&string_arg(args, 0)?, mode);
    let needle = fold(&string_arg(args, 1)?, mode);
    let start = opt_int(args, 2, -1)?;
    if start == 0 || start < -1 {
        return Err(ValueError::InvalidArgument);
    }
    let end = if start == -1 { hay.len() } else { (start as usize).min(hay.len()) };
    if needle.is_empty() {
        return Ok(VbaValue::Long(end as i32));
    }
    if needle.len() > end {
        return Ok(VbaValue::Long(0));
    }
    let found = (0..=end - needle.len())
        .rev()
        .find(|&i| hay[i..i + needle.len()] == *needle);
    Ok(VbaValue::Long(found.map_or(0, |i| i as i32 + 1)))
}

fn replace(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let source = chars(&string_arg(args, 0)?);
    let find = string_arg(args, 1)?;
    let replacement = string_arg(args, 2)?;
    let start = opt_int(args, 3, 1)?;
    let mut count = opt_int(args, 4, -1)?;
    let mode = compare_arg(args, 5)?;
    if start < 1 || count < -1 {
        return Err(ValueError::InvalidArgument);
    }
    // The result begins at `start`.
    let source: Vec<char> = source.into_iter().skip(start as usize - 1).collect();
    let needle = fold(&find, mode);
    if needle.is_empty() || count == 0 {
        return Ok(VbaValue::String(source.iter().collect()));
    }
    let folded: Vec<char> = match mode {
        CompareMode::Binary => source.clone(),
        CompareMode::Text => source
            .iter()
            .map(|c| c.to_lowercase().next().unwrap_or(*c))
            .collect(),
    };
    let mut out = String::new();
    let mut i = 0;
    while i < source.len() {
        if count != 0 && folded.len() >= i + needle.len() && folded[i..i + needle.len()] == *needle
        {
            out.push_str(&replacement);
            check_string_length(out.len())?;
            i += needle.len();
            count -= 1;
        } else {
            out.push(source[i]);
            i += 1;
        }
    }
    Ok(VbaValue::String(out))
}

fn string_array(values: Vec<String>) -> VbaValue {
    let values = values.into_iter().map(VbaValue::String).collect();
    VbaValue::Array(VbaArray::from_values(0, values).into_ref())
}

fn split(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let text = string_arg(args, 0)?;
    let delimiter = match arg(args, 1) {
        Some(d) => d.to_string_value()?,
        None => " ".to_string(),
    };
    let limit = opt_int(args, 2, -1)?;
    if text.is_empty() {
        return Ok(string_array(Vec::new()));
    }
    if delimiter.is_empty() {
        return Ok(string_array(vec![text]));
    }
    let parts: Vec<String> = if limit > 0 {
        text.splitn(limit as usize, delimiter.as_str())
            .map(str::to_string)
            .collect()
    } else {
        text.split(delimiter.as_str()).map(str::to_string).collect()
    };
    Ok(string_array(parts))
}

fn join(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let arr = required(args, 0)?
        .as_array()
        .ok_or_else(|| ValueError::mismatch(&args[0], "Array"))?;
    let delimiter = match arg(args, 1) {
        Some(d) => d.to_string_value()?,
        None => " ".to_string(),
    };
    let parts = arr
        .borrow()
        .values()
        .iter()
        .map(VbaValue::to_string_value)
        .collect::<Result<Vec<_>, _>>()?;
    let delimiters = delimiter.len().saturating_mul(parts.len().saturating_sub(1));
    check_string_length(parts.iter().map(String::len).fold(delimiters, usize::saturating_add))?;
    Ok(VbaValue::String(parts.join(&delimiter)))
}

fn str_reverse(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    Ok(VbaValue::String(string_arg(args, 0)?.chars().rev().collect()))
}

fn str_comp(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) || is_null(args, 1) {
        return Ok(VbaValue::Null);
    }
    let ordering = compare_strings(
        &string_arg(args, 0)?,
        &string_arg(args, 1)?,
        compare_arg(args, 2)?,
    );
    Ok(VbaValue::Integer(ordering as i16))
}

fn proper_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if at_word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        at_word_start = !ch.is_alphanumeric();
    }
    out
}

fn str_conv(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let conversion = int_arg(args, 1)?;
    let value = required(args, 0)?;
    if let VbaValue::Array(arr) = value {
        if conversion & 64 == 0 {
            return Err(ValueError::mismatch(value, "String"));
        }
        let bytes = arr
            .borrow()
            .values()
            .iter()
            .map(|v| v.to_i64().map(|b| (b & 0xFF) as u8 as char))
            .collect::<Result<String, _>>()?;
        return Ok(VbaValue::String(bytes));
    }
    let s = value.to_string_value()?;
    Ok(match conversion {
        c if c & 3 == 1 => VbaValue::String(s.to_uppercase()),
        c if c & 3 == 2 => VbaValue::String(s.to_lowercase()),
        c if c & 3 == 3 => VbaValue::String(proper_case(&s)),
        128 => {
            let bytes = s
                .encode_utf16()
                .map(|u| VbaValue::Byte((u & 0xFF) as u8))
                .collect::<Vec<_>>();
            let upper = bytes.len() as i32 - 1;
            let mut arr = VbaArray::new(vec![(0, upper)], VbaType::Byte)?;
            for (i, byte) in bytes.into_iter().enumerate() {
                arr.set(&[i as i32], byte)?;
            }
            VbaValue::Array(arr.into_ref())
        }
        _ => VbaValue::String(s),
    })
}

fn ucase(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::String(string_arg(args, 0)?.to_uppercase()))
}

fn lcase(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::String(string_arg(args, 0)?.to_lowercase()))
}

fn trim_with(args: &[VbaValue], f: fn(&str) -> &str) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::String(f(&string_arg(args, 0)?).to_string()))
}

fn trim(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    trim_with(args, |s| s.trim_matches(' '))
}

fn ltrim(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    trim_with(args, |s| s.trim_start_matches(' '))
}

fn rtrim(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    trim_with(args, |s| s.trim_end_matches(' '))
}

fn space(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let n = count_arg(args, 0)?;
    check_string_length(n)?;
    Ok(VbaValue::String(" ".repeat(n)))
}

fn string_fn(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let n = count_arg(args, 0)?;
    let ch = match required(args, 1)? {
        VbaValue::String(s) => s.chars().next().ok_or(ValueError::InvalidArgument)?,
        other => {
            let code = other.to_i64()?.rem_euclid(256) as u8;
            char::from(code)
        }
    };
    check_string_length(n.saturating_mul(ch.len_utf8()))?;
    Ok(VbaValue::String(std::iter::repeat(ch).take(n).collect()))
}

/// `Val`: the longest numeric prefix, ignoring blanks anywhere in the string.
fn val(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let text: String = string_arg(args, 0)?
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\r'))
        .collect();
    let lower = text.to_ascii_lowercase();
    if let Some(digits) = lower.strip_prefix("&h") {
        let digits: String = digits.chars().take_while(char::is_ascii_hexdigit).collect();
        let v = i64::from_str_radix(&digits, 16).unwrap_or(0);
        return Ok(VbaValue::Double(v as f64));
    }
    if let Some(digits) = lower.strip_prefix("&o") {
        let digits: String = digits.chars().take_while(|c| ('0'..='7').contains(c)).collect();
        let v = i64::from_str_radix(&digits, 8).unwrap_or(0);
        return Ok(VbaValue::Double(v as f64));
    }
    let mut best = 0.0;
    for end in (1..=text.len()).rev() {
        if !text.is_char_boundary(end) {
            continue;
        }
        if let Some(v) = parse_numeric_str(&text[..end]) {
            best = v;
            break;
        }
    }
    if !best.is_finite() {
        return Err(ValueError::Overflow);
    }
    Ok(VbaValue::Double(best))
}

fn str_fn(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let value = required(args, 0)?;
    let text = value.to_string_value()?;
    if value.to_f64()? >= 0.0 {
        return Ok(VbaValue::String(format!(" {text}")));
    }
    Ok(VbaValue::String(text))
}

/// Two's complement in the narrowest of Integer/Long/LongLong that holds the value.
fn radix_bits(value: &VbaValue) -> Result<u64, ValueError> {
    let v = value.to_i64()?;
    Ok(match value {
        VbaValue::Integer(i) => u64::from(*i as u16),
        VbaValue::Byte(b) => u64::from(*b),
        VbaValue::LongLong(_) => v as u64,
        _ if i32::try_from(v).is_ok() => u64::from(v as i32 as u32),
        _ => return Err(ValueError::Overflow),
    })
}

fn hex(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::String(format!("{:X}", radix_bits(required(args, 0)?)?)))
}

fn oct(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::String(format!("{:o}", radix_bits(required(args, 0)?)?)))
}

fn convert(args: &[VbaValue], ty: &VbaType) -> Result<VbaValue, ValueError> {
    let value = required(args, 0)?;
    if matches!(value, VbaValue::Null) {
        return Err(ValueError::InvalidUseOfNull);
    }
    coerce_to_type(value.clone(), ty)
}

fn abs(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    Ok(match required(args, 0)? {
        VbaValue::Null => VbaValue::Null,
        VbaValue::Empty => VbaValue::Integer(0),
        VbaValue::Byte(b) => VbaValue::Byte(*b),
        VbaValue::Integer(i) => VbaValue::Integer(i.checked_abs().ok_or(ValueError::Overflow)?),
        VbaValue::Long(i) => VbaValue::Long(i.checked_abs().ok_or(ValueError::Overflow)?),
        VbaValue::LongLong(i) => VbaValue::LongLong(i.checked_abs().ok_or(ValueError::Overflow)?),
        VbaValue::Single(f) => VbaValue::Single(f.abs()),
        VbaValue::Currency(c) => VbaValue::Currency(c.checked_abs().ok_or(ValueError::Overflow)?),
        VbaValue::Date(d) => VbaValue::Date(d.abs()),
        other => VbaValue::Double(other.to_f64()?.abs()),
    })
}

fn round_toward(args: &[VbaValue], f: fn(f64) -> f64) -> Result<VbaValue, ValueError> {
    Ok(match required(args, 0)? {
        VbaValue::Null => VbaValue::Null,
        VbaValue::Empty => VbaValue::Integer(0),
        v @ (VbaValue::Byte(_) | VbaValue::Integer(_) | VbaValue::Long(_) | VbaValue::LongLong(_)) => {
            v.clone()
        }
        VbaValue::Boolean(b) => VbaValue::Integer(if *b { -1 } else { 0 }),
        VbaValue::Single(x) => VbaValue::Single(f(f64::from(*x)) as f32),
        VbaValue::Currency(c) => VbaValue::Currency(f(*c as f64 / 10_000.0) as i64 * 10_000),
        VbaValue::Date(d) => VbaValue::Date(f(*d)),
        other => VbaValue::Double(f(other.to_f64()?)),
    })
}

fn int(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    round_toward(args, f64::floor)
}

fn fix(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    round_toward(args, f64::trunc)
}

fn sgn(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let v = required(args, 0)?.to_f64()?;
    Ok(VbaValue::Integer(if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }))
}

fn math(args: &[VbaValue], f: fn(f64) -> Option<f64>) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let v = f(required(args, 0)?.to_f64()?).ok_or(ValueError::InvalidArgument)?;
    if !v.is_finite() {
        return Err(ValueError::Overflow);
    }
    Ok(VbaValue::Double(v))
}

fn round(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let digits = opt_int(args, 1, 0)?;
    if !(0..=22).contains(&digits) {
        return Err(ValueError::InvalidArgument);
    }
    let value = required(args, 0)?;
    let scale = 10f64.powi(digits as i32);
    let rounded = round_bankers(value.to_f64()? * scale) / scale;
    Ok(match value {
        VbaValue::Integer(_) | VbaValue::Long(_) | VbaValue::LongLong(_) | VbaValue::Byte(_) => {
            value.clone()
        }
        VbaValue::Single(_) => VbaValue::Single(rounded as f32),
        VbaValue::Currency(_) => VbaValue::Currency((rounded * 10_000.0).round() as i64),
        _ => VbaValue::Double(rounded),
    })
}

fn is_numeric(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let value = required(args, 0)?;
    Ok(VbaValue::Boolean(match value {
        VbaValue::String(s) => parse_numeric_str(s).is_some(),
        VbaValue::Empty | VbaValue::Boolean(_) => true,
        other => other.kind().is_numeric(),
    }))
}

fn is_date(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    Ok(VbaValue::Boolean(match required(args, 0)? {
        VbaValue::Date(_) => true,
        VbaValue::String(s) => parse_date_string(s).is_some(),
        _ => false,
    }))
}

fn bound(args: &[VbaValue], upper: bool) -> Result<VbaValue, ValueError> {
    let value = required(args, 0)?;
    let arr = value
        .as_array()
        .ok_or_else(|| ValueError::mismatch(value, "Array"))?;
    let dim = opt_int(args, 1, 1)?;
    let dim = usize::try_from(dim).map_err(|_| ValueError::SubscriptOutOfRange)?;
    let (lower, up) = arr.borrow().bounds(dim)?;
    Ok(VbaValue::Long(if upper { up } else { lower }))
}

fn iif(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let condition = required(args, 0)?.to_condition()?.unwrap_or(false);
    let index = if condition { 1 } else { 2 };
    Ok(args.get(index).cloned().unwrap_or_default())
}

fn choose(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let index = required(args, 0)?.to_f64()?.trunc();
    if index < 1.0 || index as usize >= args.len() {
        return Ok(VbaValue::Null);
    }
    Ok(args[index as usize].clone())
}

fn rgb(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let channel = |i| int_arg(args, i).map(|v| v.clamp(0, 255) as i32);
    Ok(VbaValue::Long(channel(0)? | channel(1)? << 8 | channel(2)? << 16))
}

fn datetime_arg(args: &[VbaValue], index: usize) -> Result<NaiveDateTime, ValueError> {
    let serial = required(args, index)?.to_date()?;
    ole_date_to_datetime(serial).ok_or(ValueError::Overflow)
}

fn date_part(args: &[VbaValue], f: fn(&NaiveDateTime) -> i32) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    Ok(VbaValue::Integer(f(&datetime_arg(args, 0)?) as i16))
}

fn weekday(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    if is_null(args, 0) {
        return Ok(VbaValue::Null);
    }
    let dt = datetime_arg(args, 0)?;
    let first = opt_int(args, 1, 1)?;
    if !(0..=7).contains(&first) {
        return Err(ValueError::InvalidArgument);
    }
    let first = if first == 0 { 1 } else { first };
    let sunday_based = i64::from(dt.weekday().num_days_from_sunday()) + 1;
    Ok(VbaValue::Integer(((sunday_based - first).rem_euclid(7) + 1) as i16))
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some((first_next - ChronoDuration::days(1)).day())
}

fn add_months(dt: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let date = dt.date();
    let total = i64::from(date.month0()) + months;
    let year = i32::try_from(i64::from(date.year()) + total.div_euclid(12)).ok()?;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(last_day_of_month(year, month)?);
    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_time(dt.time()))
}

fn full_year(year: i64) -> i64 {
    match year {
        0..=29 => 2000 + year,
        30..=99 => 1900 + year,
        _ => year,
    }
}

fn date_serial(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let year = full_year(int_arg(args, 0)?);
    let month = int_arg(args, 1)?;
    let day = int_arg(args, 2)?;
    let year = i32::try_from(year).map_err(|_| ValueError::Overflow)?;
    let base = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or(ValueError::Overflow)?
        .and_hms_opt(0, 0, 0)
        .ok_or(ValueError::Overflow)?;
    let dt = add_months(base, month - 1).ok_or(ValueError::Overflow)?
        + ChronoDuration::try_days(day - 1).ok_or(ValueError::Overflow)?;
    Ok(VbaValue::Date(datetime_to_ole_date(dt)))
}

fn time_serial(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let seconds = int_arg(args, 0)? * 3600 + int_arg(args, 1)? * 60 + int_arg(args, 2)?;
    Ok(VbaValue::Date(seconds as f64 / 86_400.0))
}

fn date_add(interval: &str, number: i64, dt: NaiveDateTime) -> Result<NaiveDateTime, ValueError> {
    let shift = |step: Option<ChronoDuration>| step.and_then(|d| dt.checked_add_signed(d));
    let moved = match interval.to_ascii_lowercase().as_str() {
        "d" | "y" | "w" => shift(ChronoDuration::try_days(number)),
        "ww" => shift(ChronoDuration::try_weeks(number)),
        "h" => shift(ChronoDuration::try_hours(number)),
        "n" => shift(ChronoDuration::try_minutes(number)),
        "s" => shift(ChronoDuration::try_seconds(number)),
        "m" => add_months(dt, number),
        "q" => number.checked_mul(3).and_then(|n| add_months(dt, n)),
        "yyyy" => number.checked_mul(12).and_then(|n| add_months(dt, n)),
        _ => return Err(ValueError::InvalidArgument),
    };
    moved.ok_or(ValueError::Overflow)
}

fn date_diff(interval: &str, d1: NaiveDateTime, d2: NaiveDateTime) -> Option<i64> {
    let delta = d2 - d1;
    let months = |d: &NaiveDateTime| i64::from(d.year()) * 12 + i64::from(d.month0());
    Some(match interval.to_ascii_lowercase().as_str() {
        "d" | "y" => (d2.date() - d1.date()).num_days(),
        "w" => (d2.date() - d1.date()).num_days() / 7,
        "ww" => delta.num_weeks(),
        "h" => delta.num_hours(),
        "n" => delta.num_minutes(),
        "s" => delta.num_seconds(),
        "m" => months(&d2) - months(&d1),
        "q" => months(&d2) / 3 - months(&d1) / 3,
        "yyyy" => i64::from(d2.year()) - i64::from(d1.year()),
        _ => return None,
    })
}

fn date_add_fn(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let interval = string_arg(args, 0)?;
    let number = int_arg(args, 1)?;
    let dt = datetime_arg(args, 2)?;
    let moved = date_add(&interval, number, dt)?;
    Ok(VbaValue::Date(checked_date(datetime_to_ole_date(moved))?))
}

fn date_diff_fn(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let interval = string_arg(args, 0)?;
    let diff = date_diff(&interval, datetime_arg(args, 1)?, datetime_arg(args, 2)?)
        .ok_or(ValueError::InvalidArgument)?;
    Ok(VbaValue::LongLong(diff))
}

fn format(args: &[VbaValue]) -> Result<VbaValue, ValueError> {
    let value = required(args, 0)?;
    if matches!(value, VbaValue::Null) {
        return Ok(VbaValue::String(String::new()));
    }
    let Some(pattern) = arg(args, 1) else {
        return Ok(VbaValue::String(value.to_string_value()?));
    };
    let pattern = pattern.to_string_value()?;
    Ok(VbaValue::String(format_value(value, &pattern)?))
}

fn format_value(value: &VbaValue, pattern: &str) -> Result<String, ValueError> {
    let named = pattern.to_ascii_lowercase();
    let number = || value.to_f64();
    Ok(match named.as_str() {
        "general number" => format_number(number()?, 15),
        "fixed" => format!("{:.2}", number()?),
        "standard" => group_thousands(&format!("{:.2}", number()?)),
        "currency" => format!("${}", group_thousands(&format!("{:.2}", number()?))),
        "percent" => format!("{:.2}%", number()? * 100.0),
        "yes/no" => if value.to_bool()? { "Yes" } else { "No" }.to_string(),
        "true/false" => if value.to_bool()? { "True" } else { "False" }.to_string(),
        "on/off" => if value.to_bool()? { "On" } else { "Off" }.to_string(),
        "short date" => format_datetime(value, "m/d/yyyy")?,
        "long date" => format_datetime(value, "dddd, mmmm d, yyyy")?,
        "medium date" => format_datetime(value, "dd-mmm-yy")?,
        "short time" => format_datetime(value, "hh:nn")?,
        "medium time" => format_datetime(value, "hh:nn AM/PM")?,
        "long time" => format_datetime(value, "h:nn:ss AM/PM")?,
        _ if is_date_pattern(&named) => format_datetime(value, pattern)?,
        _ => format_numeric(number()?, pattern),
    })
}

fn is_date_pattern(pattern: &str) -> bool {
    !pattern.contains(['0', '#']) && pattern.contains(['y', 'm', 'd', 'h', 'n', 's'])
}

fn group_thousands(fixed: &str) -> String {
    let (sign, rest) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (int_part, frac) = rest.split_once('.').unwrap_or((rest, ""));
    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}

/// Digit placeholders `0` and `#`, a decimal point, thousands separators and a `%` suffix.
fn format_numeric(n: f64, pattern: &str) -> String {
    let percent = pattern.contains('%');
    let n = if percent { n * 100.0 } else { n };
    let (int_pattern, frac_pattern) = pattern.split_once('.').unwrap_or((pattern, ""));
    let decimals = frac_pattern.chars().filter(|c| matches!(c, '0' | '#')).count();
    let min_int = int_pattern.chars().filter(|&c| c == '0').count();
    let mut text = format!("{:.*}", decimals, n.abs());
    let optional = frac_pattern.chars().rev().take_while(|&c| c == '#').count();
    if optional > 0 && text.contains('.') {
        let keep = text.len() - optional;
        let trimmed = text[..keep].to_string() + text[keep..].trim_end_matches('0');
        text = trimmed.trim_end_matches('.').to_string();
    }
    let (mut int_digits, frac) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text.clone(), None),
    };
    if int_digits == "0" && min_int == 0 {
        int_digits.clear();
    }
    while int_digits.len() < min_int {
        int_digits.insert(0, '0');
    }
    if int_pattern.contains(',') {
        int_digits = group_thousands(&int_digits);
    }
    let mut out = String::new();
    if n < 0.0 && (int_digits.chars().any(|c| c != '0' && c != ',') || frac.is_some()) {
        out.push('-');
    }
    out.push_str(&int_digits);
    if let Some(frac) = frac {
        out.push('.');
        out.push_str(&frac);
    }
    if percent {
        out.push('%');
    }
    out
}

fn format_datetime(value: &VbaValue, pattern: &str) -> Result<String, ValueError> {
    let dt = ole_date_to_datetime(value.to_date()?).ok_or(ValueError::Overflow)?;
    let lower = pattern.to_ascii_lowercase();
    let twelve_hour = lower.contains("am/pm");

    // Token replacement; `m` after an hour token means minutes.
    let mut out = String::new();
    let mut i = 0;
    let mut after_hour = false;
    while i < pattern.len() {
        let rest = &lower[i..];
        let (text, width, hour) = if rest.starts_with("yyyy") {
            (format!("{:04}", dt.year()), 4, false)
        } else if rest.starts_with("yy") {
            (format!("{:02}", dt.year() % 100), 2, false)
        } else if rest.starts_with("dddd") {
            (dt.format("%A").to_string(), 4, false)
        } else if rest.starts_with("ddd") {
            (dt.format("%a").to_string(), 3, false)
        } else if rest.starts_with("dd") {
            (format!("{:02}", dt.day()), 2, false)
        } else if rest.starts_with('d') {
            (dt.day().to_string(), 1, false)
        } else if rest.starts_with("mmmm") {
            (dt.format("%B").to_string(), 4, false)
        } else if rest.starts_with("mmm") {
            (dt.format("%b").to_string(), 3, false)
        } else if rest.starts_with("mm") && after_hour {
            (format!("{:02}", dt.minute()), 2, false)
        } else if rest.starts_with("mm") {
            (format!("{:02}", dt.month()), 2, false)
        } else if rest.starts_with('m') {
            (dt.month().to_string(), 1, false)
        } else if rest.starts_with("hh") || rest.starts_with('h') {
            let hour = if twelve_hour {
                (dt.hour() + 11) % 12 + 1
            } else {
                dt.hour()
            };
            if rest.starts_with("hh") {
                (format!("{hour:02}"), 2, true)
            } else {
                (hour.to_string(), 1, true)
            }
        } else if rest.starts_with("nn") {
            (format!("{:02}", dt.minute()), 2, false)
        } else if rest.starts_with('n') {
            (dt.minute().to_string(), 1, false)
        } else if rest.starts_with("ss") {
            (format!("{:02}", dt.second()), 2, false)
        } else if rest.starts_with('s') {
            (dt.second().to_string(), 1, false)
        } else if rest.starts_with("am/pm") {
            let pm = dt.hour() >= 12;
            let upper = pattern[i..].starts_with('A');
            let text = match (pm, upper) {
                (true, true) => "PM",
                (false, true) => "AM",
                (true, false) => "pm",
                (false, false) => "am",
            };
            (text.to_string(), 5, false)
        } else {
            let ch = pattern[i..].chars().next().unwrap_or(' ');
            out.push(ch);
            i += ch.len_utf8();
            if !matches!(ch, ':' | ' ') {
                after_hour = false;
            }
            continue;
        };
        out.push_str(&text);
        i += width;
        if hour {
            after_hour = true;
        } else if width > 0 {
            after_hour = false;
        }
    }
    Ok(out)
}

/// State of the 24-bit linear congruential generator behind `Rnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RndState {
    seed: u32,
}

impl Default for RndState {
    fn default() -> Self {
        Self { seed: 0x50000 }
    }
}

impl RndState {
    /// `Rnd([n])`: negative reseeds from `n`, zero repeats the last value.
    pub fn next(&mut self, n: Option<f64>) -> f32 {
        match n {
            Some(n) if n < 0.0 => {
                let bits = (n as f32).to_bits();
                self.seed = (bits.wrapping_add(bits >> 24)) & 0xFF_FFFF;
                self.step();
            }
            Some(n) if n == 0.0 => {}
            _ => self.step(),
        }
        self.seed as f32 / 16_777_216.0
    }

    fn step(&mut self) {
        self.seed = (self.seed.wrapping_mul(1_140_671_485).wrapping_add(12_820_163)) & 0xFF_FFFF;
    }

    /// `Randomize n`.
    pub fn randomize(&mut self, n: f64) {
        let hi = (n.to_bits() >> 32) as u32;
        let mixed = ((hi & 0xFFFF) ^ (hi >> 16)) << 8;
        self.seed = (self.seed & 0xFF) | (mixed & 0xFF_FF00);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MAX_STRING_LENGTH;

    fn call(name: &str, args: &[VbaValue]) -> Result<VbaValue, ValueError> {
        match BuiltinScope::standard().function(name) {
            Some(Builtin::Pure(f)) => f(args),
            other => panic!("{name} is not pure: {other:?}"),
        }
    }

    fn s(v: &str) -> VbaValue {
        VbaValue::from(v)
    }

    #[test]
    fn string_functions() {
        assert_eq!(call("Mid$", &[s("Hello"), VbaValue::Integer(2), VbaValue::Integer(3)]), Ok(s("ell")));
        assert_eq!(call("Left", &[s("Hello"), VbaValue::Integer(10)]), Ok(s("Hello")));
        assert_eq!(call("Right", &[s("Hello"), VbaValue::Integer(2)]), Ok(s("lo")));
        assert_eq!(call("InStr", &[s("abcabc"), s("c")]), Ok(VbaValue::Long(3)));
        assert_eq!(
            call("InStr", &[VbaValue::Integer(4), s("abcabc"), s("C"), VbaValue::Integer(1)]),
            Ok(VbaValue::Long(6))
        );
        assert_eq!(call("InStrRev", &[s("abcabc"), s("b")]), Ok(VbaValue::Long(5)));
        assert_eq!(call("Replace", &[s("a-b-c"), s("-"), s("")]), Ok(s("abc")));
        assert_eq!(call("StrReverse", &[s("abc")]), Ok(s("cba")));
        assert_eq!(call("Chr", &[VbaValue::Integer(65)]), Ok(s("A")));
        assert_eq!(call("Asc", &[s("a")]), Ok(VbaValue::Integer(97)));
        assert_eq!(call("Len", &[VbaValue::Null]), Ok(VbaValue::Null));
        assert_eq!(call("Hex", &[VbaValue::Integer(-1)]), Ok(s("FFFF")));
        assert_eq!(call("Val", &[s(" 12 34abc")]), Ok(VbaValue::Double(1234.0)));
        assert_eq!(call("Str", &[VbaValue::Integer(5)]), Ok(s(" 5")));
    }

    #[test]
    fn split_and_join() {
        let parts = call("Split", &[s("a,b,c"), s(",")]).unwrap();
        let arr = parts.as_array().unwrap();
        assert_eq!(arr.borrow().bounds(1), Ok((0, 2)));
        assert_eq!(call("Join", &[parts.clone(), s("+")]), Ok(s("a+b+c")));
        let empty = call("Split", &[s("")]).unwrap();
        assert_eq!(call("UBound", &[empty]), Ok(VbaValue::Long(-1)));
    }

    #[test]
    fn conversions_round_half_to_even() {
        assert_eq!(call("CInt", &[VbaValue::Double(2.5)]), Ok(VbaValue::Integer(2)));
        assert_eq!(call("CLng", &[s("3.5")]), Ok(VbaValue::Long(4)));
        assert_eq!(call("CInt", &[s("abc")]).map_err(|e| e.number()), Err(13));
        assert_eq!(call("CByte", &[VbaValue::Integer(300)]), Err(ValueError::Overflow));
        assert_eq!(call("Round", &[VbaValue::Double(2.345), VbaValue::Integer(2)]), Ok(VbaValue::Double(2.34)));
    }

    #[test]
    fn dates() {
        let d = call("DateSerial", &[VbaValue::Integer(2003), VbaValue::Integer(1), VbaValue::Integer(2)]).unwrap();
        assert_eq!(d, VbaValue::Date(37623.0));
        assert_eq!(call("Year", &[d.clone()]), Ok(VbaValue::Integer(2003)));
        assert_eq!(call("Weekday", &[d.clone()]), Ok(VbaValue::Integer(5)));
        assert_eq!(call("Format", &[d.clone(), s("yyyy-mm-dd")]), Ok(s("2003-01-02")));
        let next = call("DateAdd", &[s("m"), VbaValue::Integer(1), d]).unwrap();
        assert_eq!(call("Month", &[next]), Ok(VbaValue::Integer(2)));
    }

    #[test]
    fn string_builders_refuse_results_past_the_string_space() {
        let huge = VbaValue::Double(1e12);
        assert_eq!(call("String", &[huge.clone(), s("a")]), Err(ValueError::OutOfStringSpace));
        assert_eq!(call("Space", &[huge]), Err(ValueError::OutOfStringSpace));
        let limit = VbaValue::Long(MAX_STRING_LENGTH as i32);
        assert_eq!(call("Space", &[limit.clone()]).map(|v| v.display_string().len()), Ok(MAX_STRING_LENGTH));
        assert_eq!(call("String", &[limit, s("é")]).map_err(|e| e.number()), Err(14));

        let chunk = s(&"x".repeat(1 << 20));
        let grown = call("Replace", &[chunk, s("x"), s(&"y".repeat(64))]);
        assert_eq!(grown, Err(ValueError::OutOfStringSpace));
        assert_eq!(call("Replace", &[s("aaa"), s("a"), s("bb")]), Ok(s("bbbbbb")));
    }

    #[test]
    fn out_of_range_dates_and_numbers_overflow() {
        assert_eq!(call("CDate", &[VbaValue::Double(1e20)]), Err(ValueError::Overflow));
        assert_eq!(call("CDate", &[VbaValue::Double(-657_435.0)]), Err(ValueError::Overflow));
        assert_eq!(call("CDate", &[VbaValue::Long(2_958_465)]), Ok(VbaValue::Date(2_958_465.0)));

        let today = VbaValue::Date(36_892.5);
        let far = call("DateAdd", &[s("yyyy"), VbaValue::Long(100_000), today.clone()]);
        assert_eq!(far, Err(ValueError::Overflow));
        let far = call("DateAdd", &[s("s"), VbaValue::LongLong(i64::MAX), today.clone()]);
        assert_eq!(far, Err(ValueError::Overflow));
        let bad = call("DateAdd", &[s("fortnight"), VbaValue::Integer(1), today]);
        assert_eq!(bad, Err(ValueError::InvalidArgument));

        assert_eq!(call("Val", &[s("1e999999")]), Err(ValueError::Overflow));
        assert_eq!(call("Val", &[s("1e3x")]), Ok(VbaValue::Double(1000.0)));
    }

    #[test]
    fn numeric_formats() {
        assert_eq!(format_numeric(1234.5, "#,##0.00"), "1,234.50");
        assert_eq!(format_numeric(7.0, "000"), "007");
        assert_eq!(format_numeric(0.256, "0.0%"), "25.6%");
    }

    #[test]
    fn rnd_is_deterministic() {
        let mut a = RndState::default();
        let mut b = RndState::default();
        let first = a.next(None);
        assert_eq!(first, b.next(None));
        assert!((0.0..1.0).contains(&first));
        assert_eq!(a.next(Some(0.0)), first);
    }
}
