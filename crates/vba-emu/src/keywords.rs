//! Keyword tables used by the second lexing pass and by the reserved-name check.
//!
//! All lookups take an ASCII-lowercased word.

use std::collections::HashSet;
use std::sync::OnceLock;

/// How the second lexing pass reclassifies a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordClass {
    Identifier,
    Keyword,
    /// `And`, `Or`, `Xor`, `Eqv`, `Imp`, `Not`, `Mod`, `Like`, `Is`.
    Operator,
    /// `True` / `False`.
    Boolean,
    /// `Empty` / `Null`.
    Variant,
    /// `Nothing`.
    Object,
}

const KEYWORDS: &[&str] = &[
    "access", "addressof", "alias", "any", "append", "as", "attribute", "base", "binary",
    "boolean", "byref", "byte", "byval", "call", "case", "close", "compare", "const", "currency",
    "date", "declare", "defbool", "defbyte", "defcur", "defdate", "defdbl", "defint", "deflng",
    "deflnglng", "deflngptr", "defobj", "defsng", "defstr", "defvar", "dim", "do", "double",
    "each", "else", "elseif", "end", "endif", "enum", "erase", "error", "event", "exit",
    "explicit", "for", "friend", "function", "get", "global", "gosub", "goto", "if", "implements",
    "in", "input", "integer", "len", "let", "lib", "line", "lock", "long", "longlong", "longptr",
    "loop", "lset", "me", "mid", "midb", "module", "new", "next", "object", "on", "open",
    "option", "optional", "output", "paramarray", "preserve", "print", "private", "property",
    "ptrsafe", "public", "put", "raiseevent", "random", "read", "redim", "rem", "reset", "resume",
    "return", "rset", "seek", "select", "set", "shared", "single", "spc", "static", "step", "stop",
    "string", "sub", "tab", "text", "then", "to", "type", "typeof", "unlock", "until", "variant",
    "wend", "while", "width", "with", "withevents", "write",
];

/// Words that may never name a variable, constant, procedure or label. Everything else in
/// [`KEYWORDS`] is contextual and stays usable as a name.
const RESERVED: &[&str] = &[
    "addressof", "and", "as", "boolean", "byref", "byte", "byval", "call", "case", "const",
    "currency", "declare", "dim", "do", "double", "each", "else", "elseif", "empty", "end",
    "endif", "enum", "eqv", "erase", "event", "exit", "false", "for", "friend", "function",
    "global", "gosub", "goto", "if", "imp", "implements", "in", "integer", "is", "let", "like",
    "long", "longlong", "longptr", "loop", "lset", "me", "mod", "new", "next", "not", "nothing",
    "null", "on", "optional", "or", "paramarray", "preserve", "private", "public", "raiseevent",
    "redim", "rem", "resume", "return", "rset", "select", "set", "single", "static", "step",
    "stop", "sub", "then", "to", "true", "type", "typeof", "until", "variant", "wend", "while",
    "with", "withevents", "xor",
];

fn keyword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| KEYWORDS.iter().copied().collect())
}

fn reserved_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| RESERVED.iter().copied().collect())
}

pub fn classify_word(lower: &str) -> WordClass {
    match lower {
        "and" | "or" | "xor" | "eqv" | "imp" | "not" | "mod" | "like" | "is" => WordClass::Operator,
        "true" | "false" => WordClass::Boolean,
        "empty" | "null" => WordClass::Variant,
        "nothing" => WordClass::Object,
        _ if keyword_set().contains(lower) => WordClass::Keyword,
        _ => WordClass::Identifier,
    }
}

/// Whether `name` is a strict reserved word (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
    reserved_set().contains(name.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_specialized_words() {
        assert_eq!(classify_word("mod"), WordClass::Operator);
        assert_eq!(classify_word("true"), WordClass::Boolean);
        assert_eq!(classify_word("null"), WordClass::Variant);
        assert_eq!(classify_word("nothing"), WordClass::Object);
        assert_eq!(classify_word("dim"), WordClass::Keyword);
        assert_eq!(classify_word("shell"), WordClass::Identifier);
    }

    #[test]
    fn contextual_keywords_are_not_reserved() {
        assert!(is_reserved("Dim"));
        assert!(is_reserved("NEXT"));
        assert!(!is_reserved("Text"));
        assert!(!is_reserved("Date"));
        assert!(!is_reserved("Error"));
    }
}
