//! Two-pass lexer.
//!
//! Pass 1 splits the text into coarse runs with anchored regular expressions (first match wins)
//! and folds line continuations into whitespace. Pass 2 reclassifies words against the keyword
//! tables and maps symbols to operators or punctuation.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{SourcePosition, VbaError};
use crate::keywords::{classify_word, WordClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    Integer,
    Float,
    String,
    Date,
    Boolean,
    Empty,
    Null,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Literal(LiteralKind),
    Operator,
    Punctuation,
    /// A newline or a `:` statement separator.
    EndOfLine,
    EndOfFile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: SourcePosition,
    /// Index of the logical line (physical lines joined by continuations), starting at 1.
    pub logical_line: u32,
    /// Whether whitespace separates this token from the previous one.
    pub leading_space: bool,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::EndOfFile
    }

    /// End of statement: newline, `:` or end of input.
    pub fn is_terminator(&self) -> bool {
        matches!(self.kind, TokenKind::EndOfLine | TokenKind::EndOfFile)
    }

    pub fn is_newline(&self) -> bool {
        self.kind == TokenKind::EndOfLine && self.text != ":"
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text.eq_ignore_ascii_case(op)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == punct
    }

    /// Case-insensitive match on identifiers and keywords alike.
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::Keyword)
            && self.text.eq_ignore_ascii_case(word)
    }

    /// Whether the token can stand in a name position (identifiers, and keywords, which are
    /// checked later by the reserved-name pass).
    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::Keyword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawClass {
    Blank,
    Newline,
    Comment,
    Date,
    Float,
    Integer,
    String,
    Word,
    Symbol,
}

#[derive(Debug, Clone)]
struct RawToken {
    class: RawClass,
    start: usize,
    end: usize,
    position: SourcePosition,
    logical_line: u32,
    leading_space: bool,
}

fn scanners() -> &'static [(RawClass, Regex)] {
    static SCANNERS: OnceLock<Vec<(RawClass, Regex)>> = OnceLock::new();
    SCANNERS.get_or_init(|| {
        let table: [(RawClass, &str); 9] = [
            // A continuation is a blank run ending in ` _` plus the line break.
            (
                RawClass::Blank,
                r"^[ \t\x0c]+(?:_[ \t]*(?:\r\n|\r|\n))?",
            ),
            (RawClass::Newline, r"^(?:\r\n|\r|\n)"),
            (RawClass::Comment, r"^'[^\r\n]*"),
            (
                RawClass::Date,
                r"^#[0-9]{1,4}[-/][0-9]{1,2}[-/][0-9]{1,4}(?:[ \t]+[0-9]{1,2}:[0-9]{2}(?::[0-9]{2})?(?:[ \t]*[AaPp][Mm])?)?#",
            ),
            (
                RawClass::Float,
                r"^(?:[0-9]+\.[0-9]*(?:[eEdD][+-]?[0-9]+)?[!#@]?|\.[0-9]+(?:[eEdD][+-]?[0-9]+)?[!#@]?|[0-9]+[eEdD][+-]?[0-9]+[!#@]?|[0-9]+[!#@])",
            ),
            (
                RawClass::Integer,
                r"^(?:[0-9]+|&[hH][0-9a-fA-F]+|&[oO]?[0-7]+)[%&^]?",
            ),
            (RawClass::String, r#"^"(?:[^"\r\n]|"")*""#),
            (RawClass::Word, r"^(?:[A-Za-z][A-Za-z0-9_]*|\[[^\]\r\n]+\])"),
            (
                RawClass::Symbol,
                r"^(?::=|<=|>=|=<|=>|<>|><|[-+*/\\^&=<>(),.!#:;?$%@{}])",
            ),
        ];
        table
            .into_iter()
            .map(|(class, pattern)| (class, Regex::new(pattern).expect("valid lexer regex")))
            .collect()
    })
}

fn continuation_in_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]_[ \t]*$").expect("valid continuation regex"))
}

const OPERATOR_SYMBOLS: &[&str] = &[
    "+", "-", "*", "/", "\\", "^", "&", "=", "<>", "><", "<", ">", "<=", "=<", ">=", "=>", ":=",
];

pub struct Lexer<'a> {
    source: &'a str,
    offset: usize,
    line: u32,
    column: u32,
    logical_line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let offset = if source.starts_with('\u{feff}') { 3 } else { 0 };
        Self {
            source,
            offset,
            line: 1,
            column: 1,
            logical_line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, VbaError> {
        let raw = self.scan()?;
        let tokens = reclassify(self.source, raw);
        log::debug!("tokenized {} tokens", tokens.len());
        Ok(tokens)
    }

    fn position(&self) -> SourcePosition {
        SourcePosition::new(self.offset, self.line, self.column)
    }

    /// Moves the cursor over `len` bytes, tracking physical lines and columns.
    fn advance(&mut self, len: usize) {
        let text = &self.source[self.offset..self.offset + len];
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\r' if chars.peek() == Some(&'\n') => {}
                '\r' | '\n' => {
                    self.line += 1;
                    self.column = 1;
                }
                _ => self.column += 1,
            }
        }
        self.offset += len;
    }

    fn scan(&mut self) -> Result<Vec<RawToken>, VbaError> {
        let mut out = Vec::new();
        let mut leading_space = false;

        while self.offset < self.source.len() {
            let source = self.source;
            let rest = &source[self.offset..];
            let position = self.position();

            let Some((class, mut len)) = scanners()
                .iter()
                .find_map(|(class, re)| re.find(rest).map(|m| (*class, m.end())))
            else {
                return Err(self.invalid_input(rest, position));
            };

            let class = match class {
                RawClass::Word if rest[..len].eq_ignore_ascii_case("rem") => {
                    len = rest.find(|c: char| c == '\r' || c == '\n').unwrap_or(rest.len());
                    RawClass::Comment
                }
                RawClass::Word => {
                    len += type_suffix_len(&rest[len..]);
                    RawClass::Word
                }
                other => other,
            };

            if class == RawClass::Comment {
                if let Some(m) = continuation_in_comment().find(&rest[..len]) {
                    // Point at the `_` itself.
                    self.advance(m.start() + 1);
                    return Err(VbaError::lexical(
                        "line continuation is not allowed inside a comment",
                        self.position(),
                    ));
                }
            }

            let token = RawToken {
                class,
                start: self.offset,
                end: self.offset + len,
                position,
                logical_line: self.logical_line,
                leading_space,
            };
            self.advance(len);

            match class {
                RawClass::Blank => leading_space = true,
                RawClass::Comment => {}
                RawClass::Newline => {
                    self.logical_line += 1;
                    leading_space = false;
                    out.push(token);
                }
                _ => {
                    log::trace!("{:?} `{}` at {}", class, &rest[..len], position);
                    leading_space = false;
                    out.push(token);
                }
            }
        }

        Ok(out)
    }

    fn invalid_input(&self, rest: &str, position: SourcePosition) -> VbaError {
        if rest.starts_with('"') {
            return VbaError::lexical("unterminated string literal", position);
        }
        if rest.starts_with('_') {
            return VbaError::lexical(
                "line continuation must follow whitespace and end the line",
                position,
            );
        }
        match rest.chars().next() {
            Some(ch) => VbaError::lexical(format!("invalid character {ch:?}"), position),
            None => VbaError::lexical("unexpected end of input", position),
        }
    }
}

/// Length of a type-declaration suffix (`$ % @ & ! #`) glued to an identifier.
///
/// `!` and `#` only count when no identifier follows, so `a!b` stays a bang access.
fn type_suffix_len(after: &str) -> usize {
    let mut chars = after.chars();
    let Some(ch) = chars.next() else {
        return 0;
    };
    let next = chars.next();
    let ends_word = |c: Option<char>| {
        !matches!(c, Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '[' || c == '"')
    };
    match ch {
        '$' | '%' | '@' => 1,
        '&' | '!' | '#' if ends_word(next) => 1,
        _ => 0,
    }
}

fn reclassify(source: &str, raw: Vec<RawToken>) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(raw.len() + 1);
    let mut eof_position = SourcePosition::new(source.len(), 1, 1);
    let mut eof_line = 1;

    for tok in raw {
        let text = &source[tok.start..tok.end];
        let kind = match tok.class {
            RawClass::Newline => TokenKind::EndOfLine,
            RawClass::Integer => TokenKind::Literal(LiteralKind::Integer),
            RawClass::Float => TokenKind::Literal(LiteralKind::Float),
            RawClass::String => TokenKind::Literal(LiteralKind::String),
            RawClass::Date => TokenKind::Literal(LiteralKind::Date),
            RawClass::Word => {
                let base = text.trim_end_matches(&['$', '%', '@', '&', '!', '#'][..]);
                match classify_word(&base.to_ascii_lowercase()) {
                    WordClass::Identifier => TokenKind::Identifier,
                    WordClass::Keyword if base.len() == text.len() => TokenKind::Keyword,
                    // `Mid$`, `String$` and friends are function names.
                    WordClass::Keyword => TokenKind::Identifier,
                    WordClass::Operator => TokenKind::Operator,
                    WordClass::Boolean => TokenKind::Literal(LiteralKind::Boolean),
                    WordClass::Variant if base.eq_ignore_ascii_case("null") => {
                        TokenKind::Literal(LiteralKind::Null)
                    }
                    WordClass::Variant => TokenKind::Literal(LiteralKind::Empty),
                    WordClass::Object => TokenKind::Literal(LiteralKind::Nothing),
                }
            }
            RawClass::Symbol if text == ":" => TokenKind::EndOfLine,
            RawClass::Symbol if OPERATOR_SYMBOLS.contains(&text) => TokenKind::Operator,
            RawClass::Symbol => TokenKind::Punctuation,
            RawClass::Blank | RawClass::Comment => continue,
        };

        eof_position = SourcePosition::new(tok.end, tok.position.line, tok.position.column);
        eof_line = tok.logical_line;
        tokens.push(Token {
            kind,
            text: text.to_string(),
            position: tok.position,
            logical_line: tok.logical_line,
            leading_space: tok.leading_space,
        });
    }

    tokens.push(Token {
        kind: TokenKind::EndOfFile,
        text: String::new(),
        position: eof_position,
        logical_line: eof_line,
        leading_space: false,
    });
    tokens
}

/// Tokenize `source`, ending with an end-of-file token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, VbaError> {
    Lexer::new(source).tokenize()
}

/// Position in a [`TokenCursor`] that can be restored later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// A restartable cursor over a token sequence.
#[derive(Debug, Clone)]
pub struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenCursor {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(Token::is_eof) {
            let position = tokens.last().map(|t| t.position).unwrap_or_default();
            let logical_line = tokens.last().map(|t| t.logical_line).unwrap_or(1);
            tokens.push(Token {
                kind: TokenKind::EndOfFile,
                text: String::new(),
                position,
                logical_line,
                leading_space: false,
            });
        }
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    /// Looks `n` tokens ahead, saturating at end of file.
    pub fn peek_nth(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub fn previous(&self) -> Option<&Token> {
        self.pos.checked_sub(1).map(|idx| &self.tokens[idx])
    }

    pub fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !token.is_eof() {
            self.pos += 1;
        }
        token
    }

    pub fn is_at_end(&self) -> bool {
        self.peek().is_eof()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.pos)
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.0.min(self.tokens.len() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn hex_and_suffix_literals() {
        let tokens = tokenize("x = &HFF + 10& + 1.5# + .5").unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "=", "&HFF", "+", "10&", "+", "1.5#", "+", ".5", ""]);
    }

    #[test]
    fn bang_is_not_a_type_suffix() {
        let tokens = tokenize("rs!Name").unwrap();
        assert_eq!(tokens[0].text, "rs");
        assert!(tokens[1].is_punct("!"));
        assert_eq!(tokens[2].text, "Name");
    }

    #[test]
    fn colon_separates_statements() {
        assert_eq!(
            kinds("a:b"),
            vec![
                TokenKind::Identifier,
                TokenKind::EndOfLine,
                TokenKind::Identifier,
                TokenKind::EndOfFile
            ]
        );
    }

    #[test]
    fn cursor_restores_checkpoints() {
        let mut cursor = TokenCursor::new(tokenize("a b c").unwrap());
        cursor.advance();
        let cp = cursor.checkpoint();
        assert_eq!(cursor.advance().text, "b");
        cursor.restore(cp);
        assert_eq!(cursor.peek().text, "b");
        assert_eq!(cursor.previous().map(|t| t.text.as_str()), Some("a"));
    }
}
