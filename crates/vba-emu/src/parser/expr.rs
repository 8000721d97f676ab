//! Operator-precedence (shunting-yard) expression parser.
//!
//! Operands are primaries followed by member, bang and argument-list suffixes. Binary operators
//! are reduced against an explicit operator stack using [`BinOp::precedence`]; prefix operators
//! sit on the same stack with their own binding power.

use super::{split_name, unquote, Parser};
use crate::ast::{BinOp, CallArg, Expr, ExprKind, Literal, UnOp};
use crate::error::{SourcePosition, VbaError, VbaResult};
use crate::lexer::{LiteralKind, Token, TokenKind};
use crate::value::parse_date_literal;

#[derive(Debug, Clone, Copy)]
enum Pending {
    Unary(UnOp, SourcePosition),
    Binary(BinOp, SourcePosition),
}

impl Pending {
    /// Whether this stacked operator binds before an incoming binary `op`.
    fn reduces_before(self, op: BinOp) -> bool {
        match self {
            Pending::Unary(u, _) => u.precedence() >= op.precedence(),
            Pending::Binary(b, _) => {
                b.precedence() > op.precedence()
                    || (b.precedence() == op.precedence() && !op.is_right_assoc())
            }
        }
    }
}

fn reduce(operands: &mut Vec<Expr>, pending: Pending) -> VbaResult<()> {
    match pending {
        Pending::Unary(op, position) => {
            let operand = operands
                .pop()
                .ok_or_else(|| VbaError::syntax("operator is missing its operand", position))?;
            operands.push(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                position,
            ));
        }
        Pending::Binary(op, position) => {
            let (Some(right), Some(left)) = (operands.pop(), operands.pop()) else {
                return Err(VbaError::syntax(
                    format!("operator `{}` is missing an operand", op.symbol()),
                    position,
                ));
            };
            // A binary node starts where its left operand starts.
            let start = left.position;
            operands.push(Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start,
            ));
        }
    }
    Ok(())
}

fn prefix_op(tok: &Token) -> Option<UnOp> {
    if tok.kind != TokenKind::Operator {
        return None;
    }
    match tok.text.to_ascii_lowercase().as_str() {
        "-" => Some(UnOp::Neg),
        "+" => Some(UnOp::Plus),
        "not" => Some(UnOp::Not),
        _ => None,
    }
}

fn binary_op(tok: &Token) -> Option<BinOp> {
    if tok.kind != TokenKind::Operator {
        return None;
    }
    BinOp::from_token(&tok.text)
}

impl Parser {
    pub(crate) fn parse_expression(&mut self) -> VbaResult<Expr> {
        self.nested(|p| p.parse_expression_inner())
    }

    fn parse_expression_inner(&mut self) -> VbaResult<Expr> {
        let mut operands: Vec<Expr> = Vec::new();
        let mut operators: Vec<Pending> = Vec::new();
        let mut last_operator: Option<Token> = None;

        loop {
            while let Some(op) = prefix_op(self.peek()) {
                let tok = self.advance();
                operators.push(Pending::Unary(op, tok.position));
                last_operator = Some(tok);
            }

            if self.starts_operand() {
                operands.push(self.parse_operand()?);
            } else if let Some(op) = last_operator {
                return Err(VbaError::syntax(
                    format!(
                        "operator `{}` is missing its right operand, found {}",
                        op.text,
                        super::describe(self.peek())
                    ),
                    self.peek().position,
                ));
            } else {
                return Err(self.unexpected("an expression"));
            }

            let Some(op) = binary_op(self.peek()) else {
                break;
            };
            let tok = self.advance();
            while let Some(&top) = operators.last() {
                if !top.reduces_before(op) {
                    break;
                }
                operators.pop();
                reduce(&mut operands, top)?;
            }
            operators.push(Pending::Binary(op, tok.position));
            last_operator = Some(tok);
        }

        while let Some(top) = operators.pop() {
            reduce(&mut operands, top)?;
        }
        match (operands.pop(), operands.is_empty()) {
            (Some(expr), true) => Ok(expr),
            _ => Err(self.unexpected("a single expression")),
        }
    }

    fn starts_operand(&self) -> bool {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Identifier | TokenKind::Keyword | TokenKind::Literal(_) => true,
            TokenKind::Punctuation => tok.text == "(" || tok.text == ".",
            _ => false,
        }
    }

    /// A primary followed by its member, bang and argument suffixes.
    fn parse_operand(&mut self) -> VbaResult<Expr> {
        let primary = self.parse_primary()?;
        self.parse_chain(primary, false)
    }

    /// Target of an assignment or a call statement: a primary and its suffixes, without
    /// binary operators. At the head of a statement a `(` preceded by whitespace starts the
    /// argument list instead of indexing.
    pub(crate) fn parse_lexpr(&mut self, statement_head: bool) -> VbaResult<Expr> {
        if !self.starts_operand() {
            return Err(self.unexpected("a statement"));
        }
        let primary = self.parse_primary()?;
        self.parse_chain(primary, statement_head)
    }

    fn parse_primary(&mut self) -> VbaResult<Expr> {
        let tok = self.advance();
        let position = tok.position;
        let kind = match tok.kind {
            TokenKind::Literal(kind) => ExprKind::Literal(literal(kind, &tok)?),
            TokenKind::Identifier => ExprKind::Name(split_name(&tok.text).0),
            TokenKind::Keyword => match tok.text.to_ascii_lowercase().as_str() {
                "me" => ExprKind::Me,
                "new" => ExprKind::New(self.parse_class_name()?),
                "typeof" => {
                    let operand = self.parse_operand()?;
                    self.expect_operator("Is")?;
                    ExprKind::TypeOf {
                        operand: Box::new(operand),
                        type_name: self.parse_class_name()?,
                    }
                }
                "addressof" => ExprKind::AddressOf(self.expect_name("a procedure name")?.0),
                _ => ExprKind::Name(split_name(&tok.text).0),
            },
            TokenKind::Punctuation if tok.text == "(" => {
                let inner = self.parse_expression()?;
                self.expect_punct(")")?;
                ExprKind::Paren(Box::new(inner))
            }
            TokenKind::Punctuation if tok.text == "." => {
                ExprKind::WithMember(self.expect_member_name()?)
            }
            _ => {
                return Err(VbaError::syntax(
                    format!("expected an expression, found {}", super::describe(&tok)),
                    position,
                ))
            }
        };
        Ok(Expr::new(kind, position))
    }

    fn parse_class_name(&mut self) -> VbaResult<String> {
        let (mut name, _, _) = self.expect_name("a class name")?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_member_name()?);
        }
        Ok(name)
    }

    fn parse_chain(&mut self, mut expr: Expr, statement_head: bool) -> VbaResult<Expr> {
        let position = expr.position;
        loop {
            let tok = self.peek();
            // `Foo .Bar` passes `.Bar` from a With block as an argument.
            if tok.leading_space && (tok.is_punct(".") || tok.is_punct("!")) {
                break;
            }
            if tok.is_punct(".") {
                self.advance();
                let member = self.expect_member_name()?;
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        member,
                    },
                    position,
                );
            } else if tok.is_punct("!") {
                self.advance();
                let key = self.expect_member_name()?;
                expr = Expr::new(
                    ExprKind::Bang {
                        object: Box::new(expr),
                        key,
                    },
                    position,
                );
            } else if tok.is_punct("(") && !(statement_head && tok.leading_space) {
                self.advance();
                let args = self.nested(|p| p.parse_paren_args())?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    position,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments after `(`, consuming the closing `)`.
    fn parse_paren_args(&mut self) -> VbaResult<Vec<CallArg>> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg(|t| t.is_punct(",") || t.is_punct(")"))?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    /// Unparenthesised arguments of a call statement, up to the end of the statement.
    pub(crate) fn parse_bare_args(&mut self) -> VbaResult<Vec<CallArg>> {
        let mut args = Vec::new();
        loop {
            args.push(self.parse_arg(|t| {
                t.is_punct(",") || t.is_terminator() || t.is_word("Else")
            })?);
            if !self.eat_punct(",") {
                return Ok(args);
            }
        }
    }

    fn parse_arg(&mut self, ends_arg: impl Fn(&Token) -> bool) -> VbaResult<CallArg> {
        let tok = self.peek();
        if ends_arg(tok) {
            return Ok(CallArg {
                name: None,
                value: Expr::new(ExprKind::Missing, tok.position),
            });
        }
        let name = if tok.is_name() && self.peek_nth(1).is_operator(":=") {
            let name = split_name(&self.advance().text).0;
            self.advance();
            Some(name)
        } else {
            None
        };
        // `ByVal` at a call site only appears in calls to external routines.
        if self.peek().is_word("ByVal") && !self.peek_nth(1).is_punct(",") {
            self.advance();
        }
        Ok(CallArg {
            name,
            value: self.parse_expression()?,
        })
    }
}

fn literal(kind: LiteralKind, tok: &Token) -> VbaResult<Literal> {
    let text = tok.text.as_str();
    let bad = || VbaError::syntax(format!("invalid literal `{text}`"), tok.position);
    Ok(match kind {
        LiteralKind::Integer => integer_literal(text).ok_or_else(bad)?,
        LiteralKind::Float => {
            let suffix = text.chars().last().filter(|c| matches!(c, '!' | '#' | '@'));
            let digits = match suffix {
                Some(_) => &text[..text.len() - 1],
                None => text,
            };
            let value: f64 = digits.replace(|c| c == 'd' || c == 'D', "e").parse().map_err(|_| bad())?;
            match suffix {
                Some('!') => Literal::Single(value as f32),
                Some('@') => Literal::Currency((value * 10_000.0).round() as i64),
                _ => Literal::Double(value),
            }
        }
        LiteralKind::String => Literal::String(unquote(text)),
        LiteralKind::Date => {
            Literal::Date(parse_date_literal(text.trim_matches('#')).ok_or_else(bad)?)
        }
        LiteralKind::Boolean => Literal::Boolean(text.eq_ignore_ascii_case("true")),
        LiteralKind::Empty => Literal::Empty,
        LiteralKind::Null => Literal::Null,
        LiteralKind::Nothing => Literal::Nothing,
    })
}

/// Types an integer literal the way the language does: the smallest of Integer and Long
/// that holds it, Double beyond that. Hex and octal literals wrap to the sign of their width.
fn integer_literal(text: &str) -> Option<Literal> {
    let (body, suffix) = match text.chars().last() {
        Some(c @ ('%' | '&' | '^')) => (&text[..text.len() - 1], Some(c)),
        _ => (text, None),
    };

    let radix_value = if let Some(hex) = body.strip_prefix("&H").or_else(|| body.strip_prefix("&h")) {
        Some(u64::from_str_radix(hex, 16).ok()?)
    } else if let Some(oct) = body
        .strip_prefix("&O")
        .or_else(|| body.strip_prefix("&o"))
        .or_else(|| body.strip_prefix('&'))
    {
        Some(u64::from_str_radix(oct, 8).ok()?)
    } else {
        None
    };

    if let Some(raw) = radix_value {
        return Some(match suffix {
            Some('%') => Literal::Integer(raw as u16 as i16),
            Some('&') => Literal::Long(raw as u32 as i32),
            Some('^') => Literal::LongLong(raw as i64),
            _ if raw <= 0xFFFF => Literal::Integer(raw as u16 as i16),
            _ if raw <= 0xFFFF_FFFF => Literal::Long(raw as u32 as i32),
            _ => Literal::LongLong(raw as i64),
        });
    }

    match suffix {
        Some('%') => body.parse::<i16>().ok().map(Literal::Integer),
        Some('&') => body.parse::<i32>().ok().map(Literal::Long),
        Some('^') => body.parse::<i64>().ok().map(Literal::LongLong),
        _ => {
            if let Ok(v) = body.parse::<i16>() {
                Some(Literal::Integer(v))
            } else if let Ok(v) = body.parse::<i32>() {
                Some(Literal::Long(v))
            } else {
                body.parse::<f64>().ok().map(Literal::Double)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    #[test]
    fn integer_literals_take_the_smallest_type() {
        assert_eq!(integer_literal("10"), Some(Literal::Integer(10)));
        assert_eq!(integer_literal("40000"), Some(Literal::Long(40000)));
        assert_eq!(integer_literal("10&"), Some(Literal::Long(10)));
        assert_eq!(integer_literal("&HFFFF"), Some(Literal::Integer(-1)));
        assert_eq!(integer_literal("&HFFFF&"), Some(Literal::Long(65535)));
        assert_eq!(integer_literal("&O17"), Some(Literal::Integer(15)));
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        let expr = parse_expression("-2 ^ 2").unwrap();
        assert!(matches!(
            expr.kind,
            ExprKind::Unary {
                op: UnOp::Neg,
                ..
            }
        ));
        let expr = parse_expression("2 ^ 3 ^ 2").unwrap();
        let ExprKind::Binary { right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn not_binds_looser_than_comparison() {
        let expr = parse_expression("Not a = b").unwrap();
        let ExprKind::Unary { op, operand } = &expr.kind else {
            panic!("expected unary");
        };
        assert_eq!(*op, UnOp::Not);
        assert!(matches!(operand.kind, ExprKind::Binary { op: BinOp::Eq, .. }));
    }

    #[test]
    fn dangling_operator_is_reported_at_the_missing_operand() {
        let err = parse_expression("1 +").unwrap_err();
        assert!(matches!(err, VbaError::Syntax { .. }));
        assert!(err.to_string().contains("missing its right operand"), "{err}");
    }

    #[test]
    fn named_and_missing_arguments() {
        let expr = parse_expression("f(, 2, Title:=\"x\")").unwrap();
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(args[0].value.kind, ExprKind::Missing));
        assert_eq!(args[2].name.as_deref(), Some("Title"));
    }
}
