//! Recursive-descent parser for modules, declarations, procedures and statements.
//!
//! Parsing stops at the first token that cannot start a valid production; there is no error
//! recovery. Sub-expressions are delegated to the operator-precedence parser in [`expr`].

mod expr;

use crate::ast::{
    ArrayDim, Attribute, CaseCondition, ConstDecl, Declaration, DeclarationKind, ElseIf,
    EnumMember, ExitKind, Expr, ExprKind, ExternalDecl, Literal, LoopCondition,
    LoopConditionKind, Module, ModuleKind, ModuleOption, ModuleOptions, OnErrorAction, OpenMode,
    ParamDef, PassingMode, PrintItem, Procedure, ProcedureKind, ReDimTarget, ResumeTarget,
    SelectCaseArm, Stmt, StmtKind, VarDecl, VbaType, Visibility,
};
use crate::error::{SourcePosition, VbaError, VbaResult};
use crate::lexer::{tokenize, LiteralKind, Token, TokenCursor, TokenKind};
use crate::stack::ensure_sufficient_stack;
use crate::value::MAX_FIXED_STRING_LENGTH;

/// Maximum nesting of blocks and parenthesised expressions.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Parse one module (a `.bas`, `.cls` or document module) from source text.
pub fn parse_module(source: &str) -> VbaResult<Module> {
    parse_tokens(tokenize(source)?)
}

/// Parse one module from an already tokenized source.
pub fn parse_tokens(tokens: Vec<Token>) -> VbaResult<Module> {
    let module = Parser::new(tokens).parse_module()?;
    log::debug!(
        "parsed module `{}` ({} declarations, {} procedures)",
        module.name,
        module.declarations.len(),
        module.procedures.len()
    );
    Ok(module)
}

/// Parse a standalone expression such as `1 + 2 * 3`.
pub fn parse_expression(source: &str) -> VbaResult<Expr> {
    let mut parser = Parser::new(tokenize(source)?);
    let expr = parser.parse_expression()?;
    parser.skip_newlines();
    if !parser.peek().is_eof() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

pub(crate) struct Parser {
    cursor: TokenCursor,
    depth: usize,
    /// `Next i, j` closes more than one loop; counts the loops still to close.
    pending_next: usize,
}

type Terminators = &'static [&'static [&'static str]];

const END_IF: Terminators = &[&["end", "if"], &["endif"], &["else"], &["elseif"]];
const END_SELECT: Terminators = &[&["case"], &["end", "select"]];
const NEXT: Terminators = &[&["next"]];
const LOOP: Terminators = &[&["loop"]];
const WEND: Terminators = &[&["wend"]];
const END_IF_ONLY: Terminators = &[&["end", "if"], &["endif"]];
const END_WITH: Terminators = &[&["end", "with"]];
const END_SUB: Terminators = &[&["end", "sub"]];
const END_FUNCTION: Terminators = &[&["end", "function"]];
const END_PROPERTY: Terminators = &[&["end", "property"]];

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self {
            cursor: TokenCursor::new(tokens),
            depth: 0,
            pending_next: 0,
        }
    }

    // ---- token helpers -------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.cursor.peek()
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.cursor.peek_nth(n)
    }

    fn advance(&mut self) -> Token {
        self.cursor.advance()
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().is_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> VbaResult<Token> {
        if self.peek().is_word(word) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{word}`")))
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> VbaResult<Token> {
        if self.peek().is_punct(punct) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{punct}`")))
        }
    }

    fn eat_operator(&mut self, op: &str) -> bool {
        if self.peek().is_operator(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_operator(&mut self, op: &str) -> VbaResult<Token> {
        if self.peek().is_operator(op) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{op}`")))
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::EndOfLine {
            self.advance();
        }
    }

    fn skip_line(&mut self) {
        while !self.peek().is_terminator() {
            self.advance();
        }
    }

    fn expect_end_of_statement(&mut self) -> VbaResult<()> {
        match self.peek().kind {
            TokenKind::EndOfLine => {
                self.advance();
                Ok(())
            }
            TokenKind::EndOfFile => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    /// Whether the next token starts a physical line.
    fn at_line_start(&self) -> bool {
        self.cursor.previous().map_or(true, Token::is_newline)
    }

    fn unexpected(&self, expected: &str) -> VbaError {
        let tok = self.peek();
        VbaError::syntax(
            format!("expected {expected}, found {}", describe(tok)),
            tok.position,
        )
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> VbaResult<T>) -> VbaResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(VbaError::syntax(
                "nesting is too deep",
                self.peek().position,
            ));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| f(self));
        self.depth -= 1;
        result
    }

    fn at_sequence(&self, words: &[&str]) -> bool {
        words
            .iter()
            .enumerate()
            .all(|(i, w)| self.peek_nth(i).is_word(w))
    }

    fn at_any(&self, terminators: Terminators) -> bool {
        terminators.iter().any(|seq| self.at_sequence(seq))
    }

    /// A name in a declaration position, with its type-declaration character split off.
    fn expect_name(&mut self, what: &str) -> VbaResult<(String, Option<VbaType>, SourcePosition)> {
        if !self.peek().is_name() {
            return Err(self.unexpected(what));
        }
        let tok = self.advance();
        let (name, ty) = split_name(&tok.text);
        Ok((name, ty, tok.position))
    }

    /// A member name after `.` or `!`; any word is accepted there.
    fn expect_member_name(&mut self) -> VbaResult<String> {
        let tok = self.peek();
        let is_word = tok.is_name()
            || (tok.kind == TokenKind::Operator && tok.text.chars().all(|c| c.is_ascii_alphabetic()))
            || (matches!(
                tok.kind,
                TokenKind::Literal(
                    LiteralKind::Boolean | LiteralKind::Empty | LiteralKind::Null | LiteralKind::Nothing
                )
            ));
        if !is_word {
            return Err(self.unexpected("a member name"));
        }
        let tok = self.advance();
        Ok(split_name(&tok.text).0)
    }

    fn expect_label(&mut self) -> VbaResult<String> {
        let tok = self.peek();
        if tok.is_name() || tok.kind == TokenKind::Literal(LiteralKind::Integer) {
            Ok(self.advance().text)
        } else {
            Err(self.unexpected("a label"))
        }
    }

    // ---- module ---------------------------------------------------------------------------

    pub(crate) fn parse_module(&mut self) -> VbaResult<Module> {
        self.skip_newlines();
        let position = self.peek().position;

        let mut kind = ModuleKind::Procedural;
        if self.peek().is_word("VERSION") {
            self.parse_class_header()?;
            kind = ModuleKind::Class;
        }

        let mut attributes = Vec::new();
        loop {
            self.skip_newlines();
            if !self.peek().is_word("Attribute") {
                break;
            }
            attributes.push(self.parse_attribute()?);
        }

        let name = attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case("VB_Name"))
            .and_then(|a| match &a.value.kind {
                ExprKind::Literal(Literal::String(s)) => Some(s.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                VbaError::syntax(
                    "module header `Attribute VB_Name = \"...\"` expected",
                    self.peek().position,
                )
            })?;
        if kind == ModuleKind::Procedural
            && attributes
                .iter()
                .any(|a| a.name.eq_ignore_ascii_case("VB_Base"))
        {
            kind = ModuleKind::Document;
        }

        let mut module = Module {
            name,
            kind,
            attributes,
            options: ModuleOptions::default(),
            declarations: Vec::new(),
            procedures: Vec::new(),
            position,
        };

        loop {
            self.skip_newlines();
            if self.peek().is_eof() {
                break;
            }
            if self.peek().is_word("Attribute") {
                let attr = self.parse_attribute()?;
                module.attributes.push(attr);
                continue;
            }
            self.parse_module_item(&mut module)?;
        }

        for decl in &module.declarations {
            if let DeclarationKind::Option(option) = &decl.kind {
                match option {
                    ModuleOption::Explicit => module.options.explicit = true,
                    ModuleOption::Base(base) => module.options.base = *base,
                    ModuleOption::CompareText => module.options.compare_text = true,
                    ModuleOption::CompareBinary | ModuleOption::CompareDatabase => {
                        module.options.compare_text = false
                    }
                    ModuleOption::PrivateModule => module.options.private_module = true,
                }
            }
        }

        Ok(module)
    }

    /// `VERSION 1.0 CLASS` followed by a `BEGIN ... END` property block.
    fn parse_class_header(&mut self) -> VbaResult<()> {
        self.expect_word("VERSION")?;
        self.skip_line();
        self.skip_newlines();
        if !self.eat_word("BEGIN") {
            return Ok(());
        }
        loop {
            if self.peek().is_eof() {
                return Err(self.unexpected("`END` closing the class header"));
            }
            if self.at_line_start()
                && self.peek().is_word("END")
                && self.peek_nth(1).is_terminator()
            {
                self.advance();
                return self.expect_end_of_statement();
            }
            self.advance();
        }
    }

    fn parse_attribute(&mut self) -> VbaResult<Attribute> {
        let position = self.expect_word("Attribute")?.position;
        let (mut name, _, _) = self.expect_name("an attribute name")?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_member_name()?);
        }
        // `Foo.VB_UserMemId` attributes the member; keep the attribute part.
        let name = name.rsplit('.').next().unwrap_or_default().to_string();
        self.expect_operator("=")?;
        let value = self.parse_expression()?;
        // Values such as `VB_Control` may list several items.
        while self.eat_punct(",") {
            self.parse_expression()?;
        }
        self.expect_end_of_statement()?;
        Ok(Attribute {
            name,
            value,
            position,
        })
    }

    fn parse_module_item(&mut self, module: &mut Module) -> VbaResult<()> {
        let tok = self.peek().clone();
        let position = tok.position;

        if tok.is_word("Option") {
            self.advance();
            let option = self.parse_option()?;
            self.expect_end_of_statement()?;
            module.declarations.push(Declaration {
                kind: DeclarationKind::Option(option),
                position,
            });
            return Ok(());
        }
        if tok.is_word("Implements") {
            self.advance();
            let (name, _, _) = self.expect_name("an interface name")?;
            self.expect_end_of_statement()?;
            module.declarations.push(Declaration {
                kind: DeclarationKind::Implements(name),
                position,
            });
            return Ok(());
        }

        let mut visibility = None;
        let mut is_dim = false;
        if tok.is_word("Public") || tok.is_word("Global") {
            visibility = Some(Visibility::Public);
        } else if tok.is_word("Private") {
            visibility = Some(Visibility::Private);
        } else if tok.is_word("Friend") {
            visibility = Some(Visibility::Friend);
        } else if tok.is_word("Dim") {
            is_dim = true;
        }
        if visibility.is_some() || is_dim {
            self.advance();
        }

        let is_static = self.eat_word("Static");
        let next = self.peek().clone();

        if next.is_word("Sub") || next.is_word("Function") || next.is_word("Property") {
            let procedure =
                self.parse_procedure(visibility.unwrap_or(Visibility::Public), is_static, position)?;
            module.procedures.push(procedure);
            return Ok(());
        }

        let declared_visibility = visibility.is_some();
        let visibility = visibility.unwrap_or(Visibility::Private);
        let kind = if next.is_word("Declare") {
            DeclarationKind::External(self.parse_declare(visibility)?)
        } else if next.is_word("Const") {
            self.advance();
            DeclarationKind::Constants {
                visibility,
                consts: self.parse_const_list()?,
            }
        } else if next.is_word("Enum") {
            self.parse_enum(visibility)?
        } else if next.is_word("Type") {
            self.parse_type_decl(visibility)?
        } else if next.is_word("Event") {
            self.advance();
            let (name, _, _) = self.expect_name("an event name")?;
            let params = if self.eat_punct("(") {
                self.parse_params()?
            } else {
                Vec::new()
            };
            DeclarationKind::Event {
                visibility,
                name,
                params,
            }
        } else if declared_visibility || is_dim || is_static {
            let with_events = self.eat_word("WithEvents");
            DeclarationKind::Variables {
                visibility,
                with_events,
                vars: self.parse_var_list()?,
            }
        } else {
            return Err(self.unexpected("a declaration or procedure"));
        };

        self.expect_end_of_statement()?;
        module.declarations.push(Declaration { kind, position });
        Ok(())
    }

    fn parse_option(&mut self) -> VbaResult<ModuleOption> {
        if self.eat_word("Explicit") {
            Ok(ModuleOption::Explicit)
        } else if self.eat_word("Base") {
            let tok = self.advance();
            match tok.text.as_str() {
                "0" => Ok(ModuleOption::Base(0)),
                "1" => Ok(ModuleOption::Base(1)),
                _ => Err(VbaError::syntax("`Option Base` must be 0 or 1", tok.position)),
            }
        } else if self.eat_word("Compare") {
            if self.eat_word("Text") {
                Ok(ModuleOption::CompareText)
            } else if self.eat_word("Binary") {
                Ok(ModuleOption::CompareBinary)
            } else if self.eat_word("Database") {
                Ok(ModuleOption::CompareDatabase)
            } else {
                Err(self.unexpected("`Text`, `Binary` or `Database`"))
            }
        } else if self.eat_word("Private") {
            self.expect_word("Module")?;
            Ok(ModuleOption::PrivateModule)
        } else {
            Err(self.unexpected("a module option"))
        }
    }

    fn parse_declare(&mut self, visibility: Visibility) -> VbaResult<ExternalDecl> {
        self.expect_word("Declare")?;
        self.eat_word("PtrSafe");
        let is_function = if self.eat_word("Function") {
            true
        } else {
            self.expect_word("Sub")?;
            false
        };
        let (name, suffix_ty, _) = self.expect_name("a procedure name")?;
        self.expect_word("Lib")?;
        let library = self.expect_string_literal()?;
        let alias = if self.eat_word("Alias") {
            Some(self.expect_string_literal()?)
        } else {
            None
        };
        let params = if self.eat_punct("(") {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let return_type = if self.eat_word("As") {
            Some(self.parse_type()?)
        } else {
            suffix_ty
        };
        Ok(ExternalDecl {
            visibility,
            name,
            is_function,
            library,
            alias,
            params,
            return_type,
        })
    }

    fn expect_string_literal(&mut self) -> VbaResult<String> {
        if self.peek().kind != TokenKind::Literal(LiteralKind::String) {
            return Err(self.unexpected("a string literal"));
        }
        Ok(unquote(&self.advance().text))
    }

    fn parse_enum(&mut self, visibility: Visibility) -> VbaResult<DeclarationKind> {
        self.expect_word("Enum")?;
        let (name, _, _) = self.expect_name("an enum name")?;
        self.expect_end_of_statement()?;
        let mut members = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_sequence(&["end", "enum"]) {
                self.advance();
                self.advance();
                break;
            }
            if self.peek().is_eof() {
                return Err(self.unexpected("`End Enum`"));
            }
            let (member, _, position) = self.expect_name("an enum member")?;
            let value = if self.eat_operator("=") {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.expect_end_of_statement()?;
            members.push(EnumMember {
                name: member,
                value,
                position,
            });
        }
        Ok(DeclarationKind::Enum {
            visibility,
            name,
            members,
        })
    }

    fn parse_type_decl(&mut self, visibility: Visibility) -> VbaResult<DeclarationKind> {
        self.expect_word("Type")?;
        let (name, _, _) = self.expect_name("a type name")?;
        self.expect_end_of_statement()?;
        let mut fields = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_sequence(&["end", "type"]) {
                self.advance();
                self.advance();
                break;
            }
            if self.peek().is_eof() {
                return Err(self.unexpected("`End Type`"));
            }
            fields.push(self.parse_var_decl()?);
            self.expect_end_of_statement()?;
        }
        Ok(DeclarationKind::Type {
            visibility,
            name,
            fields,
        })
    }

    // ---- procedures -----------------------------------------------------------------------

    fn parse_procedure(
        &mut self,
        visibility: Visibility,
        is_static: bool,
        position: SourcePosition,
    ) -> VbaResult<Procedure> {
        let (kind, terminators, end_word) = if self.eat_word("Sub") {
            (ProcedureKind::Sub, END_SUB, "Sub")
        } else if self.eat_word("Function") {
            (ProcedureKind::Function, END_FUNCTION, "Function")
        } else {
            self.expect_word("Property")?;
            let kind = if self.eat_word("Get") {
                ProcedureKind::PropertyGet
            } else if self.eat_word("Let") {
                ProcedureKind::PropertyLet
            } else if self.eat_word("Set") {
                ProcedureKind::PropertySet
            } else {
                return Err(self.unexpected("`Get`, `Let` or `Set`"));
            };
            (kind, END_PROPERTY, "Property")
        };

        let (name, suffix_ty, _) = self.expect_name("a procedure name")?;
        let params = if self.eat_punct("(") {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let mut return_type = suffix_ty;
        if self.eat_word("As") {
            let mut ty = self.parse_type()?;
            if self.eat_punct("(") {
                self.expect_punct(")")?;
                ty = VbaType::Array(Box::new(ty));
            }
            return_type = Some(ty);
        }
        self.expect_end_of_statement()?;

        let body = self.parse_block(terminators)?;
        self.expect_word("End")?;
        self.expect_word(end_word)?;
        self.expect_end_of_statement()?;

        Ok(Procedure {
            name,
            kind,
            visibility,
            is_static,
            params,
            return_type,
            body,
            position,
        })
    }

    /// Parameter list after the opening `(`, consuming the closing `)`.
    fn parse_params(&mut self) -> VbaResult<Vec<ParamDef>> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            let position = self.peek().position;
            let optional = self.eat_word("Optional");
            let passing = if self.eat_word("ByVal") {
                PassingMode::ByVal
            } else {
                self.eat_word("ByRef");
                PassingMode::ByRef
            };
            let param_array = self.eat_word("ParamArray");
            let (name, suffix_ty, _) = self.expect_name("a parameter name")?;
            let is_array = if self.eat_punct("(") {
                self.expect_punct(")")?;
                true
            } else {
                false
            };
            let ty = if self.eat_word("As") {
                Some(self.parse_type()?)
            } else {
                suffix_ty
            };
            let default = if self.eat_operator("=") {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(ParamDef {
                name,
                ty,
                passing,
                optional,
                param_array,
                is_array,
                default,
                position,
            });
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.expect_punct(",")?;
        }
    }

    /// A type name after `As`: a primitive, `String * n`, or a possibly dotted class name.
    fn parse_type(&mut self) -> VbaResult<VbaType> {
        let (mut name, _, _) = self.expect_name("a type name")?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_member_name()?);
        }
        let ty = VbaType::from_name(&name);
        if ty == VbaType::String && self.eat_operator("*") {
            let tok = self.advance();
            let len = tok.text.trim_end_matches(&['%', '&'][..]).parse::<usize>().map_err(|_| {
                VbaError::syntax("fixed string length must be a number", tok.position)
            })?;
            if len == 0 || len > MAX_FIXED_STRING_LENGTH {
                return Err(VbaError::syntax(
                    format!("fixed string length must be between 1 and {MAX_FIXED_STRING_LENGTH}"),
                    tok.position,
                ));
            }
            return Ok(VbaType::FixedString(len));
        }
        Ok(ty)
    }

    fn parse_var_list(&mut self) -> VbaResult<Vec<VarDecl>> {
        let mut vars = vec![self.parse_var_decl()?];
        while self.eat_punct(",") {
            vars.push(self.parse_var_decl()?);
        }
        Ok(vars)
    }

    fn parse_var_decl(&mut self) -> VbaResult<VarDecl> {
        let (name, suffix_ty, position) = self.expect_name("a variable name")?;
        let dims = if self.eat_punct("(") {
            if self.eat_punct(")") {
                Some(Vec::new())
            } else {
                let dims = self.parse_dims()?;
                Some(dims)
            }
        } else {
            None
        };
        let mut is_new = false;
        let ty = if self.eat_word("As") {
            is_new = self.eat_word("New");
            self.parse_type()?
        } else {
            suffix_ty.unwrap_or(VbaType::Variant)
        };
        Ok(VarDecl {
            name,
            ty,
            dims,
            is_new,
            position,
        })
    }

    /// Array bounds after `(`, consuming the closing `)`.
    fn parse_dims(&mut self) -> VbaResult<Vec<ArrayDim>> {
        let mut dims = Vec::new();
        loop {
            let first = self.parse_expression()?;
            let dim = if self.eat_word("To") {
                ArrayDim {
                    lower: Some(first),
                    upper: self.parse_expression()?,
                }
            } else {
                ArrayDim {
                    lower: None,
                    upper: first,
                }
            };
            dims.push(dim);
            if self.eat_punct(")") {
                return Ok(dims);
            }
            self.expect_punct(",")?;
        }
    }

    fn parse_const_list(&mut self) -> VbaResult<Vec<ConstDecl>> {
        let mut consts = Vec::new();
        loop {
            let (name, suffix_ty, position) = self.expect_name("a constant name")?;
            let ty = if self.eat_word("As") {
                Some(self.parse_type()?)
            } else {
                suffix_ty
            };
            self.expect_operator("=")?;
            let value = self.parse_expression()?;
            consts.push(ConstDecl {
                name,
                ty,
                value,
                position,
            });
            if !self.eat_punct(",") {
                return Ok(consts);
            }
        }
    }

    // ---- statements -----------------------------------------------------------------------

    /// Statements up to (not including) one of `terminators`.
    fn parse_block(&mut self, terminators: Terminators) -> VbaResult<Vec<Stmt>> {
        self.nested(|p| {
            let mut body = Vec::new();
            loop {
                p.skip_newlines();
                if p.at_any(terminators) || (p.pending_next > 0 && terminators == NEXT) {
                    return Ok(body);
                }
                if p.pending_next > 0 {
                    return Err(VbaError::syntax(
                        "`Next` without matching `For`",
                        p.peek().position,
                    ));
                }
                if p.peek().is_eof() {
                    let expected = terminators[0].join(" ");
                    return Err(p.unexpected(&format!("`{expected}`")));
                }
                if p.peek().is_word("Attribute") && p.peek_nth(1).is_name() {
                    p.skip_line();
                    continue;
                }
                let stmt = p.parse_statement()?;
                let is_label = matches!(stmt.kind, StmtKind::Label(_));
                body.push(stmt);
                if !is_label {
                    p.expect_end_of_statement()?;
                }
            }
        })
    }

    fn parse_statement(&mut self) -> VbaResult<Stmt> {
        let tok = self.peek().clone();
        let position = tok.position;

        if self.at_line_start() {
            if tok.kind == TokenKind::Literal(LiteralKind::Integer) {
                self.advance();
                return Ok(Stmt {
                    kind: StmtKind::Label(tok.text),
                    position,
                });
            }
            let next = self.peek_nth(1);
            if tok.kind == TokenKind::Identifier && next.kind == TokenKind::EndOfLine && next.text == ":"
            {
                self.advance();
                self.advance();
                return Ok(Stmt {
                    kind: StmtKind::Label(split_name(&tok.text).0),
                    position,
                });
            }
        }

        let kind = if tok.kind != TokenKind::Keyword {
            self.parse_simple_statement()?
        } else {
            match tok.text.to_ascii_lowercase().as_str() {
                "dim" | "private" | "public" => {
                    self.advance();
                    StmtKind::Dim {
                        is_static: false,
                        vars: self.parse_var_list()?,
                    }
                }
                "static" => {
                    self.advance();
                    StmtKind::Dim {
                        is_static: true,
                        vars: self.parse_var_list()?,
                    }
                }
                "const" => {
                    self.advance();
                    StmtKind::Const(self.parse_const_list()?)
                }
                "redim" => self.parse_redim()?,
                "set" => {
                    self.advance();
                    let target = self.parse_lexpr(false)?;
                    self.expect_operator("=")?;
                    StmtKind::Set {
                        target,
                        value: self.parse_expression()?,
                    }
                }
                "let" => {
                    self.advance();
                    let target = self.parse_lexpr(false)?;
                    self.expect_operator("=")?;
                    StmtKind::Assign {
                        target,
                        value: self.parse_expression()?,
                    }
                }
                "call" => {
                    self.advance();
                    StmtKind::Call {
                        target: self.parse_lexpr(false)?,
                        explicit: true,
                    }
                }
                "if" => self.parse_if()?,
                "select" => self.parse_select()?,
                "for" => self.parse_for()?,
                "do" => self.parse_do()?,
                "while" => {
                    self.advance();
                    let condition = self.parse_expression()?;
                    self.expect_end_of_statement()?;
                    let body = self.parse_block(WEND)?;
                    self.expect_word("Wend")?;
                    StmtKind::While { condition, body }
                }
                "with" => {
                    self.advance();
                    let object = self.parse_expression()?;
                    self.expect_end_of_statement()?;
                    let body = self.parse_block(END_WITH)?;
                    self.advance();
                    self.advance();
                    StmtKind::With { object, body }
                }
                "goto" => {
                    self.advance();
                    StmtKind::GoTo(self.expect_label()?)
                }
                "on" => self.parse_on_error()?,
                "resume" => {
                    self.advance();
                    let target = if self.peek().is_terminator() || self.peek().is_word("Else") {
                        ResumeTarget::Same
                    } else if self.eat_word("Next") {
                        ResumeTarget::Next
                    } else {
                        let label = self.expect_label()?;
                        if label == "0" {
                            ResumeTarget::Same
                        } else {
                            ResumeTarget::Label(label)
                        }
                    };
                    StmtKind::Resume(target)
                }
                "exit" => {
                    self.advance();
                    let kind = if self.eat_word("Sub") {
                        ExitKind::Sub
                    } else if self.eat_word("Function") {
                        ExitKind::Function
                    } else if self.eat_word("Property") {
                        ExitKind::Property
                    } else if self.eat_word("For") {
                        ExitKind::For
                    } else if self.eat_word("Do") {
                        ExitKind::Do
                    } else {
                        return Err(self.unexpected("`Sub`, `Function`, `Property`, `For` or `Do`"));
                    };
                    StmtKind::Exit(kind)
                }
                "end" if self.peek_nth(1).is_terminator() => {
                    self.advance();
                    StmtKind::End
                }
                "stop" => {
                    self.advance();
                    StmtKind::Stop
                }
                "error" if !self.peek_nth(1).is_terminator() && !self.peek_nth(1).is_operator("=") => {
                    self.advance();
                    StmtKind::RaiseError(self.parse_expression()?)
                }
                "erase" => {
                    self.advance();
                    let mut targets = vec![self.parse_lexpr(false)?];
                    while self.eat_punct(",") {
                        targets.push(self.parse_lexpr(false)?);
                    }
                    StmtKind::Erase(targets)
                }
                "open" => self.parse_open()?,
                "close" => {
                    self.advance();
                    let mut numbers = Vec::new();
                    if !self.peek().is_terminator() {
                        loop {
                            self.eat_punct("#");
                            numbers.push(self.parse_expression()?);
                            if !self.eat_punct(",") {
                                break;
                            }
                        }
                    }
                    StmtKind::Close(numbers)
                }
                "print" | "write" if self.peek_nth(1).is_punct("#") => {
                    let write = self.advance().is_word("write");
                    self.expect_punct("#")?;
                    let file_number = self.parse_expression()?;
                    let items = if self.eat_punct(",") {
                        self.parse_print_items()?
                    } else {
                        Vec::new()
                    };
                    StmtKind::Print {
                        file_number: Some(file_number),
                        items,
                        write,
                    }
                }
                "end" | "else" | "elseif" | "loop" | "next" | "wend" | "case" => {
                    return Err(VbaError::syntax(
                        format!("unexpected `{}` without a matching block", tok.text),
                        position,
                    ));
                }
                _ => self.parse_simple_statement()?,
            }
        };

        Ok(Stmt { kind, position })
    }

    /// Assignment or call statement starting with an l-expression.
    fn parse_simple_statement(&mut self) -> VbaResult<StmtKind> {
        let target = self.parse_lexpr(true)?;

        if self.eat_operator("=") {
            return Ok(StmtKind::Assign {
                target,
                value: self.parse_expression()?,
            });
        }

        if is_debug_print(&target) {
            return Ok(StmtKind::Print {
                file_number: None,
                items: self.parse_print_items()?,
                write: false,
            });
        }

        if self.peek().is_terminator() || self.peek().is_word("Else") {
            return Ok(StmtKind::Call {
                target,
                explicit: false,
            });
        }

        let position = target.position;
        let args = self.parse_bare_args()?;
        Ok(StmtKind::Call {
            target: Expr::new(
                ExprKind::Call {
                    callee: Box::new(target),
                    args,
                },
                position,
            ),
            explicit: false,
        })
    }

    fn parse_print_items(&mut self) -> VbaResult<Vec<PrintItem>> {
        let mut items = Vec::new();
        while !self.peek().is_terminator() && !self.peek().is_word("Else") {
            let expr = if self.peek().is_punct(";") || self.peek().is_punct(",") {
                None
            } else {
                Some(self.parse_expression()?)
            };
            let separator = if self.eat_punct(";") {
                Some(';')
            } else if self.eat_punct(",") {
                Some(',')
            } else {
                None
            };
            let done = separator.is_none();
            items.push(PrintItem { expr, separator });
            if done {
                break;
            }
        }
        Ok(items)
    }

    fn parse_redim(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("ReDim")?;
        let preserve = self.eat_word("Preserve");
        let mut targets = Vec::new();
        loop {
            let (name, suffix_ty, position) = self.expect_name("an array name")?;
            let mut target = Expr::new(ExprKind::Name(name), position);
            while self.peek().is_punct(".") {
                self.advance();
                let member = self.expect_member_name()?;
                target = Expr::new(
                    ExprKind::Member {
                        object: Box::new(target),
                        member,
                    },
                    position,
                );
            }
            self.expect_punct("(")?;
            let dims = self.parse_dims()?;
            let ty = if self.eat_word("As") {
                Some(self.parse_type()?)
            } else {
                suffix_ty
            };
            targets.push(ReDimTarget { target, dims, ty });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(StmtKind::ReDim { preserve, targets })
    }

    fn parse_if(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("If")?;
        let condition = self.parse_expression()?;
        self.expect_word("Then")?;

        if !self.peek().is_newline() && !self.peek().is_eof() {
            return self.parse_single_line_if(condition);
        }

        let then_body = self.parse_block(END_IF)?;
        let mut else_ifs = Vec::new();
        let mut else_body = None;
        loop {
            if self.peek().is_word("ElseIf") {
                let position = self.advance().position;
                let condition = self.parse_expression()?;
                self.expect_word("Then")?;
                let body = self.parse_block(END_IF)?;
                else_ifs.push(ElseIf {
                    condition,
                    body,
                    position,
                });
            } else if self.eat_word("Else") {
                else_body = Some(self.parse_block(END_IF_ONLY)?);
            } else if self.eat_word("EndIf") {
                break;
            } else {
                self.expect_word("End")?;
                self.expect_word("If")?;
                break;
            }
        }
        Ok(StmtKind::If {
            condition,
            then_body,
            else_ifs,
            else_body,
        })
    }

    /// `If c Then a: b Else c: d` on one logical line.
    fn parse_single_line_if(&mut self, condition: Expr) -> VbaResult<StmtKind> {
        let then_body = self.parse_inline_statements()?;
        let else_body = if self.eat_word("Else") {
            Some(self.parse_inline_statements()?)
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_body,
            else_ifs: Vec::new(),
            else_body,
        })
    }

    fn parse_inline_statements(&mut self) -> VbaResult<Vec<Stmt>> {
        self.nested(|p| {
            let mut body = Vec::new();
            // `If x Then 100` jumps to line 100.
            if p.peek().kind == TokenKind::Literal(LiteralKind::Integer) {
                let tok = p.advance();
                body.push(Stmt {
                    kind: StmtKind::GoTo(tok.text),
                    position: tok.position,
                });
                return Ok(body);
            }
            loop {
                if p.peek().is_newline() || p.peek().is_eof() || p.peek().is_word("Else") {
                    return Ok(body);
                }
                if p.peek().is_terminator() {
                    p.advance();
                    continue;
                }
                body.push(p.parse_statement()?);
                if !p.peek().is_terminator() && !p.peek().is_word("Else") {
                    return Err(p.unexpected("end of statement"));
                }
            }
        })
    }

    fn parse_select(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("Select")?;
        self.expect_word("Case")?;
        let selector = self.parse_expression()?;
        self.expect_end_of_statement()?;
        self.skip_newlines();

        let mut arms = Vec::new();
        let mut else_body = None;
        loop {
            self.skip_newlines();
            if self.at_sequence(&["end", "select"]) {
                self.advance();
                self.advance();
                break;
            }
            let position = self.expect_word("Case")?.position;
            if self.eat_word("Else") {
                else_body = Some(self.parse_block(END_SELECT)?);
                continue;
            }
            let mut conditions = Vec::new();
            loop {
                conditions.push(self.parse_case_condition()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            let body = self.parse_block(END_SELECT)?;
            arms.push(SelectCaseArm {
                conditions,
                body,
                position,
            });
        }
        Ok(StmtKind::SelectCase {
            selector,
            arms,
            else_body,
        })
    }

    fn parse_case_condition(&mut self) -> VbaResult<CaseCondition> {
        if self.eat_operator("Is") {
            let tok = self.advance();
            let op = crate::ast::BinOp::from_token(&tok.text)
                .filter(|op| op.is_comparison())
                .ok_or_else(|| {
                    VbaError::syntax(
                        format!("expected a comparison operator, found {}", describe(&tok)),
                        tok.position,
                    )
                })?;
            return Ok(CaseCondition::Is {
                op,
                expr: self.parse_expression()?,
            });
        }
        let start = self.parse_expression()?;
        if self.eat_word("To") {
            return Ok(CaseCondition::Range {
                start,
                end: self.parse_expression()?,
            });
        }
        Ok(CaseCondition::Expr(start))
    }

    fn parse_for(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("For")?;

        if self.eat_word("Each") {
            let element = self.parse_lexpr(false)?;
            self.expect_word("In")?;
            let collection = self.parse_expression()?;
            self.expect_end_of_statement()?;
            let body = self.parse_block(NEXT)?;
            self.finish_next()?;
            return Ok(StmtKind::ForEach {
                element,
                collection,
                body,
            });
        }

        let counter = self.parse_lexpr(false)?;
        self.expect_operator("=")?;
        let start = self.parse_expression()?;
        self.expect_word("To")?;
        let end = self.parse_expression()?;
        let step = if self.eat_word("Step") {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_end_of_statement()?;
        let body = self.parse_block(NEXT)?;
        self.finish_next()?;
        Ok(StmtKind::For {
            counter,
            start,
            end,
            step,
            body,
        })
    }

    /// Consumes the `Next` closing a loop. `Next i, j` also closes the enclosing loops.
    fn finish_next(&mut self) -> VbaResult<()> {
        if self.pending_next > 0 {
            self.pending_next -= 1;
            return Ok(());
        }
        self.expect_word("Next")?;
        if self.peek().is_name() {
            self.advance();
            while self.eat_punct(",") {
                self.expect_name("a loop counter")?;
                self.pending_next += 1;
            }
        }
        Ok(())
    }

    fn parse_do(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("Do")?;
        let pre_condition = self.parse_loop_condition()?;
        self.expect_end_of_statement()?;
        let body = self.parse_block(LOOP)?;
        self.expect_word("Loop")?;
        let post_condition = self.parse_loop_condition()?;
        if pre_condition.is_some() && post_condition.is_some() {
            return Err(VbaError::syntax(
                "a `Do` loop cannot have both a leading and a trailing condition",
                self.peek().position,
            ));
        }
        Ok(StmtKind::DoLoop {
            pre_condition,
            post_condition,
            body,
        })
    }

    fn parse_loop_condition(&mut self) -> VbaResult<Option<LoopCondition>> {
        let kind = if self.eat_word("While") {
            LoopConditionKind::While
        } else if self.eat_word("Until") {
            LoopConditionKind::Until
        } else {
            return Ok(None);
        };
        Ok(Some(LoopCondition {
            kind,
            expr: self.parse_expression()?,
        }))
    }

    fn parse_on_error(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("On")?;
        self.eat_word("Local");
        self.expect_word("Error")?;
        if self.eat_word("Resume") {
            self.expect_word("Next")?;
            return Ok(StmtKind::OnError(OnErrorAction::ResumeNext));
        }
        self.expect_word("GoTo")?;
        if self.eat_operator("-") {
            let tok = self.advance();
            if tok.text != "1" {
                return Err(VbaError::syntax("expected `-1`", tok.position));
            }
            return Ok(StmtKind::OnError(OnErrorAction::GoToMinusOne));
        }
        let label = self.expect_label()?;
        Ok(StmtKind::OnError(if label == "0" {
            OnErrorAction::GoToZero
        } else {
            OnErrorAction::GoToLabel(label)
        }))
    }

    fn parse_open(&mut self) -> VbaResult<StmtKind> {
        self.expect_word("Open")?;
        let path = self.parse_expression()?;
        self.expect_word("For")?;
        let mode = if self.eat_word("Input") {
            OpenMode::Input
        } else if self.eat_word("Output") {
            OpenMode::Output
        } else if self.eat_word("Append") {
            OpenMode::Append
        } else if self.eat_word("Binary") {
            OpenMode::Binary
        } else if self.eat_word("Random") {
            OpenMode::Random
        } else {
            return Err(self.unexpected("a file mode"));
        };
        // `Access ...` and lock clauses do not change what is recorded.
        while !self.peek().is_word("As") && !self.peek().is_terminator() {
            self.advance();
        }
        self.expect_word("As")?;
        self.eat_punct("#");
        let file_number = self.parse_expression()?;
        if self.eat_word("Len") {
            self.expect_operator("=")?;
            self.parse_expression()?;
        }
        Ok(StmtKind::Open {
            path,
            mode,
            file_number,
        })
    }
}

fn is_debug_print(target: &Expr) -> bool {
    match &target.kind {
        ExprKind::Member { object, member } => {
            member.eq_ignore_ascii_case("print")
                && object
                    .as_name()
                    .is_some_and(|name| name.eq_ignore_ascii_case("debug"))
        }
        _ => false,
    }
}

/// Splits brackets and a trailing type-declaration character off an identifier.
pub(crate) fn split_name(text: &str) -> (String, Option<VbaType>) {
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return (inner.to_string(), None);
    }
    match text.chars().last() {
        Some(c) if text.len() > 1 => match VbaType::from_suffix(c) {
            Some(ty) => (text[..text.len() - 1].to_string(), Some(ty)),
            None => (text.to_string(), None),
        },
        _ => (text.to_string(), None),
    }
}

pub(crate) fn unquote(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    inner.replace("\"\"", "\"")
}

fn describe(tok: &Token) -> String {
    match tok.kind {
        TokenKind::EndOfFile => "end of input".to_string(),
        TokenKind::EndOfLine if tok.text == ":" => "`:`".to_string(),
        TokenKind::EndOfLine => "end of line".to_string(),
        _ => format!("`{}`", tok.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Attribute VB_Name = \"Module1\"\n";

    fn module(body: &str) -> Module {
        parse_module(&format!("{HEADER}{body}")).unwrap()
    }

    #[test]
    fn missing_header_is_a_syntax_error() {
        let err = parse_module("Sub Main()\nEnd Sub\n").unwrap_err();
        assert!(matches!(err, VbaError::Syntax { .. }), "{err:?}");
    }

    #[test]
    fn single_line_if_with_else() {
        let m = module("Sub Main()\nIf x Then y = 1: z = 2 Else y = 3\nEnd Sub\n");
        let StmtKind::If {
            then_body,
            else_body,
            ..
        } = &m.procedures[0].body[0].kind
        else {
            panic!("expected If");
        };
        assert_eq!(then_body.len(), 2);
        assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn spaced_paren_starts_bare_arguments() {
        let m = module("Sub Main()\nFoo (a), b\nEnd Sub\n");
        let StmtKind::Call { target, .. } = &m.procedures[0].body[0].kind else {
            panic!("expected call");
        };
        let ExprKind::Call { args, .. } = &target.kind else {
            panic!("expected call expression");
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(args[0].value.kind, ExprKind::Paren(_)));
    }

    #[test]
    fn next_with_several_counters_closes_nested_loops() {
        let m = module("Sub Main()\nFor i = 1 To 2\nFor j = 1 To 2\nx = x + 1\nNext j, i\nEnd Sub\n");
        assert_eq!(m.procedures[0].body.len(), 1);
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let src = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        let err = parse_expression(&src).unwrap_err();
        assert!(matches!(err, VbaError::Syntax { .. }));
    }
}
