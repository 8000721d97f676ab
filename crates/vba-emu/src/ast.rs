//! Syntax tree produced by the parser.
//!
//! Every node owns its children and records the position of its first token.

use serde::Serialize;

use crate::error::SourcePosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleKind {
    /// A standard `.bas` module.
    Procedural,
    /// A `.cls` class module (`VERSION 1.0 CLASS` header).
    Class,
    /// A document module such as `ThisDocument` or `ThisWorkbook`.
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleOptions {
    pub explicit: bool,
    pub compare_text: bool,
    pub base: i32,
    pub private_module: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub kind: ModuleKind,
    pub attributes: Vec<Attribute>,
    pub options: ModuleOptions,
    pub declarations: Vec<Declaration>,
    pub procedures: Vec<Procedure>,
    pub position: SourcePosition,
}

impl Module {
    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name) && !p.kind.is_property_setter())
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Expr,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Visibility {
    Public,
    Private,
    Friend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationKind {
    Option(ModuleOption),
    Variables {
        visibility: Visibility,
        with_events: bool,
        vars: Vec<VarDecl>,
    },
    Constants {
        visibility: Visibility,
        consts: Vec<ConstDecl>,
    },
    Enum {
        visibility: Visibility,
        name: String,
        members: Vec<EnumMember>,
    },
    Type {
        visibility: Visibility,
        name: String,
        fields: Vec<VarDecl>,
    },
    External(ExternalDecl),
    Implements(String),
    Event {
        visibility: Visibility,
        name: String,
        params: Vec<ParamDef>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOption {
    Explicit,
    Base(i32),
    CompareBinary,
    CompareText,
    CompareDatabase,
    PrivateModule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: VbaType,
    /// `None` for scalars, `Some(vec![])` for a dynamic array `x()`.
    pub dims: Option<Vec<ArrayDim>>,
    /// `As New Class`.
    pub is_new: bool,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDim {
    pub lower: Option<Expr>,
    pub upper: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub name: String,
    pub ty: Option<VbaType>,
    pub value: Expr,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    pub value: Option<Expr>,
    pub position: SourcePosition,
}

/// A `Declare` statement binding an external library routine.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalDecl {
    pub visibility: Visibility,
    pub name: String,
    pub is_function: bool,
    pub library: String,
    pub alias: Option<String>,
    pub params: Vec<ParamDef>,
    pub return_type: Option<VbaType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcedureKind {
    Sub,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
}

impl ProcedureKind {
    pub fn is_property(self) -> bool {
        matches!(
            self,
            ProcedureKind::PropertyGet | ProcedureKind::PropertyLet | ProcedureKind::PropertySet
        )
    }

    pub fn is_property_setter(self) -> bool {
        matches!(self, ProcedureKind::PropertyLet | ProcedureKind::PropertySet)
    }

    /// Whether the procedure produces a value through a local named after it.
    pub fn returns_value(self) -> bool {
        matches!(self, ProcedureKind::Function | ProcedureKind::PropertyGet)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub kind: ProcedureKind,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<ParamDef>,
    pub return_type: Option<VbaType>,
    pub body: Vec<Stmt>,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassingMode {
    ByRef,
    ByVal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub ty: Option<VbaType>,
    pub passing: PassingMode,
    pub optional: bool,
    pub param_array: bool,
    pub is_array: bool,
    pub default: Option<Expr>,
    pub position: SourcePosition,
}

/// Declared type of a variable, parameter or return slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VbaType {
    Variant,
    Boolean,
    Byte,
    Integer,
    Long,
    LongLong,
    LongPtr,
    Single,
    Double,
    Currency,
    Date,
    String,
    FixedString(usize),
    Object,
    /// A class, user-defined type or host library type.
    Named(String),
    Array(Box<VbaType>),
}

impl VbaType {
    pub fn from_name(name: &str) -> VbaType {
        match name.to_ascii_lowercase().as_str() {
            "variant" | "any" => VbaType::Variant,
            "boolean" => VbaType::Boolean,
            "byte" => VbaType::Byte,
            "integer" => VbaType::Integer,
            "long" => VbaType::Long,
            "longlong" => VbaType::LongLong,
            "longptr" => VbaType::LongPtr,
            "single" => VbaType::Single,
            "double" => VbaType::Double,
            "currency" => VbaType::Currency,
            "date" => VbaType::Date,
            "string" => VbaType::String,
            "object" => VbaType::Object,
            _ => VbaType::Named(name.to_string()),
        }
    }

    /// Type implied by an identifier's type-declaration character.
    pub fn from_suffix(suffix: char) -> Option<VbaType> {
        Some(match suffix {
            '%' => VbaType::Integer,
            '&' => VbaType::Long,
            '^' => VbaType::LongLong,
            '!' => VbaType::Single,
            '#' => VbaType::Double,
            '@' => VbaType::Currency,
            '$' => VbaType::String,
            _ => return None,
        })
    }

    pub fn is_object(&self) -> bool {
        matches!(self, VbaType::Object | VbaType::Named(_))
    }

    pub fn name(&self) -> String {
        match self {
            VbaType::Variant => "Variant".to_string(),
            VbaType::Boolean => "Boolean".to_string(),
            VbaType::Byte => "Byte".to_string(),
            VbaType::Integer => "Integer".to_string(),
            VbaType::Long => "Long".to_string(),
            VbaType::LongLong => "LongLong".to_string(),
            VbaType::LongPtr => "LongPtr".to_string(),
            VbaType::Single => "Single".to_string(),
            VbaType::Double => "Double".to_string(),
            VbaType::Currency => "Currency".to_string(),
            VbaType::Date => "Date".to_string(),
            VbaType::String => "String".to_string(),
            VbaType::FixedString(len) => format!("String * {len}"),
            VbaType::Object => "Object".to_string(),
            VbaType::Named(name) => name.clone(),
            VbaType::Array(inner) => format!("{}()", inner.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Dim {
        is_static: bool,
        vars: Vec<VarDecl>,
    },
    ReDim {
        preserve: bool,
        targets: Vec<ReDimTarget>,
    },
    Const(Vec<ConstDecl>),
    /// `[Let] target = value`.
    Assign {
        target: Expr,
        value: Expr,
    },
    Set {
        target: Expr,
        value: Expr,
    },
    /// A procedure or method call; `explicit` when written with the `Call` keyword.
    Call {
        target: Expr,
        explicit: bool,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_ifs: Vec<ElseIf>,
        else_body: Option<Vec<Stmt>>,
    },
    SelectCase {
        selector: Expr,
        arms: Vec<SelectCaseArm>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        counter: Expr,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    ForEach {
        element: Expr,
        collection: Expr,
        body: Vec<Stmt>,
    },
    DoLoop {
        pre_condition: Option<LoopCondition>,
        post_condition: Option<LoopCondition>,
        body: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    With {
        object: Expr,
        body: Vec<Stmt>,
    },
    Label(String),
    GoTo(String),
    OnError(OnErrorAction),
    Resume(ResumeTarget),
    Exit(ExitKind),
    /// `End`: terminates the whole execution.
    End,
    Stop,
    /// `Error n`.
    RaiseError(Expr),
    Erase(Vec<Expr>),
    Open {
        path: Expr,
        mode: OpenMode,
        file_number: Expr,
    },
    Close(Vec<Expr>),
    /// `Print #n, ...`, `Write #n, ...` or `Debug.Print ...` when `file_number` is `None`.
    Print {
        file_number: Option<Expr>,
        items: Vec<PrintItem>,
        write: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReDimTarget {
    pub target: Expr,
    pub dims: Vec<ArrayDim>,
    pub ty: Option<VbaType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub condition: Expr,
    pub body: Vec<Stmt>,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCaseArm {
    pub conditions: Vec<CaseCondition>,
    pub body: Vec<Stmt>,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseCondition {
    Expr(Expr),
    Range { start: Expr, end: Expr },
    Is { op: BinOp, expr: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopConditionKind {
    While,
    Until,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopCondition {
    pub kind: LoopConditionKind,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OnErrorAction {
    ResumeNext,
    /// `On Error GoTo 0`: disable the handler.
    GoToZero,
    /// `On Error GoTo -1`: clear the active error.
    GoToMinusOne,
    GoToLabel(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeTarget {
    Same,
    Next,
    Label(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Sub,
    Function,
    Property,
    For,
    Do,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Input,
    Output,
    Append,
    Binary,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintItem {
    pub expr: Option<Expr>,
    /// Separator written after the item: `;` or `,`.
    pub separator: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: SourcePosition,
}

impl Expr {
    pub fn new(kind: ExprKind, position: SourcePosition) -> Self {
        Self { kind, position }
    }

    /// Name of a plain identifier expression.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Name(String),
    Me,
    /// `.member` inside a `With` block.
    WithMember(String),
    Member {
        object: Box<Expr>,
        member: String,
    },
    /// `object!key`, shorthand for `object.Item("key")`.
    Bang {
        object: Box<Expr>,
        key: String,
    },
    /// A call or an index; which one is decided at runtime.
    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Paren(Box<Expr>),
    New(String),
    TypeOf {
        operand: Box<Expr>,
        type_name: String,
    },
    AddressOf(String),
    /// An omitted argument such as the first one in `f(, 2)`.
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i16),
    Long(i32),
    LongLong(i64),
    Single(f32),
    Double(f64),
    /// Scaled by 10 000.
    Currency(i64),
    /// OLE automation date serial.
    Date(f64),
    String(String),
    Boolean(bool),
    Empty,
    Null,
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Pow,
    Mul,
    Div,
    IntDiv,
    Mod,
    Add,
    Sub,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    Is,
    And,
    Or,
    Xor,
    Eqv,
    Imp,
}

/// Binding power of unary minus/plus: below `^`, above `*`.
pub const NEGATION_PRECEDENCE: u8 = 12;
/// Binding power of `Not`: below comparisons, above `And`.
pub const NOT_PRECEDENCE: u8 = 5;

impl BinOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Pow => 13,
            BinOp::Mul | BinOp::Div => 11,
            BinOp::IntDiv => 10,
            BinOp::Mod => 9,
            BinOp::Add | BinOp::Sub => 8,
            BinOp::Concat => 7,
            BinOp::Eq
            | BinOp::Ne
            | BinOp::Lt
            | BinOp::Le
            | BinOp::Gt
            | BinOp::Ge
            | BinOp::Like
            | BinOp::Is => 6,
            BinOp::And => 4,
            BinOp::Or => 3,
            BinOp::Xor => 2,
            BinOp::Eqv => 1,
            BinOp::Imp => 0,
        }
    }

    pub fn is_right_assoc(self) -> bool {
        self == BinOp::Pow
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 6
    }

    pub fn from_token(text: &str) -> Option<BinOp> {
        Some(match text.to_ascii_lowercase().as_str() {
            "^" => BinOp::Pow,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "\\" => BinOp::IntDiv,
            "mod" => BinOp::Mod,
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "&" => BinOp::Concat,
            "=" => BinOp::Eq,
            "<>" | "><" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" | "=<" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" | "=>" => BinOp::Ge,
            "like" => BinOp::Like,
            "is" => BinOp::Is,
            "and" => BinOp::And,
            "or" => BinOp::Or,
            "xor" => BinOp::Xor,
            "eqv" => BinOp::Eqv,
            "imp" => BinOp::Imp,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Pow => "^",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IntDiv => "\\",
            BinOp::Mod => "Mod",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Concat => "&",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Like => "Like",
            BinOp::Is => "Is",
            BinOp::And => "And",
            BinOp::Or => "Or",
            BinOp::Xor => "Xor",
            BinOp::Eqv => "Eqv",
            BinOp::Imp => "Imp",
        }
    }
}

impl UnOp {
    pub fn precedence(self) -> u8 {
        match self {
            UnOp::Neg | UnOp::Plus => NEGATION_PRECEDENCE,
            UnOp::Not => NOT_PRECEDENCE,
        }
    }
}

impl Expr {
    /// Immediate child expressions in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Member { object, .. } | ExprKind::Bang { object, .. } => vec![&**object],
            ExprKind::Call { callee, args } => {
                let mut out = vec![callee.as_ref()];
                out.extend(args.iter().map(|a| &a.value));
                out
            }
            ExprKind::Unary { operand, .. } | ExprKind::TypeOf { operand, .. } => vec![&**operand],
            ExprKind::Binary { left, right, .. } => vec![&**left, &**right],
            ExprKind::Paren(inner) => vec![&**inner],
            ExprKind::Literal(_)
            | ExprKind::Name(_)
            | ExprKind::Me
            | ExprKind::WithMember(_)
            | ExprKind::New(_)
            | ExprKind::AddressOf(_)
            | ExprKind::Missing => Vec::new(),
        }
    }

    /// Splits a left-leaning run of binary operators into its leftmost operand and
    /// the `(operator, right operand)` pairs in evaluation order.
    ///
    /// `a - b - c` yields `a` and `[(Sub, b), (Sub, c)]`. Passes walk the pairs in a
    /// loop so long concatenations do not nest one stack frame per operator.
    pub fn binary_chain(&self) -> (&Expr, Vec<(BinOp, &Expr)>) {
        let mut steps = Vec::new();
        let mut leftmost = self;
        while let ExprKind::Binary { op, left, right } = &leftmost.kind {
            steps.push((*op, &**right));
            leftmost = left;
        }
        steps.reverse();
        (leftmost, steps)
    }

    /// Moves the boxed children out, leaving childless kinds behind.
    fn detach_children(&mut self, out: &mut Vec<ExprKind>) {
        let mut detach = |child: &mut Expr| {
            if !child.children().is_empty() {
                out.push(std::mem::replace(&mut child.kind, ExprKind::Missing));
            }
        };
        match &mut self.kind {
            ExprKind::Member { object, .. } | ExprKind::Bang { object, .. } => detach(&mut **object),
            ExprKind::Call { callee, args } => {
                detach(&mut **callee);
                args.iter_mut().for_each(|a| detach(&mut a.value));
            }
            ExprKind::Unary { operand, .. } | ExprKind::TypeOf { operand, .. } => detach(&mut **operand),
            ExprKind::Binary { left, right, .. } => {
                detach(&mut **left);
                detach(&mut **right);
            }
            ExprKind::Paren(inner) => detach(&mut **inner),
            _ => {}
        }
    }
}

// Tear deep trees down with an explicit work list; the derived drop glue recurses
// once per nesting level.
impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_children(&mut pending);
        while let Some(kind) = pending.pop() {
            let mut node = Expr::new(kind, self.position);
            node.detach_children(&mut pending);
        }
    }
}

fn dim_exprs(dims: &[ArrayDim]) -> impl Iterator<Item = &Expr> {
    dims.iter()
        .flat_map(|d| d.lower.iter().chain(std::iter::once(&d.upper)))
}

/// A direct child of a statement.
#[derive(Debug, Clone, Copy)]
pub enum StmtChild<'a> {
    Expr(&'a Expr),
    Block(&'a [Stmt]),
}

impl Stmt {
    /// Direct child expressions and nested blocks, in source order.
    pub fn children(&self) -> Vec<StmtChild<'_>> {
        use StmtChild::{Block, Expr as E};

        match &self.kind {
            StmtKind::Dim { vars, .. } => vars
                .iter()
                .flat_map(|v| v.dims.iter().flat_map(|d| dim_exprs(d)))
                .map(E)
                .collect(),
            StmtKind::ReDim { targets, .. } => targets
                .iter()
                .flat_map(|t| std::iter::once(&t.target).chain(dim_exprs(&t.dims)))
                .map(E)
                .collect(),
            StmtKind::Const(consts) => consts.iter().map(|c| E(&c.value)).collect(),
            StmtKind::Assign { target, value } | StmtKind::Set { target, value } => {
                vec![E(target), E(value)]
            }
            StmtKind::Call { target, .. } => vec![E(target)],
            StmtKind::If {
                condition,
                then_body,
                else_ifs,
                else_body,
            } => {
                let mut out = vec![E(condition), Block(then_body)];
                for arm in else_ifs {
                    out.push(E(&arm.condition));
                    out.push(Block(&arm.body));
                }
                out.extend(else_body.iter().map(|b| Block(b)));
                out
            }
            StmtKind::SelectCase {
                selector,
                arms,
                else_body,
            } => {
                let mut out = vec![E(selector)];
                for arm in arms {
                    for cond in &arm.conditions {
                        match cond {
                            CaseCondition::Expr(e) | CaseCondition::Is { expr: e, .. } => {
                                out.push(E(e));
                            }
                            CaseCondition::Range { start, end } => {
                                out.push(E(start));
                                out.push(E(end));
                            }
                        }
                    }
                    out.push(Block(&arm.body));
                }
                out.extend(else_body.iter().map(|b| Block(b)));
                out
            }
            StmtKind::For {
                counter,
                start,
                end,
                step,
                body,
            } => {
                let mut out = vec![E(counter), E(start), E(end)];
                out.extend(step.iter().map(E));
                out.push(Block(body));
                out
            }
            StmtKind::ForEach {
                element,
                collection,
                body,
            } => vec![E(element), E(collection), Block(body)],
            StmtKind::DoLoop {
                pre_condition,
                post_condition,
                body,
            } => {
                let mut out: Vec<StmtChild<'_>> =
                    pre_condition.iter().map(|c| E(&c.expr)).collect();
                out.push(Block(body));
                out.extend(post_condition.iter().map(|c| E(&c.expr)));
                out
            }
            StmtKind::While { condition, body } => vec![E(condition), Block(body)],
            StmtKind::With { object, body } => vec![E(object), Block(body)],
            StmtKind::RaiseError(expr) => vec![E(expr)],
            StmtKind::Erase(exprs) | StmtKind::Close(exprs) => exprs.iter().map(E).collect(),
            StmtKind::Open {
                path, file_number, ..
            } => vec![E(path), E(file_number)],
            StmtKind::Print {
                file_number, items, ..
            } => file_number
                .iter()
                .chain(items.iter().filter_map(|i| i.expr.as_ref()))
                .map(E)
                .collect(),
            StmtKind::Label(_)
            | StmtKind::GoTo(_)
            | StmtKind::OnError(_)
            | StmtKind::Resume(_)
            | StmtKind::Exit(_)
            | StmtKind::End
            | StmtKind::Stop => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: i16) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Integer(n)), SourcePosition::default())
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        let position = left.position;
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            position,
        )
    }

    #[test]
    fn binary_chain_lists_operators_left_to_right() {
        let expr = binary(BinOp::Sub, binary(BinOp::Add, leaf(1), leaf(2)), leaf(3));
        let (leftmost, steps) = expr.binary_chain();
        assert_eq!(leftmost.kind, ExprKind::Literal(Literal::Integer(1)));
        let steps: Vec<_> = steps.iter().map(|(op, e)| (*op, &e.kind)).collect();
        assert_eq!(
            steps,
            [
                (BinOp::Add, &ExprKind::Literal(Literal::Integer(2))),
                (BinOp::Sub, &ExprKind::Literal(Literal::Integer(3))),
            ]
        );
    }

    #[test]
    fn dropping_a_deep_tree_does_not_recurse() {
        let mut expr = leaf(0);
        for i in 0..200_000 {
            expr = if i % 2 == 0 {
                binary(BinOp::Concat, expr, leaf(1))
            } else {
                Expr::new(
                    ExprKind::Paren(Box::new(expr)),
                    SourcePosition::default(),
                )
            };
        }
        drop(expr);
    }
}
