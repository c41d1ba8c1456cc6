//! AST node definitions and source positions for Osprey.
//!
//! The parser front-end lives outside this workspace; it hands the compiler
//! core a [`Module`] built from these nodes. Every node carries a [`Span`]
//! so that diagnostics can report a line and column when one is known.

pub mod build;

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A source position: file plus 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(file: FileId, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// A synthetic span for compiler-generated nodes. Carries no position.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            line: 0,
            column: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.line == 0
    }

    /// `(line, column)` if this span points at real source.
    pub fn position(&self) -> Option<(u32, u32)> {
        (!self.is_synthetic()).then_some((self.line, self.column))
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn synthetic(node: T) -> Self {
        Self::new(node, Span::synthetic())
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Literal values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lit {
    Int(i64),
    Bool(bool),
    String(String),
    Unit,
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

/// How the type inferer treats a binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Arithmetic,
    Comparison,
    Logical,
}

impl BinOp {
    pub fn class(self) -> OpClass {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => OpClass::Arithmetic,
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                OpClass::Comparison
            }
            BinOp::And | BinOp::Or => OpClass::Logical,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `!x`
    Not,
}

// ---------------------------------------------------------------------------
// Type annotations
// ---------------------------------------------------------------------------

/// A type as written in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    /// `Int`, `Shape`
    Named(String),
    /// `Result<Int, String>`
    Applied(String, Vec<TypeAnnotation>),
    /// `(Int, Int) -> Bool`
    Function(Vec<TypeAnnotation>, Box<TypeAnnotation>),
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeAnnotation>,
}

/// A call or constructor argument, optionally named (`f(x: 1)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Lit(Lit),

    /// Variable reference (also a fieldless variant used as a value).
    Var(String),

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    /// Function application: `func(args)`.
    Call {
        func: Box<Expr>,
        args: Vec<Argument>,
    },

    /// Lambda: `fn(params) -> T => body`.
    Lambda {
        params: Vec<Param>,
        return_annotation: Option<TypeAnnotation>,
        body: Box<Expr>,
    },

    /// `{ e1; e2; ...; en }`, value of the last expression.
    Block(Vec<Expr>),

    /// `let name: T = value`, scoped to the rest of the enclosing block.
    Let {
        name: String,
        annotation: Option<TypeAnnotation>,
        value: Box<Expr>,
    },

    /// `Circle { radius: 5 }`, `Success(1)`.
    Constructor {
        name: String,
        args: Vec<Argument>,
    },

    /// `record.field`
    FieldAccess {
        expr: Box<Expr>,
        field: String,
    },

    /// `perform Effect.operation(args)`
    Perform {
        effect: String,
        operation: String,
        args: Vec<Expr>,
    },

    /// `handle Effect { op(params) => body, ... } in body`
    Handle {
        effect: String,
        arms: Vec<HandlerArm>,
        body: Box<Expr>,
    },

    /// `match scrutinee { pattern => body, ... }`
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerArm {
    pub operation: String,
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Expr,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub type Pattern = Spanned<PatternKind>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    /// `_`
    Wildcard,
    /// A bare identifier; binds the whole discriminant.
    Binding(String),
    /// Integer, boolean or string literal.
    Lit(Lit),
    /// `Circle(r)`, `Circle { radius }`, `c @ Circle(r)`.
    Constructor {
        name: String,
        fields: FieldPatterns,
        binding: Option<String>,
    },
}

/// Payload bindings of a constructor pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldPatterns {
    #[default]
    None,
    /// Bind payload fields in declaration order.
    Positional(Vec<String>),
    /// Bind payload fields by their declared names.
    Named(Vec<String>),
}

impl FieldPatterns {
    pub fn names(&self) -> &[String] {
        match self {
            FieldPatterns::None => &[],
            FieldPatterns::Positional(names) | FieldPatterns::Named(names) => names,
        }
    }
}

impl PatternKind {
    /// The constructor named by this pattern, if any.
    pub fn constructor_name(&self) -> Option<&str> {
        match self {
            PatternKind::Constructor { name, .. } => Some(name),
            _ => None,
        }
    }

    /// True for patterns that match every value.
    pub fn is_irrefutable(&self) -> bool {
        matches!(self, PatternKind::Wildcard | PatternKind::Binding(_))
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_annotation: Option<TypeAnnotation>,
    /// Effects the function may perform without handling them (`!E1, E2`).
    pub effects: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub annotation: TypeAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub variants: Vec<VariantDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSignature {
    pub params: Vec<TypeAnnotation>,
    pub ret: TypeAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDecl {
    pub name: String,
    /// `None` when the source omitted the signature, which is rejected.
    pub signature: Option<OperationSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDecl {
    pub name: String,
    pub operations: Vec<OperationDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    Function(FnDecl),
    Type(TypeDecl),
    Effect(EffectDecl),
}

pub type Decl = Spanned<DeclKind>;

/// A parsed compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub declarations: Vec<Decl>,
}

impl Module {
    pub fn new(declarations: Vec<Decl>) -> Self {
        Self { declarations }
    }

    pub fn functions(&self) -> impl Iterator<Item = (&FnDecl, Span)> {
        self.declarations.iter().filter_map(|decl| match &decl.node {
            DeclKind::Function(f) => Some((f, decl.span)),
            _ => None,
        })
    }
}
