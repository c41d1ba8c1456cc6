//! The typed tree handed to code generation.
//!
//! Inference resolves names, constructor tags, field indices and argument
//! order, so the code generator never consults the AST again. Types here may
//! still contain variables; code generation resolves them through the
//! owning [`Unifier`](crate::Unifier).

use std::rc::Rc;

use osprey_ast::{BinOp, Lit, Span, UnaryOp};
use osprey_types::Type;

#[derive(Debug, Clone)]
pub struct TypedExpr {
    pub kind: TypedKind,
    pub ty: Type,
    pub span: Span,
}

/// Runtime helpers callable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ToString,
    Print,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "toString" => Some(Builtin::ToString),
            "print" => Some(Builtin::Print),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::ToString => "toString",
            Builtin::Print => "print",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypedKind {
    Lit(Lit),
    /// Parameter or `let` binding.
    Local(String),
    /// Reference to a top-level function.
    Function(String),
    /// A fieldless variant used as a value.
    Variant {
        type_name: String,
        variant: String,
        tag: u32,
    },
    Binary {
        op: BinOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    /// Arguments are in parameter order, named arguments already placed.
    Call {
        callee: Box<TypedExpr>,
        args: Vec<TypedExpr>,
        /// Parameter indices in the order the arguments appear in source.
        eval_order: Vec<usize>,
    },
    BuiltinCall {
        builtin: Builtin,
        args: Vec<TypedExpr>,
    },
    Lambda(Rc<TypedLambda>),
    Block(Vec<TypedExpr>),
    Let {
        name: String,
        value: Box<TypedExpr>,
    },
    /// Arguments are in field declaration order.
    Construct {
        type_name: String,
        variant: String,
        tag: u32,
        args: Vec<TypedExpr>,
        /// Field indices in the order the arguments appear in source.
        eval_order: Vec<usize>,
    },
    Field {
        expr: Box<TypedExpr>,
        type_name: String,
        index: usize,
    },
    Perform {
        effect: String,
        operation: String,
        args: Vec<TypedExpr>,
    },
    Handle {
        effect: String,
        arms: Vec<Rc<TypedHandlerArm>>,
        body: Box<TypedExpr>,
    },
    Match {
        scrutinee: Box<TypedExpr>,
        subject: MatchSubject,
        arms: Vec<TypedMatchArm>,
    },
}

#[derive(Debug, Clone)]
pub struct TypedLambda {
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: TypedExpr,
}

/// One operation arm of a `handle` expression, typed against the effect's
/// declared signature.
#[derive(Debug, Clone)]
pub struct TypedHandlerArm {
    pub effect: String,
    pub operation: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: TypedExpr,
    pub span: Span,
}

/// What a match discriminates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSubject {
    /// A declared union, enum, record or the builtin `Result`.
    Declared(String),
    /// Int, Bool or String, matched by literal.
    Scalar,
}

#[derive(Debug, Clone)]
pub struct TypedMatchArm {
    pub pattern: TypedPattern,
    pub body: TypedExpr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypedPattern {
    Wildcard,
    Binding(String),
    Lit(Lit),
    Variant {
        variant: String,
        tag: u32,
        /// `(bound name, field index, field type)`
        fields: Vec<(String, usize, Type)>,
        binding: Option<String>,
    },
}

impl TypedPattern {
    pub fn is_irrefutable(&self) -> bool {
        matches!(self, TypedPattern::Wildcard | TypedPattern::Binding(_))
    }

    pub fn variant_name(&self) -> Option<&str> {
        match self {
            TypedPattern::Variant { variant, .. } => Some(variant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypedFunction {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub effects: Vec<String>,
    pub body: TypedExpr,
    pub span: Span,
}
