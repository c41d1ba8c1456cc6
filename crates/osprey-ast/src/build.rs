//! Constructors for AST nodes with synthetic spans.
//!
//! Used by hosts that synthesize programs directly, by tests, and by
//! benchmarks. Attach a real position with [`at`].

use crate::*;

/// Give `node` a concrete source position.
pub fn at<T>(mut node: Spanned<T>, line: u32, column: u32) -> Spanned<T> {
    node.span = Span::new(FileId(0), line, column);
    node
}

fn sp(kind: ExprKind) -> Expr {
    Spanned::synthetic(kind)
}

pub fn int(n: i64) -> Expr {
    sp(ExprKind::Lit(Lit::Int(n)))
}

pub fn boolean(b: bool) -> Expr {
    sp(ExprKind::Lit(Lit::Bool(b)))
}

pub fn string(s: &str) -> Expr {
    sp(ExprKind::Lit(Lit::String(s.to_string())))
}

pub fn unit() -> Expr {
    sp(ExprKind::Lit(Lit::Unit))
}

pub fn var(name: &str) -> Expr {
    sp(ExprKind::Var(name.to_string()))
}

pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    sp(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    sp(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn call(func: &str, args: Vec<Expr>) -> Expr {
    call_expr(var(func), args)
}

pub fn call_expr(func: Expr, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(func),
        args: args.into_iter().map(positional).collect(),
    })
}

/// A call with `(name, value)` arguments.
pub fn call_named(func: &str, args: Vec<(&str, Expr)>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(var(func)),
        args: args.into_iter().map(|(n, v)| named(n, v)).collect(),
    })
}

pub fn positional(value: Expr) -> Argument {
    Argument { name: None, value }
}

pub fn named(name: &str, value: Expr) -> Argument {
    Argument {
        name: Some(name.to_string()),
        value,
    }
}

pub fn lambda(params: &[&str], body: Expr) -> Expr {
    sp(ExprKind::Lambda {
        params: params.iter().map(|p| param(p)).collect(),
        return_annotation: None,
        body: Box::new(body),
    })
}

pub fn block(exprs: Vec<Expr>) -> Expr {
    sp(ExprKind::Block(exprs))
}

pub fn let_(name: &str, value: Expr) -> Expr {
    sp(ExprKind::Let {
        name: name.to_string(),
        annotation: None,
        value: Box::new(value),
    })
}

pub fn let_typed(name: &str, annotation: TypeAnnotation, value: Expr) -> Expr {
    sp(ExprKind::Let {
        name: name.to_string(),
        annotation: Some(annotation),
        value: Box::new(value),
    })
}

/// `Name(args)`, payload fields in declaration order.
pub fn construct(name: &str, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Constructor {
        name: name.to_string(),
        args: args.into_iter().map(positional).collect(),
    })
}

/// `Name { field: value, ... }`
pub fn construct_named(name: &str, fields: Vec<(&str, Expr)>) -> Expr {
    sp(ExprKind::Constructor {
        name: name.to_string(),
        args: fields.into_iter().map(|(n, v)| named(n, v)).collect(),
    })
}

pub fn field(expr: Expr, name: &str) -> Expr {
    sp(ExprKind::FieldAccess {
        expr: Box::new(expr),
        field: name.to_string(),
    })
}

pub fn perform(effect: &str, operation: &str, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Perform {
        effect: effect.to_string(),
        operation: operation.to_string(),
        args,
    })
}

pub fn handle(effect: &str, arms: Vec<HandlerArm>, body: Expr) -> Expr {
    sp(ExprKind::Handle {
        effect: effect.to_string(),
        arms,
        body: Box::new(body),
    })
}

pub fn handler_arm(operation: &str, params: &[&str], body: Expr) -> HandlerArm {
    HandlerArm {
        operation: operation.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
    }
}

pub fn match_(scrutinee: Expr, arms: Vec<MatchArm>) -> Expr {
    sp(ExprKind::Match {
        scrutinee: Box::new(scrutinee),
        arms,
    })
}

pub fn arm(pattern: Pattern, body: Expr) -> MatchArm {
    MatchArm { pattern, body }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub fn wildcard() -> Pattern {
    Spanned::synthetic(PatternKind::Wildcard)
}

pub fn bind(name: &str) -> Pattern {
    Spanned::synthetic(PatternKind::Binding(name.to_string()))
}

pub fn lit_pat(lit: Lit) -> Pattern {
    Spanned::synthetic(PatternKind::Lit(lit))
}

/// `Name(a, b)`; an empty list gives a bare `Name`.
pub fn ctor_pat(name: &str, fields: &[&str]) -> Pattern {
    let fields = if fields.is_empty() {
        FieldPatterns::None
    } else {
        FieldPatterns::Positional(fields.iter().map(|f| f.to_string()).collect())
    };
    Spanned::synthetic(PatternKind::Constructor {
        name: name.to_string(),
        fields,
        binding: None,
    })
}

/// `Name { a, b }`
pub fn ctor_pat_named(name: &str, fields: &[&str]) -> Pattern {
    Spanned::synthetic(PatternKind::Constructor {
        name: name.to_string(),
        fields: FieldPatterns::Named(fields.iter().map(|f| f.to_string()).collect()),
        binding: None,
    })
}

// ---------------------------------------------------------------------------
// Types and declarations
// ---------------------------------------------------------------------------

pub fn ty(name: &str) -> TypeAnnotation {
    TypeAnnotation::Named(name.to_string())
}

pub fn ty_app(name: &str, args: Vec<TypeAnnotation>) -> TypeAnnotation {
    TypeAnnotation::Applied(name.to_string(), args)
}

pub fn param(name: &str) -> Param {
    Param {
        name: name.to_string(),
        annotation: None,
    }
}

pub fn typed_param(name: &str, annotation: TypeAnnotation) -> Param {
    Param {
        name: name.to_string(),
        annotation: Some(annotation),
    }
}

pub fn fn_decl(
    name: &str,
    params: Vec<Param>,
    ret: Option<TypeAnnotation>,
    effects: &[&str],
    body: Expr,
) -> Decl {
    Spanned::synthetic(DeclKind::Function(FnDecl {
        name: name.to_string(),
        params,
        return_annotation: ret,
        effects: effects.iter().map(|e| e.to_string()).collect(),
        body,
    }))
}

/// `type Name = V1 { f: T } | V2 ...` from `(variant, [(field, type)])`.
pub fn type_decl(name: &str, variants: Vec<(&str, Vec<(&str, TypeAnnotation)>)>) -> Decl {
    Spanned::synthetic(DeclKind::Type(TypeDecl {
        name: name.to_string(),
        variants: variants
            .into_iter()
            .map(|(variant, fields)| VariantDecl {
                name: variant.to_string(),
                fields: fields
                    .into_iter()
                    .map(|(f, annotation)| FieldDecl {
                        name: f.to_string(),
                        annotation,
                    })
                    .collect(),
            })
            .collect(),
    }))
}

/// `effect Name { op: fn(params) -> ret }`
pub fn effect_decl(name: &str, operations: Vec<(&str, Vec<TypeAnnotation>, TypeAnnotation)>) -> Decl {
    Spanned::synthetic(DeclKind::Effect(EffectDecl {
        name: name.to_string(),
        operations: operations
            .into_iter()
            .map(|(op, params, ret)| OperationDecl {
                name: op.to_string(),
                signature: Some(OperationSignature { params, ret }),
            })
            .collect(),
    }))
}
