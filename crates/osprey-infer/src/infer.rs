//! Expression inference and declaration registration.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use log::debug;
use osprey_ast::{
    Argument, BinOp, DeclKind, EffectDecl, Expr, ExprKind, FieldPatterns, FnDecl, HandlerArm, Lit,
    MatchArm, Module, OpClass, Pattern, PatternKind, Span, TypeAnnotation, TypeDecl, UnaryOp,
};
use osprey_types::{
    ANY, BOOL, EffectType, FunctionType, INT, OperationType, RESULT, STRING, Type, TypeDeclaration,
    TypeScheme, TypeVarId, UNIT, Variant, rename_vars,
};

use crate::env::TypeEnv;
use crate::exhaustive::validate_match;
use crate::typed::{
    Builtin, MatchSubject, TypedExpr, TypedFunction, TypedHandlerArm, TypedKind, TypedLambda,
    TypedMatchArm, TypedPattern,
};
use crate::{Category, DiagResult, Diagnostic, DiagnosticError, Unifier, location};

const BUILTIN_TYPES: [&str; 5] = [INT, BOOL, STRING, UNIT, ANY];

/// Inference state for one compilation unit: the unifier, the typing
/// environment and every declared type, effect and function.
///
/// Derefs to [`Unifier`] so callers can resolve types directly.
#[derive(Debug, Clone)]
pub struct InferenceContext {
    unifier: Unifier,
    pub env: TypeEnv,
    types: BTreeMap<String, TypeDeclaration>,
    type_names: BTreeSet<String>,
    /// Variant name -> owning type name.
    constructors: BTreeMap<String, String>,
    effects: BTreeMap<String, EffectType>,
    fn_params: BTreeMap<String, Vec<String>>,
}

impl Default for InferenceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for InferenceContext {
    type Target = Unifier;

    fn deref(&self) -> &Unifier {
        &self.unifier
    }
}

impl DerefMut for InferenceContext {
    fn deref_mut(&mut self) -> &mut Unifier {
        &mut self.unifier
    }
}

fn error_at(category: Category, message: impl Into<String>, span: Span) -> DiagnosticError {
    Diagnostic::error(category, message)
        .at_opt(location(span))
        .into()
}

fn literal_type(lit: &Lit) -> Type {
    match lit {
        Lit::Int(_) => Type::int(),
        Lit::Bool(_) => Type::bool(),
        Lit::String(_) => Type::string(),
        Lit::Unit => Type::unit(),
    }
}

impl InferenceContext {
    pub fn new() -> Self {
        Self::with_unifier(Unifier::new())
    }

    pub fn with_unifier(unifier: Unifier) -> Self {
        let mut ctx = Self {
            unifier,
            env: TypeEnv::new(),
            types: BTreeMap::new(),
            type_names: BTreeSet::new(),
            constructors: BTreeMap::new(),
            effects: BTreeMap::new(),
            fn_params: BTreeMap::new(),
        };
        let ok = ctx.fresh_type_var();
        let err = ctx.fresh_type_var();
        let result = TypeDeclaration::result(ok, err);
        for variant in result.variant_names() {
            ctx.constructors.insert(variant.to_string(), RESULT.to_string());
        }
        ctx.type_names.insert(RESULT.to_string());
        ctx.types.insert(RESULT.to_string(), result);
        ctx
    }

    pub fn unifier(&self) -> &Unifier {
        &self.unifier
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    pub fn type_decl(&self, name: &str) -> Option<&TypeDeclaration> {
        self.types.get(name)
    }

    pub fn type_decls(&self) -> impl Iterator<Item = &TypeDeclaration> {
        self.types.values()
    }

    /// The type that declares variant `name`.
    pub fn constructor_owner(&self, name: &str) -> Option<&str> {
        self.constructors.get(name).map(String::as_str)
    }

    pub fn effect(&self, name: &str) -> Option<&EffectType> {
        self.effects.get(name)
    }

    /// Claim a type name so that declarations can refer to each other.
    pub fn reserve_type_name(&mut self, name: &str, span: Span) -> DiagResult<()> {
        if BUILTIN_TYPES.contains(&name) || !self.type_names.insert(name.to_string()) {
            return Err(error_at(
                Category::DuplicateDefinition,
                format!("type `{name}` is already defined"),
                span,
            ));
        }
        Ok(())
    }

    pub fn declare_type(&mut self, decl: TypeDeclaration, span: Span) -> DiagResult<()> {
        if decl.variants.is_empty() {
            return Err(error_at(
                Category::UnsupportedExpression,
                format!("type `{}` declares no variants", decl.name),
                span,
            ));
        }
        let mut local = BTreeSet::new();
        for variant in &decl.variants {
            if let Some(owner) = self.constructors.get(&variant.name) {
                return Err(error_at(
                    Category::DuplicateDefinition,
                    format!("variant `{}` is already declared by `{owner}`", variant.name),
                    span,
                ));
            }
            if !local.insert(variant.name.as_str()) {
                return Err(error_at(
                    Category::DuplicateDefinition,
                    format!("variant `{}` appears twice in `{}`", variant.name, decl.name),
                    span,
                ));
            }
            let mut fields = BTreeSet::new();
            for (field, _) in &variant.fields {
                if !fields.insert(field.as_str()) {
                    return Err(error_at(
                        Category::DuplicateDefinition,
                        format!("field `{field}` appears twice in `{}`", variant.name),
                        span,
                    ));
                }
            }
        }
        debug!("declared type {} ({:?})", decl.name, decl.kind());
        for variant in &decl.variants {
            self.constructors
                .insert(variant.name.clone(), decl.name.clone());
        }
        self.type_names.insert(decl.name.clone());
        self.types.insert(decl.name.clone(), decl);
        Ok(())
    }

    pub fn declare_effect(&mut self, effect: EffectType, span: Span) -> DiagResult<()> {
        if self.effects.contains_key(&effect.name) {
            return Err(error_at(
                Category::DuplicateDefinition,
                format!("effect `{}` is already defined", effect.name),
                span,
            ));
        }
        debug!(
            "declared effect {} with {} operation(s)",
            effect.name,
            effect.operations.len()
        );
        self.effects.insert(effect.name.clone(), effect);
        Ok(())
    }

    /// Bind a top-level function with a monomorphic signature.
    pub fn declare_function(
        &mut self,
        name: &str,
        params: Vec<String>,
        sig: FunctionType,
        span: Span,
    ) -> DiagResult<()> {
        if self.env.is_global(name) || Builtin::from_name(name).is_some() {
            return Err(error_at(
                Category::DuplicateDefinition,
                format!("function `{name}` is already defined"),
                span,
            ));
        }
        self.fn_params.insert(name.to_string(), params);
        self.env
            .bind_global(name, TypeScheme::mono(Type::Function(sig)));
        Ok(())
    }

    pub fn function_scheme(&self, name: &str) -> Option<&TypeScheme> {
        self.env.lookup(name).filter(|_| self.env.is_global(name))
    }

    /// Re-bind a top-level function with its generalized type.
    pub fn generalize_function(&mut self, name: &str) {
        let Some(scheme) = self.function_scheme(name).cloned() else {
            return;
        };
        let env_free = self
            .env
            .free_type_vars(&self.unifier.substitution, Some(name));
        let generalized = self.unifier.generalize(&scheme.ty, &env_free);
        if !generalized.is_mono() {
            debug!("generalized {name}: {generalized}");
        }
        self.env.bind_global(name, generalized);
    }

    pub fn resolve_annotation(&self, annotation: &TypeAnnotation, span: Span) -> DiagResult<Type> {
        match annotation {
            TypeAnnotation::Named(name) => {
                if BUILTIN_TYPES.contains(&name.as_str()) {
                    return Ok(Type::con(name));
                }
                if !self.type_names.contains(name) {
                    return Err(error_at(
                        Category::UnknownConstructor,
                        format!("unknown type `{name}`"),
                        span,
                    ));
                }
                match self.types.get(name) {
                    Some(decl) if !decl.params.is_empty() => Err(error_at(
                        Category::ArityMismatch,
                        format!(
                            "type `{name}` expects {} type argument(s)",
                            decl.params.len()
                        ),
                        span,
                    )),
                    _ => Ok(Type::con(name)),
                }
            }
            TypeAnnotation::Applied(name, args) => {
                let Some(decl) = self.types.get(name) else {
                    let category = if self.type_names.contains(name) {
                        Category::ArityMismatch
                    } else {
                        Category::UnknownConstructor
                    };
                    return Err(error_at(
                        category,
                        format!("type `{name}` cannot be applied to arguments"),
                        span,
                    ));
                };
                if decl.params.len() != args.len() {
                    return Err(error_at(
                        Category::ArityMismatch,
                        format!(
                            "type `{name}` expects {} type argument(s), found {}",
                            decl.params.len(),
                            args.len()
                        ),
                        span,
                    ));
                }
                let args = args
                    .iter()
                    .map(|a| self.resolve_annotation(a, span))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(Type::app(name, args))
            }
            TypeAnnotation::Function(params, ret) => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_annotation(p, span))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(Type::function(params, self.resolve_annotation(ret, span)?))
            }
        }
    }

    fn resolve_or_fresh(&mut self, annotation: Option<&TypeAnnotation>, span: Span) -> DiagResult<Type> {
        match annotation {
            Some(ann) => self.resolve_annotation(ann, span),
            None => Ok(self.fresh_type()),
        }
    }

    pub fn lower_type_decl(&self, decl: &TypeDecl, span: Span) -> DiagResult<TypeDeclaration> {
        let variants = decl
            .variants
            .iter()
            .map(|v| {
                let fields = v
                    .fields
                    .iter()
                    .map(|f| Ok((f.name.clone(), self.resolve_annotation(&f.annotation, span)?)))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(Variant {
                    name: v.name.clone(),
                    fields,
                })
            })
            .collect::<DiagResult<Vec<_>>>()?;
        Ok(TypeDeclaration::new(&decl.name, variants))
    }

    /// Effect operations must carry full signatures.
    pub fn lower_effect_decl(&self, decl: &EffectDecl, span: Span) -> DiagResult<EffectType> {
        let mut operations = BTreeMap::new();
        for op in &decl.operations {
            let Some(sig) = &op.signature else {
                return Err(Diagnostic::error(
                    Category::MissingEffectSignature,
                    format!("operation `{}.{}` has no type signature", decl.name, op.name),
                )
                .at_opt(location(span))
                .with_help(format!("declare it as `{}: fn(..) -> T`", op.name))
                .into());
            };
            let params = sig
                .params
                .iter()
                .map(|p| self.resolve_annotation(p, span))
                .collect::<DiagResult<Vec<_>>>()?;
            let ret = self.resolve_annotation(&sig.ret, span)?;
            if operations
                .insert(op.name.clone(), OperationType { params, ret })
                .is_some()
            {
                return Err(error_at(
                    Category::DuplicateDefinition,
                    format!("operation `{}.{}` is declared twice", decl.name, op.name),
                    span,
                ));
            }
        }
        Ok(EffectType {
            name: decl.name.clone(),
            operations,
        })
    }

    pub fn signature_of(&mut self, decl: &FnDecl, span: Span) -> DiagResult<FunctionType> {
        let params = decl
            .params
            .iter()
            .map(|p| self.resolve_or_fresh(p.annotation.as_ref(), span))
            .collect::<DiagResult<Vec<_>>>()?;
        let ret = self.resolve_or_fresh(decl.return_annotation.as_ref(), span)?;
        Ok(FunctionType::new(params, ret))
    }

    /// Register every declaration of `module` and infer all function bodies
    /// in declaration order.
    pub fn check_module(&mut self, module: &Module) -> DiagResult<Vec<TypedFunction>> {
        for decl in &module.declarations {
            if let DeclKind::Type(td) = &decl.node {
                self.reserve_type_name(&td.name, decl.span)?;
            }
        }
        for decl in &module.declarations {
            match &decl.node {
                DeclKind::Type(td) => {
                    let lowered = self.lower_type_decl(td, decl.span)?;
                    self.declare_type(lowered, decl.span)?;
                }
                DeclKind::Effect(ed) => {
                    let lowered = self.lower_effect_decl(ed, decl.span)?;
                    self.declare_effect(lowered, decl.span)?;
                }
                DeclKind::Function(_) => {}
            }
        }

        let mut signatures = Vec::new();
        for (f, span) in module.functions() {
            let sig = self.signature_of(f, span)?;
            let params = f.params.iter().map(|p| p.name.clone()).collect();
            self.declare_function(&f.name, params, sig.clone(), span)?;
            signatures.push(sig);
        }

        let mut typed = Vec::new();
        for ((f, span), sig) in module.functions().zip(&signatures) {
            typed.push(self.infer_function(f, sig, span)?);
            self.generalize_function(&f.name);
        }
        Ok(typed)
    }

    pub fn infer_function(
        &mut self,
        decl: &FnDecl,
        sig: &FunctionType,
        span: Span,
    ) -> DiagResult<TypedFunction> {
        for effect in &decl.effects {
            if !self.effects.contains_key(effect) {
                return Err(error_at(
                    Category::UnknownEffect,
                    format!("function `{}` declares unknown effect `{effect}`", decl.name),
                    span,
                ));
            }
        }
        let params: Vec<(String, Type)> = decl
            .params
            .iter()
            .map(|p| p.name.clone())
            .zip(sig.params.iter().cloned())
            .collect();
        let body = self.scoped(|ctx| {
            for (name, ty) in &params {
                ctx.env.bind_local(name, TypeScheme::mono(ty.clone()));
            }
            let body = ctx.infer_expr(&decl.body)?;
            ctx.unify_at(&sig.ret, &body.ty, body.span)
                .map_err(|e| e.or_at(location(span)))?;
            Ok(body)
        })?;
        Ok(TypedFunction {
            name: decl.name.clone(),
            params,
            ret: (*sig.ret).clone(),
            effects: decl.effects.clone(),
            body,
            span,
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Run `f` in a nested scope; bindings made inside are discarded.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> DiagResult<T>) -> DiagResult<T> {
        let snapshot = self.env.snapshot();
        let result = f(self);
        self.env.restore(snapshot);
        result
    }

    fn unify_at(&mut self, expected: &Type, actual: &Type, span: Span) -> DiagResult<()> {
        self.unifier
            .unify(expected, actual)
            .map_err(|e| e.or_at(location(span)))
    }

    pub fn infer_expr(&mut self, expr: &Expr) -> DiagResult<TypedExpr> {
        let span = expr.span;
        let (kind, ty) = match &expr.node {
            ExprKind::Lit(lit) => (TypedKind::Lit(lit.clone()), literal_type(lit)),
            ExprKind::Var(name) => self.infer_var(name, span)?,
            ExprKind::Binary { op, left, right } => {
                let left = self.infer_expr(left)?;
                let right = self.infer_expr(right)?;
                let ty = self.binary_type(*op, &left.ty, &right.ty, span)?;
                (
                    TypedKind::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                )
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.infer_expr(operand)?;
                let ty = match op {
                    UnaryOp::Neg | UnaryOp::Plus => Type::int(),
                    UnaryOp::Not => Type::bool(),
                };
                self.unify_at(&ty, &operand.ty, span)?;
                (
                    TypedKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                )
            }
            ExprKind::Call { func, args } => self.infer_call(func, args, span)?,
            ExprKind::Lambda {
                params,
                return_annotation,
                body,
            } => {
                let lambda = self.scoped(|ctx| {
                    let mut typed_params = Vec::new();
                    for p in params {
                        let ty = ctx.resolve_or_fresh(p.annotation.as_ref(), span)?;
                        ctx.env.bind_local(&p.name, TypeScheme::mono(ty.clone()));
                        typed_params.push((p.name.clone(), ty));
                    }
                    let body = ctx.infer_expr(body)?;
                    let ret = match return_annotation {
                        Some(ann) => ctx.resolve_annotation(ann, span)?,
                        None => body.ty.clone(),
                    };
                    ctx.unify_at(&ret, &body.ty, body.span)?;
                    Ok(TypedLambda {
                        params: typed_params,
                        ret,
                        body,
                    })
                })?;
                let ty = Type::function(
                    lambda.params.iter().map(|(_, t)| t.clone()).collect(),
                    lambda.ret.clone(),
                );
                (TypedKind::Lambda(Rc::new(lambda)), ty)
            }
            ExprKind::Block(exprs) => {
                let items = self.scoped(|ctx| {
                    exprs
                        .iter()
                        .map(|e| ctx.infer_expr(e))
                        .collect::<DiagResult<Vec<_>>>()
                })?;
                let ty = items.last().map_or_else(Type::unit, |e| e.ty.clone());
                (TypedKind::Block(items), ty)
            }
            ExprKind::Let {
                name,
                annotation,
                value,
            } => {
                let value = self.infer_expr(value)?;
                if let Some(ann) = annotation {
                    let declared = self.resolve_annotation(ann, span)?;
                    self.unify_at(&declared, &value.ty, value.span)?;
                }
                self.env
                    .bind_local(name, TypeScheme::mono(value.ty.clone()));
                (
                    TypedKind::Let {
                        name: name.clone(),
                        value: Box::new(value),
                    },
                    Type::unit(),
                )
            }
            ExprKind::Constructor { name, args } => self.infer_constructor(name, args, span)?,
            ExprKind::FieldAccess { expr: target, field } => {
                let target = self.infer_expr(target)?;
                let resolved = self.prune(&target.ty);
                let record = resolved
                    .head_name()
                    .and_then(|n| self.types.get(n))
                    .filter(|d| d.variants.len() == 1 && !d.variants[0].fields.is_empty());
                let Some(decl) = record else {
                    return Err(error_at(
                        Category::TypeMismatch,
                        format!("field access `.{field}` requires a record, found {resolved}"),
                        span,
                    ));
                };
                let Some(index) = decl.variants[0].field_index(field) else {
                    return Err(error_at(
                        Category::TypeMismatch,
                        format!("`{}` has no field `{field}`", decl.name),
                        span,
                    ));
                };
                let type_name = decl.name.clone();
                let ty = decl.variants[0].fields[index].1.clone();
                (
                    TypedKind::Field {
                        expr: Box::new(target),
                        type_name,
                        index,
                    },
                    ty,
                )
            }
            ExprKind::Perform {
                effect,
                operation,
                args,
            } => {
                let op = self.operation_type(effect, operation, span)?;
                if op.params.len() != args.len() {
                    return Err(error_at(
                        Category::ArityMismatch,
                        format!(
                            "`{effect}.{operation}` expects {} argument(s), found {}",
                            op.params.len(),
                            args.len()
                        ),
                        span,
                    ));
                }
                let mut typed_args = Vec::new();
                for (arg, param) in args.iter().zip(&op.params) {
                    let typed = self.infer_expr(arg)?;
                    self.unify_at(param, &typed.ty, arg.span)?;
                    typed_args.push(typed);
                }
                (
                    TypedKind::Perform {
                        effect: effect.clone(),
                        operation: operation.clone(),
                        args: typed_args,
                    },
                    op.ret,
                )
            }
            ExprKind::Handle { effect, arms, body } => {
                let typed_arms = self.infer_handler_arms(effect, arms, span)?;
                let body = self.infer_expr(body)?;
                let ty = body.ty.clone();
                (
                    TypedKind::Handle {
                        effect: effect.clone(),
                        arms: typed_arms,
                        body: Box::new(body),
                    },
                    ty,
                )
            }
            ExprKind::Match { scrutinee, arms } => self.infer_match(scrutinee, arms, span)?,
        };
        Ok(TypedExpr { kind, ty, span })
    }

    fn infer_var(&mut self, name: &str, span: Span) -> DiagResult<(TypedKind, Type)> {
        if self.env.is_hidden(name) {
            return Err(Diagnostic::error(
                Category::UnsupportedExpression,
                format!("handler arms cannot use `{name}` from the enclosing scope"),
            )
            .at_opt(location(span))
            .with_help("pass the value as an argument of the operation")
            .into());
        }
        if let Some(scheme) = self.env.lookup(name).cloned() {
            let ty = self.instantiate(&scheme);
            let kind = if self.env.is_global(name) {
                TypedKind::Function(name.to_string())
            } else {
                TypedKind::Local(name.to_string())
            };
            return Ok((kind, ty));
        }
        if let Some(owner) = self.constructors.get(name).cloned() {
            let decl = self.types[&owner].clone();
            let Some((tag, variant)) = decl.variant(name) else {
                return Err(error_at(
                    Category::UnknownConstructor,
                    format!("unknown constructor `{name}`"),
                    span,
                ));
            };
            if !variant.fields.is_empty() {
                return Err(error_at(
                    Category::ArityMismatch,
                    format!(
                        "constructor `{name}` expects {} field(s)",
                        variant.fields.len()
                    ),
                    span,
                ));
            }
            let (ty, _) = self.instantiate_decl(&decl);
            return Ok((
                TypedKind::Variant {
                    type_name: owner,
                    variant: name.to_string(),
                    tag,
                },
                ty,
            ));
        }
        if Builtin::from_name(name).is_some() {
            return Err(error_at(
                Category::UnsupportedExpression,
                format!("builtin `{name}` can only be called directly"),
                span,
            ));
        }
        Err(error_at(
            Category::UndefinedVariable,
            format!("undefined variable `{name}`"),
            span,
        ))
    }

    /// Fresh instance of a declaration's type and its field-type mapping.
    fn instantiate_decl(&mut self, decl: &TypeDeclaration) -> (Type, BTreeMap<TypeVarId, Type>) {
        let mapping: BTreeMap<TypeVarId, Type> = decl
            .params
            .iter()
            .map(|v| (*v, self.fresh_type()))
            .collect();
        (rename_vars(&decl.self_type(), &mapping), mapping)
    }

    fn binary_type(&mut self, op: BinOp, left: &Type, right: &Type, span: Span) -> DiagResult<Type> {
        match op.class() {
            OpClass::Arithmetic => {
                if op == BinOp::Add {
                    let l = self.prune(left);
                    let r = self.prune(right);
                    if l.is_con(STRING) || r.is_con(STRING) {
                        self.expect_printable(&l, span)?;
                        self.expect_printable(&r, span)?;
                        return Ok(Type::string());
                    }
                }
                self.unify_at(&Type::int(), left, span)?;
                self.unify_at(&Type::int(), right, span)?;
                Ok(Type::int())
            }
            OpClass::Comparison => {
                self.unify_at(left, right, span)?;
                Ok(Type::bool())
            }
            OpClass::Logical => {
                self.unify_at(&Type::bool(), left, span)?;
                self.unify_at(&Type::bool(), right, span)?;
                Ok(Type::bool())
            }
        }
    }

    /// Types that convert to a string: Int, Bool and String itself.
    fn expect_printable(&mut self, ty: &Type, span: Span) -> DiagResult<()> {
        let pruned = self.prune(ty);
        match &pruned {
            Type::Var(_) => self.unify_at(&Type::string(), &pruned, span),
            t if t.is_con(INT) || t.is_con(BOOL) || t.is_con(STRING) || t.is_any() => Ok(()),
            other => Err(error_at(
                Category::TypeMismatch,
                format!("type mismatch: cannot convert {} to String", self.apply(other)),
                span,
            )),
        }
    }

    fn infer_call(
        &mut self,
        func: &Expr,
        args: &[Argument],
        span: Span,
    ) -> DiagResult<(TypedKind, Type)> {
        if let ExprKind::Var(name) = &func.node
            && !self.env.contains(name)
            && let Some(builtin) = Builtin::from_name(name)
        {
            let [arg] = args else {
                return Err(error_at(
                    Category::ArityMismatch,
                    format!("`{name}` takes 1 argument, found {}", args.len()),
                    span,
                ));
            };
            let arg = self.infer_expr(&arg.value)?;
            self.expect_printable(&arg.ty, arg.span)?;
            let ty = match builtin {
                Builtin::ToString => Type::string(),
                Builtin::Print => Type::unit(),
            };
            return Ok((
                TypedKind::BuiltinCall {
                    builtin,
                    args: vec![arg],
                },
                ty,
            ));
        }

        let slots = self.arrange_call_args(func, args, span)?;
        let callee = self.infer_expr(func)?;
        let inferred = args
            .iter()
            .map(|a| self.infer_expr(&a.value))
            .collect::<DiagResult<Vec<_>>>()?;
        let (typed_args, eval_order) = into_slots(inferred, &slots);

        if let Type::Function(ft) = self.prune(&callee.ty)
            && ft.params.len() != typed_args.len()
        {
            let name = match &func.node {
                ExprKind::Var(name) => format!("`{name}`"),
                _ => "function".to_string(),
            };
            return Err(error_at(
                Category::ArityMismatch,
                format!(
                    "{name} expects {} argument(s), found {}",
                    ft.params.len(),
                    typed_args.len()
                ),
                span,
            ));
        }

        let ret = self.fresh_type();
        let expected = Type::function(typed_args.iter().map(|a| a.ty.clone()).collect(), ret.clone());
        self.unify_at(&callee.ty, &expected, span)?;
        let ty = self.prune(&ret);
        Ok((
            TypedKind::Call {
                callee: Box::new(callee),
                args: typed_args,
                eval_order,
            },
            ty,
        ))
    }

    /// Source index of the argument for each parameter. Named arguments
    /// claim their parameters first; positional ones fill the remaining
    /// slots in order.
    fn arrange_call_args(&self, func: &Expr, args: &[Argument], span: Span) -> DiagResult<Vec<usize>> {
        if args.iter().all(|a| a.name.is_none()) {
            return Ok((0..args.len()).collect());
        }
        let declared = match &func.node {
            ExprKind::Var(name) if self.env.is_global(name) => {
                self.fn_params.get(name).map(|p| (name.as_str(), p.as_slice()))
            }
            _ => None,
        };
        let Some((name, params)) = declared else {
            return Err(error_at(
                Category::UnsupportedExpression,
                "named arguments require a call to a declared function",
                span,
            ));
        };
        place_arguments(&format!("function `{name}`"), "parameter", params, args, span)
    }

    fn infer_constructor(
        &mut self,
        name: &str,
        args: &[Argument],
        span: Span,
    ) -> DiagResult<(TypedKind, Type)> {
        let Some(owner) = self.constructors.get(name).cloned() else {
            return Err(error_at(
                Category::UnknownConstructor,
                format!("unknown constructor `{name}`"),
                span,
            ));
        };
        let decl = self.types[&owner].clone();
        let Some((tag, variant)) = decl.variant(name) else {
            return Err(error_at(
                Category::UnknownConstructor,
                format!("unknown constructor `{name}`"),
                span,
            ));
        };
        let field_names: Vec<String> = variant.fields.iter().map(|(f, _)| f.clone()).collect();
        let slots = place_arguments(
            &format!("constructor `{name}`"),
            "field",
            &field_names,
            args,
            span,
        )?;
        let (ty, mapping) = self.instantiate_decl(&decl);
        let mut inferred = Vec::with_capacity(args.len());
        for arg in args {
            inferred.push(self.infer_expr(&arg.value)?);
        }
        let (typed_args, eval_order) = into_slots(inferred, &slots);
        for (typed, (_, field_ty)) in typed_args.iter().zip(&variant.fields) {
            self.unify_at(&rename_vars(field_ty, &mapping), &typed.ty, typed.span)?;
        }
        Ok((
            TypedKind::Construct {
                type_name: owner,
                variant: name.to_string(),
                tag,
                args: typed_args,
                eval_order,
            },
            ty,
        ))
    }

    fn operation_type(&self, effect: &str, operation: &str, span: Span) -> DiagResult<OperationType> {
        let Some(eff) = self.effects.get(effect) else {
            return Err(error_at(
                Category::UnknownEffect,
                format!("unknown effect `{effect}`"),
                span,
            ));
        };
        eff.operation(operation).cloned().ok_or_else(|| {
            error_at(
                Category::UnknownOperation,
                format!("effect `{effect}` has no operation `{operation}`"),
                span,
            )
        })
    }

    fn infer_handler_arms(
        &mut self,
        effect: &str,
        arms: &[HandlerArm],
        span: Span,
    ) -> DiagResult<Vec<Rc<TypedHandlerArm>>> {
        if !self.effects.contains_key(effect) {
            return Err(error_at(
                Category::UnknownEffect,
                format!("unknown effect `{effect}`"),
                span,
            ));
        }
        let mut seen = BTreeSet::new();
        let mut typed = Vec::new();
        for arm in arms {
            let arm_span = if arm.body.span.is_synthetic() {
                span
            } else {
                arm.body.span
            };
            let op = self.operation_type(effect, &arm.operation, arm_span)?;
            if !seen.insert(arm.operation.as_str()) {
                return Err(error_at(
                    Category::DuplicateDefinition,
                    format!("operation `{effect}.{}` is handled twice", arm.operation),
                    arm_span,
                ));
            }
            if op.params.len() != arm.params.len() {
                return Err(error_at(
                    Category::ArityMismatch,
                    format!(
                        "handler for `{effect}.{}` takes {} parameter(s), the operation has {}",
                        arm.operation,
                        arm.params.len(),
                        op.params.len()
                    ),
                    arm_span,
                ));
            }
            let params: Vec<(String, Type)> = arm
                .params
                .iter()
                .cloned()
                .zip(op.params.iter().cloned())
                .collect();
            let body = self.scoped(|ctx| {
                ctx.env.hide_locals();
                for (name, ty) in &params {
                    ctx.env.bind_local(name, TypeScheme::mono(ty.clone()));
                }
                let body = ctx.infer_expr(&arm.body)?;
                ctx.unify_at(&op.ret, &body.ty, arm_span)?;
                Ok(body)
            })?;
            typed.push(Rc::new(TypedHandlerArm {
                effect: effect.to_string(),
                operation: arm.operation.clone(),
                params,
                ret: op.ret.clone(),
                body,
                span: arm_span,
            }));
        }
        Ok(typed)
    }

    fn infer_match(
        &mut self,
        scrutinee: &Expr,
        arms: &[MatchArm],
        span: Span,
    ) -> DiagResult<(TypedKind, Type)> {
        let scrutinee = self.infer_expr(scrutinee)?;
        let subject = validate_match(self, &scrutinee.ty, arms, span)?;
        let mut typed_arms = Vec::new();
        for arm in arms {
            let typed = self.scoped(|ctx| {
                let pattern = ctx.bind_pattern(&arm.pattern, &scrutinee.ty, &subject)?;
                let body = ctx.infer_expr(&arm.body)?;
                Ok(TypedMatchArm {
                    pattern,
                    body,
                    span: arm.pattern.span,
                })
            })?;
            typed_arms.push(typed);
        }
        let arm_types: Vec<Type> = typed_arms.iter().map(|a| a.body.ty.clone()).collect();
        let ty = self.join_arm_types(&arm_types, span)?;
        Ok((
            TypedKind::Match {
                scrutinee: Box::new(scrutinee),
                subject,
                arms: typed_arms,
            },
            ty,
        ))
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        scrutinee_ty: &Type,
        subject: &MatchSubject,
    ) -> DiagResult<TypedPattern> {
        let span = pattern.span;
        match &pattern.node {
            PatternKind::Wildcard => Ok(TypedPattern::Wildcard),
            PatternKind::Binding(name) => {
                self.env
                    .bind_local(name, TypeScheme::mono(scrutinee_ty.clone()));
                Ok(TypedPattern::Binding(name.clone()))
            }
            PatternKind::Lit(lit) => {
                self.unify_at(scrutinee_ty, &literal_type(lit), span)?;
                Ok(TypedPattern::Lit(lit.clone()))
            }
            PatternKind::Constructor {
                name,
                fields,
                binding,
            } => {
                let decl = match subject {
                    MatchSubject::Declared(type_name) => self.types.get(type_name).cloned(),
                    MatchSubject::Scalar => None,
                };
                let Some((decl, (tag, variant))) = decl
                    .as_ref()
                    .and_then(|d| d.variant(name).map(|v| (d, v)))
                else {
                    return Err(error_at(
                        Category::UnknownVariant,
                        format!("no variant `{name}` for this match"),
                        span,
                    ));
                };
                let (self_ty, mapping) = self.instantiate_decl(decl);
                self.unify_at(&self_ty, scrutinee_ty, span)?;

                let indices: Vec<(String, usize)> = match fields {
                    FieldPatterns::None => Vec::new(),
                    FieldPatterns::Positional(names) => {
                        if names.len() > variant.fields.len() {
                            return Err(error_at(
                                Category::MatchInvalidPattern,
                                format!(
                                    "`{name}` has {} field(s) but the pattern binds {}",
                                    variant.fields.len(),
                                    names.len()
                                ),
                                span,
                            ));
                        }
                        names.iter().cloned().zip(0..).collect()
                    }
                    FieldPatterns::Named(names) => names
                        .iter()
                        .map(|n| {
                            variant.field_index(n).map(|i| (n.clone(), i)).ok_or_else(|| {
                                error_at(
                                    Category::MatchInvalidPattern,
                                    format!("`{name}` has no field `{n}`"),
                                    span,
                                )
                            })
                        })
                        .collect::<DiagResult<Vec<_>>>()?,
                };

                let mut bound = Vec::new();
                for (local, index) in indices {
                    if local == "_" {
                        continue;
                    }
                    let ty = rename_vars(&variant.fields[index].1, &mapping);
                    self.env.bind_local(&local, TypeScheme::mono(ty.clone()));
                    bound.push((local, index, ty));
                }
                if let Some(b) = binding {
                    self.env
                        .bind_local(b, TypeScheme::mono(scrutinee_ty.clone()));
                }
                Ok(TypedPattern::Variant {
                    variant: name.clone(),
                    tag,
                    fields: bound,
                    binding: binding.clone(),
                })
            }
        }
    }

    /// The type of a match from its arm types. A String arm turns Int and
    /// Bool arms into strings; otherwise every arm must agree.
    fn join_arm_types(&mut self, types: &[Type], span: Span) -> DiagResult<Type> {
        let Some(first) = types.first() else {
            return Ok(Type::unit());
        };
        let pruned: Vec<Type> = types.iter().map(|t| self.prune(t)).collect();
        if pruned.iter().any(|t| t.is_con(STRING)) {
            for ty in &pruned {
                self.expect_printable(ty, span).map_err(|_| {
                    error_at(
                        Category::TypeMismatch,
                        format!(
                            "match arms have incompatible types String and {}",
                            self.apply(ty)
                        ),
                        span,
                    )
                })?;
            }
            return Ok(Type::string());
        }
        for ty in &types[1..] {
            if self.unifier.unify(first, ty).is_err() {
                return Err(error_at(
                    Category::TypeMismatch,
                    format!(
                        "match arms have incompatible types {} and {}",
                        self.apply(first),
                        self.apply(ty)
                    ),
                    span,
                ));
            }
        }
        Ok(self.prune(first))
    }
}

/// Source index of the argument filling each of `names`: named arguments
/// claim their slot first, positional ones fill the rest left to right.
fn place_arguments(
    owner: &str,
    what: &str,
    names: &[String],
    args: &[Argument],
    span: Span,
) -> DiagResult<Vec<usize>> {
    if args.len() != names.len() {
        return Err(error_at(
            Category::ArityMismatch,
            format!(
                "{owner} expects {} argument(s), found {}",
                names.len(),
                args.len()
            ),
            span,
        ));
    }
    let mut slots: Vec<Option<usize>> = vec![None; names.len()];
    for (source, arg) in args.iter().enumerate() {
        let Some(arg_name) = &arg.name else {
            continue;
        };
        let Some(index) = names.iter().position(|n| n == arg_name) else {
            return Err(error_at(
                Category::ArityMismatch,
                format!("{owner} has no {what} named `{arg_name}`"),
                span,
            ));
        };
        if slots[index].replace(source).is_some() {
            return Err(error_at(
                Category::ArityMismatch,
                format!("{what} `{arg_name}` of {owner} is given twice"),
                span,
            ));
        }
    }
    let mut positional = args
        .iter()
        .enumerate()
        .filter(|(_, a)| a.name.is_none())
        .map(|(source, _)| source);
    for slot in slots.iter_mut().filter(|s| s.is_none()) {
        *slot = positional.next();
    }
    slots
        .into_iter()
        .zip(names)
        .map(|(slot, name)| {
            slot.ok_or_else(|| {
                error_at(
                    Category::ArityMismatch,
                    format!("missing {what} `{name}` for {owner}"),
                    span,
                )
            })
        })
        .collect()
}

/// Move arguments inferred in source order into their parameter slots and
/// return them with the parameter index of each source argument.
fn into_slots(inferred: Vec<TypedExpr>, slots: &[usize]) -> (Vec<TypedExpr>, Vec<usize>) {
    let mut eval_order = vec![0; slots.len()];
    for (param, &source) in slots.iter().enumerate() {
        eval_order[source] = param;
    }
    let mut inferred: Vec<Option<TypedExpr>> = inferred.into_iter().map(Some).collect();
    let args = slots
        .iter()
        .filter_map(|&source| inferred.get_mut(source).and_then(Option::take))
        .collect();
    (args, eval_order)
}
