//! Hindley-Milner style type inference for Osprey.
//!
//! This crate implements:
//! - A unifier over the `osprey-types` lattice with an occurs check and an
//!   `Any` escape hatch
//! - A scoped typing environment with explicit snapshot/restore
//! - Expression inference producing a typed tree for code generation
//! - Match validation (variant existence, arm order, exhaustiveness)
//!
//! Inference errors are not recovered: the first one aborts the enclosing
//! compilation and is returned as a [`DiagnosticError`].

pub mod env;
pub mod exhaustive;
mod infer;
pub mod trace;
pub mod typed;

use std::collections::{BTreeMap, BTreeSet};

use osprey_ast::Span;
use osprey_types::{Substitution, Type, TypeVarId, free_type_vars, rename_vars};

pub use env::TypeEnv;
pub use infer::InferenceContext;
pub use osprey_diag::{Category, DiagResult, Diagnostic, DiagnosticError, SourceLocation};
pub use osprey_types::TypeScheme;

use crate::trace::{UnifyAction, UnifyStep};

/// Convert an AST span into a diagnostic location, if it has a position.
pub fn location(span: Span) -> Option<SourceLocation> {
    span.position().map(|(line, column)| SourceLocation {
        file_id: span.file.0,
        line,
        column,
    })
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Owns the substitution and the supply of fresh type variables.
///
/// Bindings only ever grow; there is no backtracking.
#[derive(Debug, Clone, Default)]
pub struct Unifier {
    pub substitution: Substitution,
    next_type_var: u32,
    /// When true, unification steps are recorded for observability tools.
    tracing: bool,
    unify_trace: Vec<UnifyStep>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start variable numbering at `next_type_var`. Keeps ids distinct when
    /// types from another unifier are mixed in.
    pub fn with_var_offset(next_type_var: u32) -> Self {
        Self {
            next_type_var,
            ..Self::default()
        }
    }

    pub fn fresh_type_var(&mut self) -> TypeVarId {
        let id = TypeVarId(self.next_type_var);
        self.next_type_var += 1;
        id
    }

    pub fn fresh_type(&mut self) -> Type {
        Type::Var(self.fresh_type_var())
    }

    /// Chase variable bindings at the top of `ty`, compressing the chain.
    pub fn prune(&mut self, ty: &Type) -> Type {
        let Type::Var(var) = ty else {
            return ty.clone();
        };
        let Some(bound) = self.substitution.lookup_type(*var).cloned() else {
            return ty.clone();
        };
        let pruned = self.prune(&bound);
        if pruned != bound {
            self.substitution.bind_type(*var, pruned.clone());
        }
        pruned
    }

    /// Fully apply the current substitution.
    pub fn apply(&self, ty: &Type) -> Type {
        self.substitution.apply(ty)
    }

    /// Make `a` and `b` equal by extending the substitution.
    pub fn unify(&mut self, a: &Type, b: &Type) -> DiagResult<()> {
        let a = self.prune(a);
        let b = self.prune(b);
        match (&a, &b) {
            (Type::Var(x), Type::Var(y)) if x == y => {
                self.push_unify_step(UnifyAction::Identity, &a, &b, String::new());
                Ok(())
            }
            (Type::Var(var), other) | (other, Type::Var(var)) => self.bind_var(*var, other),
            (Type::Con(x), Type::Con(y)) if x == y => {
                self.push_unify_step(UnifyAction::Identity, &a, &b, String::new());
                Ok(())
            }
            _ if a.is_any() || b.is_any() => {
                self.push_unify_step(UnifyAction::AnyAbsorb, &a, &b, String::new());
                Ok(())
            }
            (
                Type::App {
                    name: n1,
                    args: args1,
                },
                Type::App {
                    name: n2,
                    args: args2,
                },
            ) if n1 == n2 && args1.len() == args2.len() => {
                self.push_unify_step(UnifyAction::Decompose, &a, &b, format!("{n1} arguments"));
                for (x, y) in args1.iter().zip(args2) {
                    self.unify(x, y)?;
                }
                Ok(())
            }
            (Type::Function(f1), Type::Function(f2)) => {
                if f1.params.len() != f2.params.len() {
                    return Err(self.mismatch(&a, &b, "functions take different numbers of arguments"));
                }
                self.push_unify_step(UnifyAction::Decompose, &a, &b, "function".to_string());
                for (x, y) in f1.params.iter().zip(&f2.params) {
                    self.unify(x, y)?;
                }
                self.unify(&f1.ret, &f2.ret)
            }
            _ => Err(self.mismatch(&a, &b, "")),
        }
    }

    fn bind_var(&mut self, var: TypeVarId, ty: &Type) -> DiagResult<()> {
        let resolved = self.substitution.apply(ty);
        if resolved.contains_var(var) {
            let detail = format!("{var} occurs in {resolved}");
            self.push_unify_step(UnifyAction::OccursCheck, &Type::Var(var), &resolved, detail);
            return Err(Diagnostic::error(
                Category::RecursiveType,
                format!("recursive type: cannot construct the infinite type {var} = {resolved}"),
            )
            .with_help("a value cannot contain or accept itself")
            .into());
        }
        self.push_unify_step(UnifyAction::Bind, &Type::Var(var), ty, format!("{var} := {ty}"));
        self.substitution.bind_type(var, ty.clone());
        Ok(())
    }

    fn mismatch(&mut self, a: &Type, b: &Type, why: &str) -> DiagnosticError {
        let left = self.apply(a);
        let right = self.apply(b);
        self.push_unify_step(UnifyAction::Error, &left, &right, why.to_string());
        let mut message = format!("type mismatch: expected {left}, found {right}");
        if !why.is_empty() {
            message.push_str(&format!(" ({why})"));
        }
        Diagnostic::error(Category::TypeMismatch, message).into()
    }

    /// Apply the substitution and default every remaining variable to `Int`.
    ///
    /// Defaults are written back so later resolutions agree.
    pub fn resolve(&mut self, ty: &Type) -> Type {
        let applied = self.apply(ty);
        let unbound = free_type_vars(&applied);
        if unbound.is_empty() {
            return applied;
        }
        for var in unbound {
            log::trace!("defaulting {var} to Int");
            self.push_unify_step(
                UnifyAction::Default,
                &Type::Var(var),
                &Type::int(),
                "unconstrained variable".to_string(),
            );
            self.substitution.bind_type(var, Type::int());
        }
        self.apply(ty)
    }

    /// Replace a scheme's quantified variables with fresh ones.
    pub fn instantiate(&mut self, scheme: &TypeScheme) -> Type {
        if scheme.is_mono() {
            return scheme.ty.clone();
        }
        let mapping: BTreeMap<TypeVarId, Type> = scheme
            .type_vars
            .iter()
            .map(|v| (*v, self.fresh_type()))
            .collect();
        rename_vars(&scheme.ty, &mapping)
    }

    /// Quantify the variables of `ty` that are not free in the environment.
    pub fn generalize(&self, ty: &Type, env_free: &BTreeSet<TypeVarId>) -> TypeScheme {
        let ty = self.apply(ty);
        let type_vars = free_type_vars(&ty)
            .into_iter()
            .filter(|v| !env_free.contains(v))
            .collect();
        TypeScheme { type_vars, ty }
    }

    // -- tracing ----------------------------------------------------------

    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    /// The unification trace (empty if tracing was not enabled).
    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.unify_trace
    }

    pub fn take_unify_trace(&mut self) -> Vec<UnifyStep> {
        std::mem::take(&mut self.unify_trace)
    }

    fn push_unify_step(&mut self, action: UnifyAction, left: &Type, right: &Type, detail: String) {
        if self.tracing {
            let step = self.unify_trace.len() + 1;
            self.unify_trace.push(UnifyStep {
                step,
                action,
                left: left.to_string(),
                right: right.to_string(),
                detail,
            });
        }
    }
}

#[cfg(test)]
mod prop_tests;
