//! Core type representations for Osprey.
//!
//! The lattice is deliberately small: type variables, named concrete types,
//! parameterised applications (`Result<Int, String>`), and function types.
//! Polymorphism lives in [`TypeScheme`], never inside [`Type`] itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

mod decl;

pub use decl::{EffectType, OperationType, TypeDeclaration, TypeKind, Variant};

// ---------------------------------------------------------------------------
// Well-known names
// ---------------------------------------------------------------------------

pub const INT: &str = "Int";
pub const BOOL: &str = "Bool";
pub const STRING: &str = "String";
pub const UNIT: &str = "Unit";
/// Unifies with every type.
pub const ANY: &str = "Any";

pub const RESULT: &str = "Result";
pub const SUCCESS: &str = "Success";
pub const ERROR: &str = "Error";

// ---------------------------------------------------------------------------
// Type variables
// ---------------------------------------------------------------------------

/// A unification variable. Bound only through a [`Substitution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeVarId(pub u32);

impl fmt::Display for TypeVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    Var(TypeVarId),
    /// A named type with no arguments: `Int`, `Shape`, `Any`.
    Con(String),
    /// A type constructor applied to arguments: `Result<Int, String>`.
    App { name: String, args: Vec<Type> },
    Function(FunctionType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self {
            params,
            ret: Box::new(ret),
        }
    }
}

impl Type {
    pub fn con(name: impl Into<String>) -> Self {
        Type::Con(name.into())
    }

    pub fn int() -> Self {
        Type::con(INT)
    }

    pub fn bool() -> Self {
        Type::con(BOOL)
    }

    pub fn string() -> Self {
        Type::con(STRING)
    }

    pub fn unit() -> Self {
        Type::con(UNIT)
    }

    pub fn any() -> Self {
        Type::con(ANY)
    }

    pub fn app(name: impl Into<String>, args: Vec<Type>) -> Self {
        Type::App {
            name: name.into(),
            args,
        }
    }

    pub fn result(ok: Type, err: Type) -> Self {
        Type::app(RESULT, vec![ok, err])
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Function(FunctionType::new(params, ret))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Type::Var(_))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Con(name) if name == ANY)
    }

    /// True if this is the concrete type `name` (no arguments).
    pub fn is_con(&self, name: &str) -> bool {
        matches!(self, Type::Con(n) if n == name)
    }

    /// Name of the type constructor, for `Con` and `App`.
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Type::Con(name) | Type::App { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn contains_var(&self, var: TypeVarId) -> bool {
        match self {
            Type::Var(v) => *v == var,
            Type::Con(_) => false,
            Type::App { args, .. } => args.iter().any(|a| a.contains_var(var)),
            Type::Function(ft) => {
                ft.params.iter().any(|p| p.contains_var(var)) || ft.ret.contains_var(var)
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Var(v) => write!(f, "{v}"),
            Type::Con(name) => write!(f, "{name}"),
            Type::App { name, args } => {
                write!(f, "{name}<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
            Type::Function(ft) => write!(f, "{ft}"),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

// ---------------------------------------------------------------------------
// Type schemes
// ---------------------------------------------------------------------------

/// A type with universally quantified variables: `forall t0. (t0) -> t0`.
///
/// Each use site instantiates the quantified variables with fresh ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeScheme {
    pub type_vars: Vec<TypeVarId>,
    pub ty: Type,
}

impl TypeScheme {
    /// Create a monomorphic scheme (no quantified variables).
    pub fn mono(ty: Type) -> Self {
        Self {
            type_vars: Vec::new(),
            ty,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.type_vars.is_empty()
    }

    /// Free variables of the scheme: those in the body that are not quantified.
    pub fn free_type_vars(&self) -> BTreeSet<TypeVarId> {
        let mut vars = free_type_vars(&self.ty);
        for v in &self.type_vars {
            vars.remove(v);
        }
        vars
    }
}

impl fmt::Display for TypeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.type_vars.is_empty() {
            return write!(f, "{}", self.ty);
        }
        write!(f, "forall")?;
        for v in &self.type_vars {
            write!(f, " {v}")?;
        }
        write!(f, ". {}", self.ty)
    }
}

/// Collect all type variables in a type.
pub fn free_type_vars(ty: &Type) -> BTreeSet<TypeVarId> {
    let mut vars = BTreeSet::new();
    collect_free_type_vars(ty, &mut vars);
    vars
}

fn collect_free_type_vars(ty: &Type, vars: &mut BTreeSet<TypeVarId>) {
    match ty {
        Type::Var(v) => {
            vars.insert(*v);
        }
        Type::Con(_) => {}
        Type::App { args, .. } => {
            for arg in args {
                collect_free_type_vars(arg, vars);
            }
        }
        Type::Function(ft) => {
            for param in &ft.params {
                collect_free_type_vars(param, vars);
            }
            collect_free_type_vars(&ft.ret, vars);
        }
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Mapping from type variables to the types they were unified with.
///
/// Bindings are never retracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Substitution {
    type_map: BTreeMap<TypeVarId, Type>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_type(&mut self, var: TypeVarId, ty: Type) {
        self.type_map.insert(var, ty);
    }

    pub fn lookup_type(&self, var: TypeVarId) -> Option<&Type> {
        self.type_map.get(&var)
    }

    pub fn type_bindings(&self) -> &BTreeMap<TypeVarId, Type> {
        &self.type_map
    }

    pub fn len(&self) -> usize {
        self.type_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty()
    }

    /// Apply this substitution to a type, replacing all bound variables.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.lookup_type(*v) {
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            Type::Con(_) => ty.clone(),
            Type::App { name, args } => Type::App {
                name: name.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Type::Function(ft) => Type::Function(FunctionType {
                params: ft.params.iter().map(|p| self.apply(p)).collect(),
                ret: Box::new(self.apply(&ft.ret)),
            }),
        }
    }

    pub fn apply_scheme(&self, scheme: &TypeScheme) -> TypeScheme {
        TypeScheme {
            type_vars: scheme.type_vars.clone(),
            ty: self.apply(&scheme.ty),
        }
    }
}

/// Replace variables according to `mapping`, leaving others alone.
pub fn rename_vars(ty: &Type, mapping: &BTreeMap<TypeVarId, Type>) -> Type {
    match ty {
        Type::Var(v) => mapping.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Type::Con(_) => ty.clone(),
        Type::App { name, args } => Type::App {
            name: name.clone(),
            args: args.iter().map(|a| rename_vars(a, mapping)).collect(),
        },
        Type::Function(ft) => Type::Function(FunctionType {
            params: ft.params.iter().map(|p| rename_vars(p, mapping)).collect(),
            ret: Box::new(rename_vars(&ft.ret, mapping)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_types() {
        assert_eq!(Type::int().to_string(), "Int");
        assert_eq!(
            Type::result(Type::int(), Type::string()).to_string(),
            "Result<Int, String>"
        );
        assert_eq!(
            Type::function(vec![Type::int(), Type::Var(TypeVarId(3))], Type::bool()).to_string(),
            "(Int, t3) -> Bool"
        );
    }

    #[test]
    fn apply_chases_chains() {
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(0), Type::Var(TypeVarId(1)));
        subst.bind_type(TypeVarId(1), Type::int());
        let ty = Type::function(vec![Type::Var(TypeVarId(0))], Type::Var(TypeVarId(2)));
        assert_eq!(
            subst.apply(&ty),
            Type::function(vec![Type::int()], Type::Var(TypeVarId(2)))
        );
    }

    #[test]
    fn scheme_free_vars_exclude_quantified() {
        let scheme = TypeScheme {
            type_vars: vec![TypeVarId(0)],
            ty: Type::function(vec![Type::Var(TypeVarId(0))], Type::Var(TypeVarId(1))),
        };
        assert_eq!(
            scheme.free_type_vars().into_iter().collect::<Vec<_>>(),
            vec![TypeVarId(1)]
        );
        assert_eq!(scheme.to_string(), "forall t0. (t0) -> t1");
    }

    #[test]
    fn any_is_detected_structurally() {
        assert!(Type::any().is_any());
        assert!(!Type::app(ANY, vec![]).is_any());
    }
}
