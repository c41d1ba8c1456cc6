//! Property tests for the unifier using proptest.
//!
//! Properties checked for arbitrary types:
//!
//! 1. Substitution idempotence: apply(apply(t)) == apply(t)
//! 2. Unification reflexivity: unify(t, t) always succeeds and binds nothing
//! 3. Consistency: after unify(a, b) succeeds, apply(a) == apply(b)
//!    unless `Any` absorbed the difference
//! 4. Occurs check: Var(x) never unifies with a structure containing Var(x)
//! 5. Resolution leaves no type variables behind

use proptest::prelude::*;
use osprey_types::*;

use crate::{Category, Unifier};

fn contains_any(ty: &Type) -> bool {
    match ty {
        Type::Con(name) => name == ANY,
        Type::App { args, .. } => args.iter().any(contains_any),
        Type::Function(ft) => ft.params.iter().any(contains_any) || contains_any(&ft.ret),
        Type::Var(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_type_var_id() -> impl Strategy<Value = TypeVarId> {
    (0u32..8).prop_map(TypeVarId)
}

fn arb_ground_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::int()),
        Just(Type::bool()),
        Just(Type::string()),
        Just(Type::unit()),
        Just(Type::con("Shape")),
    ]
}

/// Types of bounded depth. Depth 0 = leaves only. Never produces `Any`.
fn arb_type(depth: u32) -> BoxedStrategy<Type> {
    let leaf = prop_oneof![
        3 => arb_ground_type(),
        1 => arb_type_var_id().prop_map(Type::Var),
    ];
    if depth == 0 {
        return leaf.boxed();
    }
    let inner = arb_type(depth - 1);
    prop_oneof![
        2 => leaf,
        1 => (inner.clone(), inner.clone()).prop_map(|(ok, err)| Type::result(ok, err)),
        1 => (prop::collection::vec(inner.clone(), 0..3), inner)
            .prop_map(|(params, ret)| Type::function(params, ret)),
    ]
    .boxed()
}

/// A unifier whose fresh variables never collide with generated ids.
fn unifier() -> Unifier {
    Unifier::with_var_offset(100)
}

proptest! {
    #[test]
    fn apply_is_idempotent(a in arb_type(3), b in arb_type(3)) {
        let mut u = unifier();
        let _ = u.unify(&a, &b);
        let once = u.apply(&a);
        prop_assert_eq!(u.apply(&once), once);
    }

    #[test]
    fn unify_is_reflexive(
        bindings in prop::collection::vec((arb_type_var_id(), arb_type(2)), 0..4),
        t in arb_type(3),
    ) {
        let mut u = unifier();
        // Earlier bindings may chain variables through other variables.
        for (id, ty) in &bindings {
            let _ = u.unify(&Type::Var(*id), ty);
        }
        // Pruning may compress chains, so compare what each variable means.
        let meaning = |u: &Unifier| {
            let bound: Vec<TypeVarId> = u.substitution.type_bindings().keys().copied().collect();
            let applied: Vec<Type> = (0..8).map(|i| u.apply(&Type::Var(TypeVarId(i)))).collect();
            (bound, applied)
        };
        let before = meaning(&u);
        prop_assert!(u.unify(&t, &t).is_ok());
        prop_assert_eq!(meaning(&u), before);
    }

    #[test]
    fn successful_unification_equates_both_sides(a in arb_type(3), b in arb_type(3)) {
        let mut u = unifier();
        if u.unify(&a, &b).is_ok() {
            prop_assert_eq!(u.apply(&a), u.apply(&b));
        }
    }

    #[test]
    fn any_absorbs_every_type(t in arb_type(3)) {
        let mut u = unifier();
        prop_assert!(u.unify(&Type::any(), &t).is_ok());
        prop_assert!(u.unify(&t, &Type::any()).is_ok());
        // Only variables may take on `Any`; concrete structure is untouched.
        if free_type_vars(&t).is_empty() {
            prop_assert!(!contains_any(&u.apply(&t)));
        }
    }

    #[test]
    fn occurs_check_rejects_containing_structures(id in arb_type_var_id(), other in arb_type(2)) {
        let mut u = unifier();
        let var = Type::Var(id);
        let wrapped = Type::function(vec![other], var.clone());
        let err = u.unify(&var, &wrapped).unwrap_err();
        prop_assert_eq!(err.category(), Category::RecursiveType);
    }

    #[test]
    fn resolve_leaves_no_variables(a in arb_type(3), b in arb_type(3)) {
        let mut u = unifier();
        let _ = u.unify(&a, &b);
        let resolved = u.resolve(&a);
        prop_assert!(free_type_vars(&resolved).is_empty());
        // Resolution is stable once defaults are recorded.
        prop_assert_eq!(u.resolve(&a), resolved);
    }
}
