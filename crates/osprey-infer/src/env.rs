//! Typing environment.
//!
//! Entering a scope takes a [`EnvSnapshot`]; leaving it restores the
//! snapshot, discarding every binding made inside.

use std::collections::{BTreeMap, BTreeSet};

use osprey_types::{Substitution, TypeScheme, TypeVarId, free_type_vars};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    scheme: TypeScheme,
    /// Top-level function, as opposed to a parameter or `let`.
    global: bool,
    /// Local of an enclosing body that the current handler arm cannot use.
    hidden: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    bindings: BTreeMap<String, Binding>,
}

/// Saved environment state, restored when a scope ends.
#[derive(Debug, Clone)]
pub struct EnvSnapshot(BTreeMap<String, Binding>);

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_global(&mut self, name: impl Into<String>, scheme: TypeScheme) {
        self.bindings.insert(
            name.into(),
            Binding {
                scheme,
                global: true,
                hidden: false,
            },
        );
    }

    pub fn bind_local(&mut self, name: impl Into<String>, scheme: TypeScheme) {
        self.bindings.insert(
            name.into(),
            Binding {
                scheme,
                global: false,
                hidden: false,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeScheme> {
        self.bindings
            .get(name)
            .filter(|b| !b.hidden)
            .map(|b| &b.scheme)
    }

    /// Make every local bound so far unreachable until the next `restore`.
    /// Bindings made afterwards are visible as usual.
    pub fn hide_locals(&mut self) {
        for binding in self.bindings.values_mut() {
            if !binding.global {
                binding.hidden = true;
            }
        }
    }

    /// True if `name` is a local hidden by [`TypeEnv::hide_locals`].
    pub fn is_hidden(&self, name: &str) -> bool {
        self.bindings.get(name).is_some_and(|b| b.hidden)
    }

    /// True if `name` currently resolves to a top-level function.
    pub fn is_global(&self, name: &str) -> bool {
        self.bindings.get(name).is_some_and(|b| b.global)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot(self.bindings.clone())
    }

    pub fn restore(&mut self, snapshot: EnvSnapshot) {
        self.bindings = snapshot.0;
    }

    /// Type variables free in the environment after applying `subst`,
    /// ignoring the binding for `except`.
    pub fn free_type_vars(&self, subst: &Substitution, except: Option<&str>) -> BTreeSet<TypeVarId> {
        let mut vars = BTreeSet::new();
        for (name, binding) in &self.bindings {
            if Some(name.as_str()) == except {
                continue;
            }
            let applied = subst.apply_scheme(&binding.scheme);
            let mut free = free_type_vars(&applied.ty);
            for v in &applied.type_vars {
                free.remove(v);
            }
            vars.extend(free);
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use osprey_types::Type;

    use super::*;

    #[test]
    fn restore_discards_scope_bindings() {
        let mut env = TypeEnv::new();
        env.bind_global("main", TypeScheme::mono(Type::function(vec![], Type::int())));
        let outer = env.snapshot();

        env.bind_local("x", TypeScheme::mono(Type::int()));
        env.bind_local("main", TypeScheme::mono(Type::bool()));
        assert!(!env.is_global("main"));

        env.restore(outer);
        assert!(!env.contains("x"));
        assert!(env.is_global("main"));
    }

    #[test]
    fn hidden_locals_come_back_on_restore() {
        let mut env = TypeEnv::new();
        env.bind_global("main", TypeScheme::mono(Type::function(vec![], Type::int())));
        env.bind_local("k", TypeScheme::mono(Type::int()));
        env.bind_local("msg", TypeScheme::mono(Type::int()));
        let outer = env.snapshot();

        env.hide_locals();
        env.bind_local("msg", TypeScheme::mono(Type::string()));
        assert!(env.is_hidden("k"));
        assert_eq!(env.lookup("k"), None);
        assert_eq!(env.lookup("msg"), Some(&TypeScheme::mono(Type::string())));
        assert!(env.lookup("main").is_some());

        env.restore(outer);
        assert!(!env.is_hidden("k"));
        assert_eq!(env.lookup("k"), Some(&TypeScheme::mono(Type::int())));
    }

    #[test]
    fn free_vars_respect_quantifiers_and_substitution() {
        let mut env = TypeEnv::new();
        env.bind_local("a", TypeScheme::mono(Type::Var(TypeVarId(0))));
        env.bind_local("b", TypeScheme::mono(Type::Var(TypeVarId(1))));
        env.bind_global(
            "id",
            TypeScheme {
                type_vars: vec![TypeVarId(2)],
                ty: Type::function(vec![Type::Var(TypeVarId(2))], Type::Var(TypeVarId(2))),
            },
        );
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(1), Type::int());

        let free = env.free_type_vars(&subst, None);
        assert_eq!(free.into_iter().collect::<Vec<_>>(), vec![TypeVarId(0)]);
        assert!(env.free_type_vars(&subst, Some("a")).is_empty());
    }
}
