//! Declared nominal types and effects.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{ERROR, RESULT, SUCCESS, Type, TypeVarId};

/// One variant of a declared type. Its discriminant is its index in
/// [`TypeDeclaration::variants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl Variant {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(f, _)| f == name)
    }
}

/// Runtime representation chosen for a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Every variant is fieldless; the value is its tag.
    Enum,
    /// A single variant with fields; a flat struct.
    Record,
    /// Several variants, some with fields: `{tag, payload}`.
    TaggedUnion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDeclaration {
    pub name: String,
    /// Quantified parameters, referenced as `Type::Var` in field types.
    pub params: Vec<TypeVarId>,
    pub variants: Vec<Variant>,
}

impl TypeDeclaration {
    pub fn new(name: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            variants,
        }
    }

    /// The builtin `Result<T, E> = Success { value: T } | Error { error: E }`.
    pub fn result(ok: TypeVarId, err: TypeVarId) -> Self {
        Self {
            name: RESULT.to_string(),
            params: vec![ok, err],
            variants: vec![
                Variant {
                    name: SUCCESS.to_string(),
                    fields: vec![("value".to_string(), Type::Var(ok))],
                },
                Variant {
                    name: ERROR.to_string(),
                    fields: vec![("error".to_string(), Type::Var(err))],
                },
            ],
        }
    }

    pub fn kind(&self) -> TypeKind {
        if self.variants.iter().all(|v| v.fields.is_empty()) {
            TypeKind::Enum
        } else if self.variants.len() == 1 {
            TypeKind::Record
        } else {
            TypeKind::TaggedUnion
        }
    }

    /// Look up a variant and its discriminant.
    pub fn variant(&self, name: &str) -> Option<(u32, &Variant)> {
        self.variants
            .iter()
            .enumerate()
            .find(|(_, v)| v.name == name)
            .map(|(tag, v)| (tag as u32, v))
    }

    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.name.as_str())
    }

    /// The type of values of this declaration, with its own parameters.
    pub fn self_type(&self) -> Type {
        if self.params.is_empty() {
            Type::con(&self.name)
        } else {
            Type::app(&self.name, self.params.iter().map(|v| Type::Var(*v)).collect())
        }
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationType {
    pub params: Vec<Type>,
    pub ret: Type,
}

/// A declared effect and the signatures of its operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectType {
    pub name: String,
    pub operations: BTreeMap<String, OperationType>,
}

impl EffectType {
    pub fn operation(&self, name: &str) -> Option<&OperationType> {
        self.operations.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str, fields: &[(&str, Type)]) -> Variant {
        Variant {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(f, t)| (f.to_string(), t.clone()))
                .collect(),
        }
    }

    #[test]
    fn classification() {
        let color = TypeDeclaration::new(
            "Color",
            vec![variant("Red", &[]), variant("Green", &[])],
        );
        assert_eq!(color.kind(), TypeKind::Enum);

        let point = TypeDeclaration::new(
            "Point",
            vec![variant("Point", &[("x", Type::int()), ("y", Type::int())])],
        );
        assert_eq!(point.kind(), TypeKind::Record);

        let shape = TypeDeclaration::new(
            "Shape",
            vec![
                variant("Circle", &[("radius", Type::int())]),
                variant("Empty", &[]),
            ],
        );
        assert_eq!(shape.kind(), TypeKind::TaggedUnion);
    }

    #[test]
    fn discriminants_follow_declaration_order() {
        let result = TypeDeclaration::result(TypeVarId(0), TypeVarId(1));
        assert_eq!(result.variant("Success").map(|(tag, _)| tag), Some(0));
        assert_eq!(result.variant("Error").map(|(tag, _)| tag), Some(1));
        assert_eq!(result.kind(), TypeKind::TaggedUnion);
        assert_eq!(result.self_type().to_string(), "Result<t0, t1>");
    }
}
