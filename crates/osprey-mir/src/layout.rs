//! Memory layout planning for declared types.
//!
//! Fields occupy 8 bytes (integers, pointers, nested values) except booleans,
//! which take 1. Records are packed in declaration order. Enums are a bare
//! 1-byte tag. Tagged unions are a 1-byte tag followed by a payload as large
//! as their largest variant.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{MirFieldLayout, MirLayoutCatalog, MirType};

pub const TAG_BYTES: u32 = 1;
const WORD_BYTES: u32 = 8;
const BOOL_BYTES: u32 = 1;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("sum layout `{type_name}` must number its variants 0, 1, 2, .. without gaps")]
    NonContiguousTags { type_name: String },
}

/// Concrete memory layout of one declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeLayout {
    Enum {
        size_bytes: u32,
        variant_tags: BTreeMap<String, u32>,
    },
    Record {
        size_bytes: u32,
        /// `(field, byte offset)` in declaration order.
        field_offsets: Vec<(String, u32)>,
    },
    TaggedUnion {
        size_bytes: u32,
        tag_offset: u32,
        payload_offset: u32,
        payload_bytes: u32,
        variant_tags: BTreeMap<String, u32>,
    },
}

impl TypeLayout {
    pub fn size_bytes(&self) -> u32 {
        match self {
            TypeLayout::Enum { size_bytes, .. }
            | TypeLayout::Record { size_bytes, .. }
            | TypeLayout::TaggedUnion { size_bytes, .. } => *size_bytes,
        }
    }
}

pub fn field_size(ty: &MirType) -> u32 {
    match ty {
        MirType::Bool => BOOL_BYTES,
        _ => WORD_BYTES,
    }
}

fn fields_size(fields: &[MirFieldLayout]) -> u32 {
    fields.iter().map(|f| field_size(&f.ty)).sum()
}

/// Sum variants must carry the tags `0..n`, in any order.
pub fn validate_layout_catalog(catalog: &MirLayoutCatalog) -> Result<(), LayoutError> {
    for sum in &catalog.sums {
        let mut tags: Vec<u32> = sum.variants.iter().map(|v| v.tag).collect();
        tags.sort_unstable();
        if !tags.into_iter().eq(0..sum.variants.len() as u32) {
            return Err(LayoutError::NonContiguousTags {
                type_name: sum.name.clone(),
            });
        }
    }
    Ok(())
}

/// Validate the catalog and compute the layout of every type in it.
pub fn plan_layout_catalog(
    catalog: &MirLayoutCatalog,
) -> Result<BTreeMap<String, TypeLayout>, LayoutError> {
    validate_layout_catalog(catalog)?;
    let mut plan = BTreeMap::new();

    for record in &catalog.records {
        let mut offset = 0;
        let mut field_offsets = Vec::new();
        for field in &record.fields {
            field_offsets.push((field.name.clone(), offset));
            offset += field_size(&field.ty);
        }
        plan.insert(
            record.name.clone(),
            TypeLayout::Record {
                size_bytes: offset,
                field_offsets,
            },
        );
    }

    for sum in &catalog.sums {
        let variant_tags: BTreeMap<String, u32> = sum
            .variants
            .iter()
            .map(|v| (v.name.clone(), v.tag))
            .collect();
        let layout = if sum.is_enum() {
            TypeLayout::Enum {
                size_bytes: TAG_BYTES,
                variant_tags,
            }
        } else {
            let payload_bytes = sum
                .variants
                .iter()
                .map(|v| fields_size(&v.fields))
                .max()
                .unwrap_or(0);
            TypeLayout::TaggedUnion {
                size_bytes: TAG_BYTES + payload_bytes,
                tag_offset: 0,
                payload_offset: TAG_BYTES,
                payload_bytes,
                variant_tags,
            }
        };
        plan.insert(sum.name.clone(), layout);
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MirRecordLayout, MirSumLayout, MirVariantLayout};

    fn field(name: &str, ty: MirType) -> MirFieldLayout {
        MirFieldLayout {
            name: name.to_string(),
            ty,
        }
    }

    fn variant(name: &str, tag: u32, fields: Vec<MirFieldLayout>) -> MirVariantLayout {
        MirVariantLayout {
            name: name.to_string(),
            tag,
            fields,
        }
    }

    #[test]
    fn tagged_union_payload_is_the_largest_variant() {
        let catalog = MirLayoutCatalog {
            records: vec![],
            sums: vec![MirSumLayout {
                name: "Shape".to_string(),
                variants: vec![
                    variant("Circle", 0, vec![field("radius", MirType::Int)]),
                    variant(
                        "Rect",
                        1,
                        vec![
                            field("w", MirType::Int),
                            field("h", MirType::Int),
                            field("filled", MirType::Bool),
                        ],
                    ),
                    variant("Dot", 2, vec![]),
                ],
            }],
        };
        let plan = plan_layout_catalog(&catalog).expect("plan");
        let TypeLayout::TaggedUnion {
            size_bytes,
            payload_offset,
            payload_bytes,
            variant_tags,
            ..
        } = &plan["Shape"]
        else {
            panic!("expected tagged union");
        };
        assert_eq!(*payload_bytes, 17);
        assert_eq!(*payload_offset, 1);
        assert_eq!(*size_bytes, 18);
        assert_eq!(variant_tags["Dot"], 2);
    }

    #[test]
    fn records_pack_fields_in_declaration_order() {
        let catalog = MirLayoutCatalog {
            records: vec![MirRecordLayout {
                name: "Flags".to_string(),
                fields: vec![
                    field("on", MirType::Bool),
                    field("count", MirType::Int),
                    field("name", MirType::String),
                ],
            }],
            sums: vec![],
        };
        let plan = plan_layout_catalog(&catalog).expect("plan");
        assert_eq!(
            plan["Flags"],
            TypeLayout::Record {
                size_bytes: 17,
                field_offsets: vec![
                    ("on".to_string(), 0),
                    ("count".to_string(), 1),
                    ("name".to_string(), 9),
                ],
            }
        );
    }

    #[test]
    fn enums_are_a_bare_tag() {
        let catalog = MirLayoutCatalog {
            records: vec![],
            sums: vec![MirSumLayout {
                name: "Color".to_string(),
                variants: vec![variant("Red", 0, vec![]), variant("Blue", 1, vec![])],
            }],
        };
        assert_eq!(plan_layout_catalog(&catalog).expect("plan")["Color"].size_bytes(), 1);
    }

    #[test]
    fn validate_rejects_gaps_and_repeated_tags() {
        let sum = |tags: &[u32]| MirLayoutCatalog {
            records: vec![],
            sums: vec![MirSumLayout {
                name: "Gap".to_string(),
                variants: tags
                    .iter()
                    .zip(["A", "B", "C"])
                    .map(|(tag, name)| variant(name, *tag, vec![]))
                    .collect(),
            }],
        };
        let expected = Err(LayoutError::NonContiguousTags {
            type_name: "Gap".to_string(),
        });
        assert_eq!(validate_layout_catalog(&sum(&[0, 2])), expected);
        assert_eq!(validate_layout_catalog(&sum(&[0, 0, 1])), expected);
        assert_eq!(validate_layout_catalog(&sum(&[2, 0, 1])), Ok(()));
    }
}
