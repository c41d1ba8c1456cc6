//! Layout catalog for every declared type.

use log::debug;
use osprey_mir::{
    MirFieldLayout, MirLayoutCatalog, MirRecordLayout, MirSumLayout, MirVariantLayout,
    plan_layout_catalog,
};
use osprey_types::TypeKind;

use crate::CodegenError;
use crate::context::CompilerContext;

/// Build the module's layout catalog from the checked type declarations and
/// plan it. Records keep their single variant's fields; enums and tagged
/// unions tag variants in declaration order.
pub(crate) fn declare_layouts(cx: &mut CompilerContext) -> Result<(), CodegenError> {
    let mut catalog = MirLayoutCatalog::default();
    for decl in cx.infer.type_decls() {
        let fields_of = |fields: &[(String, osprey_types::Type)]| -> Vec<MirFieldLayout> {
            fields
                .iter()
                .map(|(name, ty)| MirFieldLayout {
                    name: name.clone(),
                    ty: cx.representation(ty),
                })
                .collect()
        };
        match decl.kind() {
            TypeKind::Record => {
                let fields = decl
                    .variants
                    .first()
                    .map(|v| fields_of(&v.fields))
                    .unwrap_or_default();
                debug!("record layout {} with {} field(s)", decl.name, fields.len());
                catalog.records.push(MirRecordLayout {
                    name: decl.name.clone(),
                    fields,
                });
            }
            TypeKind::Enum | TypeKind::TaggedUnion => {
                let variants = decl
                    .variants
                    .iter()
                    .zip(0u32..)
                    .map(|(variant, tag)| MirVariantLayout {
                        name: variant.name.clone(),
                        tag,
                        fields: fields_of(&variant.fields),
                    })
                    .collect::<Vec<_>>();
                debug!("sum layout {} with {} variant(s)", decl.name, variants.len());
                catalog.sums.push(MirSumLayout {
                    name: decl.name.clone(),
                    variants,
                });
            }
        }
    }
    let plan = plan_layout_catalog(&catalog)?;
    cx.module.layouts = catalog;
    cx.layouts = plan;
    Ok(())
}
