//! Match validation: variant existence, arm ordering, duplicates and
//! exhaustiveness.
//!
//! Runs once the scrutinee type is known and before any arm is typed, so an
//! invalid match never reaches code generation.

use std::collections::BTreeSet;

use osprey_ast::{Lit, MatchArm, Pattern, PatternKind, Span};
use osprey_types::{Type, TypeDeclaration};

use crate::typed::MatchSubject;
use crate::{Category, DiagResult, Diagnostic, DiagnosticError, InferenceContext, location};

/// Check whether constructor patterns cover every variant of `decl`.
///
/// Returns the missing variant names, sorted. Empty means exhaustive.
pub fn check_exhaustiveness(decl: &TypeDeclaration, patterns: &[&Pattern]) -> Vec<String> {
    if patterns.iter().any(|p| p.node.is_irrefutable()) {
        return vec![];
    }
    let covered: BTreeSet<&str> = patterns
        .iter()
        .filter_map(|p| p.node.constructor_name())
        .collect();
    let mut missing: Vec<String> = decl
        .variant_names()
        .filter(|v| !covered.contains(v))
        .map(str::to_string)
        .collect();
    missing.sort();
    missing
}

/// Validate the arms of a match against the scrutinee type.
pub fn validate_match(
    ctx: &InferenceContext,
    scrutinee_ty: &Type,
    arms: &[MatchArm],
    span: Span,
) -> DiagResult<MatchSubject> {
    let error_at = |diag: Diagnostic, at: Span| -> DiagnosticError {
        diag.at_opt(location(at).or(location(span))).into()
    };

    let Some(last) = arms.len().checked_sub(1) else {
        return Err(error_at(
            Diagnostic::error(
                Category::MatchInvalidPattern,
                "match expression must have at least one arm",
            ),
            span,
        ));
    };

    for (i, arm) in arms.iter().enumerate() {
        if arm.pattern.node.is_irrefutable() && i != last {
            return Err(error_at(
                Diagnostic::error(
                    Category::WildcardNotLast,
                    format!(
                        "catch-all pattern in arm {} of {} must be the last arm",
                        i + 1,
                        arms.len()
                    ),
                )
                .with_help("arms after a catch-all can never match"),
                arm.pattern.span,
            ));
        }
    }

    let subject = match_subject(ctx, scrutinee_ty, arms, span)?;
    let patterns: Vec<&Pattern> = arms.iter().map(|a| &a.pattern).collect();

    match &subject {
        MatchSubject::Declared(type_name) => {
            let Some(decl) = ctx.type_decl(type_name) else {
                return Err(error_at(
                    Diagnostic::error(
                        Category::UnknownConstructor,
                        format!("unknown type `{type_name}`"),
                    ),
                    span,
                ));
            };
            let mut seen = BTreeSet::new();
            for pattern in &patterns {
                match &pattern.node {
                    PatternKind::Constructor { name, .. } => {
                        if decl.variant(name).is_none() {
                            return Err(error_at(
                                Diagnostic::error(
                                    Category::UnknownVariant,
                                    format!("`{type_name}` has no variant `{name}`"),
                                ),
                                pattern.span,
                            ));
                        }
                        if !seen.insert(name.as_str()) {
                            return Err(error_at(
                                Diagnostic::error(
                                    Category::DuplicateArm,
                                    format!("duplicate match arm for `{name}`"),
                                ),
                                pattern.span,
                            ));
                        }
                    }
                    PatternKind::Lit(lit) => {
                        return Err(error_at(
                            Diagnostic::error(
                                Category::MatchInvalidPattern,
                                format!(
                                    "literal pattern {} cannot match a value of type `{type_name}`",
                                    describe_lit(lit)
                                ),
                            ),
                            pattern.span,
                        ));
                    }
                    PatternKind::Wildcard | PatternKind::Binding(_) => {}
                }
            }
            let missing = check_exhaustiveness(decl, &patterns);
            if !missing.is_empty() {
                return Err(error_at(
                    Diagnostic::error(
                        Category::MatchNotExhaustive,
                        format!(
                            "match on `{type_name}` is not exhaustive: missing {}",
                            missing.join(", ")
                        ),
                    )
                    .with_help("add arms for the missing variants or a final `_` arm"),
                    span,
                ));
            }
        }
        MatchSubject::Scalar => {
            let mut seen = BTreeSet::new();
            for pattern in &patterns {
                if let PatternKind::Lit(lit) = &pattern.node
                    && !seen.insert(describe_lit(lit))
                {
                    return Err(error_at(
                        Diagnostic::error(
                            Category::DuplicateArm,
                            format!("duplicate match arm for {}", describe_lit(lit)),
                        ),
                        pattern.span,
                    ));
                }
            }
            let covers_bool = seen.contains("true") && seen.contains("false");
            if !patterns.iter().any(|p| p.node.is_irrefutable()) && !covers_bool {
                return Err(error_at(
                    Diagnostic::error(
                        Category::MatchNotExhaustive,
                        format!(
                            "match on `{}` is not exhaustive: missing _",
                            ctx.apply(scrutinee_ty)
                        ),
                    )
                    .with_help("literal patterns need a final `_` arm"),
                    span,
                ));
            }
        }
    }

    Ok(subject)
}

/// Decide what the match discriminates on: the scrutinee's declared type if
/// it is known, otherwise the owner of the first constructor pattern.
fn match_subject(
    ctx: &InferenceContext,
    scrutinee_ty: &Type,
    arms: &[MatchArm],
    span: Span,
) -> DiagResult<MatchSubject> {
    let resolved = ctx.apply(scrutinee_ty);
    if let Some(name) = resolved.head_name()
        && ctx.type_decl(name).is_some()
    {
        return Ok(MatchSubject::Declared(name.to_string()));
    }

    let first_ctor = arms
        .iter()
        .find_map(|arm| arm.pattern.node.constructor_name().map(|c| (c, arm.pattern.span)));
    let Some((ctor, ctor_span)) = first_ctor else {
        return Ok(MatchSubject::Scalar);
    };
    let at = location(ctor_span).or(location(span));

    let Some(owner) = ctx.constructor_owner(ctor) else {
        return Err(Diagnostic::error(
            Category::UnknownConstructor,
            format!("unknown constructor `{ctor}` in pattern"),
        )
        .at_opt(at)
        .into());
    };
    if !resolved.is_var() && !resolved.is_any() {
        return Err(Diagnostic::error(
            Category::MatchInvalidPattern,
            format!("constructor pattern `{ctor}` cannot match a value of type {resolved}"),
        )
        .at_opt(at)
        .into());
    }
    Ok(MatchSubject::Declared(owner.to_string()))
}

pub(crate) fn describe_lit(lit: &Lit) -> String {
    match lit {
        Lit::Int(n) => n.to_string(),
        Lit::Bool(b) => b.to_string(),
        Lit::String(s) => format!("{s:?}"),
        Lit::Unit => "()".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use osprey_ast::build::*;
    use osprey_types::Variant;

    use super::*;

    fn abc() -> TypeDeclaration {
        TypeDeclaration::new(
            "Letter",
            ["A", "B", "C"]
                .iter()
                .map(|n| Variant {
                    name: n.to_string(),
                    fields: vec![],
                })
                .collect(),
        )
    }

    #[test]
    fn missing_variants_are_reported_sorted() {
        let decl = abc();
        let pats = [ctor_pat("B", &[])];
        let refs: Vec<&Pattern> = pats.iter().collect();
        assert_eq!(check_exhaustiveness(&decl, &refs), vec!["A", "C"]);
    }

    #[test]
    fn two_of_three_lists_the_third() {
        let decl = abc();
        let pats = [ctor_pat("A", &[]), ctor_pat("B", &[])];
        let refs: Vec<&Pattern> = pats.iter().collect();
        assert_eq!(check_exhaustiveness(&decl, &refs), vec!["C"]);

        let pats = [ctor_pat("A", &[]), ctor_pat("B", &[]), wildcard()];
        let refs: Vec<&Pattern> = pats.iter().collect();
        assert!(check_exhaustiveness(&decl, &refs).is_empty());
    }

    fn ctx_with_letters() -> InferenceContext {
        let mut ctx = InferenceContext::new();
        ctx.reserve_type_name("Letter", Span::synthetic()).expect("reserve");
        ctx.declare_type(abc(), Span::synthetic()).expect("declare");
        ctx
    }

    #[test]
    fn validate_reports_each_structural_error() {
        let ctx = ctx_with_letters();
        let letter = Type::con("Letter");
        let cases = [
            (vec![], Category::MatchInvalidPattern),
            (
                vec![arm(wildcard(), int(0)), arm(ctor_pat("A", &[]), int(1))],
                Category::WildcardNotLast,
            ),
            (
                vec![arm(ctor_pat("Z", &[]), int(0)), arm(wildcard(), int(1))],
                Category::UnknownVariant,
            ),
            (
                vec![
                    arm(ctor_pat("A", &[]), int(0)),
                    arm(ctor_pat("A", &[]), int(1)),
                    arm(wildcard(), int(2)),
                ],
                Category::DuplicateArm,
            ),
            (
                vec![arm(ctor_pat("A", &[]), int(0))],
                Category::MatchNotExhaustive,
            ),
            (
                vec![arm(lit_pat(Lit::Int(1)), int(0)), arm(wildcard(), int(1))],
                Category::MatchInvalidPattern,
            ),
        ];
        for (arms, expected) in cases {
            let err = validate_match(&ctx, &letter, &arms, Span::synthetic()).unwrap_err();
            assert_eq!(err.category(), expected, "{err}");
        }
    }

    #[test]
    fn scalar_matches_need_a_catch_all() {
        let ctx = ctx_with_letters();
        let arms = vec![arm(lit_pat(Lit::Int(1)), int(0))];
        let err = validate_match(&ctx, &Type::int(), &arms, Span::synthetic()).unwrap_err();
        assert_eq!(err.diagnostic().message, "match on `Int` is not exhaustive: missing _");

        let arms = vec![
            arm(lit_pat(Lit::Bool(true)), int(0)),
            arm(lit_pat(Lit::Bool(false)), int(1)),
        ];
        assert_eq!(
            validate_match(&ctx, &Type::bool(), &arms, Span::synthetic()).expect("bool covered"),
            MatchSubject::Scalar
        );
    }

    #[test]
    fn unknown_constructor_on_unknown_scrutinee() {
        let mut ctx = ctx_with_letters();
        let t = ctx.fresh_type();
        let arms = vec![arm(ctor_pat("Nope", &[]), int(0)), arm(wildcard(), int(1))];
        let err = validate_match(&ctx, &t, &arms, Span::synthetic()).unwrap_err();
        assert_eq!(err.category(), Category::UnknownConstructor);
    }

    #[test]
    fn error_carries_pattern_position() {
        let ctx = ctx_with_letters();
        let arms = vec![
            arm(at(ctor_pat("Q", &[]), 7, 3), int(0)),
            arm(wildcard(), int(1)),
        ];
        let err = validate_match(&ctx, &Type::con("Letter"), &arms, Span::synthetic()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "7:3: error[E0006]: `Letter` has no variant `Q`"
        );
    }
}
