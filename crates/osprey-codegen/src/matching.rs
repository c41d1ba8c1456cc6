//! Match compilation.
//!
//! Matches on `Result` with a `Success` or `Error` arm branch once on the tag
//! and merge through a two-input phi. Everything else becomes a chain of
//! tests in arm order, one block per arm, merged by an n-input phi. The first
//! arm whose test passes wins; the last arm is reached unconditionally.

use log::debug;
use osprey_ast::Lit;
use osprey_diag::{Category, DiagResult, Diagnostic};
use osprey_infer::location;
use osprey_infer::typed::{MatchSubject, TypedExpr, TypedMatchArm, TypedPattern};
use osprey_mir::{MirBinaryOp, MirBlockId, MirLiteral, MirValueId};
use osprey_types::{ERROR, RESULT, STRING, SUCCESS, Type};

use crate::lower::FnLowerer;

impl FnLowerer<'_> {
    pub(crate) fn lower_match(
        &mut self,
        scrutinee: &TypedExpr,
        subject: &MatchSubject,
        arms: &[TypedMatchArm],
        expr: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        if arms.is_empty() {
            return Err(Diagnostic::error(Category::MatchInvalidPattern, "match has no arms")
                .at_opt(location(expr.span))
                .into());
        }
        let value = self.lower_expr(scrutinee)?;
        let result_ty = self.cx.resolve(&expr.ty);
        let type_name = match subject {
            MatchSubject::Declared(name) => Some(name.as_str()),
            MatchSubject::Scalar => None,
        };
        let result_fast_path = type_name == Some(RESULT)
            && arms
                .iter()
                .any(|a| matches!(a.pattern.variant_name(), Some(SUCCESS | ERROR)));
        if result_fast_path {
            debug!("match in {}: Result fast path", self.builder.name());
            self.lower_result_match(value, arms, &result_ty)
        } else {
            debug!(
                "match in {}: general path over {} arm(s)",
                self.builder.name(),
                arms.len()
            );
            self.lower_general_match(value, type_name, arms, &result_ty)
        }
    }

    fn lower_result_match(
        &mut self,
        value: MirValueId,
        arms: &[TypedMatchArm],
        result_ty: &Type,
    ) -> DiagResult<MirValueId> {
        let tag = self.builder.sum_tag_load(value, RESULT);
        let zero = self.builder.int(0);
        let is_success = self.builder.binary(MirBinaryOp::Eq, tag, zero);
        let success = self.builder.new_block();
        let error = self.builder.new_block();
        let merge = self.builder.new_block();
        self.builder.branch(is_success, success, error);

        let mut incoming = Vec::new();
        for (block, variant) in [(success, SUCCESS), (error, ERROR)] {
            self.builder.switch_to(block);
            let arm = arms
                .iter()
                .find(|a| a.pattern.variant_name() == Some(variant) || a.pattern.is_irrefutable());
            let Some(arm) = arm else {
                self.builder.unreachable();
                continue;
            };
            let arm_value = self.lower_arm(arm, value, Some(RESULT), result_ty)?;
            incoming.push((self.builder.current_block(), arm_value));
            self.builder.jump(merge);
        }
        self.finish_match(merge, incoming, result_ty)
    }

    fn lower_general_match(
        &mut self,
        value: MirValueId,
        type_name: Option<&str>,
        arms: &[TypedMatchArm],
        result_ty: &Type,
    ) -> DiagResult<MirValueId> {
        let is_record = type_name.is_some_and(|n| self.cx.is_record(n));
        let tests_tags = !is_record
            && arms
                .iter()
                .any(|a| matches!(a.pattern, TypedPattern::Variant { .. }));
        let tag = match type_name {
            Some(name) if tests_tags => Some(self.builder.sum_tag_load(value, name)),
            _ => None,
        };

        let blocks: Vec<MirBlockId> = arms.iter().map(|_| self.builder.new_block()).collect();
        let merge = self.builder.new_block();

        // Test arms in order; everything after an unconditional arm is dead.
        let mut reachable = 0;
        for (i, arm) in arms.iter().enumerate() {
            reachable = i + 1;
            let condition = if i + 1 == arms.len() {
                None
            } else {
                self.pattern_condition(&arm.pattern, value, tag, is_record)
            };
            match condition {
                Some(condition) => {
                    let next = self.builder.new_block();
                    self.builder.branch(condition, blocks[i], next);
                    self.builder.switch_to(next);
                }
                None => {
                    self.builder.jump(blocks[i]);
                    break;
                }
            }
        }

        let mut incoming = Vec::new();
        for (i, (arm, block)) in arms.iter().zip(&blocks).enumerate() {
            self.builder.switch_to(*block);
            if i >= reachable {
                self.builder.unreachable();
                continue;
            }
            let arm_value = self.lower_arm(arm, value, type_name, result_ty)?;
            incoming.push((self.builder.current_block(), arm_value));
            self.builder.jump(merge);
        }
        self.finish_match(merge, incoming, result_ty)
    }

    fn finish_match(
        &mut self,
        merge: MirBlockId,
        incoming: Vec<(MirBlockId, MirValueId)>,
        result_ty: &Type,
    ) -> DiagResult<MirValueId> {
        self.builder.switch_to(merge);
        let ty = self.cx.representation(result_ty);
        Ok(self.builder.phi(ty, incoming))
    }

    /// Test selecting `pattern`, or `None` when it always matches.
    fn pattern_condition(
        &mut self,
        pattern: &TypedPattern,
        value: MirValueId,
        tag: Option<MirValueId>,
        is_record: bool,
    ) -> Option<MirValueId> {
        match pattern {
            TypedPattern::Wildcard | TypedPattern::Binding(_) => None,
            TypedPattern::Lit(Lit::Unit) => None,
            TypedPattern::Lit(Lit::String(s)) => {
                let literal = self.builder.constant(MirLiteral::String(s.clone()));
                let ordering = self.compare_strings(value, literal);
                let zero = self.builder.int(0);
                Some(self.builder.binary(MirBinaryOp::Eq, ordering, zero))
            }
            TypedPattern::Lit(Lit::Int(n)) => {
                let literal = self.builder.int(*n);
                Some(self.builder.binary(MirBinaryOp::Eq, value, literal))
            }
            TypedPattern::Lit(Lit::Bool(b)) => {
                let literal = self.builder.constant(MirLiteral::Bool(*b));
                Some(self.builder.binary(MirBinaryOp::Eq, value, literal))
            }
            TypedPattern::Variant { .. } if is_record => None,
            TypedPattern::Variant { tag: expected, .. } => {
                let tag = tag?;
                let expected = self.builder.int(i64::from(*expected));
                Some(self.builder.binary(MirBinaryOp::Eq, tag, expected))
            }
        }
    }

    /// Bind the arm's pattern, lower its body and coerce the result to the
    /// match type. Bindings do not outlive the arm.
    fn lower_arm(
        &mut self,
        arm: &TypedMatchArm,
        value: MirValueId,
        type_name: Option<&str>,
        result_ty: &Type,
    ) -> DiagResult<MirValueId> {
        let saved = self.locals.clone();
        self.bind_pattern(&arm.pattern, value, type_name);
        let lowered = self.lower_expr(&arm.body);
        self.locals = saved;
        let body_value = lowered?;
        if result_ty.is_con(STRING) {
            Ok(self.to_string_value(body_value, &arm.body.ty))
        } else {
            Ok(body_value)
        }
    }

    fn bind_pattern(&mut self, pattern: &TypedPattern, value: MirValueId, type_name: Option<&str>) {
        match pattern {
            TypedPattern::Wildcard | TypedPattern::Lit(_) => {}
            TypedPattern::Binding(name) => {
                self.locals.insert(name.clone(), value);
            }
            TypedPattern::Variant {
                variant,
                fields,
                binding,
                ..
            } => {
                let Some(type_name) = type_name else {
                    return;
                };
                let is_record = self.cx.is_record(type_name);
                for (local, index, ty) in fields {
                    let field_ty = self.cx.mir_type(ty);
                    let loaded = if is_record {
                        self.builder
                            .record_field_load(value, type_name, *index, field_ty)
                    } else {
                        self.builder
                            .sum_payload_load(value, type_name, variant, *index, field_ty)
                    };
                    self.locals.insert(local.clone(), loaded);
                }
                if let Some(binding) = binding {
                    self.locals.insert(binding.clone(), value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use osprey_ast::build::*;
    use osprey_ast::{BinOp, Decl, Lit, Module, UnaryOp};
    use osprey_mir::{Interpreter, MirInst, Value};

    use crate::{CodegenConfig, Compilation, lower_module};

    fn compile(decls: Vec<Decl>) -> Compilation {
        lower_module(&Module::new(decls), &CodegenConfig::default()).expect("compiles")
    }

    fn main_value(decls: Vec<Decl>) -> Value {
        let c = compile(decls);
        Interpreter::new(&c.module)
            .call("main", vec![])
            .expect("runs")
    }

    fn shape() -> Decl {
        type_decl(
            "Shape",
            vec![
                ("Circle", vec![("radius", ty("Int"))]),
                ("Square", vec![("side", ty("Int"))]),
            ],
        )
    }

    fn phi_inputs(c: &Compilation, function: &str) -> Vec<usize> {
        c.module
            .function(function)
            .expect("function")
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|inst| match inst {
                MirInst::Phi { incoming, .. } => Some(incoming.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn union_match_selects_the_constructed_variant() {
        let value = main_value(vec![
            shape(),
            fn_decl(
                "main",
                vec![],
                None,
                &[],
                match_(
                    construct_named("Circle", vec![("radius", int(5))]),
                    vec![
                        arm(ctor_pat("Circle", &["r"]), binary(BinOp::Mul, var("r"), int(2))),
                        arm(ctor_pat("Square", &["s"]), binary(BinOp::Mul, var("s"), int(4))),
                        arm(wildcard(), int(0)),
                    ],
                ),
            ),
        ]);
        assert_eq!(value, Value::Int(10));
    }

    #[test]
    fn first_matching_arm_wins() {
        let value = main_value(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            match_(
                int(3),
                vec![
                    arm(lit_pat(Lit::Int(3)), string("three")),
                    arm(bind("n"), string("other")),
                ],
            ),
        )]);
        assert_eq!(value, Value::string("three"));
    }

    #[test]
    fn result_error_takes_the_fast_path() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            match_(
                construct("Error", vec![string("boom")]),
                vec![
                    arm(ctor_pat("Success", &["v"]), binary(BinOp::Add, var("v"), int(1))),
                    arm(ctor_pat("Error", &["e"]), unary(UnaryOp::Neg, int(1))),
                ],
            ),
        )]);
        assert_eq!(phi_inputs(&c, "main"), vec![2]);
        assert_eq!(
            Interpreter::new(&c.module).call("main", vec![]),
            Ok(Value::Int(-1))
        );
    }

    #[test]
    fn result_error_arm_binds_the_payload() {
        let value = main_value(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            match_(
                construct("Error", vec![string("boom")]),
                vec![
                    arm(ctor_pat("Success", &["v"]), call("toString", vec![var("v")])),
                    arm(ctor_pat("Error", &["e"]), var("e")),
                ],
            ),
        )]);
        assert_eq!(value, Value::string("boom"));
    }

    #[test]
    fn string_literal_patterns_compare_with_strcmp() {
        let value = main_value(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            match_(
                string("b"),
                vec![
                    arm(lit_pat(Lit::String("a".into())), int(1)),
                    arm(lit_pat(Lit::String("b".into())), int(2)),
                    arm(wildcard(), int(3)),
                ],
            ),
        )]);
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn int_arms_become_strings_when_any_arm_is_a_string() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            match_(
                boolean(false),
                vec![
                    arm(lit_pat(Lit::Bool(true)), string("yes")),
                    arm(wildcard(), int(0)),
                ],
            ),
        )]);
        assert_eq!(phi_inputs(&c, "main"), vec![2]);
        assert_eq!(
            Interpreter::new(&c.module).call("main", vec![]),
            Ok(Value::string("0"))
        );
    }

    #[test]
    fn record_patterns_read_fields_without_a_tag_test() {
        let value = main_value(vec![
            type_decl("Point", vec![("Point", vec![("x", ty("Int")), ("y", ty("Int"))])]),
            fn_decl(
                "main",
                vec![],
                None,
                &[],
                match_(
                    construct("Point", vec![int(3), int(4)]),
                    vec![arm(
                        ctor_pat_named("Point", &["y", "x"]),
                        binary(BinOp::Sub, var("y"), var("x")),
                    )],
                ),
            ),
        ]);
        assert_eq!(value, Value::Int(1));
    }

    #[test]
    fn enum_variants_match_by_tag() {
        let value = main_value(vec![
            type_decl(
                "Color",
                vec![("Red", vec![]), ("Green", vec![]), ("Blue", vec![])],
            ),
            fn_decl(
                "main",
                vec![],
                None,
                &[],
                match_(
                    var("Blue"),
                    vec![
                        arm(ctor_pat("Red", &[]), int(1)),
                        arm(ctor_pat("Green", &[]), int(2)),
                        arm(ctor_pat("Blue", &[]), int(3)),
                    ],
                ),
            ),
        ]);
        assert_eq!(value, Value::Int(3));
    }
}
