//! Expression lowering from the typed tree to MIR.

use std::collections::BTreeMap;

use osprey_ast::{BinOp, Lit, UnaryOp};
use osprey_diag::{Category, DiagResult, Diagnostic};
use osprey_infer::location;
use osprey_infer::typed::{Builtin, TypedExpr, TypedKind, TypedLambda};
use osprey_mir::{
    MirBinaryOp, MirCallee, MirConversion, MirFunctionBuilder, MirFunctionSignature, MirLiteral,
    MirType, MirUnaryOp, MirValueId,
};
use osprey_types::{BOOL, INT, STRING, Type};

use crate::CodegenError;
use crate::context::CompilerContext;

/// Lower one function body and add it to the module.
pub(crate) fn lower_function(
    cx: &mut CompilerContext,
    name: &str,
    params: &[(String, Type)],
    ret: &Type,
    effects: Vec<String>,
    body: &TypedExpr,
) -> DiagResult<()> {
    let signature = MirFunctionSignature {
        params: params.iter().map(|(_, ty)| cx.mir_type(ty)).collect(),
        ret: cx.mir_type(ret),
        effects: effects.clone(),
    };
    let resolved_ret = cx.resolve(ret);
    cx.return_types.insert(name.to_string(), resolved_ret);

    let builder = MirFunctionBuilder::new(name, signature);
    let locals = params
        .iter()
        .enumerate()
        .map(|(i, (param, _))| (param.clone(), builder.param(i)))
        .collect();
    let mut lowerer = FnLowerer {
        cx: &mut *cx,
        builder,
        locals,
        effects,
    };
    let value = lowerer.lower_expr(body)?;
    lowerer.builder.ret(Some(value));
    let function = lowerer.builder.finish().map_err(CodegenError::from)?;
    cx.module.functions.push(function);
    Ok(())
}

/// Lowers the body of a single function. Nested functions (lambdas, handler
/// arms, effect instances) get their own lowerer over the same context.
pub(crate) struct FnLowerer<'c> {
    pub(crate) cx: &'c mut CompilerContext,
    pub(crate) builder: MirFunctionBuilder,
    pub(crate) locals: BTreeMap<String, MirValueId>,
    /// Effects the enclosing source function declares.
    pub(crate) effects: Vec<String>,
}

fn unsupported(message: String, expr: &TypedExpr) -> osprey_diag::DiagnosticError {
    Diagnostic::error(Category::UnsupportedExpression, message)
        .at_opt(location(expr.span))
        .into()
}

fn binary_op(op: BinOp) -> MirBinaryOp {
    match op {
        BinOp::Add => MirBinaryOp::Add,
        BinOp::Sub => MirBinaryOp::Sub,
        BinOp::Mul => MirBinaryOp::Mul,
        BinOp::Div => MirBinaryOp::Div,
        BinOp::Mod => MirBinaryOp::Mod,
        BinOp::Eq => MirBinaryOp::Eq,
        BinOp::Neq => MirBinaryOp::Neq,
        BinOp::Lt => MirBinaryOp::Lt,
        BinOp::Lte => MirBinaryOp::Lte,
        BinOp::Gt => MirBinaryOp::Gt,
        BinOp::Gte => MirBinaryOp::Gte,
        BinOp::And => MirBinaryOp::And,
        BinOp::Or => MirBinaryOp::Or,
    }
}

fn literal(lit: &Lit) -> MirLiteral {
    match lit {
        Lit::Int(n) => MirLiteral::Int(*n),
        Lit::Bool(b) => MirLiteral::Bool(*b),
        Lit::String(s) => MirLiteral::String(s.clone()),
        Lit::Unit => MirLiteral::Unit,
    }
}

impl FnLowerer<'_> {
    pub(crate) fn lower_expr(&mut self, expr: &TypedExpr) -> DiagResult<MirValueId> {
        match &expr.kind {
            TypedKind::Lit(lit) => Ok(self.builder.constant(literal(lit))),
            TypedKind::Local(name) => self.locals.get(name).copied().ok_or_else(|| {
                unsupported(
                    format!("`{name}` is captured from an enclosing scope; lambdas cannot capture locals"),
                    expr,
                )
            }),
            TypedKind::Function(name) => self.function_value(name, expr),
            TypedKind::Variant {
                type_name,
                variant,
                tag,
            } => Ok(self.builder.sum_init(type_name, variant, *tag, vec![])),
            TypedKind::Binary { op, left, right } => self.lower_binary(*op, left, right, expr),
            TypedKind::Unary { op, operand } => {
                let value = self.lower_expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg => self.builder.unary(MirUnaryOp::Neg, value),
                    UnaryOp::Not => self.builder.unary(MirUnaryOp::Not, value),
                    UnaryOp::Plus => value,
                })
            }
            TypedKind::Call {
                callee,
                args,
                eval_order,
            } => self.lower_call(callee, args, eval_order, expr),
            TypedKind::BuiltinCall { builtin, args } => self.lower_builtin(*builtin, args, expr),
            TypedKind::Lambda(lambda) => self.lift_lambda(lambda),
            TypedKind::Block(items) => {
                let saved = self.locals.clone();
                let mut last = None;
                for item in items {
                    match self.lower_expr(item) {
                        Ok(value) => last = Some(value),
                        Err(err) => {
                            self.locals = saved;
                            return Err(err);
                        }
                    }
                }
                self.locals = saved;
                Ok(match last {
                    Some(value) => value,
                    None => self.builder.unit(),
                })
            }
            TypedKind::Let { name, value } => {
                let value = self.lower_expr(value)?;
                self.locals.insert(name.clone(), value);
                Ok(self.builder.unit())
            }
            TypedKind::Construct {
                type_name,
                variant,
                tag,
                args,
                eval_order,
            } => {
                let fields = self.lower_args(args, eval_order)?;
                Ok(if self.cx.is_record(type_name) {
                    self.builder.record_init(type_name, fields)
                } else {
                    self.builder.sum_init(type_name, variant, *tag, fields)
                })
            }
            TypedKind::Field {
                expr: target,
                type_name,
                index,
            } => {
                let record = self.lower_expr(target)?;
                let field_ty = self.cx.mir_type(&expr.ty);
                Ok(self
                    .builder
                    .record_field_load(record, type_name, *index, field_ty))
            }
            TypedKind::Perform {
                effect,
                operation,
                args,
            } => self.lower_perform(effect, operation, args, expr),
            TypedKind::Handle { effect, arms, body } => self.lower_handle(effect, arms, body),
            TypedKind::Match {
                scrutinee,
                subject,
                arms,
            } => self.lower_match(scrutinee, subject, arms, expr),
        }
    }

    fn is_effectful(&self, function: &str) -> bool {
        self.cx
            .functions
            .get(function)
            .is_some_and(|f| !f.effects.is_empty())
    }

    fn function_value(&mut self, name: &str, expr: &TypedExpr) -> DiagResult<MirValueId> {
        if self.is_effectful(name) {
            return Err(unsupported(
                format!("`{name}` performs effects and can only be called directly"),
                expr,
            ));
        }
        let type_args = self.cx.type_arguments(name, &expr.ty);
        let target = if type_args.is_empty() {
            name.to_string()
        } else {
            self.cx.generic_instance(name, &type_args)?
        };
        Ok(self.builder.function_ref(target))
    }

    fn lower_call(
        &mut self,
        callee: &TypedExpr,
        args: &[TypedExpr],
        eval_order: &[usize],
        expr: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        let ret = self.cx.mir_type(&expr.ty);
        if let TypedKind::Function(name) = &callee.kind {
            let values = self.lower_args(args, eval_order)?;
            let type_args = self.cx.type_arguments(name, &callee.ty);
            let target = if self.is_effectful(name) {
                self.cx.effect_instance(name, &type_args, expr.span)?
            } else if type_args.is_empty() {
                name.clone()
            } else {
                self.cx.generic_instance(name, &type_args)?
            };
            return Ok(self.builder.call(MirCallee::Local(target), values, ret));
        }
        let function = self.lower_expr(callee)?;
        let values = self.lower_args(args, eval_order)?;
        Ok(self.builder.call(MirCallee::Value(function), values, ret))
    }

    /// Lower `args` in source order and return the values in parameter
    /// order.
    fn lower_args(&mut self, args: &[TypedExpr], eval_order: &[usize]) -> DiagResult<Vec<MirValueId>> {
        let mut values = vec![None; args.len()];
        for &param in eval_order {
            if let (Some(arg), Some(slot)) = (args.get(param), values.get_mut(param)) {
                *slot = Some(self.lower_expr(arg)?);
            }
        }
        values
            .into_iter()
            .enumerate()
            .map(|(param, value)| {
                value.ok_or_else(|| {
                    Diagnostic::error(
                        Category::InternalError,
                        format!("argument {param} has no place in the evaluation order"),
                    )
                    .into()
                })
            })
            .collect()
    }

    fn lower_builtin(
        &mut self,
        builtin: Builtin,
        args: &[TypedExpr],
        expr: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        let [arg] = args else {
            return Err(unsupported(
                format!("`{}` takes exactly one argument", builtin.name()),
                expr,
            ));
        };
        let value = self.lower_expr(arg)?;
        let text = self.to_string_value(value, &arg.ty);
        Ok(match builtin {
            Builtin::ToString => text,
            Builtin::Print => {
                self.cx
                    .module
                    .declare_external("print", vec![MirType::String], MirType::Unit);
                self.builder.call(
                    MirCallee::External("print".to_string()),
                    vec![text],
                    MirType::Unit,
                )
            }
        })
    }

    /// Convert an Int or Bool value to String; strings pass through.
    pub(crate) fn to_string_value(&mut self, value: MirValueId, ty: &Type) -> MirValueId {
        let resolved = self.cx.resolve(ty);
        if resolved.is_con(INT) {
            self.builder.convert(MirConversion::IntToString, value)
        } else if resolved.is_con(BOOL) {
            self.builder.convert(MirConversion::BoolToString, value)
        } else {
            value
        }
    }

    /// `strcmp(left, right)`, an Int below, at or above zero.
    pub(crate) fn compare_strings(&mut self, left: MirValueId, right: MirValueId) -> MirValueId {
        self.cx.module.declare_external(
            "strcmp",
            vec![MirType::String, MirType::String],
            MirType::Int,
        );
        self.builder.call(
            MirCallee::External("strcmp".to_string()),
            vec![left, right],
            MirType::Int,
        )
    }

    fn lower_binary(
        &mut self,
        op: BinOp,
        left: &TypedExpr,
        right: &TypedExpr,
        expr: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        if op == BinOp::Add && self.cx.resolve(&expr.ty).is_con(STRING) {
            let l = self.to_string_value(l, &left.ty);
            let r = self.to_string_value(r, &right.ty);
            return Ok(self.builder.binary(MirBinaryOp::Concat, l, r));
        }
        let mir_op = binary_op(op);
        if mir_op.is_comparison() && self.cx.resolve(&left.ty).is_con(STRING) {
            let ordering = self.compare_strings(l, r);
            let zero = self.builder.int(0);
            return Ok(self.builder.binary(mir_op, ordering, zero));
        }
        Ok(self.builder.binary(mir_op, l, r))
    }

    fn lift_lambda(&mut self, lambda: &TypedLambda) -> DiagResult<MirValueId> {
        let name = self.cx.fresh_lambda_name();
        lower_function(
            self.cx,
            &name,
            &lambda.params,
            &lambda.ret,
            self.effects.clone(),
            &lambda.body,
        )?;
        Ok(self.builder.function_ref(name))
    }
}

#[cfg(test)]
mod tests {
    use osprey_ast::build::*;
    use osprey_ast::{BinOp, Module};
    use osprey_mir::{Interpreter, MirInst, Value};

    use crate::{CodegenConfig, Compilation, lower_module};

    fn compile(decls: Vec<osprey_ast::Decl>) -> Compilation {
        lower_module(&Module::new(decls), &CodegenConfig::default()).expect("compiles")
    }

    fn run(compilation: &Compilation) -> Value {
        Interpreter::new(&compilation.module)
            .call("main", vec![])
            .expect("runs")
    }

    #[test]
    fn string_plus_concatenates_with_conversion() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            binary(
                BinOp::Add,
                string("n="),
                binary(BinOp::Add, int(40), int(2)),
            ),
        )]);
        assert_eq!(run(&c), Value::string("n=42"));
    }

    #[test]
    fn string_comparison_goes_through_strcmp() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            binary(BinOp::Lt, string("apple"), string("pear")),
        )]);
        assert_eq!(run(&c), Value::Bool(true));
        assert!(c.module.external("strcmp").is_some());
    }

    #[test]
    fn let_bindings_scope_to_their_block() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            block(vec![
                let_("x", int(20)),
                let_("y", binary(BinOp::Mul, var("x"), int(2))),
                binary(BinOp::Add, var("y"), int(2)),
            ]),
        )]);
        assert_eq!(run(&c), Value::Int(42));
    }

    #[test]
    fn lambdas_are_lifted_and_called_indirectly() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            block(vec![
                let_("double", lambda(&["n"], binary(BinOp::Mul, var("n"), int(2)))),
                call("double", vec![int(21)]),
            ]),
        )]);
        assert!(c.module.function("__lambda_0").is_some());
        let main = c.module.function("main").expect("main");
        assert!(main.blocks[0].instructions.iter().any(|inst| matches!(
            inst,
            MirInst::Call {
                callee: osprey_mir::MirCallee::Value(_),
                ..
            }
        )));
        assert_eq!(run(&c), Value::Int(42));
    }

    #[test]
    fn capturing_lambdas_are_rejected() {
        let err = lower_module(
            &Module::new(vec![fn_decl(
                "main",
                vec![],
                None,
                &[],
                block(vec![
                    let_("k", int(3)),
                    let_("add_k", lambda(&["n"], binary(BinOp::Add, var("n"), var("k")))),
                    call("add_k", vec![int(1)]),
                ]),
            )]),
            &CodegenConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.category(), osprey_diag::Category::UnsupportedExpression);
    }

    #[test]
    fn print_writes_converted_lines() {
        let c = compile(vec![fn_decl(
            "main",
            vec![],
            None,
            &[],
            block(vec![call("print", vec![int(7)]), call("print", vec![boolean(true)])]),
        )]);
        let mut interp = Interpreter::new(&c.module);
        assert_eq!(interp.call("main", vec![]), Ok(Value::Unit));
        assert_eq!(interp.output(), ["7".to_string(), "true".to_string()]);
    }

    #[test]
    fn named_arguments_run_in_source_order() {
        let c = compile(vec![
            fn_decl(
                "pair",
                vec![param("a"), param("b")],
                None,
                &[],
                binary(BinOp::Sub, var("a"), var("b")),
            ),
            fn_decl(
                "noisy",
                vec![typed_param("n", ty("Int"))],
                None,
                &[],
                block(vec![call("print", vec![var("n")]), var("n")]),
            ),
            fn_decl(
                "main",
                vec![],
                None,
                &[],
                call_named(
                    "pair",
                    vec![
                        ("b", call("noisy", vec![int(2)])),
                        ("a", call("noisy", vec![int(44)])),
                    ],
                ),
            ),
        ]);
        let mut interp = Interpreter::new(&c.module);
        assert_eq!(interp.call("main", vec![]), Ok(Value::Int(42)));
        assert_eq!(interp.output(), ["2".to_string(), "44".to_string()]);
    }

    #[test]
    fn named_arguments_arrive_in_parameter_order() {
        let c = compile(vec![
            fn_decl(
                "sub",
                vec![param("a"), param("b")],
                None,
                &[],
                binary(BinOp::Sub, var("a"), var("b")),
            ),
            fn_decl(
                "main",
                vec![],
                None,
                &[],
                call_named("sub", vec![("b", int(2)), ("a", int(44))]),
            ),
        ]);
        assert_eq!(run(&c), Value::Int(42));
    }
}
