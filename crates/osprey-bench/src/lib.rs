//! Synthetic programs for the benchmarks in `benches/`.

use osprey_ast::build::*;
use osprey_ast::{BinOp, Decl, Module};
use osprey_types::Type;

/// `count` functions `f{i}(x: Int) -> Int = x * i + f{i-1}(x)` and a `main`
/// calling the last one.
pub fn arithmetic_chain(count: usize) -> Module {
    let mut decls: Vec<Decl> = Vec::with_capacity(count + 1);
    for i in 0..count {
        let scaled = binary(BinOp::Mul, var("x"), int(i as i64));
        let body = if i == 0 {
            scaled
        } else {
            binary(BinOp::Add, scaled, call(&format!("f{}", i - 1), vec![var("x")]))
        };
        decls.push(fn_decl(
            &format!("f{i}"),
            vec![typed_param("x", ty("Int"))],
            Some(ty("Int")),
            &[],
            body,
        ));
    }
    let last = count.saturating_sub(1);
    decls.push(fn_decl(
        "main",
        vec![],
        None,
        &[],
        call(&format!("f{last}"), vec![int(3)]),
    ));
    Module::new(decls)
}

/// A union with `variants` cases and a function matching every one of them.
pub fn wide_match(variants: usize) -> Module {
    let names: Vec<String> = (0..variants).map(|i| format!("V{i}")).collect();
    let union = type_decl(
        "Wide",
        names
            .iter()
            .map(|n| (n.as_str(), vec![("value", ty("Int"))]))
            .collect(),
    );
    let arms = names
        .iter()
        .zip(0i64..)
        .map(|(n, i)| arm(ctor_pat(n, &["v"]), binary(BinOp::Add, var("v"), int(i))))
        .collect();
    let select = fn_decl(
        "select",
        vec![typed_param("w", ty("Wide"))],
        Some(ty("Int")),
        &[],
        match_(var("w"), arms),
    );
    let last = names.last().map(String::as_str).unwrap_or("V0");
    let main = fn_decl(
        "main",
        vec![],
        None,
        &[],
        call("select", vec![construct(last, vec![int(1)])]),
    );
    Module::new(vec![union, select, main])
}

/// `handlers` nested handlers for one effect around a function performing
/// it, so every level specialises the callee once.
pub fn nested_handlers(handlers: usize) -> Module {
    let effect = effect_decl("Tick", vec![("tick", vec![], ty("Int"))]);
    let ticker = fn_decl(
        "ticker",
        vec![],
        Some(ty("Int")),
        &["Tick"],
        perform("Tick", "tick", vec![]),
    );
    let mut body = call("ticker", vec![]);
    for i in 0..handlers {
        body = handle(
            "Tick",
            vec![handler_arm("tick", &[], int(i as i64))],
            binary(BinOp::Add, body, call("ticker", vec![])),
        );
    }
    let main = fn_decl("main", vec![], None, &[], body);
    Module::new(vec![effect, ticker, main])
}

/// `fn(t{first_var}, ..) -> Result<Int, String>` for unifier benchmarks.
pub fn wide_function_type(arity: usize, first_var: u32) -> Type {
    let params = (0..arity as u32)
        .map(|i| Type::Var(osprey_types::TypeVarId(first_var + i)))
        .collect();
    Type::function(params, Type::result(Type::int(), Type::string()))
}

/// The same shape as [`wide_function_type`] with every parameter concrete.
pub fn concrete_function_type(arity: usize) -> Type {
    let params = (0..arity)
        .map(|i| if i % 2 == 0 { Type::int() } else { Type::string() })
        .collect();
    Type::function(params, Type::result(Type::int(), Type::string()))
}
