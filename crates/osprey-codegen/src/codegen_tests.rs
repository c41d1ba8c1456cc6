//! End-to-end lowering tests for handlers and effect specialisation.
//!
//! Each program is lowered with the verifier on and, when it compiles, run
//! through the MIR interpreter.

use osprey_ast::build::*;
use osprey_ast::*;
use osprey_diag::Category;
use osprey_mir::{Interpreter, MirCallee, MirInst, MirType, Value};

use crate::{CodegenConfig, Compilation, lower_module};

fn lower(decls: Vec<Decl>) -> Compilation {
    lower_module(&Module::new(decls), &CodegenConfig::default()).expect("program should lower")
}

fn error_of(decls: Vec<Decl>) -> (Category, String) {
    match lower_module(&Module::new(decls), &CodegenConfig::default()) {
        Ok(_) => panic!("expected a code generation error"),
        Err(err) => (err.category(), err.diagnostic().message.clone()),
    }
}

fn run_main(c: &Compilation) -> (Value, Vec<String>) {
    let mut interp = Interpreter::new(&c.module);
    let value = interp.call("main", vec![]).expect("main runs");
    (value, interp.output().to_vec())
}

fn main_fn(body: Expr) -> Decl {
    fn_decl("main", vec![], None, &[], body)
}

fn counter() -> Decl {
    effect_decl("Counter", vec![("get", vec![], ty("Int"))])
}

/// Local callees of `function`, in instruction order.
fn callees(c: &Compilation, function: &str) -> Vec<String> {
    c.module
        .function(function)
        .expect("function exists")
        .blocks
        .iter()
        .flat_map(|b| &b.instructions)
        .filter_map(|inst| match inst {
            MirInst::Call {
                callee: MirCallee::Local(name),
                ..
            } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn innermost_handler_serves_the_perform() {
    let c = lower(vec![
        counter(),
        main_fn(handle(
            "Counter",
            vec![handler_arm("get", &[], int(1))],
            handle(
                "Counter",
                vec![handler_arm("get", &[], int(2))],
                perform("Counter", "get", vec![]),
            ),
        )),
    ]);
    assert_eq!(callees(&c, "main"), ["__handler_Counter_get_1"]);
    // The outer arm is emitted at its handler's exit even though nothing reached it.
    assert!(c.module.function("__handler_Counter_get_0").is_some());
    assert_eq!(run_main(&c).0, Value::Int(2));
}

#[test]
fn leaving_a_handler_restores_the_outer_one() {
    let c = lower(vec![
        counter(),
        main_fn(handle(
            "Counter",
            vec![handler_arm("get", &[], int(1))],
            block(vec![
                let_(
                    "inner",
                    handle(
                        "Counter",
                        vec![handler_arm("get", &[], int(2))],
                        perform("Counter", "get", vec![]),
                    ),
                ),
                binary(
                    BinOp::Add,
                    binary(BinOp::Mul, var("inner"), int(10)),
                    perform("Counter", "get", vec![]),
                ),
            ]),
        )),
    ]);
    assert_eq!(run_main(&c).0, Value::Int(21));
}

#[test]
fn handler_arms_receive_operation_arguments() {
    let c = lower(vec![
        effect_decl("Log", vec![("write", vec![ty("String")], ty("Unit"))]),
        main_fn(handle(
            "Log",
            vec![handler_arm(
                "write",
                &["msg"],
                call("print", vec![binary(BinOp::Add, string("log: "), var("msg"))]),
            )],
            block(vec![
                perform("Log", "write", vec![string("first")]),
                perform("Log", "write", vec![string("second")]),
            ]),
        )),
    ]);
    // Both performs share one compiled arm.
    assert_eq!(
        callees(&c, "main"),
        ["__handler_Log_write_0", "__handler_Log_write_0"]
    );
    assert_eq!(run_main(&c).1, ["log: first", "log: second"]);
}

#[test]
fn handler_arm_sees_the_handlers_of_each_perform_site() {
    let c = lower(vec![
        effect_decl("Log", vec![("write", vec![ty("String")], ty("Int"))]),
        effect_decl("Val", vec![("get", vec![], ty("Int"))]),
        main_fn(handle(
            "Log",
            vec![handler_arm("write", &["m"], perform("Val", "get", vec![]))],
            binary(
                BinOp::Add,
                binary(
                    BinOp::Mul,
                    handle(
                        "Val",
                        vec![handler_arm("get", &[], int(1))],
                        perform("Log", "write", vec![string("a")]),
                    ),
                    int(10),
                ),
                handle(
                    "Val",
                    vec![handler_arm("get", &[], int(2))],
                    perform("Log", "write", vec![string("b")]),
                ),
            ),
        )),
    ]);
    assert_eq!(
        callees(&c, "main"),
        ["__handler_Log_write_0", "__handler_Log_write_0__ev1"]
    );
    assert_eq!(callees(&c, "__handler_Log_write_0"), ["__handler_Val_get_1"]);
    assert_eq!(callees(&c, "__handler_Log_write_0__ev1"), ["__handler_Val_get_2"]);
    assert_eq!(run_main(&c).0, Value::Int(12));
}

#[test]
fn handler_arm_result_does_not_depend_on_perform_order() {
    let c = lower(vec![
        effect_decl("Log", vec![("write", vec![ty("String")], ty("Int"))]),
        effect_decl("Val", vec![("get", vec![], ty("Int"))]),
        main_fn(handle(
            "Log",
            vec![handler_arm("write", &["m"], perform("Val", "get", vec![]))],
            handle(
                "Val",
                vec![handler_arm("get", &[], int(2))],
                perform("Log", "write", vec![string("b")]),
            ),
        )),
    ]);
    assert_eq!(run_main(&c).0, Value::Int(2));
}

#[test]
fn perform_without_a_handler_is_unhandled() {
    let (category, message) = error_of(vec![counter(), main_fn(perform("Counter", "get", vec![]))]);
    assert_eq!(category, Category::UnhandledEffect);
    assert!(message.contains("`Counter.get`"), "{message}");
}

#[test]
fn declared_effect_without_any_handler_is_unhandled() {
    let (category, _) = error_of(vec![
        counter(),
        fn_decl("main", vec![], None, &["Counter"], perform("Counter", "get", vec![])),
    ]);
    assert_eq!(category, Category::UnhandledEffect);
}

#[test]
fn handlers_that_perform_each_other_are_circular() {
    let (category, message) = error_of(vec![
        effect_decl("A", vec![("ping", vec![], ty("Int"))]),
        effect_decl("B", vec![("pong", vec![], ty("Int"))]),
        main_fn(handle(
            "A",
            vec![handler_arm("ping", &[], perform("B", "pong", vec![]))],
            handle(
                "B",
                vec![handler_arm("pong", &[], perform("A", "ping", vec![]))],
                perform("A", "ping", vec![]),
            ),
        )),
    ]);
    assert_eq!(category, Category::CircularEffectDependency);
    assert_eq!(message, "circular effect dependency: A -> B -> A");
}

#[test]
fn effectful_functions_are_specialised_to_the_caller_handlers() {
    let c = lower(vec![
        counter(),
        fn_decl(
            "twice",
            vec![],
            None,
            &["Counter"],
            binary(
                BinOp::Add,
                perform("Counter", "get", vec![]),
                perform("Counter", "get", vec![]),
            ),
        ),
        main_fn(handle(
            "Counter",
            vec![handler_arm("get", &[], int(5))],
            call("twice", vec![]),
        )),
    ]);
    assert!(c.module.function("twice").is_none());
    assert_eq!(callees(&c, "main"), ["twice__ev0"]);
    assert_eq!(
        callees(&c, "twice__ev0"),
        ["__handler_Counter_get_0", "__handler_Counter_get_0"]
    );
    assert_eq!(run_main(&c).0, Value::Int(10));
}

#[test]
fn each_handler_set_gets_its_own_instance() {
    let c = lower(vec![
        counter(),
        fn_decl("one", vec![], None, &["Counter"], perform("Counter", "get", vec![])),
        main_fn(binary(
            BinOp::Add,
            handle("Counter", vec![handler_arm("get", &[], int(1))], call("one", vec![])),
            handle("Counter", vec![handler_arm("get", &[], int(20))], call("one", vec![])),
        )),
    ]);
    assert_eq!(callees(&c, "main"), ["one__ev0", "one__ev1"]);
    assert_eq!(run_main(&c).0, Value::Int(21));
}

#[test]
fn declared_effect_uses_a_compatible_local_handler() {
    let c = lower(vec![
        effect_decl("Logger", vec![("log", vec![ty("String")], ty("Unit"))]),
        effect_decl("Audit", vec![("log", vec![ty("String")], ty("Unit"))]),
        fn_decl(
            "report",
            vec![],
            None,
            &["Logger"],
            handle(
                "Audit",
                vec![handler_arm("log", &["m"], call("print", vec![var("m")]))],
                perform("Logger", "log", vec![string("composed")]),
            ),
        ),
        main_fn(call("report", vec![])),
    ]);
    assert_eq!(callees(&c, "report"), ["__handler_Audit_log_0"]);
    assert_eq!(run_main(&c).1, ["composed"]);
}

#[test]
fn effectful_entry_point_is_compiled() {
    let c = lower(vec![
        counter(),
        fn_decl(
            "main",
            vec![],
            None,
            &["Counter"],
            handle(
                "Counter",
                vec![handler_arm("get", &[], int(3))],
                perform("Counter", "get", vec![]),
            ),
        ),
    ]);
    assert_eq!(run_main(&c).0, Value::Int(3));
}

#[test]
fn unification_trace_is_opt_in() {
    let module = Module::new(vec![main_fn(binary(BinOp::Add, int(1), int(2)))]);
    let quiet = lower_module(&module, &CodegenConfig::default()).expect("lowers");
    assert!(quiet.unify_trace.is_empty());

    let config = CodegenConfig {
        trace_unification: true,
        ..CodegenConfig::default()
    };
    let traced = lower_module(&module, &config).expect("lowers");
    assert!(!traced.unify_trace.is_empty());
}

#[test]
fn return_types_are_recorded_resolved() {
    let c = lower(vec![
        fn_decl("id", vec![param("x")], None, &[], var("x")),
        main_fn(call("id", vec![string("s")])),
    ]);
    assert_eq!(c.return_types.get("main"), Some(&osprey_types::Type::string()));
    assert_eq!(
        c.return_types.get("id<String>"),
        Some(&osprey_types::Type::string())
    );
    assert!(c.module.function("id").is_none());
}

#[test]
fn generic_functions_are_emitted_per_instantiation() {
    let c = lower(vec![
        fn_decl("id", vec![param("x")], None, &[], var("x")),
        main_fn(binary(
            BinOp::Add,
            call("id", vec![string("hi")]),
            call("toString", vec![call("id", vec![int(3)])]),
        )),
    ]);
    insta::assert_snapshot!(c.module.function("main").expect("main").to_string(), @r#"
    fn main() -> String {
    bb0:
      %0 = const "hi"
      %1 = call @id<String>(%0) : String
      %2 = const 3
      %3 = call @id<Int>(%2) : Int
      %4 = int_to_string %3
      %5 = concat %1, %4
      return %5
    }
    "#);
    assert_eq!(
        c.module.function("id<Int>").expect("int instance").signature.params,
        [MirType::Int]
    );
    assert_eq!(run_main(&c).0, Value::string("hi3"));
}

#[test]
fn generic_recursion_reuses_its_instance() {
    let c = lower(vec![
        fn_decl(
            "pick",
            vec![typed_param("n", ty("Int")), param("x")],
            None,
            &[],
            match_(
                binary(BinOp::Lte, var("n"), int(0)),
                vec![
                    arm(lit_pat(Lit::Bool(true)), var("x")),
                    arm(
                        lit_pat(Lit::Bool(false)),
                        call("pick", vec![binary(BinOp::Sub, var("n"), int(1)), var("x")]),
                    ),
                ],
            ),
        ),
        main_fn(call("pick", vec![int(3), boolean(true)])),
    ]);
    assert_eq!(callees(&c, "pick<Bool>"), ["pick<Bool>"]);
    assert_eq!(run_main(&c).0, Value::Bool(true));
}
