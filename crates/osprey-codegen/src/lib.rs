//! Lowering of type-checked Osprey modules to MIR.
//!
//! Code generation runs after inference succeeds and works on the typed tree:
//! - `declare` builds the layout catalog for every declared type
//! - `lower` turns expressions into SSA instructions, one builder per function
//! - `matching` compiles matches into tag tests, branches and a merging phi
//! - `effects` installs handlers, resolves `perform` sites against them and
//!   specialises effectful functions to the handlers in scope
//!
//! Generic functions are emitted once per instantiation, as `name<T, ..>`.
//!
//! Like inference, code generation is pass/fail: the first error aborts the
//! compilation and is reported as a [`DiagnosticError`].

mod config;
mod context;
mod declare;
mod effects;
mod lower;
mod matching;

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, info};
use osprey_ast::Module;
use osprey_diag::{Category, DiagResult, Diagnostic, DiagnosticError};
use osprey_infer::trace::UnifyStep;
use osprey_mir::{LayoutError, MirModule, TypeLayout, VerifyError, verify_module};
use osprey_types::Type;
use serde::Serialize;

pub use config::CodegenConfig;
pub use context::CompilerContext;
pub use effects::{FrameId, HandlerFrame, HandlerSnapshot, HandlerStack, Via};

/// Failures that indicate the compiler produced malformed output rather than
/// a problem in the source program.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("layout planning failed: {0}")]
    Layout(#[from] LayoutError),
    #[error("MIR verification failed: {0}")]
    Verify(#[from] VerifyError),
}

impl From<CodegenError> for DiagnosticError {
    fn from(err: CodegenError) -> Self {
        Diagnostic::error(Category::InternalError, err.to_string()).into()
    }
}

/// Everything one successful compilation produces.
#[derive(Debug, Serialize)]
pub struct Compilation {
    pub module: MirModule,
    /// Resolved return type of every emitted function.
    pub return_types: BTreeMap<String, Type>,
    pub layouts: BTreeMap<String, TypeLayout>,
    /// Empty unless `trace_unification` was set.
    pub unify_trace: Vec<UnifyStep>,
}

/// Check `module` and lower it to MIR.
pub fn lower_module(module: &Module, config: &CodegenConfig) -> DiagResult<Compilation> {
    let mut cx = CompilerContext::new(config.clone());
    if config.trace_unification {
        cx.infer.enable_tracing();
    }

    let typed = cx.infer.check_module(module)?;
    info!("type checked {} function(s)", typed.len());
    let order: Vec<String> = typed.iter().map(|f| f.name.clone()).collect();
    cx.functions = typed
        .into_iter()
        .map(|f| (f.name.clone(), Rc::new(f)))
        .collect();

    declare::declare_layouts(&mut cx)?;

    for name in &order {
        let Some(function) = cx.functions.get(name).cloned() else {
            continue;
        };
        if !function.effects.is_empty() {
            debug!("deferring effectful function {name} until a call site specialises it");
            continue;
        }
        if *name != config.entry_point && cx.is_generic(name) {
            debug!("deferring generic function {name} until a call instantiates it");
            continue;
        }
        lower::lower_function(
            &mut cx,
            &function.name,
            &function.params,
            &function.ret,
            Vec::new(),
            &function.body,
        )?;
    }

    let entry = config.entry_point.as_str();
    if let Some(function) = cx.functions.get(entry).cloned()
        && !function.effects.is_empty()
    {
        cx.effect_instance(entry, &BTreeMap::new(), function.span)?;
    }

    if config.verify_ir {
        verify_module(&cx.module).map_err(CodegenError::from)?;
    }
    info!(
        "lowered {} function(s), {} external(s)",
        cx.module.functions.len(),
        cx.module.externals.len()
    );

    Ok(Compilation {
        unify_trace: cx.infer.take_unify_trace(),
        module: cx.module,
        return_types: cx.return_types,
        layouts: cx.layouts,
    })
}

#[cfg(test)]
mod codegen_tests;
