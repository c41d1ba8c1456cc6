//! Osprey compiler core.
//!
//! Takes a parsed [`Module`](osprey_ast::Module), infers types, validates
//! matches, resolves algebraic effects against their handlers and lowers the
//! result to typed SSA MIR. The reference interpreter in `osprey-mir` runs the
//! output, which is what [`run_main`] does.

mod compiler;

pub use compiler::{CompilerOptions, RunError, RunResult, compile_module, run_main};
pub use osprey_codegen::{CodegenConfig, Compilation};
pub use osprey_diag::{Category, Diagnostic, DiagnosticError};
