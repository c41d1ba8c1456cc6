use log::info;
use osprey_ast::Module;
use osprey_codegen::{CodegenConfig, Compilation, lower_module};
use osprey_diag::DiagnosticError;
use osprey_mir::{InterpError, Interpreter, Value};

/// Options for one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerOptions {
    pub codegen: CodegenConfig,
}

impl CompilerOptions {
    /// Read `OSPREY_ENTRY`, `OSPREY_VERIFY_IR` and `OSPREY_TRACE_UNIFY`;
    /// unset variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut codegen = CodegenConfig::default();
        if let Some(entry) = lookup("OSPREY_ENTRY").filter(|e| !e.trim().is_empty()) {
            codegen.entry_point = entry.trim().to_string();
        }
        if let Some(flag) = lookup("OSPREY_VERIFY_IR") {
            codegen.verify_ir = !matches!(flag.trim().to_ascii_lowercase().as_str(), "0" | "false");
        }
        if let Some(flag) = lookup("OSPREY_TRACE_UNIFY") {
            codegen.trace_unification =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true");
        }
        Self { codegen }
    }
}

/// Type check `module` and lower it to MIR. Fails with the first diagnostic.
pub fn compile_module(
    module: &Module,
    options: &CompilerOptions,
) -> Result<Compilation, DiagnosticError> {
    let compilation = lower_module(module, &options.codegen)?;
    info!(
        "compiled {} declaration(s) to {} MIR function(s)",
        module.declarations.len(),
        compilation.module.functions.len()
    );
    Ok(compilation)
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Compile(#[from] DiagnosticError),
    #[error("runtime error: {0}")]
    Runtime(#[from] InterpError),
}

/// Value returned by the entry function and the lines it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub value: Value,
    pub output: Vec<String>,
}

/// Compile `module` and execute its entry function with the MIR interpreter.
pub fn run_main(module: &Module, options: &CompilerOptions) -> Result<RunResult, RunError> {
    let compilation = compile_module(module, options)?;
    let mut interp = Interpreter::new(&compilation.module);
    let value = interp.call(&options.codegen.entry_point, Vec::new())?;
    Ok(RunResult {
        value,
        output: interp.output().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn options_from(vars: &[(&str, &str)]) -> CompilerOptions {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CompilerOptions::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn unset_environment_keeps_defaults() {
        assert_eq!(options_from(&[]), CompilerOptions::default());
    }

    #[test]
    fn environment_overrides_each_field() {
        let options = options_from(&[
            ("OSPREY_ENTRY", "start"),
            ("OSPREY_VERIFY_IR", "false"),
            ("OSPREY_TRACE_UNIFY", "1"),
        ]);
        assert_eq!(options.codegen.entry_point, "start");
        assert!(!options.codegen.verify_ir);
        assert!(options.codegen.trace_unification);
    }

    #[test]
    fn unrecognised_flags_fall_back() {
        let options = options_from(&[
            ("OSPREY_ENTRY", "  "),
            ("OSPREY_VERIFY_IR", "yes"),
            ("OSPREY_TRACE_UNIFY", "on"),
        ]);
        assert_eq!(options.codegen.entry_point, "main");
        assert!(options.codegen.verify_ir);
        assert!(!options.codegen.trace_unification);
    }
}
