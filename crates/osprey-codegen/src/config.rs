#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    /// Function compiled even when it declares effects.
    pub entry_point: String,
    /// Run the MIR verifier on the finished module.
    pub verify_ir: bool,
    /// Record every unification step in the compilation output.
    pub trace_unification: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            entry_point: "main".to_string(),
            verify_ir: true,
            trace_unification: false,
        }
    }
}
