//! State shared by every lowering step of one compilation.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;
use osprey_diag::{Category, DiagResult, Diagnostic};
use osprey_infer::InferenceContext;
use osprey_infer::typed::TypedFunction;
use osprey_mir::{MirModule, MirType, TypeLayout};
use osprey_types::{ANY, BOOL, INT, STRING, Type, TypeKind, TypeVarId, UNIT, rename_vars};

use crate::config::CodegenConfig;
use crate::effects::HandlerStack;
use crate::lower::lower_function;

/// `function` or `function<A, B>` for a generic function instantiated at
/// `type_args`.
pub(crate) fn instance_name(function: &str, type_args: &BTreeMap<TypeVarId, Type>) -> String {
    if type_args.is_empty() {
        return function.to_string();
    }
    let args = type_args
        .values()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{function}<{args}>")
}

/// Record what each variable of `pattern` stands for in `concrete`.
fn bind_type_args(pattern: &Type, concrete: &Type, out: &mut BTreeMap<TypeVarId, Type>) {
    match (pattern, concrete) {
        (Type::Var(v), _) => {
            out.entry(*v).or_insert_with(|| concrete.clone());
        }
        (Type::App { args: a, .. }, Type::App { args: b, .. }) => {
            for (a, b) in a.iter().zip(b) {
                bind_type_args(a, b, out);
            }
        }
        (Type::Function(f), Type::Function(g)) => {
            for (a, b) in f.params.iter().zip(&g.params) {
                bind_type_args(a, b, out);
            }
            bind_type_args(&f.ret, &g.ret, out);
        }
        _ => {}
    }
}

/// Compilation progress of a specialised function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstanceState {
    /// Being lowered; `processing_depth` is the length of the effect
    /// processing stack when lowering began.
    InProgress { processing_depth: usize },
    Done,
}

/// Owns the inference results, the handler stack and the module under
/// construction. Passed by `&mut` through every lowering call.
#[derive(Debug)]
pub struct CompilerContext {
    pub infer: InferenceContext,
    pub config: CodegenConfig,
    pub(crate) handlers: HandlerStack,
    pub(crate) module: MirModule,
    /// Checked source functions by name.
    pub(crate) functions: BTreeMap<String, Rc<TypedFunction>>,
    pub(crate) instances: BTreeMap<String, InstanceState>,
    pub(crate) return_types: BTreeMap<String, Type>,
    pub(crate) layouts: BTreeMap<String, TypeLayout>,
    /// Quantified variables of the generic instances being lowered.
    type_args: BTreeMap<TypeVarId, Type>,
    next_lambda: u32,
    next_handler: u32,
}

impl CompilerContext {
    pub fn new(config: CodegenConfig) -> Self {
        Self {
            infer: InferenceContext::new(),
            config,
            handlers: HandlerStack::default(),
            module: MirModule::default(),
            functions: BTreeMap::new(),
            instances: BTreeMap::new(),
            return_types: BTreeMap::new(),
            layouts: BTreeMap::new(),
            type_args: BTreeMap::new(),
            next_lambda: 0,
            next_handler: 0,
        }
    }

    pub fn module(&self) -> &MirModule {
        &self.module
    }

    pub fn handlers(&self) -> &HandlerStack {
        &self.handlers
    }

    pub(crate) fn fresh_lambda_name(&mut self) -> String {
        let name = format!("__lambda_{}", self.next_lambda);
        self.next_lambda += 1;
        name
    }

    pub(crate) fn fresh_handler_name(&mut self, effect: &str, operation: &str) -> String {
        let name = format!("__handler_{effect}_{operation}_{}", self.next_handler);
        self.next_handler += 1;
        name
    }

    /// Apply the substitution and the active type arguments, defaulting
    /// leftover variables to `Int`.
    pub fn resolve(&mut self, ty: &Type) -> Type {
        if self.type_args.is_empty() {
            return self.infer.resolve(ty);
        }
        let applied = rename_vars(&self.infer.apply(ty), &self.type_args);
        self.infer.resolve(&applied)
    }

    /// True if `function` has quantified variables and is only emitted per
    /// instantiation.
    pub fn is_generic(&self, function: &str) -> bool {
        self.infer
            .function_scheme(function)
            .is_some_and(|s| !s.is_mono())
    }

    /// Type arguments of a generic `function` used at type `site`; empty for
    /// a monomorphic one.
    pub(crate) fn type_arguments(&mut self, function: &str, site: &Type) -> BTreeMap<TypeVarId, Type> {
        let Some(scheme) = self
            .infer
            .function_scheme(function)
            .filter(|s| !s.is_mono())
            .cloned()
        else {
            return BTreeMap::new();
        };
        let site = self.resolve(site);
        let mut found = BTreeMap::new();
        bind_type_args(&scheme.ty, &site, &mut found);
        scheme
            .type_vars
            .iter()
            .map(|v| (*v, found.remove(v).unwrap_or_else(Type::int)))
            .collect()
    }

    /// Run `f` with `type_args` added to the active type arguments.
    pub(crate) fn with_type_args<T>(
        &mut self,
        type_args: &BTreeMap<TypeVarId, Type>,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let saved = self.type_args.clone();
        self.type_args
            .extend(type_args.iter().map(|(v, ty)| (*v, ty.clone())));
        let result = f(self);
        self.type_args = saved;
        result
    }

    /// Name of the pure generic `function` instantiated at `type_args`,
    /// lowering it on first use with no handlers in scope.
    pub(crate) fn generic_instance(
        &mut self,
        function: &str,
        type_args: &BTreeMap<TypeVarId, Type>,
    ) -> DiagResult<String> {
        let instance = instance_name(function, type_args);
        if self.instances.contains_key(&instance) {
            return Ok(instance);
        }
        let Some(source) = self.functions.get(function).cloned() else {
            return Err(Diagnostic::error(
                Category::InternalError,
                format!("no checked function `{function}`"),
            )
            .into());
        };
        debug!("instantiating {function} as {instance}");
        self.instances.insert(
            instance.clone(),
            InstanceState::InProgress {
                processing_depth: 0,
            },
        );
        let scope = self.handlers.enter_pure();
        let result = self.with_type_args(type_args, |cx| {
            lower_function(
                cx,
                &instance,
                &source.params,
                &source.ret,
                Vec::new(),
                &source.body,
            )
        });
        self.handlers.leave_instance(scope);
        result?;
        self.instances.insert(instance.clone(), InstanceState::Done);
        Ok(instance)
    }

    pub fn is_record(&self, type_name: &str) -> bool {
        self.infer
            .type_decl(type_name)
            .is_some_and(|d| d.kind() == TypeKind::Record)
    }

    /// Runtime representation of an inferred type.
    pub fn mir_type(&mut self, ty: &Type) -> MirType {
        let resolved = self.resolve(ty);
        self.representation(&resolved)
    }

    /// Representation of an already-resolved type. Variables become `Any`.
    pub(crate) fn representation(&self, ty: &Type) -> MirType {
        match ty {
            Type::Var(_) => MirType::Any,
            Type::Function(_) => MirType::Function,
            Type::Con(name) | Type::App { name, .. } => match name.as_str() {
                INT => MirType::Int,
                BOOL => MirType::Bool,
                STRING => MirType::String,
                UNIT => MirType::Unit,
                ANY => MirType::Any,
                _ if self.is_record(name) => MirType::Record(name.clone()),
                _ if self.infer.type_decl(name).is_some() => MirType::Sum(name.clone()),
                _ => MirType::Any,
            },
        }
    }
}
