//! Effect handler resolution.
//!
//! Every `handle` pushes a [`HandlerFrame`] onto both the lexical list and
//! the global stack. A `perform` resolves to the deepest lexical frame for its
//! effect, then to any compatible lexical frame when the performing function
//! declares the effect, then to the deepest global frame. Leaving a scope
//! restores the exact lengths recorded on entry.
//!
//! Functions that declare effects are compiled per call site evidence: the
//! instance sees the caller's global frames but none of its lexical ones.
//! Handler arms are compiled the same way, one copy per set of frames
//! visible at the `perform` that reaches them.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::debug;
use osprey_ast::Span;
use osprey_diag::{Category, DiagResult, Diagnostic, DiagnosticError};
use osprey_infer::location;
use osprey_infer::typed::{TypedExpr, TypedHandlerArm};
use osprey_mir::{MirCallee, MirValueId};
use osprey_types::{Type, TypeVarId};

use crate::context::{CompilerContext, InstanceState, instance_name};
use crate::lower::{FnLowerer, lower_function};

pub type FrameId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArmState {
    Compiling,
    Compiled,
}

/// One compiled copy of a handler arm.
#[derive(Debug, Clone)]
pub(crate) struct ArmVariant {
    pub function: String,
    pub state: ArmState,
}

#[derive(Debug, Clone)]
pub(crate) struct ArmSlot {
    /// Name of the first compiled copy; later copies add a suffix.
    pub function: String,
    pub arm: Rc<TypedHandlerArm>,
    /// Copies keyed by the handler evidence visible where each was requested.
    pub variants: BTreeMap<String, ArmVariant>,
}

impl ArmSlot {
    pub(crate) fn new(function: String, arm: Rc<TypedHandlerArm>) -> Self {
        Self {
            function,
            arm,
            variants: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerFrame {
    pub id: FrameId,
    pub effect: String,
    /// Lexical depth at which the frame was pushed; deeper wins.
    pub depth: u32,
    pub(crate) arms: BTreeMap<String, ArmSlot>,
}

impl HandlerFrame {
    pub fn handles(&self, operation: &str) -> bool {
        self.arms.contains_key(operation)
    }
}

/// How a `perform` found its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    /// Innermost lexical handler for the exact effect.
    Lexical,
    /// A lexical handler of another effect offering the same operation,
    /// reachable because the function declares the performed effect.
    Composed,
    /// A handler installed by a caller of an effect-specialised function.
    Global,
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Via::Lexical => "lexical",
            Via::Composed => "composed",
            Via::Global => "global",
        })
    }
}

/// Lengths restored when a handler scope ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSnapshot {
    lexical: usize,
    global: usize,
    depth: u32,
}

/// Saved state while an effect-specialised or generic function is compiled.
#[derive(Debug)]
pub(crate) struct InstanceScope {
    lexical: Vec<FrameId>,
    global: Vec<FrameId>,
    depth: u32,
    processing: Vec<String>,
}

#[derive(Debug, Default)]
pub struct HandlerStack {
    /// Every frame ever pushed, indexed by id.
    frames: Vec<HandlerFrame>,
    lexical: Vec<FrameId>,
    global: Vec<FrameId>,
    depth: u32,
    /// Effects whose `perform` is being resolved, outermost first.
    processing: Vec<String>,
}

impl HandlerStack {
    pub fn snapshot(&self) -> HandlerSnapshot {
        HandlerSnapshot {
            lexical: self.lexical.len(),
            global: self.global.len(),
            depth: self.depth,
        }
    }

    pub fn restore(&mut self, snapshot: HandlerSnapshot) {
        self.lexical.truncate(snapshot.lexical);
        self.global.truncate(snapshot.global);
        self.depth = snapshot.depth;
    }

    pub(crate) fn push(&mut self, effect: &str, arms: BTreeMap<String, ArmSlot>) -> FrameId {
        self.depth += 1;
        let id = self.frames.len();
        self.frames.push(HandlerFrame {
            id,
            effect: effect.to_string(),
            depth: self.depth,
            arms,
        });
        self.lexical.push(id);
        self.global.push(id);
        debug!("pushed handler #{id} for {effect} at depth {}", self.depth);
        id
    }

    pub fn frame(&self, id: FrameId) -> Option<&HandlerFrame> {
        self.frames.get(id)
    }

    pub fn lexical_depth(&self) -> u32 {
        self.depth
    }

    pub fn lexical_frames(&self) -> &[FrameId] {
        &self.lexical
    }

    pub fn global_frames(&self) -> &[FrameId] {
        &self.global
    }

    pub fn processing_depth(&self) -> usize {
        self.processing.len()
    }

    /// Mark `effect` as being resolved. Fails if it already is: its handler
    /// leads back to a `perform` of the same effect.
    pub fn begin_processing(&mut self, effect: &str) -> DiagResult<()> {
        if self.processing.iter().any(|e| e == effect) {
            let chain = self
                .processing
                .iter()
                .map(String::as_str)
                .chain([effect])
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Diagnostic::error(
                Category::CircularEffectDependency,
                format!("circular effect dependency: {chain}"),
            )
            .with_help("a handler performs an effect whose handler performs the first one again")
            .into());
        }
        self.processing.push(effect.to_string());
        Ok(())
    }

    pub fn end_processing(&mut self) {
        self.processing.pop();
    }

    /// Find the frame serving `effect.operation`.
    pub fn resolve(
        &self,
        effect: &str,
        operation: &str,
        declared: &[String],
        compatible: impl Fn(&HandlerFrame) -> bool,
    ) -> Option<(FrameId, Via)> {
        let exact = |f: &HandlerFrame| f.effect == effect && f.handles(operation);
        if let Some(id) = self.deepest(&self.lexical, exact) {
            return Some((id, Via::Lexical));
        }
        if declared.iter().any(|e| e == effect)
            && let Some(id) = self.deepest(&self.lexical, |f| f.handles(operation) && compatible(f))
        {
            return Some((id, Via::Composed));
        }
        self.deepest(&self.global, exact).map(|id| (id, Via::Global))
    }

    fn deepest(&self, ids: &[FrameId], pred: impl Fn(&HandlerFrame) -> bool) -> Option<FrameId> {
        ids.iter()
            .filter_map(|id| self.frames.get(*id))
            .filter(|&f| pred(f))
            .max_by_key(|f| f.depth)
            .map(|f| f.id)
    }

    pub(crate) fn arm(&self, frame: FrameId, operation: &str) -> Option<&ArmSlot> {
        self.frames.get(frame).and_then(|f| f.arms.get(operation))
    }

    fn set_arm_variant(&mut self, frame: FrameId, operation: &str, key: &str, variant: ArmVariant) {
        if let Some(slot) = self
            .frames
            .get_mut(frame)
            .and_then(|f| f.arms.get_mut(operation))
        {
            slot.variants.insert(key.to_string(), variant);
        }
    }

    /// Everything a `perform` inside a handler arm resolves against: the
    /// lexical and global frame lists and the effects declared around it.
    pub fn evidence_key(&self, declared: &[String]) -> String {
        let ids = |list: &[FrameId]| {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "lexical[{}] global[{}] declared[{}]",
            ids(&self.lexical),
            ids(&self.global),
            declared.join(",")
        )
    }

    /// Hide the lexical frames; the global ones stay visible.
    pub(crate) fn enter_instance(&mut self) -> InstanceScope {
        InstanceScope {
            lexical: std::mem::take(&mut self.lexical),
            global: self.global.clone(),
            depth: self.depth,
            processing: self.processing.clone(),
        }
    }

    /// Hide every frame, for functions that perform nothing.
    pub(crate) fn enter_pure(&mut self) -> InstanceScope {
        InstanceScope {
            lexical: std::mem::take(&mut self.lexical),
            global: std::mem::take(&mut self.global),
            depth: self.depth,
            processing: std::mem::take(&mut self.processing),
        }
    }

    pub(crate) fn leave_instance(&mut self, scope: InstanceScope) {
        self.lexical = scope.lexical;
        self.global = scope.global;
        self.depth = scope.depth;
        self.processing = scope.processing;
    }
}

fn circular(message: String, span: Span) -> DiagnosticError {
    Diagnostic::error(Category::CircularEffectDependency, message)
        .at_opt(location(span))
        .into()
}

impl CompilerContext {
    /// Name of the handler arm `operation` of `frame` compiled against the
    /// handlers visible right now, lowering a new copy on first use.
    pub(crate) fn compile_arm(
        &mut self,
        frame: FrameId,
        operation: &str,
        effects: &[String],
        span: Span,
    ) -> DiagResult<String> {
        let Some(slot) = self.handlers.arm(frame, operation).cloned() else {
            return Err(Diagnostic::error(
                Category::InternalError,
                format!("handler #{frame} has no arm for `{operation}`"),
            )
            .into());
        };
        let key = self.handlers.evidence_key(effects);
        if let Some(variant) = slot.variants.get(&key) {
            return match variant.state {
                ArmState::Compiled => Ok(variant.function.clone()),
                ArmState::Compiling => Err(circular(
                    format!(
                        "circular effect dependency: the handler for `{}.{operation}` performs it again",
                        slot.arm.effect
                    ),
                    span,
                )),
            };
        }
        let function = if slot.variants.is_empty() {
            slot.function.clone()
        } else {
            format!("{}__ev{}", slot.function, slot.variants.len())
        };
        debug!("compiling handler arm {function} for {key}");
        let compiling = ArmVariant {
            function: function.clone(),
            state: ArmState::Compiling,
        };
        self.handlers.set_arm_variant(frame, operation, &key, compiling);
        let arm = &slot.arm;
        lower_function(
            self,
            &function,
            &arm.params,
            &arm.ret,
            effects.to_vec(),
            &arm.body,
        )?;
        let compiled = ArmVariant {
            function: function.clone(),
            state: ArmState::Compiled,
        };
        self.handlers.set_arm_variant(frame, operation, &key, compiled);
        Ok(function)
    }

    /// Name of `function` specialised to the handlers currently installed
    /// and to `type_args`, compiling it on first use.
    pub(crate) fn effect_instance(
        &mut self,
        function: &str,
        type_args: &BTreeMap<TypeVarId, Type>,
        span: Span,
    ) -> DiagResult<String> {
        let Some(source) = self.functions.get(function).cloned() else {
            return Err(Diagnostic::error(
                Category::InternalError,
                format!("no checked function `{function}`"),
            )
            .into());
        };
        let base = instance_name(function, type_args);
        let evidence = self.handlers.global_frames();
        let instance = if evidence.is_empty() {
            base
        } else {
            let ids = evidence
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("_");
            format!("{base}__ev{ids}")
        };
        let depth = self.handlers.processing_depth();
        match self.instances.get(&instance) {
            Some(InstanceState::Done) => return Ok(instance),
            Some(InstanceState::InProgress { processing_depth }) => {
                if depth > *processing_depth {
                    return Err(circular(
                        format!(
                            "circular effect dependency: a handler used by `{function}` calls `{function}` again"
                        ),
                        span,
                    ));
                }
                return Ok(instance);
            }
            None => {}
        }

        debug!("specialising {function} as {instance} for handlers {evidence:?}");
        self.instances.insert(
            instance.clone(),
            InstanceState::InProgress {
                processing_depth: depth,
            },
        );
        let scope = self.handlers.enter_instance();
        let result = self.with_type_args(type_args, |cx| {
            lower_function(
                cx,
                &instance,
                &source.params,
                &source.ret,
                source.effects.clone(),
                &source.body,
            )
        });
        self.handlers.leave_instance(scope);
        result?;
        self.instances.insert(instance.clone(), InstanceState::Done);
        Ok(instance)
    }
}

impl FnLowerer<'_> {
    pub(crate) fn lower_perform(
        &mut self,
        effect: &str,
        operation: &str,
        args: &[TypedExpr],
        expr: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        let values = args
            .iter()
            .map(|a| self.lower_expr(a))
            .collect::<DiagResult<Vec<_>>>()?;
        self.cx
            .handlers
            .begin_processing(effect)
            .map_err(|e| e.or_at(location(expr.span)))?;
        let result = self.dispatch_perform(effect, operation, values, expr);
        self.cx.handlers.end_processing();
        result
    }

    fn dispatch_perform(
        &mut self,
        effect: &str,
        operation: &str,
        values: Vec<MirValueId>,
        expr: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        let cx = &*self.cx;
        let wanted = cx.infer.effect(effect).and_then(|e| e.operation(operation));
        let found = cx.handlers.resolve(effect, operation, &self.effects, |frame| {
            let offered = cx
                .infer
                .effect(&frame.effect)
                .and_then(|e| e.operation(operation));
            offered.is_some() && offered == wanted
        });
        let Some((frame, via)) = found else {
            return Err(Diagnostic::error(
                Category::UnhandledEffect,
                format!("unhandled effect: no handler for `{effect}.{operation}` in `{}`", self.builder.name()),
            )
            .at_opt(location(expr.span))
            .with_help(format!(
                "wrap the call in `handle {effect} {{ {operation}(..) => .. }} in ..` or declare `!{effect}` on the enclosing function"
            ))
            .into());
        };
        debug!(
            "perform {effect}.{operation} in {} served by handler #{frame} ({via})",
            self.builder.name()
        );
        let function = self
            .cx
            .compile_arm(frame, operation, &self.effects, expr.span)?;
        let ret = self.cx.mir_type(&expr.ty);
        Ok(self.builder.call(MirCallee::Local(function), values, ret))
    }

    pub(crate) fn lower_handle(
        &mut self,
        effect: &str,
        arms: &[Rc<TypedHandlerArm>],
        body: &TypedExpr,
    ) -> DiagResult<MirValueId> {
        let snapshot = self.cx.handlers.snapshot();
        let slots = arms
            .iter()
            .map(|arm| {
                let function = self.cx.fresh_handler_name(effect, &arm.operation);
                (arm.operation.clone(), ArmSlot::new(function, Rc::clone(arm)))
            })
            .collect();
        let frame = self.cx.handlers.push(effect, slots);
        let result = self.lower_expr(body).and_then(|value| {
            self.compile_pending_arms(frame, body.span)?;
            Ok(value)
        });
        self.cx.handlers.restore(snapshot);
        debug!(
            "popped handler #{frame} for {effect}, depth back to {}",
            self.cx.handlers.lexical_depth()
        );
        result
    }

    /// Arms no `perform` reached are still emitted once, with their frame
    /// active.
    fn compile_pending_arms(&mut self, frame: FrameId, span: Span) -> DiagResult<()> {
        let pending: Vec<String> = self
            .cx
            .handlers
            .frame(frame)
            .map(|f| {
                f.arms
                    .iter()
                    .filter(|(_, slot)| slot.variants.is_empty())
                    .map(|(op, _)| op.clone())
                    .collect()
            })
            .unwrap_or_default();
        for operation in pending {
            self.cx
                .compile_arm(frame, &operation, &self.effects, span)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use osprey_ast::Span;
    use osprey_infer::typed::{TypedExpr, TypedKind};
    use osprey_ast::Lit;
    use osprey_types::Type;

    use super::*;

    fn arm(effect: &str, operation: &str) -> ArmSlot {
        ArmSlot::new(
            format!("__handler_{effect}_{operation}"),
            Rc::new(TypedHandlerArm {
                effect: effect.to_string(),
                operation: operation.to_string(),
                params: vec![],
                ret: Type::int(),
                body: TypedExpr {
                    kind: TypedKind::Lit(Lit::Int(0)),
                    ty: Type::int(),
                    span: Span::synthetic(),
                },
                span: Span::synthetic(),
            }),
        )
    }

    fn arms(effect: &str, ops: &[&str]) -> BTreeMap<String, ArmSlot> {
        ops.iter()
            .map(|op| (op.to_string(), arm(effect, op)))
            .collect()
    }

    #[test]
    fn innermost_lexical_frame_wins() {
        let mut stack = HandlerStack::default();
        let outer = stack.push("Log", arms("Log", &["write"]));
        let inner = stack.push("Log", arms("Log", &["write"]));
        assert_ne!(outer, inner);
        assert_eq!(
            stack.resolve("Log", "write", &[], |_| true),
            Some((inner, Via::Lexical))
        );
    }

    #[test]
    fn restore_returns_to_exact_lengths() {
        let mut stack = HandlerStack::default();
        let outer = stack.push("Log", arms("Log", &["write"]));
        let saved = stack.snapshot();
        stack.push("Log", arms("Log", &["write"]));
        stack.push("State", arms("State", &["get"]));
        stack.restore(saved);
        assert_eq!(stack.lexical_frames(), [outer]);
        assert_eq!(stack.global_frames(), [outer]);
        assert_eq!(stack.lexical_depth(), 1);
        assert_eq!(stack.resolve("State", "get", &[], |_| true), None);
    }

    #[test]
    fn instances_see_global_frames_only() {
        let mut stack = HandlerStack::default();
        let frame = stack.push("Log", arms("Log", &["write"]));
        let scope = stack.enter_instance();
        assert!(stack.lexical_frames().is_empty());
        assert_eq!(
            stack.resolve("Log", "write", &[], |_| true),
            Some((frame, Via::Global))
        );
        stack.leave_instance(scope);
        assert_eq!(stack.lexical_frames(), [frame]);
    }

    #[test]
    fn declared_effects_allow_compatible_frames() {
        let mut stack = HandlerStack::default();
        let console = stack.push("Console", arms("Console", &["write"]));
        assert_eq!(stack.resolve("Log", "write", &[], |_| true), None);
        let declared = vec!["Log".to_string()];
        assert_eq!(
            stack.resolve("Log", "write", &declared, |_| true),
            Some((console, Via::Composed))
        );
        assert_eq!(stack.resolve("Log", "write", &declared, |_| false), None);
    }

    #[test]
    fn evidence_changes_with_visible_frames() {
        let mut stack = HandlerStack::default();
        stack.push("Log", arms("Log", &["write"]));
        let outer = stack.evidence_key(&[]);
        let saved = stack.snapshot();
        stack.push("Val", arms("Val", &["get"]));
        let first = stack.evidence_key(&[]);
        stack.restore(saved);
        assert_eq!(stack.evidence_key(&[]), outer);
        stack.push("Val", arms("Val", &["get"]));
        assert_ne!(stack.evidence_key(&[]), first);
        assert_ne!(stack.evidence_key(&["Val".to_string()]), stack.evidence_key(&[]));
    }

    #[test]
    fn reprocessing_an_effect_is_circular() {
        let mut stack = HandlerStack::default();
        stack.begin_processing("A").expect("A");
        stack.begin_processing("B").expect("B");
        let err = stack.begin_processing("A").unwrap_err();
        assert_eq!(err.category(), Category::CircularEffectDependency);
        assert_eq!(
            err.diagnostic().message,
            "circular effect dependency: A -> B -> A"
        );
        stack.end_processing();
        stack.end_processing();
        assert_eq!(stack.processing_depth(), 0);
    }
}
