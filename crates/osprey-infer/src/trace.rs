//! Unification trace for compiler observability.
//!
//! Tracing is opt-in via `Unifier::enable_tracing()`; nothing is recorded
//! when it is disabled.

use serde::Serialize;

/// A single step in a unification trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What the unifier did at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Types are already identical.
    Identity,
    /// Structural recursion into arguments, parameters or return types.
    Decompose,
    /// Type variable bound (e.g. t0 := Int).
    Bind,
    /// One side is `Any`.
    AnyAbsorb,
    /// Unbound variable defaulted to Int during resolution.
    Default,
    /// Occurs check fired.
    OccursCheck,
    /// Unification failed.
    Error,
}
