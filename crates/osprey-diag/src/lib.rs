//! Error reporting for the Osprey compiler core.
//!
//! The type, effect and match subsystems are pass/fail: the first failure
//! aborts compilation and becomes the single reported [`Diagnostic`].
//! Diagnostics are created by other crates (`osprey-infer`,
//! `osprey-codegen`) and rendered here.

use std::fmt;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Taxonomy tag carried by every diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Unification failed; the message names both sides.
    TypeMismatch,
    /// Occurs-check failure.
    RecursiveType,
    /// A constructor or type name that was never declared.
    UnknownConstructor,
    /// A match leaves declared variants uncovered.
    MatchNotExhaustive,
    /// A pattern that cannot apply to the discriminant.
    MatchInvalidPattern,
    /// A constructor pattern naming a variant the type does not have.
    UnknownVariant,
    /// Two arms with the same pattern.
    DuplicateArm,
    /// A wildcard arm that is not the final arm.
    WildcardNotLast,
    /// A `perform` with no handler and no declaration to forward it.
    UnhandledEffect,
    /// Handlers that perform each other's effects.
    CircularEffectDependency,
    UndefinedVariable,
    ArityMismatch,
    UnknownEffect,
    UnknownOperation,
    /// An effect operation declared without parameter/return types.
    MissingEffectSignature,
    DuplicateDefinition,
    UnsupportedExpression,
    /// The compiler produced malformed IR.
    InternalError,
}

impl Category {
    pub const ALL: [Category; 18] = [
        Category::TypeMismatch,
        Category::RecursiveType,
        Category::UnknownConstructor,
        Category::MatchNotExhaustive,
        Category::MatchInvalidPattern,
        Category::UnknownVariant,
        Category::DuplicateArm,
        Category::WildcardNotLast,
        Category::UnhandledEffect,
        Category::CircularEffectDependency,
        Category::UndefinedVariable,
        Category::ArityMismatch,
        Category::UnknownEffect,
        Category::UnknownOperation,
        Category::MissingEffectSignature,
        Category::DuplicateDefinition,
        Category::UnsupportedExpression,
        Category::InternalError,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::TypeMismatch => "type_mismatch",
            Category::RecursiveType => "recursive_type",
            Category::UnknownConstructor => "unknown_constructor",
            Category::MatchNotExhaustive => "match_not_exhaustive",
            Category::MatchInvalidPattern => "match_invalid_pattern",
            Category::UnknownVariant => "unknown_variant",
            Category::DuplicateArm => "duplicate_arm",
            Category::WildcardNotLast => "wildcard_not_last",
            Category::UnhandledEffect => "unhandled_effect",
            Category::CircularEffectDependency => "circular_effect_dependency",
            Category::UndefinedVariable => "undefined_variable",
            Category::ArityMismatch => "arity_mismatch",
            Category::UnknownEffect => "unknown_effect",
            Category::UnknownOperation => "unknown_operation",
            Category::MissingEffectSignature => "missing_effect_signature",
            Category::DuplicateDefinition => "duplicate_definition",
            Category::UnsupportedExpression => "unsupported_expression",
            Category::InternalError => "internal_error",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::TypeMismatch => "E0001",
            Category::RecursiveType => "E0002",
            Category::UnknownConstructor => "E0003",
            Category::MatchNotExhaustive => "E0004",
            Category::MatchInvalidPattern => "E0005",
            Category::UnknownVariant => "E0006",
            Category::DuplicateArm => "E0007",
            Category::WildcardNotLast => "E0008",
            Category::UnhandledEffect => "E0009",
            Category::CircularEffectDependency => "E0010",
            Category::UndefinedVariable => "E0011",
            Category::ArityMismatch => "E0012",
            Category::UnknownEffect => "E0013",
            Category::UnknownOperation => "E0014",
            Category::MissingEffectSignature => "E0015",
            Category::DuplicateDefinition => "E0016",
            Category::UnsupportedExpression => "E0017",
            Category::InternalError => "E0900",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::TypeMismatch => "Two types that must be equal could not be unified.",
            Category::RecursiveType => "A type variable would have to contain itself.",
            Category::UnknownConstructor => "A type or constructor name is not declared.",
            Category::MatchNotExhaustive => "A match does not cover every variant.",
            Category::MatchInvalidPattern => "A match arm pattern is malformed.",
            Category::UnknownVariant => "A pattern names a variant its type does not have.",
            Category::DuplicateArm => "A match contains the same pattern twice.",
            Category::WildcardNotLast => "A wildcard arm is followed by other arms.",
            Category::UnhandledEffect => "An effect operation has no handler in scope.",
            Category::CircularEffectDependency => "Effect handlers depend on each other.",
            Category::UndefinedVariable => "A referenced name is not bound.",
            Category::ArityMismatch => "A call supplies the wrong number of arguments.",
            Category::UnknownEffect => "An effect name is not declared.",
            Category::UnknownOperation => "An effect does not declare the named operation.",
            Category::MissingEffectSignature => "An effect operation has no type signature.",
            Category::DuplicateDefinition => "A name is declared more than once.",
            Category::UnsupportedExpression => "The expression form cannot be compiled.",
            Category::InternalError => "The compiler produced invalid IR.",
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of osprey-ast's Span)
// ---------------------------------------------------------------------------

/// A 1-based line/column position. Callers convert from `osprey-ast` spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0001).
    pub code: &'static str,
    pub category: Category,
    pub message: String,
    pub location: Option<SourceLocation>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: category.code(),
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach a location if the caller has one; otherwise keep the current one.
    pub fn at_opt(mut self, location: Option<SourceLocation>) -> Self {
        if location.is_some() {
            self.location = location;
        }
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{}:{}: ", loc.line, loc.column)?;
        }
        write!(f, "error[{}]: {}", self.code, self.message)?;
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// The single error a failed compilation reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DiagnosticError(Box<Diagnostic>);

impl DiagnosticError {
    pub fn diagnostic(&self) -> &Diagnostic {
        &self.0
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        *self.0
    }

    pub fn category(&self) -> Category {
        self.0.category
    }

    /// Fill in a location if the diagnostic does not carry one yet.
    pub fn or_at(mut self, location: Option<SourceLocation>) -> Self {
        if self.0.location.is_none() {
            self.0.location = location;
        }
        self
    }
}

impl From<Diagnostic> for DiagnosticError {
    fn from(diag: Diagnostic) -> Self {
        Self(Box::new(diag))
    }
}

pub type DiagResult<T> = Result<T, DiagnosticError>;
