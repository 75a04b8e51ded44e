//! Fault conditions
//!
//! A [`Condition`] is the value that travels through the resolver: a kind,
//! a human-readable message, an optional cause, and the secondary failures
//! that were collected while it was in flight.
//!
//! Kinds are partitioned into exactly two families:
//!
//! - **Fault** - anticipated, may be handled and execution resumed
//! - **Defect** - unanticipated, never handled, always reaches the terminator
//!
//! The family is part of the type: a [`FaultKind`] and a [`DefectKind`] are
//! distinct types, so code that only accepts fault kinds (handler predicates)
//! cannot be handed a defect kind at all.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

/* ===================== Families ===================== */

/// The two top-level families every kind belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Anticipated, programmatically recoverable
    Fault,
    /// Internal or environment failure, not expected to be recovered
    Defect,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Fault => f.write_str("fault"),
            Family::Defect => f.write_str("defect"),
        }
    }
}

/* ===================== Kinds ===================== */

/// Kind of a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultKind(Cow<'static, str>);

impl FaultKind {
    /// Fault kind backed by a static name (usable in `const` items)
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of an unrecoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefectKind(Cow<'static, str>);

impl DefectKind {
    /// Defect kind backed by a static name (usable in `const` items)
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A condition kind tagged with its family
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "family", content = "name", rename_all = "lowercase")]
pub enum Kind {
    Fault(FaultKind),
    Defect(DefectKind),
}

impl Kind {
    pub fn family(&self) -> Family {
        match self {
            Kind::Fault(_) => Family::Fault,
            Kind::Defect(_) => Family::Defect,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Kind::Fault(k) => k.name(),
            Kind::Defect(k) => k.name(),
        }
    }

    /// The fault kind, if this kind belongs to the fault family
    pub fn as_fault(&self) -> Option<&FaultKind> {
        match self {
            Kind::Fault(k) => Some(k),
            Kind::Defect(_) => None,
        }
    }
}

impl From<FaultKind> for Kind {
    fn from(kind: FaultKind) -> Self {
        Kind::Fault(kind)
    }
}

impl From<DefectKind> for Kind {
    fn from(kind: DefectKind) -> Self {
        Kind::Defect(kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Well-known kinds shared by the engine, its collaborators and manifests
pub mod kinds {
    use super::{DefectKind, FaultKind, Kind};

    pub const IO_FAILURE: FaultKind = FaultKind::from_static("IOFailure");
    pub const TIMEOUT: FaultKind = FaultKind::from_static("Timeout");
    pub const CANCELLED: FaultKind = FaultKind::from_static("Cancelled");
    pub const INVALID_INPUT: FaultKind = FaultKind::from_static("InvalidInput");
    pub const NOT_FOUND: FaultKind = FaultKind::from_static("NotFound");
    /// Raised on behalf of several failed execution contexts
    pub const AGGREGATE_FAILURE: FaultKind = FaultKind::from_static("AggregateFailure");

    pub const INVARIANT_VIOLATION: DefectKind = DefectKind::from_static("InvariantViolation");
    pub const RESOURCE_EXHAUSTED: DefectKind = DefectKind::from_static("ResourceExhausted");
    pub const INTERNAL: DefectKind = DefectKind::from_static("Internal");

    /// Every built-in kind
    pub fn builtin() -> Vec<Kind> {
        vec![
            IO_FAILURE.into(),
            TIMEOUT.into(),
            CANCELLED.into(),
            INVALID_INPUT.into(),
            NOT_FOUND.into(),
            AGGREGATE_FAILURE.into(),
            INVARIANT_VIOLATION.into(),
            RESOURCE_EXHAUSTED.into(),
            INTERNAL.into(),
        ]
    }

    /// Fault kinds that can surface anywhere and are therefore unchecked by default
    pub fn exempt_by_default() -> Vec<FaultKind> {
        vec![TIMEOUT, CANCELLED]
    }
}

/* ===================== Condition ===================== */

/// An immutable description of a fault.
///
/// Conditions are assembled with the consuming builders ([`with_cause`],
/// [`with_suppressed`]) and then handed to [`raise`](crate::resolver::raise),
/// which takes ownership. After that point only the engine appends to the
/// suppressed list.
///
/// The cause is exclusively owned, so a chain is always finite and acyclic:
/// a condition cannot name itself or one of its ancestors as cause.
///
/// [`with_cause`]: Condition::with_cause
/// [`with_suppressed`]: Condition::with_suppressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    kind: Kind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cause: Option<Box<Condition>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    suppressed: Vec<Condition>,
    /// Suppressed entries discarded because of the configured cap
    #[serde(default, skip_serializing_if = "is_zero")]
    suppressed_dropped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl Condition {
    pub fn new(kind: impl Into<Kind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
            suppressed: Vec::new(),
            suppressed_dropped: 0,
        }
    }

    pub fn fault(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    pub fn defect(kind: DefectKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Build a condition from a std error, mirroring its `source()` chain as causes.
    ///
    /// Every link of the chain is given the same kind.
    pub fn from_error(kind: impl Into<Kind>, error: &(dyn Error + 'static)) -> Self {
        let kind = kind.into();

        let mut sources = Vec::new();
        let mut next = error.source();
        while let Some(source) = next {
            sources.push(source.to_string());
            next = source.source();
        }

        // Fold from the deepest source outward so each link owns the next
        let cause = sources.into_iter().rev().fold(None, |cause, message| {
            Some(Box::new(Condition {
                cause,
                ..Condition::new(kind.clone(), message)
            }))
        });

        Condition {
            cause,
            ..Condition::new(kind, error.to_string())
        }
    }

    /// Set the cause of this condition (replacing any previous cause)
    pub fn with_cause(mut self, cause: Condition) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Append `root` below the deepest link of the cause chain
    pub fn with_root_cause(mut self, root: Condition) -> Self {
        self.attach_root(root);
        self
    }

    fn attach_root(&mut self, root: Condition) {
        match &mut self.cause {
            Some(cause) => cause.attach_root(root),
            None => self.cause = Some(Box::new(root)),
        }
    }

    /// Record a secondary failure before the condition is raised
    pub fn with_suppressed(mut self, suppressed: Condition) -> Self {
        self.suppressed.push(suppressed);
        self
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn family(&self) -> Family {
        self.kind.family()
    }

    pub fn is_fault(&self) -> bool {
        self.family() == Family::Fault
    }

    pub fn is_defect(&self) -> bool {
        self.family() == Family::Defect
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Condition> {
        self.cause.as_deref()
    }

    pub fn suppressed(&self) -> &[Condition] {
        &self.suppressed
    }

    pub fn suppressed_dropped(&self) -> usize {
        self.suppressed_dropped
    }

    /// Iterate over the cause chain, nearest cause first
    pub fn causes(&self) -> Causes<'_> {
        Causes {
            next: self.cause(),
        }
    }

    /// The deepest condition of the cause chain (or `self` without a cause)
    pub fn root_cause(&self) -> &Condition {
        self.causes().last().unwrap_or(self)
    }

    /// True when this condition is a defect or carries a suppressed defect.
    ///
    /// Such a condition is never offered to a handler.
    pub fn involves_defect(&self) -> bool {
        self.is_defect() || self.suppressed.iter().any(Condition::involves_defect)
    }

    pub(crate) fn suppressed_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.suppressed
    }

    pub(crate) fn note_dropped(&mut self, count: usize) {
        self.suppressed_dropped += count;
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for Condition {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn Error + 'static))
    }
}

/// Iterator over a condition's cause chain
pub struct Causes<'a> {
    next: Option<&'a Condition>,
}

impl<'a> Iterator for Causes<'a> {
    type Item = &'a Condition;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}
