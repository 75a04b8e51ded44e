//! Handler tables
//!
//! A [`Catch`] is the predicate half of a handler; [`Scope`] is the builder
//! that pairs predicates with handler actions and collects the cleanups of
//! the region that [`protect`](super::protect) enters.
//!
//! Predicates are built from [`FaultKind`]s only. A defect kind cannot be
//! turned into a predicate, so a handler for a defect never exists at
//! runtime:
//!
//! ```compile_fail
//! use recourse_core::condition::kinds;
//! use recourse_core::resolver::Catch;
//!
//! let _ = Catch::kind(kinds::INTERNAL);
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::condition::{Condition, FaultKind, Kind};
use crate::region::CleanupRegistrar;

use super::Resolution;

/* ===================== Predicates ===================== */

/// Kind predicate of a handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Catch {
    /// Exactly one fault kind
    Kind { kind: FaultKind },
    /// Any of the listed fault kinds
    OneOf { kinds: Vec<FaultKind> },
    /// The whole fault family
    AnyFault,
}

impl Catch {
    pub fn kind(kind: FaultKind) -> Self {
        Catch::Kind { kind }
    }

    pub fn one_of(kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        Catch::OneOf {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn any_fault() -> Self {
        Catch::AnyFault
    }

    /// Test a condition kind. Defect kinds never match.
    pub fn matches(&self, kind: &Kind) -> bool {
        kind.as_fault().is_some_and(|fault| self.matches_fault(fault))
    }

    pub fn matches_fault(&self, kind: &FaultKind) -> bool {
        match self {
            Catch::Kind { kind: k } => k == kind,
            Catch::OneOf { kinds } => kinds.contains(kind),
            Catch::AnyFault => true,
        }
    }

    /// True when every kind accepted by `other` is also accepted by `self`
    pub fn covers(&self, other: &Catch) -> bool {
        match other {
            Catch::Kind { kind } => self.matches_fault(kind),
            Catch::OneOf { kinds } => kinds.iter().all(|k| self.matches_fault(k)),
            Catch::AnyFault => matches!(self, Catch::AnyFault),
        }
    }
}

impl fmt::Display for Catch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Catch::Kind { kind } => write!(f, "{kind}"),
            Catch::OneOf { kinds } => {
                let names: Vec<&str> = kinds.iter().map(FaultKind::name).collect();
                write!(f, "{}", names.join(" | "))
            }
            Catch::AnyFault => f.write_str("any fault"),
        }
    }
}

/* ===================== Handlers ===================== */

/// A handler action.
///
/// `Ok` resumes execution after the region with that value. `Err` raises a
/// fresh condition from just outside the region; the handled condition
/// is appended at the root of its cause chain.
pub type HandlerFn<'a, T> = Box<dyn FnOnce(&Condition) -> Result<T, Condition> + 'a>;

pub(crate) struct Handler<'a, T> {
    pub(crate) catch: Catch,
    pub(crate) action: HandlerFn<'a, T>,
}

/// Handlers and cleanups of one protected region
pub struct Scope<'a, T> {
    pub(crate) handlers: Vec<Handler<'a, T>>,
    pub(crate) cleanups: CleanupRegistrar,
}

impl<'a, T> Scope<'a, T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            cleanups: CleanupRegistrar::new(),
        }
    }

    /// Add a handler. Handlers are tested in the order they are added.
    pub fn handle(
        mut self,
        catch: Catch,
        action: impl FnOnce(&Condition) -> Result<T, Condition> + 'a,
    ) -> Self {
        self.handlers.push(Handler {
            catch,
            action: Box::new(action),
        });
        self
    }

    pub fn on(
        self,
        kind: FaultKind,
        action: impl FnOnce(&Condition) -> Result<T, Condition> + 'a,
    ) -> Self {
        self.handle(Catch::kind(kind), action)
    }

    pub fn on_any_fault(
        self,
        action: impl FnOnce(&Condition) -> Result<T, Condition> + 'a,
    ) -> Self {
        self.handle(Catch::any_fault(), action)
    }

    /// Add a cleanup action that cannot fail
    pub fn cleanup(
        mut self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() + 'static,
    ) -> Self {
        self.cleanups.register(label, action);
        self
    }

    /// Add a cleanup action that may fail
    pub fn try_cleanup(
        mut self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() -> Result<(), Condition> + 'static,
    ) -> Self {
        self.cleanups.register_fallible(label, action);
        self
    }

    /// Add a cleanup action that uses `protect`/`raise` itself
    pub fn resolving_cleanup(
        mut self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() -> Resolution<()> + 'static,
    ) -> Self {
        self.cleanups.register_resolving(label, action);
        self
    }

    pub fn catches(&self) -> Vec<Catch> {
        self.handlers.iter().map(|h| h.catch.clone()).collect()
    }
}

impl<T> Default for Scope<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Scope<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("handlers", &self.catches())
            .field("cleanups", &self.cleanups)
            .finish()
    }
}
