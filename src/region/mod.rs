//! Protected region stack
//!
//! Every execution context (thread) owns one [`RegionStack`]: the ordered
//! list of protected regions that are active on its current path, innermost
//! last. The stack is the search order of the resolver.
//!
//! ## Discipline
//!
//! Regions nest strictly: they are exited in reverse order of entry. A
//! handle that is exited out of order, or a region that completes normally
//! after it was already unwound, means the stack no longer mirrors the
//! execution path. That is reported as [`MalformedRegionNesting`], which is
//! fatal rather than a condition.
//!
//! ## Ownership
//!
//! A region is owned by the stack alone. Callers only hold a
//! [`RegionHandle`], which is consumed on exit.

pub mod cleanup;

pub use cleanup::{Cleanup, CleanupRegistrar};

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, warn};

use crate::condition::Condition;
use crate::init::settings;
use crate::resolver::suppression::SuppressionCollector;
use crate::resolver::{raise, Catch, Resolution};
use crate::terminator::TerminationMode;

/* ===================== Identity ===================== */

/// Identifier of a protected region, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(u64);

impl RegionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RegionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Proof of entry into a region, consumed when the region is left
#[must_use = "a region must be exited"]
#[derive(Debug)]
pub struct RegionHandle {
    id: RegionId,
}

impl RegionHandle {
    pub fn id(&self) -> RegionId {
        self.id
    }
}

/* ===================== Frames ===================== */

/// What a frame tests a propagating condition against
#[derive(Debug)]
pub(crate) enum Guard {
    /// User handlers, in declaration order
    Handlers(Vec<Catch>),
    /// Internal frame around a cleanup action; stops every condition
    Barrier,
}

impl Guard {
    /// Index of the first handler that accepts `condition`
    pub(crate) fn select(&self, condition: &Condition) -> Option<usize> {
        match self {
            Guard::Barrier => Some(0),
            Guard::Handlers(_) if condition.involves_defect() => None,
            Guard::Handlers(catches) => catches.iter().position(|c| c.matches(condition.kind())),
        }
    }
}

/// A protected region as held by the stack
#[derive(Debug)]
pub(crate) struct ProtectedRegion {
    pub(crate) id: RegionId,
    pub(crate) guard: Guard,
    pub(crate) cleanups: CleanupRegistrar,
}

/* ===================== Errors ===================== */

/// Violation of the LIFO region discipline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRegionNesting {
    #[error("region {exited} exited while {innermost} is the innermost region")]
    OutOfOrder {
        exited: RegionId,
        innermost: RegionId,
    },

    #[error("region {region} completed normally after it was unwound")]
    AlreadyUnwound { region: RegionId },

    #[error("region {region} is still active after propagation passed it")]
    StillActive { region: RegionId },
}

/* ===================== Stack ===================== */

/// The ordered list of active regions of one execution context
#[derive(Debug, Default)]
pub struct RegionStack {
    frames: Vec<ProtectedRegion>,
}

impl RegionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Region ids, innermost first
    pub fn frames(&self) -> Vec<RegionId> {
        self.frames.iter().rev().map(|f| f.id).collect()
    }

    pub fn contains(&self, id: RegionId) -> bool {
        self.frames.iter().any(|f| f.id == id)
    }

    pub(crate) fn push(&mut self, guard: Guard, cleanups: CleanupRegistrar) -> RegionHandle {
        let id = RegionId::next();
        self.frames.push(ProtectedRegion {
            id,
            guard,
            cleanups,
        });
        RegionHandle { id }
    }

    pub(crate) fn pop_innermost(&mut self) -> Option<ProtectedRegion> {
        self.frames.pop()
    }

    /// Pop the region of `handle`, which must be the innermost one
    pub(crate) fn pop_exact(
        &mut self,
        handle: &RegionHandle,
    ) -> Result<ProtectedRegion, MalformedRegionNesting> {
        let unwound = MalformedRegionNesting::AlreadyUnwound { region: handle.id };

        match self.frames.last().map(|f| f.id) {
            Some(top) if top == handle.id => self.frames.pop().ok_or(unwound),
            Some(top) if self.contains(handle.id) => Err(MalformedRegionNesting::OutOfOrder {
                exited: handle.id,
                innermost: top,
            }),
            _ => Err(unwound),
        }
    }

    /// Pop `id` and everything nested inside it, innermost first
    pub(crate) fn drain_through(&mut self, id: RegionId) -> Vec<ProtectedRegion> {
        let Some(pos) = self.frames.iter().position(|f| f.id == id) else {
            return Vec::new();
        };
        let mut drained: Vec<ProtectedRegion> = self.frames.drain(pos..).collect();
        drained.reverse();
        drained
    }

    /// Pop every frame, innermost first
    pub(crate) fn drain_all(&mut self) -> Vec<ProtectedRegion> {
        let mut drained: Vec<ProtectedRegion> = self.frames.drain(..).collect();
        drained.reverse();
        drained
    }
}

thread_local! {
    /// The region stack of the current execution context
    static STACK: RefCell<RegionStack> = RefCell::new(RegionStack::new());
}

/// Run `f` against the current thread's stack.
///
/// The borrow never spans user code: callers pop frames out first and run
/// cleanups afterwards.
pub(crate) fn with_stack<R>(f: impl FnOnce(&mut RegionStack) -> R) -> R {
    STACK.with(|stack| f(&mut stack.borrow_mut()))
}

/// Swap the current thread's stack, returning the previous one
pub(crate) fn replace_stack(stack: RegionStack) -> RegionStack {
    with_stack(|current| std::mem::replace(current, stack))
}

/* ===================== Public API ===================== */

/// Enter a new innermost region with the given handler predicates and cleanups
pub fn enter(handlers: Vec<Catch>, cleanups: CleanupRegistrar) -> RegionHandle {
    let handle = with_stack(|s| s.push(Guard::Handlers(handlers), cleanups));
    debug!(region = %handle.id, depth = depth(), "entered region");
    handle
}

/// Leave a region normally.
///
/// The region is popped first and its cleanups then run in reverse
/// registration order, so a failing cleanup is raised from the point just
/// outside the region. The first failure is raised; any later failure of
/// the same exit is suppressed into it.
///
/// Because of that order, a cleanup does not see its own region:
/// [`current_frames`] called from a cleanup lists only the enclosing
/// regions (behind the internal barrier frame the cleanup runs in).
pub fn exit(handle: RegionHandle) -> Resolution<()> {
    let region = match with_stack(|s| s.pop_exact(&handle)) {
        Ok(region) => region,
        Err(violation) => fatal_nesting(violation),
    };

    debug!(region = %region.id, cleanups = region.cleanups.len(), "exiting region");

    let mut failures = region.cleanups.run().into_iter();
    let Some(first) = failures.next() else {
        return Ok(());
    };

    let collector = SuppressionCollector::from_settings();
    let primary = failures.fold(first, |primary, later| {
        collector.attach_suppressed(primary, later)
    });

    Err(raise(primary))
}

/// Active region ids, innermost first
pub fn current_frames() -> Vec<RegionId> {
    with_stack(|s| s.frames())
}

/// Number of active regions on this thread
pub fn depth() -> usize {
    with_stack(|s| s.depth())
}

/* ===================== Internal helpers ===================== */

pub(crate) fn enter_barrier() -> RegionHandle {
    with_stack(|s| s.push(Guard::Barrier, CleanupRegistrar::new()))
}

pub(crate) fn exit_barrier(handle: RegionHandle) {
    if let Err(violation) = with_stack(|s| s.pop_exact(&handle)) {
        fatal_nesting(violation);
    }
}

/// Consume the handle of a region that propagation already popped
pub(crate) fn release(handle: RegionHandle) {
    if with_stack(|s| s.contains(handle.id)) {
        fatal_nesting(MalformedRegionNesting::StillActive { region: handle.id });
    }
}

/// Exit `id` (and anything left inside it) while a Rust panic unwinds.
///
/// Cleanups still run; their failures can only be logged since the panic
/// already owns the thread.
pub(crate) fn abandon(id: RegionId) {
    for region in with_stack(|s| s.drain_through(id)) {
        warn!(region = %region.id, "exiting region during panic");
        for failure in region.cleanups.run_abandoned() {
            warn!(region = %region.id, kind = %failure.kind(), message = failure.message(), "cleanup failed during panic");
        }
    }
}

/// Report a nesting violation and end the execution context.
///
/// Remaining regions are still exited (their cleanups run) before the
/// thread panics with the violation as payload, or the process stops.
pub(crate) fn fatal_nesting(violation: MalformedRegionNesting) -> ! {
    let frames = with_stack(|s| s.drain_all());
    error!(%violation, abandoned = frames.len(), "malformed region nesting");

    for region in frames {
        for failure in region.cleanups.run_abandoned() {
            warn!(region = %region.id, kind = %failure.kind(), message = failure.message(), "cleanup failed after nesting violation");
        }
    }

    let terminator = &settings().terminator;
    match terminator.mode {
        TerminationMode::Unwind => std::panic::panic_any(violation),
        TerminationMode::Abort => std::process::abort(),
        TerminationMode::Exit => std::process::exit(terminator.exit_code),
    }
}
