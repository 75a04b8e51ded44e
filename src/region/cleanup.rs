//! Cleanup registrar
//!
//! Each protected region owns an ordered list of cleanup actions. They run
//! exactly once, in reverse registration order, on every exit path of the
//! region: normal exit, handled fault, propagating fault, or panic.
//!
//! Every action runs inside a barrier frame. A condition raised while the
//! action runs is stopped at the barrier and handed back here as a plain
//! value, so a failing cleanup can never start a second unwind of the
//! frames that enclose it.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{trace, warn};

use super::{enter_barrier, exit_barrier, with_stack};
use crate::condition::Condition;
use crate::resolver::{raise, Resolution};

/// A boxed cleanup action.
///
/// Actions are stored on the thread's region stack, hence `'static`.
pub(crate) type CleanupFn = Box<dyn FnOnce() -> Resolution<()>>;

/// One registered cleanup action
pub struct Cleanup {
    label: Cow<'static, str>,
    action: CleanupFn,
}

impl Cleanup {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup").field("label", &self.label).finish()
    }
}

/// Ordered cleanup actions of a single region
#[derive(Debug, Default)]
pub struct CleanupRegistrar {
    actions: Vec<Cleanup>,
}

impl CleanupRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action that cannot fail
    pub fn register(
        &mut self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() + 'static,
    ) {
        self.actions.push(Cleanup {
            label: label.into(),
            action: Box::new(move || {
                action();
                Ok(())
            }),
        });
    }

    /// Register an action that may report a failure
    pub fn register_fallible(
        &mut self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() -> Result<(), Condition> + 'static,
    ) {
        self.actions.push(Cleanup {
            label: label.into(),
            action: Box::new(move || action().map_err(raise)),
        });
    }

    /// Register an action that already speaks the resolver's protocol
    /// (it may call `protect` and `raise` itself).
    pub fn register_resolving(
        &mut self,
        label: impl Into<Cow<'static, str>>,
        action: impl FnOnce() -> Resolution<()> + 'static,
    ) {
        self.actions.push(Cleanup {
            label: label.into(),
            action: Box::new(action),
        });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.actions.iter().map(Cleanup::label)
    }

    /// Run every action in reverse registration order.
    ///
    /// Returns the failures in the order they occurred. An empty vector
    /// means every action completed. If an action panics, the remaining
    /// actions still run and the first panic is resumed afterwards.
    pub(crate) fn run(self) -> Vec<Condition> {
        let (failures, panicked) = self.run_all();

        if let Some(payload) = panicked {
            for failure in &failures {
                warn!(kind = %failure.kind(), message = failure.message(), "cleanup failure lost to panic");
            }
            panic::resume_unwind(payload);
        }

        failures
    }

    /// Like [`run`](Self::run), for regions exited while a panic is already
    /// in flight: a panicking action is logged instead of resumed.
    pub(crate) fn run_abandoned(self) -> Vec<Condition> {
        let (failures, panicked) = self.run_all();
        if panicked.is_some() {
            warn!("cleanup panicked while its region was abandoned");
        }
        failures
    }

    fn run_all(self) -> (Vec<Condition>, Option<PanicPayload>) {
        let mut failures = Vec::new();
        let mut panicked = None;

        for cleanup in self.actions.into_iter().rev() {
            match run_guarded(cleanup) {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(payload) => {
                    panicked.get_or_insert(payload);
                }
            }
        }

        (failures, panicked)
    }
}

type PanicPayload = Box<dyn Any + Send>;

/// Run one action behind a barrier frame.
///
/// The barrier is removed on every path, including a panic in the action.
fn run_guarded(cleanup: Cleanup) -> Result<Option<Condition>, PanicPayload> {
    let Cleanup { label, action } = cleanup;
    let barrier = enter_barrier();
    let barrier_id = barrier.id();

    trace!(cleanup = %label, barrier = %barrier_id, "running cleanup");

    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(())) => {
            exit_barrier(barrier);
            Ok(None)
        }
        Ok(Err(unwind)) => {
            // The barrier catches everything, so it is the only possible target
            super::release(barrier);
            debug_assert_eq!(unwind.target(), barrier_id);
            Ok(Some(unwind.into_condition()))
        }
        Err(payload) => {
            warn!(cleanup = %label, barrier = %barrier_id, "cleanup panicked");
            // Drop the barrier and anything the action left inside it
            for region in with_stack(|s| s.drain_through(barrier_id)) {
                region.cleanups.run_abandoned();
            }
            Err(payload)
        }
    }
}
