//! Execution contexts
//!
//! Each execution context owns its own region stack. A sub-context starts
//! with an empty stack, and an unhandled condition inside it never unwinds
//! the parent's regions: it ends the sub-context and comes back to the
//! parent as a value, which the parent may forward explicitly (for example
//! through [`aggregate`] and [`raise`]).
//!
//! Cancellation and deadlines are collaborators that raise ordinary
//! `Cancelled` / `Timeout` conditions through the same mechanism.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::condition::{kinds, Condition};
use crate::region::{self, RegionStack, MalformedRegionNesting};
use crate::resolver::{raise, Resolution};
use crate::terminator::{self, Terminated};

/* ===================== Isolation ===================== */

/// Run `body` as a sub-context on the current thread.
///
/// The body sees an empty region stack; the caller's stack is restored
/// afterwards on every path. A termination inside the body is returned as
/// `Err` with the terminated condition. Any other panic keeps unwinding.
pub fn isolate<T>(body: impl FnOnce() -> Resolution<T>) -> Result<T, Condition> {
    let parent = region::replace_stack(RegionStack::new());
    let _restore = RestoreStack {
        parent: Some(parent),
    };

    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => Ok(value),
        // An unwind that escaped every region of the sub-context
        Ok(Err(unwind)) => Err(unwind.into_condition()),
        Err(payload) => match payload.downcast::<Terminated>() {
            Ok(terminated) => Err(terminated.into_condition()),
            Err(other) => panic::resume_unwind(other),
        },
    }
}

struct RestoreStack {
    parent: Option<RegionStack>,
}

impl Drop for RestoreStack {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            let child = region::replace_stack(parent);
            debug_assert!(child.is_empty(), "sub-context left regions behind");
        }
    }
}

/// Run `body` as a sub-context on a new thread.
///
/// The new thread inherits the caller's thread sink override.
pub fn spawn<T, F>(body: F) -> JoinHandle<Result<T, Condition>>
where
    F: FnOnce() -> Resolution<T> + Send + 'static,
    T: Send + 'static,
{
    let sink = terminator::thread_sink();

    thread::spawn(move || {
        let _sink = sink.map(terminator::set_thread_sink);
        isolate(body)
    })
}

/// Wait for spawned sub-contexts, in order.
///
/// A sub-context that died from a plain panic is reported as an `Internal`
/// defect.
pub fn join_all<T>(
    handles: impl IntoIterator<Item = JoinHandle<Result<T, Condition>>>,
) -> Vec<Result<T, Condition>> {
    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(payload) => Err(Condition::defect(
                kinds::INTERNAL,
                format!("execution context panicked: {}", panic_message(payload.as_ref())),
            )),
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(violation) = payload.downcast_ref::<MalformedRegionNesting>() {
        violation.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Combine sub-context results (delayed aggregation).
///
/// Returns every value when nothing failed. Otherwise returns a single
/// `AggregateFailure` whose suppressed list holds each failure in order.
pub fn aggregate<T>(
    results: impl IntoIterator<Item = Result<T, Condition>>,
) -> Result<Vec<T>, Condition> {
    let mut values = Vec::new();
    let mut failures = Vec::new();

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(condition) => failures.push(condition),
        }
    }

    if failures.is_empty() {
        return Ok(values);
    }

    let total = values.len() + failures.len();
    let primary = Condition::fault(
        kinds::AGGREGATE_FAILURE,
        format!("{} of {} execution contexts failed", failures.len(), total),
    );

    Err(failures
        .into_iter()
        .fold(primary, |primary, failure| primary.with_suppressed(failure)))
}

/* ===================== Cancellation ===================== */

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Shared cancellation flag.
///
/// Cancellation is observed at [`checkpoint`](CancelToken::checkpoint)s,
/// which raise a `Cancelled` fault.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `false` if it was already requested.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut stored = self.state.reason.lock().unwrap_or_else(|p| p.into_inner());
        if self.state.cancelled.load(Ordering::SeqCst) {
            return false;
        }

        let reason = reason.into();
        debug!(%reason, "cancellation requested");
        // The reason is in place before any checkpoint can observe the flag
        *stored = Some(reason);
        self.state.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.state.reason.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Raise `Cancelled` if cancellation has been requested
    pub fn checkpoint(&self) -> Resolution<()> {
        if !self.is_cancelled() {
            return Ok(());
        }

        let reason = self.reason().unwrap_or_else(|| "cancelled".to_string());
        Err(raise(Condition::fault(kinds::CANCELLED, reason)))
    }
}

/* ===================== Deadlines ===================== */

/// A point in time after which [`check`](Deadline::check) raises `Timeout`
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn check(&self) -> Resolution<()> {
        let elapsed = self.started.elapsed();
        if elapsed < self.budget {
            return Ok(());
        }

        Err(raise(Condition::fault(
            kinds::TIMEOUT,
            format!(
                "deadline of {:?} exceeded by {:?}",
                self.budget,
                elapsed - self.budget
            ),
        )))
    }
}
