//! # Resolver
//!
//! Walks the region stack for a raised [`Condition`] and decides where
//! control resumes.
//!
//! ## Algorithm
//!
//! For each frame, innermost first:
//!
//! 1. Pop the frame and run its cleanups (reverse registration order).
//!    This happens *before* its handlers are tested, whether or not the
//!    frame ends up handling the condition.
//! 2. A cleanup failure is appended to the condition's suppressed list;
//!    the original condition keeps propagating.
//! 3. Test the frame's handlers in declaration order. The first match wins,
//!    even if a later handler is more specific.
//! 4. On a match, stop. The returned [`Unwind`] travels back up the Rust
//!    call stack (via `?`) to the [`protect`] call that owns the frame,
//!    which runs the handler action and resumes after the region.
//!
//! If no frame matches, the stack is empty and the condition is handed to
//! the [terminator](crate::terminator).
//!
//! Defects (and faults carrying a suppressed defect) still run every
//! cleanup on the way but are never offered to a handler.

mod handler;
pub mod suppression;

#[cfg(test)]
mod tests;

pub use handler::{Catch, HandlerFn, Scope};
pub use suppression::SuppressionCollector;

use std::error::Error;
use std::fmt;

use tracing::{debug, trace, warn};

use crate::condition::{kinds, Condition};
use crate::region::{self, RegionId};
use crate::terminator;

/* ===================== Unwind ===================== */

/// A condition on its way to the handler that accepted it.
///
/// Produced by [`raise`]; must be returned (usually with `?`) until it
/// reaches the [`protect`] call that owns the target region.
#[must_use = "an unwind must be returned to the enclosing `protect`"]
#[derive(Debug)]
pub struct Unwind {
    region: RegionId,
    handler: usize,
    condition: Condition,
}

impl Unwind {
    /// Region whose handler accepted the condition
    pub fn target(&self) -> RegionId {
        self.region
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn into_condition(self) -> Condition {
        self.condition
    }
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unwinding to {}: {}", self.region, self.condition)
    }
}

impl Error for Unwind {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.condition)
    }
}

/// Either the normal result of a body or an unwind in progress
pub type Resolution<T> = Result<T, Unwind>;

/* ===================== raise ===================== */

/// Raise a condition from the current point of execution.
///
/// Returns the [`Unwind`] addressed to the matching handler's region. When
/// nothing on the stack matches, this does not return: the terminator
/// renders the condition and ends the execution context.
pub fn raise(condition: Condition) -> Unwind {
    let origin = region::current_frames();
    debug!(
        kind = %condition.kind(),
        family = %condition.family(),
        depth = origin.len(),
        "raise"
    );

    let collector = SuppressionCollector::from_settings();
    let mut condition = condition;

    loop {
        let Some(frame) = region::with_stack(|s| s.pop_innermost()) else {
            terminator::terminate(condition, origin);
        };

        let cleanups = frame.cleanups;
        let had_cleanups = !cleanups.is_empty();

        // Cleanup runs before this frame's handlers are consulted
        for failure in cleanups.run() {
            warn!(
                region = %frame.id,
                kind = %failure.kind(),
                message = failure.message(),
                "cleanup failed while unwinding"
            );
            condition = collector.attach_suppressed(condition, failure);
        }

        if let Some(handler) = frame.guard.select(&condition) {
            trace!(region = %frame.id, handler, "handler selected");
            return Unwind {
                region: frame.id,
                handler,
                condition,
            };
        }

        trace!(region = %frame.id, had_cleanups, "no handler, continuing outward");
    }
}

/* ===================== protect ===================== */

/// Run `body` inside a new protected region.
///
/// The region is exited on every path: normal return, a condition handled
/// here, a condition propagating further out, or a panic. A condition
/// handled here resumes execution right after this call with the value the
/// handler produced.
///
/// ```
/// use recourse_core::{kinds, protect, raise, Condition, Scope};
///
/// let size = protect(
///     Scope::new().on(kinds::IO_FAILURE, |_| Ok(0)),
///     || Err(raise(Condition::fault(kinds::IO_FAILURE, "disk unplugged"))),
/// );
///
/// assert_eq!(size.unwrap(), 0);
/// ```
pub fn protect<'a, T>(scope: Scope<'a, T>, body: impl FnOnce() -> Resolution<T>) -> Resolution<T> {
    let Scope { handlers, cleanups } = scope;
    let catches = handlers.iter().map(|h| h.catch.clone()).collect();

    let handle = region::enter(catches, cleanups);
    let id = handle.id();

    let outcome = {
        let _exit_on_panic = ExitOnPanic { region: id };
        body()
    };

    match outcome {
        Ok(value) => {
            region::exit(handle)?;
            Ok(value)
        }
        Err(unwind) if unwind.region == id => {
            region::release(handle);
            dispatch(handlers, unwind)
        }
        Err(unwind) => {
            // Propagation already popped this region on its way out
            region::release(handle);
            Err(unwind)
        }
    }
}

/// Run the handler an unwind was addressed to
fn dispatch<T>(handlers: Vec<handler::Handler<'_, T>>, unwind: Unwind) -> Resolution<T> {
    let Unwind {
        region,
        handler: index,
        condition,
    } = unwind;

    let Some(handler) = handlers.into_iter().nth(index) else {
        let defect = Condition::defect(
            kinds::INTERNAL,
            format!("region {region} has no handler #{index}"),
        )
        .with_cause(condition);
        return Err(raise(defect));
    };

    debug!(region = %region, handler = index, catch = %handler.catch, kind = %condition.kind(), "handling condition");

    match (handler.action)(&condition) {
        Ok(value) => Ok(value),
        Err(fresh) => {
            // A handler failure is a fresh raise, chained to what it handled.
            // A rethrow, or a chain that already holds the handled condition, stays as is.
            let fresh = if fresh == condition || fresh.causes().any(|c| *c == condition) {
                fresh
            } else {
                fresh.with_root_cause(condition)
            };
            Err(raise(fresh))
        }
    }
}

/// Exits the region if a Rust panic unwinds through `protect`
struct ExitOnPanic {
    region: RegionId,
}

impl Drop for ExitOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            region::abandon(self.region);
        }
    }
}
