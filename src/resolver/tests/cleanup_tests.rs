//! Tests for cleanup guarantees
//!
//! Every registered cleanup runs exactly once on every exit path.

use std::panic::{self, AssertUnwindSafe};

use super::helpers::{capture, Journal};
use crate::condition::{kinds, Condition};
use crate::region;
use crate::resolver::{protect, raise, Scope};

fn scope_with_cleanups<'a, T>(journal: &Journal) -> Scope<'a, T> {
    Scope::new()
        .cleanup("first", journal.recorder("first"))
        .cleanup("second", journal.recorder("second"))
}

#[test]
fn test_cleanups_run_on_normal_exit() {
    let journal = Journal::new();

    let outcome = protect(scope_with_cleanups(&journal), || {
        journal.record("body");
        Ok(1)
    });

    assert_eq!(outcome.unwrap(), 1);
    assert_eq!(journal.entries(), vec!["body", "second", "first"]);
}

#[test]
fn test_cleanups_run_before_own_handler() {
    let journal = Journal::new();

    let outcome = protect(
        scope_with_cleanups(&journal).on(kinds::IO_FAILURE, |_| {
            journal.record("handler");
            Ok(0)
        }),
        || Err(raise(Condition::fault(kinds::IO_FAILURE, "read failed"))),
    );

    assert_eq!(outcome.unwrap(), 0);
    assert_eq!(journal.entries(), vec!["second", "first", "handler"]);
}

#[test]
fn test_cleanups_run_once_on_unhandled_fault() {
    let journal = Journal::new();

    let (result, sink) = capture(|| {
        protect(scope_with_cleanups(&journal), || {
            protect(
                Scope::<()>::new().cleanup("inner", journal.recorder("inner")),
                || Err(raise(Condition::fault(kinds::NOT_FOUND, "no such key"))),
            )
        })
    });

    assert_eq!(result.unwrap_err().message(), "no such key");
    assert_eq!(journal.entries(), vec!["inner", "second", "first"]);
    assert_eq!(sink.len(), 1);
    assert_eq!(region::depth(), 0);
}

#[test]
fn test_cleanups_run_when_body_panics() {
    let journal = Journal::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        protect(scope_with_cleanups::<()>(&journal), || {
            protect(Scope::new().cleanup("inner", journal.recorder("inner")), || {
                panic!("body exploded")
            })
        })
    }));

    assert!(result.is_err());
    assert_eq!(journal.entries(), vec!["inner", "second", "first"]);
    assert_eq!(region::depth(), 0);
}

#[test]
fn test_failing_cleanup_on_normal_exit_raises_outside_region() {
    let journal = Journal::new();

    let outcome = protect(
        Scope::new().on(kinds::IO_FAILURE, |c| Ok(c.clone())),
        || {
            protect(
                Scope::new()
                    // Handlers of the exiting region do not see its own cleanup failures
                    .on(kinds::IO_FAILURE, |_| {
                        journal.record("inner handler");
                        Ok(())
                    })
                    .try_cleanup("close a", || {
                        Err(Condition::fault(kinds::IO_FAILURE, "close a failed"))
                    })
                    .try_cleanup("close b", || {
                        Err(Condition::fault(kinds::IO_FAILURE, "close b failed"))
                    }),
                || Ok(()),
            )?;
            journal.record("not reached");
            Ok(Condition::fault(kinds::IO_FAILURE, "unused"))
        },
    );

    let raised = outcome.unwrap();
    // Reverse order: b runs first and becomes the primary failure
    assert_eq!(raised.message(), "close b failed");
    let suppressed: Vec<&str> = raised.suppressed().iter().map(|c| c.message()).collect();
    assert_eq!(suppressed, vec!["close a failed"]);
    assert!(journal.entries().is_empty());
}

#[test]
fn test_cleanup_conditions_stop_at_the_barrier() {
    let journal = Journal::new();
    let recorder = journal.clone();

    let outcome = protect(
        Scope::new()
            .on_any_fault(|_| {
                journal.record("outer handler");
                Ok(())
            }),
        || {
            protect(
                Scope::new().resolving_cleanup("flush with retry", move || {
                    // A cleanup may use the resolver for its own work
                    protect(
                        Scope::new().on(kinds::TIMEOUT, |_| {
                            recorder.record("retry handled");
                            Ok(())
                        }),
                        || Err(raise(Condition::fault(kinds::TIMEOUT, "flush slow"))),
                    )
                }),
                || Ok(()),
            )
        },
    );

    assert!(outcome.is_ok());
    assert_eq!(journal.entries(), vec!["retry handled"]);
}

#[test]
fn test_defect_from_cleanup_on_exit_terminates() {
    let journal = Journal::new();

    let (result, sink) = capture(|| {
        protect(
            Scope::new().on_any_fault(|_| {
                journal.record("handler");
                Ok(())
            }),
            || {
                protect(
                    Scope::<()>::new().try_cleanup("verify", || {
                        Err(Condition::defect(kinds::INVARIANT_VIOLATION, "ledger unbalanced"))
                    }),
                    || Ok(()),
                )
            },
        )
    });

    let condition = result.unwrap_err();
    assert!(condition.is_defect());
    assert_eq!(condition.message(), "ledger unbalanced");
    assert!(journal.entries().is_empty());
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_panicking_cleanup_on_exit_leaves_stack_clean() {
    let journal = Journal::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        protect(
            Scope::<()>::new()
                .cleanup("first registered", journal.recorder("first registered"))
                .cleanup("boom", || panic!("cleanup exploded")),
            || Ok(()),
        )
    }));

    assert!(result.is_err());
    // Later registered panicked, earlier registered still ran
    assert_eq!(journal.entries(), vec!["first registered"]);
    assert_eq!(region::depth(), 0);

    // The next unhandled condition still reaches the terminator
    let (result, sink) = capture(|| {
        protect(Scope::<()>::new(), || {
            Err(raise(Condition::fault(kinds::NOT_FOUND, "nobody handles this")))
        })
    });
    assert_eq!(result.unwrap_err().message(), "nobody handles this");
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_panicking_cleanup_while_unwinding_runs_outer_cleanups() {
    let journal = Journal::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        protect(
            Scope::new()
                .on(kinds::IO_FAILURE, |_| {
                    journal.record("handler");
                    Ok(())
                })
                .cleanup("outer", journal.recorder("outer")),
            || {
                protect(
                    Scope::new()
                        .cleanup("inner a", journal.recorder("inner a"))
                        .cleanup("inner b", || panic!("cleanup exploded")),
                    || Err(raise(Condition::fault(kinds::IO_FAILURE, "write failed"))),
                )
            },
        )
    }));

    assert!(result.is_err());
    assert_eq!(journal.entries(), vec!["inner a", "outer"]);
    assert_eq!(region::depth(), 0);
}
