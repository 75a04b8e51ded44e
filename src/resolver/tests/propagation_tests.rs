//! Tests for handler search and control transfer

use std::cell::Cell;
use std::rc::Rc;

use super::helpers::Journal;
use crate::condition::{kinds, Condition, Kind};
use crate::region;
use crate::resolver::{protect, raise, Catch, Resolution, Scope};

#[test]
fn test_normal_exit_returns_body_value() {
    let value = protect(Scope::<i32>::new(), || Ok(41 + 1));

    assert_eq!(value.unwrap(), 42);
    assert_eq!(region::depth(), 0);
}

#[test]
fn test_nested_regions_resume_after_matching_region() {
    // R1 contains R2 contains R3; R3 releases a counter, R2 handles IOFailure
    let journal = Journal::new();
    let counter = Rc::new(Cell::new(1));

    let outcome = protect(
        Scope::new()
            .on(kinds::NOT_FOUND, |_| Ok("r1 handled"))
            .cleanup("r1", journal.recorder("r1 cleanup")),
        || {
            let resumed = protect(
                Scope::new().on(kinds::IO_FAILURE, |c| {
                    journal.record(format!("r2 handler: {}", c.message()));
                    Ok(true)
                }),
                || {
                    let counter = counter.clone();
                    let released = journal.recorder("r3 cleanup");
                    protect(
                        Scope::new().cleanup("release counter", move || {
                            counter.set(counter.get() - 1);
                            released();
                        }),
                        || Err(raise(Condition::fault(kinds::IO_FAILURE, "disk gone"))),
                    )
                },
            )?;

            journal.record("after r2");
            // Only R1 is still active
            assert_eq!(region::depth(), 1);
            Ok(if resumed { "r2 resumed" } else { "r3 finished" })
        },
    );

    assert_eq!(outcome.unwrap(), "r2 resumed");
    assert_eq!(
        journal.entries(),
        vec!["r3 cleanup", "r2 handler: disk gone", "after r2", "r1 cleanup"]
    );
    assert_eq!(counter.get(), 0);
    assert_eq!(region::depth(), 0);
}

/// Enter `levels` nested regions without handlers, each with two cleanups, then raise
fn nest(level: usize, levels: usize, journal: &Journal) -> Resolution<()> {
    if level > levels {
        journal.record("raise");
        return Err(raise(Condition::fault(kinds::IO_FAILURE, "deep failure")));
    }

    protect(
        Scope::new()
            .cleanup("a", journal.recorder(format!("r{level}-a")))
            .cleanup("b", journal.recorder(format!("r{level}-b"))),
        || nest(level + 1, levels, journal),
    )
}

#[test]
fn test_inner_cleanups_run_before_outer_handler() {
    let journal = Journal::new();

    let outcome = protect(
        Scope::new()
            .on(kinds::IO_FAILURE, |_| {
                journal.record("handler");
                Ok(())
            })
            .cleanup("a", journal.recorder("r1-a"))
            .cleanup("b", journal.recorder("r1-b")),
        || nest(2, 4, &journal),
    );

    assert!(outcome.is_ok());
    assert_eq!(
        journal.entries(),
        vec![
            "raise", "r4-b", "r4-a", "r3-b", "r3-a", "r2-b", "r2-a", "r1-b", "r1-a", "handler"
        ]
    );
}

#[test]
fn test_first_match_wins_over_most_specific() {
    let outcome = protect(
        Scope::new()
            .handle(Catch::any_fault(), |_| Ok("broad"))
            .on(kinds::IO_FAILURE, |_| Ok("narrow")),
        || Err(raise(Condition::fault(kinds::IO_FAILURE, "read failed"))),
    );

    assert_eq!(outcome.unwrap(), "broad");
}

#[test]
fn test_later_handler_matches_when_earlier_does_not() {
    let outcome = protect(
        Scope::new()
            .on(kinds::NOT_FOUND, |_| Ok("not found"))
            .handle(Catch::one_of([kinds::TIMEOUT, kinds::IO_FAILURE]), |c| {
                Ok(if c.message() == "slow disk" { "one of" } else { "other" })
            }),
        || Err(raise(Condition::fault(kinds::IO_FAILURE, "slow disk"))),
    );

    assert_eq!(outcome.unwrap(), "one of");
}

#[test]
fn test_unmatched_inner_region_passes_condition_outward() {
    let journal = Journal::new();

    let outcome = protect(
        Scope::new().on_any_fault(|c| Ok(format!("outer got {}", c.kind()))),
        || {
            protect(
                Scope::new().on(kinds::NOT_FOUND, |_| {
                    journal.record("inner handler");
                    Ok(String::from("inner"))
                }),
                || Err(raise(Condition::fault(kinds::INVALID_INPUT, "bad header"))),
            )
        },
    );

    assert_eq!(outcome.unwrap(), "outer got InvalidInput");
    assert!(journal.entries().is_empty());
}

#[test]
fn test_handler_failure_is_raised_with_original_as_cause() {
    let journal = Journal::new();

    let outcome = protect(
        Scope::new().on(kinds::NOT_FOUND, |c| Ok(c.clone())),
        || {
            protect(
                Scope::new()
                    .on(kinds::IO_FAILURE, |_| {
                        Err(Condition::fault(kinds::NOT_FOUND, "no cached copy"))
                    })
                    .cleanup("inner", journal.recorder("inner cleanup")),
                || Err(raise(Condition::fault(kinds::IO_FAILURE, "disk gone"))),
            )
        },
    );

    let handled = outcome.unwrap();
    assert_eq!(handled.message(), "no cached copy");
    let cause = handled.cause().unwrap();
    assert_eq!(cause.kind(), &Kind::from(kinds::IO_FAILURE));
    assert_eq!(cause.message(), "disk gone");
    assert_eq!(journal.count("inner cleanup"), 1);
}

#[test]
fn test_handler_rethrow_keeps_condition_intact() {
    let outcome = protect(
        Scope::new().on(kinds::IO_FAILURE, |c| Ok(c.clone())),
        || {
            protect(
                Scope::new().on(kinds::IO_FAILURE, |c| Err(c.clone())),
                || {
                    Err(raise(
                        Condition::fault(kinds::IO_FAILURE, "write failed")
                            .with_cause(Condition::fault(kinds::NOT_FOUND, "no volume")),
                    ))
                },
            )
        },
    );

    let handled = outcome.unwrap();
    assert_eq!(handled.message(), "write failed");
    // Rethrowing the same condition does not chain it to itself
    assert_eq!(handled.causes().count(), 1);
    assert_eq!(handled.root_cause().message(), "no volume");
}

#[test]
fn test_handler_may_return_explicit_cause() {
    let outcome = protect(
        Scope::new().on_any_fault(|c| Ok(c.clone())),
        || {
            protect(
                Scope::new().on(kinds::IO_FAILURE, |_| {
                    Err(Condition::fault(kinds::INVALID_INPUT, "retry budget spent")
                        .with_cause(Condition::fault(kinds::TIMEOUT, "third attempt")))
                }),
                || Err(raise(Condition::fault(kinds::IO_FAILURE, "first attempt"))),
            )
        },
    );

    let handled = outcome.unwrap();
    // The explicit cause comes first, the handled condition sits at the root
    let causes: Vec<&str> = handled.causes().map(|c| c.message()).collect();
    assert_eq!(causes, vec!["third attempt", "first attempt"]);
    assert!(handled.suppressed().is_empty());
}

#[test]
fn test_handler_chaining_handled_condition_is_not_duplicated() {
    let outcome = protect(
        Scope::new().on_any_fault(|c| Ok(c.clone())),
        || {
            protect(
                Scope::new().on(kinds::IO_FAILURE, |c| {
                    Err(Condition::fault(kinds::NOT_FOUND, "no replica").with_cause(c.clone()))
                }),
                || Err(raise(Condition::fault(kinds::IO_FAILURE, "primary down"))),
            )
        },
    );

    let handled = outcome.unwrap();
    let causes: Vec<&str> = handled.causes().map(|c| c.message()).collect();
    assert_eq!(causes, vec!["primary down"]);
}

#[test]
fn test_sequential_regions_are_independent() {
    for attempt in 0..3 {
        let outcome = protect(
            Scope::new().on(kinds::TIMEOUT, |_| Ok(attempt)),
            || {
                if attempt % 2 == 0 {
                    Err(raise(Condition::fault(kinds::TIMEOUT, "slow")))
                } else {
                    Ok(attempt * 10)
                }
            },
        );

        let expected = if attempt % 2 == 0 { attempt } else { attempt * 10 };
        assert_eq!(outcome.unwrap(), expected);
        assert_eq!(region::depth(), 0);
    }
}
