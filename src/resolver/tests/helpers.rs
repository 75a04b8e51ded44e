//! Test helpers for resolver tests
//!
//! A shared journal for observing execution order, and a way to run a body
//! whose unhandled condition should be captured instead of ending the test.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::condition::Condition;
use crate::context::isolate;
use crate::resolver::Resolution;
use crate::terminator::{set_thread_sink, MemorySink};

/// Ordered record of what ran
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// A cleanup action that records `entry`
    pub fn recorder(&self, entry: impl Into<String>) -> impl FnOnce() + 'static {
        let journal = self.clone();
        let entry = entry.into();
        move || journal.record(entry)
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == entry).count()
    }
}

/// Run `body` as its own execution context, capturing termination reports.
///
/// Returns the body's value, or the condition the terminator received.
pub fn capture<T>(body: impl FnOnce() -> Resolution<T>) -> (Result<T, Condition>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let _guard = set_thread_sink(sink.clone());
    let result = isolate(body);
    (result, sink)
}
