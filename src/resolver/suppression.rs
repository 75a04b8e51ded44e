//! Suppression collector
//!
//! Secondary failures (typically from cleanup actions) are recorded on the
//! in-flight primary condition instead of replacing it. Identical failures
//! are all kept; the only bound is the optional `max_suppressed` cap, above
//! which the oldest entries are dropped and counted.

use std::cell::Cell;

use crate::condition::Condition;
use crate::config::Config;
use crate::init::settings;

/// Merges secondary failures into a primary condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuppressionCollector {
    max_suppressed: Option<usize>,
}

impl SuppressionCollector {
    pub fn new(max_suppressed: Option<usize>) -> Self {
        Self { max_suppressed }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Collector using `suppression.max_suppressed` of `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.suppression.max_suppressed)
    }

    /// Collector used by the engine: this thread's override if set,
    /// otherwise the active configuration
    pub fn from_settings() -> Self {
        THREAD_COLLECTOR
            .with(Cell::get)
            .unwrap_or_else(|| Self::from_config(settings()))
    }

    pub fn max_suppressed(&self) -> Option<usize> {
        self.max_suppressed
    }

    /// Return `primary` with `secondary` appended to its suppressed list.
    ///
    /// The cause chain of `primary` is moved over untouched.
    pub fn attach_suppressed(&self, mut primary: Condition, secondary: Condition) -> Condition {
        let suppressed = primary.suppressed_mut();
        suppressed.push(secondary);

        let excess = match self.max_suppressed {
            Some(cap) => suppressed.len().saturating_sub(cap),
            None => 0,
        };

        if excess > 0 {
            suppressed.drain(..excess);
            primary.note_dropped(excess);
        }

        primary
    }
}

thread_local! {
    static THREAD_COLLECTOR: Cell<Option<SuppressionCollector>> = const { Cell::new(None) };
}

/// Use `collector` for conditions raised on this thread until the guard is dropped
pub fn set_thread_collector(collector: SuppressionCollector) -> CollectorGuard {
    let previous = THREAD_COLLECTOR.with(|c| c.replace(Some(collector)));
    CollectorGuard { previous }
}

/// Restores the previous collector override on drop
#[must_use = "dropping the guard restores the previous collector"]
pub struct CollectorGuard {
    previous: Option<SuppressionCollector>,
}

impl Drop for CollectorGuard {
    fn drop(&mut self) {
        THREAD_COLLECTOR.with(|c| c.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::kinds;

    fn close_failure(n: usize) -> Condition {
        Condition::fault(kinds::IO_FAILURE, format!("close #{n} failed"))
    }

    #[test]
    fn test_attach_keeps_primary_and_cause() {
        let primary = Condition::fault(kinds::NOT_FOUND, "missing")
            .with_cause(Condition::fault(kinds::IO_FAILURE, "read"));

        let merged = SuppressionCollector::unbounded().attach_suppressed(primary, close_failure(1));

        assert_eq!(merged.message(), "missing");
        assert_eq!(merged.cause().map(|c| c.message()), Some("read"));
        assert_eq!(merged.suppressed().len(), 1);
    }

    #[test]
    fn test_duplicates_are_not_collapsed() {
        let collector = SuppressionCollector::unbounded();
        let primary = Condition::fault(kinds::IO_FAILURE, "write failed");

        let merged = collector.attach_suppressed(primary, close_failure(1));
        let merged = collector.attach_suppressed(merged, close_failure(1));

        assert_eq!(merged.suppressed().len(), 2);
        assert_eq!(merged.suppressed()[0], merged.suppressed()[1]);
    }

    #[test]
    fn test_cap_drops_oldest_first() {
        let collector = SuppressionCollector::new(Some(2));
        let merged = (1..=5).fold(
            Condition::fault(kinds::IO_FAILURE, "write failed"),
            |primary, n| collector.attach_suppressed(primary, close_failure(n)),
        );

        let messages: Vec<&str> = merged.suppressed().iter().map(|c| c.message()).collect();
        assert_eq!(messages, vec!["close #4 failed", "close #5 failed"]);
        assert_eq!(merged.suppressed_dropped(), 3);
    }

    #[test]
    fn test_zero_cap_keeps_count_only() {
        let collector = SuppressionCollector::new(Some(0));
        let merged = collector.attach_suppressed(
            Condition::fault(kinds::IO_FAILURE, "write failed"),
            close_failure(1),
        );

        assert!(merged.suppressed().is_empty());
        assert_eq!(merged.suppressed_dropped(), 1);
    }
}
