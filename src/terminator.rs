//! Default terminator
//!
//! Receives every condition that no handler accepted. It renders the
//! condition once, with its full cause and suppressed tree, to the active
//! [`DiagnosticSink`] and then ends the current execution context:
//!
//! - `unwind` (default): panics with a [`Terminated`] payload, ending the thread
//! - `abort`: aborts the process
//! - `exit`: exits the process with the configured exit code
//!
//! There is no silent drop: an unhandled fault ends its execution context
//! just like a defect does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt::{self, Write as _};
use std::io::Write;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use tracing::error;

use crate::condition::Condition;
use crate::init::{installed_sink, settings};
use crate::region::RegionId;

/* ===================== Mode ===================== */

/// How the terminator ends an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationMode {
    /// Panic with a [`Terminated`] payload (ends the thread)
    #[default]
    Unwind,
    /// Abort the process
    Abort,
    /// Exit the process with `terminator.exit_code`
    Exit,
}

/* ===================== Report ===================== */

/// Diagnostic record of an unhandled condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub incident: Uuid,
    pub raised_at: DateTime<Utc>,
    pub thread: Option<String>,
    /// Regions active where the condition was raised, innermost first
    pub frames: Vec<RegionId>,
    pub condition: Condition,
}

impl Report {
    pub fn new(condition: Condition, frames: Vec<RegionId>) -> Self {
        Self {
            incident: Uuid::new_v4(),
            raised_at: Utc::now(),
            thread: std::thread::current().name().map(str::to_owned),
            frames,
            condition,
        }
    }

    /// Render the condition tree.
    ///
    /// ```text
    /// IOFailure (fault): write failed
    ///   caused by: NotFound (fault): no such volume
    ///   suppressed: IOFailure (fault): close failed
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_condition(&mut out, &self.condition, 0, "");
        out
    }
}

fn render_condition(out: &mut String, condition: &Condition, depth: usize, label: &str) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{indent}{label}{} ({}): {}",
        condition.kind(),
        condition.family(),
        condition.message()
    );

    if let Some(cause) = condition.cause() {
        render_condition(out, cause, depth + 1, "caused by: ");
    }
    for suppressed in condition.suppressed() {
        render_condition(out, suppressed, depth + 1, "suppressed: ");
    }
    if condition.suppressed_dropped() > 0 {
        let _ = writeln!(
            out,
            "{indent}  ({} more suppressed dropped)",
            condition.suppressed_dropped()
        );
    }
}

/* ===================== Sinks ===================== */

/// Receives the report of every terminated execution context
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, report: &Report);
}

/// Emits one structured `tracing` error event per report
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, report: &Report) {
        error!(
            incident = %report.incident,
            kind = %report.condition.kind(),
            family = %report.condition.family(),
            frames = ?report.frames,
            suppressed = report.condition.suppressed().len(),
            thread = report.thread.as_deref().unwrap_or("<unnamed>"),
            "unhandled condition\n{}",
            report.render()
        );
    }
}

/// Writes each report as one JSON line
pub struct JsonSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> DiagnosticSink for JsonSink<W> {
    fn emit(&self, report: &Report) {
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let written = serde_json::to_writer(&mut *writer, report)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(writer))
            .and_then(|()| writer.flush());

        if let Err(err) = written {
            // Fall back so the report is not lost
            error!(incident = %report.incident, error = %err, "failed to write report");
            TracingSink.emit(report);
        }
    }
}

/// Keeps reports in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, report: &Report) {
        self.reports
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(report.clone());
    }
}

thread_local! {
    static THREAD_SINK: RefCell<Option<Arc<dyn DiagnosticSink>>> = const { RefCell::new(None) };
}

/// Route this thread's reports to `sink` until the guard is dropped
pub fn set_thread_sink(sink: Arc<dyn DiagnosticSink>) -> SinkGuard {
    let previous = THREAD_SINK.with(|s| s.borrow_mut().replace(sink));
    SinkGuard { previous }
}

/// The sink override of this thread, if any
pub fn thread_sink() -> Option<Arc<dyn DiagnosticSink>> {
    THREAD_SINK.with(|s| s.borrow().clone())
}

/// Restores the previous thread sink on drop
#[must_use = "dropping the guard restores the previous sink"]
pub struct SinkGuard {
    previous: Option<Arc<dyn DiagnosticSink>>,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        THREAD_SINK.with(|s| *s.borrow_mut() = previous);
    }
}

/// Thread override, then the sink installed at initialization, then tracing
fn current_sink() -> Arc<dyn DiagnosticSink> {
    thread_sink()
        .or_else(installed_sink)
        .unwrap_or_else(|| Arc::new(TracingSink))
}

/* ===================== Termination ===================== */

/// Panic payload of a terminated execution context (`unwind` mode)
#[derive(Debug)]
pub struct Terminated {
    report: Box<Report>,
}

impl Terminated {
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn into_report(self) -> Report {
        *self.report
    }

    pub fn into_condition(self) -> Condition {
        self.report.condition
    }
}

impl fmt::Display for Terminated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "execution context terminated by unhandled condition {} (incident {})",
            self.report.condition, self.report.incident
        )
    }
}

/// Render `condition` and end the current execution context
pub fn terminate(condition: Condition, frames: Vec<RegionId>) -> ! {
    let report = Report::new(condition, frames);
    current_sink().emit(&report);

    let terminator = &settings().terminator;
    match terminator.mode {
        TerminationMode::Unwind => std::panic::panic_any(Terminated {
            report: Box::new(report),
        }),
        TerminationMode::Abort => std::process::abort(),
        TerminationMode::Exit => std::process::exit(terminator.exit_code),
    }
}
