//! Static obligation analysis
//!
//! A build-time pass over a [`Manifest`] that classifies each operation's
//! conditions as checked or unchecked and verifies that every checked kind
//! is either handled by an enclosing handler or declared by the enclosing
//! operation. Nothing here is consulted at runtime.
//!
//! # Usage
//!
//! ```
//! use recourse_core::analysis::{analyze_manifest, Manifest};
//!
//! let manifest = Manifest::from_json_str(r#"{
//!     "operations": [
//!         { "name": "fetch", "body": [{ "t": "Raise", "kind": "NotFound" }] }
//!     ]
//! }"#).unwrap();
//!
//! let diagnostics = analyze_manifest(&manifest);
//! assert_eq!(diagnostics[0].rule_id, "unacknowledged-obligation");
//! ```
//!
//! # Architecture
//!
//! 1. **AnalysisRule trait** - each rule checks one aspect of a program
//! 2. **Analyzer** - runs all registered rules
//! 3. **Diagnostic** - the output (errors and warnings)
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `analysis/rules/`
//! 2. Implement `AnalysisRule` for your struct
//! 3. Add it to the `Analyzer::new()` constructor

pub mod classify;
pub mod manifest;
pub mod rules;

pub use classify::{classify, verify, verify_handler, ObligationError, ObligationTag, Program, SiteVisit, Taxonomy};
pub use manifest::{CatchDecl, HandlerDecl, KindDecl, Manifest, ManifestError, OperationDecl, Site};

use serde::Serialize;
use std::fmt;

// ============================================================================
// Diagnostics
// ============================================================================

/// Where in a manifest a diagnostic points
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    /// Enclosing operation, if any
    pub operation: Option<String>,
    /// Path inside the operation (`body[1].handlers[0].body[0]`) or the manifest
    pub path: String,
}

impl Location {
    /// A site inside an operation
    pub fn site(operation: &str, path: &str) -> Self {
        Self {
            operation: Some(operation.to_string()),
            path: path.to_string(),
        }
    }

    /// A top-level manifest entry (`kinds[2]`, `operations[0]`)
    pub fn manifest(path: impl Into<String>) -> Self {
        Self {
            operation: None,
            path: path.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Some(operation) => write!(f, "{}:{}", operation, self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// A finding produced by the analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub location: Location,
    pub message: String,
    pub severity: Severity,
    /// Which rule produced this diagnostic
    pub rule_id: &'static str,
}

/// Severity levels for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The program violates an obligation
    Error,
    /// Probably a mistake
    Warning,
}

impl Diagnostic {
    pub fn error(location: Location, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            location,
            message: message.into(),
            severity: Severity::Error,
            rule_id,
        }
    }

    pub fn warning(location: Location, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            location,
            message: message.into(),
            severity: Severity::Warning,
            rule_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl From<ObligationError> for Diagnostic {
    fn from(err: ObligationError) -> Self {
        let rule_id = match &err {
            ObligationError::UnacknowledgedObligation { .. } => rules::UnacknowledgedObligationRule::ID,
            ObligationError::InvalidHandlerRegistration { .. } => rules::InvalidHandlerRegistrationRule::ID,
        };
        Diagnostic::error(err.location().clone(), err.detail(), rule_id)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} at {}: {} [{}]", severity, self.location, self.message, self.rule_id)
    }
}

impl std::error::Error for Diagnostic {}

// ============================================================================
// AnalysisRule Trait
// ============================================================================

/// Trait that all analysis rules implement.
///
/// Rules are independent of each other and report every finding rather than
/// stopping at the first one.
pub trait AnalysisRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "unknown-reference")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    fn check(&self, program: &Program<'_>) -> Vec<Diagnostic>;
}

// ============================================================================
// Analyzer
// ============================================================================

/// Runs every registered rule over a program
pub struct Analyzer {
    rules: Vec<Box<dyn AnalysisRule>>,
}

impl Analyzer {
    /// Create an analyzer with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                // Error rules
                Box::new(rules::UnknownReferenceRule),
                Box::new(rules::InvalidHandlerRegistrationRule),
                Box::new(rules::UnacknowledgedObligationRule),
                // Warning rules
                Box::new(rules::UnusedDeclarationRule),
                Box::new(rules::UnreachableHandlerRule),
            ],
        }
    }

    pub fn analyze(&self, manifest: &Manifest) -> Vec<Diagnostic> {
        let program = Program::new(manifest);
        self.rules.iter().flat_map(|rule| rule.check(&program)).collect()
    }

    /// Registered rules as `(id, description)`
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Run every built-in rule against `manifest`
pub fn analyze_manifest(manifest: &Manifest) -> Vec<Diagnostic> {
    Analyzer::new().analyze(manifest)
}

/// True if the manifest has any error (warnings do not count)
pub fn has_errors(manifest: &Manifest) -> bool {
    analyze_manifest(manifest).iter().any(Diagnostic::is_error)
}
